//! Range-based IP group: explicit address ranges and CIDR blocks.

use arc_swap::ArcSwap;
use ipnet::{Ipv4Net, Ipv6Net};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use super::{GroupKind, IpMatcher, PreparedLoad, ALL_GROUP};
use crate::error::{Error, Result};

/// One configured entry of a [`RangeGroup`].
///
/// - `first_ip` alone is the single address.
/// - `first_ip` + `last_ip` is the inclusive span between them.
/// - `first_ip` + `cidr_prefix_length` is the block `first_ip/prefix`. The
///   mask is applied to `first_ip` as given, so `192.168.1.2/30` covers
///   `192.168.1.0` to `192.168.1.3`. The prefix wins over `last_ip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub first_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_prefix_length: Option<u8>,
}

/// Numeric bounds of one range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bounds {
    V4(u32, u32),
    V6(u128, u128),
}

impl IpRange {
    /// A range holding exactly one address.
    pub fn single(ip: impl Into<String>) -> Self {
        Self {
            first_ip: ip.into(),
            last_ip: None,
            cidr_prefix_length: None,
        }
    }

    /// An inclusive range from `first` to `last`.
    pub fn span(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first_ip: first.into(),
            last_ip: Some(last.into()),
            cidr_prefix_length: None,
        }
    }

    /// A CIDR block.
    pub fn cidr(first: impl Into<String>, prefix: u8) -> Self {
        Self {
            first_ip: first.into(),
            last_ip: None,
            cidr_prefix_length: Some(prefix),
        }
    }

    fn bounds(&self) -> Result<Bounds> {
        let first = parse_ip(&self.first_ip)?;

        if let Some(prefix) = self.cidr_prefix_length {
            let invalid = || Error::InvalidPrefixLength {
                ip: self.first_ip.clone(),
                prefix,
            };
            return match first {
                IpAddr::V4(addr) => {
                    let net = Ipv4Net::new(addr, prefix).map_err(|_| invalid())?;
                    Ok(Bounds::V4(net.network().into(), net.broadcast().into()))
                }
                IpAddr::V6(addr) => {
                    let net = Ipv6Net::new(addr, prefix).map_err(|_| invalid())?;
                    Ok(Bounds::V6(net.network().into(), net.broadcast().into()))
                }
            };
        }

        let last = match &self.last_ip {
            Some(last) => parse_ip(last)?,
            None => first,
        };

        let bounds = match (first, last) {
            (IpAddr::V4(lo), IpAddr::V4(hi)) => Bounds::V4(lo.into(), hi.into()),
            (IpAddr::V6(lo), IpAddr::V6(hi)) => Bounds::V6(lo.into(), hi.into()),
            _ => {
                return Err(Error::InvalidRange(format!(
                    "{first} and {last} are different address families"
                )))
            }
        };

        let reversed = match bounds {
            Bounds::V4(lo, hi) => lo > hi,
            Bounds::V6(lo, hi) => lo > hi,
        };
        if reversed {
            return Err(Error::InvalidRange(format!("{last} is before {first}")));
        }

        Ok(bounds)
    }
}

fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim()
        .parse()
        .map_err(|_| Error::InvalidIpAddress(ip.to_string()))
}

/// Compiled form: disjoint, ascending ranges per address family.
#[derive(Debug, Default)]
struct CompiledRanges {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl CompiledRanges {
    fn compile(ranges: &[IpRange]) -> Result<Self> {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for range in ranges {
            match range.bounds()? {
                Bounds::V4(lo, hi) => v4.push((lo, hi)),
                Bounds::V6(lo, hi) => v6.push((lo, hi)),
            }
        }
        Ok(Self {
            v4: merge(v4),
            v6: merge(v6),
        })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => contains(&self.v4, u32::from(v4)),
            IpAddr::V6(v6) => contains(&self.v6, u128::from(v6)),
        }
    }
}

/// Sort ranges and fold overlapping ones together so that a binary
/// search on the lower bound finds the only candidate.
fn merge<T: Ord + Copy>(mut ranges: Vec<(T, T)>) -> Vec<(T, T)> {
    ranges.sort_unstable();
    let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match merged.last_mut() {
            Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

fn contains<T: Ord + Copy>(ranges: &[(T, T)], ip: T) -> bool {
    let idx = ranges.partition_point(|&(lo, _)| lo <= ip);
    idx > 0 && ip <= ranges[idx - 1].1
}

/// RangeGroup matches client addresses against explicit ranges.
///
/// IPv4 and IPv6 ranges are kept apart: `::1` never matches a group that
/// only holds `0.0.0.1`, and IPv4-mapped IPv6 addresses are treated as
/// IPv6.
///
/// # Examples
/// ```
/// use iprestrict::group::{IpMatcher, IpRange, RangeGroup};
///
/// let group = RangeGroup::new("local");
/// group.add_range(IpRange::cidr("10.0.0.0", 8)).unwrap();
/// group.add_range(IpRange::span("192.168.1.1", "192.168.1.10")).unwrap();
/// group.load().unwrap();
///
/// assert!(group.matches("10.20.30.40"));
/// assert!(!group.matches("192.168.1.11"));
/// ```
pub struct RangeGroup {
    name: String,
    /// Configured entries, compiled on `load`
    ranges: RwLock<Vec<IpRange>>,
    compiled: ArcSwap<CompiledRanges>,
}

impl RangeGroup {
    /// Create an empty group. It matches nothing until loaded with ranges.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranges: RwLock::new(Vec::new()),
            compiled: ArcSwap::from_pointee(CompiledRanges::default()),
        }
    }

    /// Create an unloaded group with the given entries.
    pub fn with_ranges(name: impl Into<String>, ranges: Vec<IpRange>) -> Self {
        let group = Self::new(name);
        *group.ranges.write() = ranges;
        group
    }

    /// The built-in group covering every IPv4 and IPv6 address, already loaded.
    pub fn all() -> Self {
        let group = Self::with_ranges(
            ALL_GROUP,
            vec![IpRange::cidr("0.0.0.0", 0), IpRange::cidr("::", 0)],
        );
        group.compiled.store(Arc::new(CompiledRanges {
            v4: vec![(0, u32::MAX)],
            v6: vec![(0, u128::MAX)],
        }));
        group
    }

    /// Add an entry after validating it. Takes effect on the next `load`.
    pub fn add_range(&self, range: IpRange) -> Result<()> {
        range.bounds()?;
        self.ranges.write().push(range);
        Ok(())
    }

    /// Replace all entries. They are validated on the next `load`.
    pub fn set_ranges(&self, ranges: Vec<IpRange>) {
        *self.ranges.write() = ranges;
    }

    /// Get a copy of the configured entries.
    pub fn ranges(&self) -> Vec<IpRange> {
        self.ranges.read().clone()
    }

    /// Get the number of compiled IPv4 ranges (after merging overlaps).
    pub fn v4_count(&self) -> usize {
        self.compiled.load().v4.len()
    }

    /// Get the number of compiled IPv6 ranges (after merging overlaps).
    pub fn v6_count(&self) -> usize {
        self.compiled.load().v6.len()
    }

    /// Check a parsed address against the loaded ranges.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.compiled.load().contains(ip)
    }
}

impl IpMatcher for RangeGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GroupKind {
        GroupKind::Range
    }

    fn matches(&self, ip: &str) -> bool {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.contains(addr),
            Err(_) => false,
        }
    }

    fn prepare(&self) -> Result<PreparedLoad<'_>> {
        let ranges = self.ranges.read();
        let compiled = CompiledRanges::compile(&ranges)?;
        Ok(PreparedLoad::new(move || {
            log::debug!(
                "Loaded range group {}: {} IPv4 and {} IPv6 ranges",
                self.name,
                compiled.v4.len(),
                compiled.v6.len()
            );
            self.compiled.store(Arc::new(compiled));
            drop(ranges);
        }))
    }
}
