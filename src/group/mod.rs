//! IP groups: named, reusable matchers over client addresses.

pub mod location;
pub mod range;

pub use location::{IpLocation, LocationGroup};
pub use range::{IpRange, RangeGroup};

use ahash::AHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Name of the built-in group matching every IPv4 and IPv6 address.
pub const ALL_GROUP: &str = "ALL";

/// IpMatcher is the interface every IP group implements.
///
/// Rules hold an `Arc<dyn IpMatcher>` and never need to know which kind of
/// group they point at. A group may be shared by any number of rules.
pub trait IpMatcher: Send + Sync {
    /// Name the group is registered under.
    fn name(&self) -> &str;

    /// Kind of this group.
    fn kind(&self) -> GroupKind;

    /// Check whether a client address belongs to this group.
    ///
    /// Never fails: an address that cannot be parsed or resolved
    /// simply does not match.
    fn matches(&self, ip: &str) -> bool;

    /// Compile the configured entries without publishing them.
    ///
    /// The configured entries stay locked against changes until the
    /// returned load is committed or dropped.
    fn prepare(&self) -> Result<PreparedLoad<'_>>;

    /// Compile the configured entries into the form used by `matches`.
    ///
    /// Can be called again at any time to pick up configuration changes.
    /// Readers observe either the old or the new compiled form.
    fn load(&self) -> Result<()> {
        self.prepare()?.commit();
        Ok(())
    }
}

/// A compiled group waiting to be published.
pub struct PreparedLoad<'a> {
    publish: Box<dyn FnOnce() + 'a>,
}

impl<'a> PreparedLoad<'a> {
    /// Wrap the step that swaps the compiled form in.
    pub fn new(publish: impl FnOnce() + 'a) -> Self {
        Self {
            publish: Box::new(publish),
        }
    }

    /// Publish the compiled form.
    pub fn commit(self) {
        (self.publish)()
    }
}

impl fmt::Debug for PreparedLoad<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedLoad").finish_non_exhaustive()
    }
}

/// GroupKind distinguishes the IP group variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Explicit address ranges and CIDR blocks
    Range,
    /// Country codes resolved through geolocation
    Location,
}

impl GroupKind {
    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Range => "range",
            GroupKind::Location => "location",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// GroupRegistry resolves group names used by rules to live matchers.
///
/// The built-in [`ALL_GROUP`] is always present.
pub struct GroupRegistry {
    groups: RwLock<AHashMap<String, Arc<dyn IpMatcher>>>,
}

impl GroupRegistry {
    /// Create a registry holding only the built-in `ALL` group.
    pub fn new() -> Self {
        let mut groups: AHashMap<String, Arc<dyn IpMatcher>> = AHashMap::new();
        groups.insert(ALL_GROUP.to_string(), Arc::new(RangeGroup::all()));
        Self {
            groups: RwLock::new(groups),
        }
    }

    /// Register a group under its own name.
    pub fn register(&self, group: Arc<dyn IpMatcher>) -> Result<()> {
        let mut groups = self.groups.write();
        if groups.contains_key(group.name()) {
            return Err(Error::DuplicateGroup(group.name().to_string()));
        }
        groups.insert(group.name().to_string(), group);
        Ok(())
    }

    /// Look up a group by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn IpMatcher>> {
        self.groups.read().get(name).cloned()
    }

    /// Check if a group with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.groups.read().contains_key(name)
    }

    /// Registered group names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Always false, the `ALL` group cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (Re)load every registered group.
    ///
    /// All groups are compiled before any is published. If one fails,
    /// every group keeps its previous state.
    pub fn load_all(&self) -> Result<()> {
        let mut groups: Vec<(String, Arc<dyn IpMatcher>)> = self
            .groups
            .read()
            .iter()
            .map(|(name, group)| (name.clone(), group.clone()))
            .collect();
        // Fixed order so concurrent callers lock entries the same way
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        let prepared = groups
            .iter()
            .map(|(_, group)| group.prepare())
            .collect::<Result<Vec<_>>>()?;
        for load in prepared {
            load.commit();
        }
        log::debug!("Loaded {} groups", groups.len());
        Ok(())
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.names())
            .finish()
    }
}
