//! iprestrict - ranked URL/IP access rules for request pipelines.
//!
//! This crate decides, for a request path and a client address, whether
//! access is allowed or restricted. Administrators maintain an ordered list
//! of rules; the first rule whose URL pattern and IP group both match the
//! request decides.
//!
//! # Features
//!
//! - **URL patterns**: regular expressions searched for in the request path
//! - **Range groups**: single addresses, inclusive ranges and CIDR blocks,
//!   IPv4 and IPv6 kept apart
//! - **Location groups**: country codes resolved through a pluggable
//!   geolocator (MaxMind databases supported)
//! - **Ranked rules**: explicit integer ranks with move up/down
//! - **Hot reload**: rules and groups are republished atomically while
//!   requests keep being evaluated
//!
//! # Quick Start
//!
//! ```
//! use iprestrict::group::{IpMatcher, IpRange, RangeGroup};
//! use iprestrict::{Action, NewRule, Restrictor};
//! use std::sync::Arc;
//!
//! let restrictor = Restrictor::allow_all()?;
//!
//! let internal = Arc::new(RangeGroup::new("internal"));
//! internal.add_range(IpRange::cidr("10.0.0.0", 8))?;
//! internal.load()?;
//! restrictor.rules().groups().register(internal)?;
//!
//! restrictor
//!     .rules()
//!     .create(NewRule::new("^/admin/", "internal", Action::Deny))?;
//!
//! assert!(restrictor.is_restricted("/admin/x", "10.1.2.3"));
//! assert!(!restrictor.is_restricted("/admin/x", "8.8.8.8"));
//! assert!(!restrictor.is_restricted("/public", "10.1.2.3"));
//! # Ok::<(), iprestrict::Error>(())
//! ```
//!
//! # Configuration
//!
//! Groups and rules can be read from YAML or JSON, see [`RestrictConfig`]:
//!
//! ```ignore
//! let restrictor = iprestrict::Restrictor::from_path("/etc/iprestrict.yaml")?;
//! ```
//!
//! # Evaluation Order
//!
//! 1. Rules by ascending rank (ties by creation order)
//! 2. The default rule (`.*` from the `ALL` group, allow), created with
//!    rank 65536 so new rules land before it
//!
//! An address that does not parse, or a failed geolocation lookup, never
//! matches a group; it is not an error.

mod action;
mod error;
mod global;
mod restrictor;

pub mod geoip;
pub mod group;
pub mod rule;
pub mod ruleset;
pub mod store;

// Re-export core types
pub use action::Action;
pub use error::{Error, Result};
pub use restrictor::Restrictor;

pub use group::{GroupKind, GroupRegistry, IpMatcher, ALL_GROUP};
pub use rule::{NewRule, RuleId, RuleRecord};
pub use ruleset::{RestrictConfig, RuleMatch, RuleSet};
pub use store::{MemoryRuleStore, RuleStore};

// Re-export global API functions
pub use global::{
    current, ensure_initialized, install, install_from_path, is_initialized, is_restricted,
    reload,
};
