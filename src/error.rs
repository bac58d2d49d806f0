//! Error types for iprestrict.

use thiserror::Error;

use crate::rule::RuleId;

/// Error type for iprestrict operations.
///
/// Everything here is raised while building or changing configuration.
/// Evaluating a request never fails: an unparseable client address or a
/// failed geolocation lookup simply does not match.
#[derive(Error, Debug)]
pub enum Error {
    /// URL pattern is not a valid regular expression
    #[error("invalid URL pattern {pattern:?}: {source}")]
    InvalidUrlPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// CIDR prefix length too long for the address family
    #[error("invalid CIDR prefix length /{prefix} for {ip}")]
    InvalidPrefixLength { ip: String, prefix: u8 },

    /// Range bounds that cannot describe a range
    #[error("invalid IP range: {0}")]
    InvalidRange(String),

    /// Rule refers to an IP group that is not registered
    #[error("unknown IP group: {0}")]
    UnknownGroup(String),

    /// Two IP groups registered under the same name
    #[error("IP group already registered: {0}")]
    DuplicateGroup(String),

    /// No rule with this id
    #[error("unknown rule: {0}")]
    UnknownRule(RuleId),

    /// No global restrictor installed
    #[error("restrictor not initialized")]
    NotInitialized,

    /// GeoIP database error
    #[error("GeoIP error: {0}")]
    GeoIp(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for iprestrict operations.
pub type Result<T> = std::result::Result<T, Error>;
