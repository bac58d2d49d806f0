//! Rules: a URL pattern, an IP group and an action, at a rank.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::group::{IpMatcher, ALL_GROUP};
use crate::Action;

/// Opaque rule identity, assigned by the rule store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A stored rule, as the rule store keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: RuleId,
    /// Regular expression searched for in the request path
    pub url_pattern: String,
    /// Name of the IP group
    pub ip_group: String,
    pub action: Action,
    /// Lower ranks are evaluated first
    pub rank: u32,
}

impl RuleRecord {
    pub fn is_allowed(&self) -> bool {
        self.action.is_allowed()
    }

    pub fn is_restricted(&self) -> bool {
        self.action.is_restricted()
    }
}

/// Input for creating a rule. Without a rank one is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub url_pattern: String,
    #[serde(default = "default_ip_group")]
    pub ip_group: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

fn default_ip_group() -> String {
    ALL_GROUP.to_string()
}

impl NewRule {
    pub fn new(url_pattern: impl Into<String>, ip_group: impl Into<String>, action: Action) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            ip_group: ip_group.into(),
            action,
            rank: None,
        }
    }

    /// Use an explicit rank instead of the next free one.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }
}

/// A rule ready for evaluation: compiled pattern plus a live reference
/// to its IP group.
pub struct Rule {
    record: RuleRecord,
    pattern: Regex,
    ip_group: Arc<dyn IpMatcher>,
}

impl Rule {
    /// Compile a stored rule against its resolved IP group.
    pub fn compile(record: RuleRecord, ip_group: Arc<dyn IpMatcher>) -> Result<Self> {
        let pattern = compile_pattern(&record.url_pattern)?;
        Ok(Self {
            record,
            pattern,
            ip_group,
        })
    }

    /// Check whether the pattern is found anywhere in `path`.
    ///
    /// Anchoring is up to the pattern: `^/pre/[a-d]+[/]?$` accepts
    /// `/pre/a/` but not `/pre/a//`, while `admin` accepts `/x/admin/y`.
    pub fn matches_url(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// Check whether the client address belongs to this rule's IP group.
    pub fn matches_ip(&self, ip: &str) -> bool {
        self.ip_group.matches(ip)
    }

    /// Check both the URL and the IP group. The URL is checked first so
    /// that geolocation is only consulted for paths the rule covers.
    pub fn matches(&self, path: &str, ip: &str) -> bool {
        self.matches_url(path) && self.matches_ip(ip)
    }

    pub fn is_allowed(&self) -> bool {
        self.record.is_allowed()
    }

    pub fn is_restricted(&self) -> bool {
        self.record.is_restricted()
    }

    pub fn id(&self) -> RuleId {
        self.record.id
    }

    pub fn rank(&self) -> u32 {
        self.record.rank
    }

    pub fn action(&self) -> Action {
        self.record.action
    }

    pub fn record(&self) -> &RuleRecord {
        &self.record
    }

    pub fn ip_group(&self) -> &Arc<dyn IpMatcher> {
        &self.ip_group
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("record", &self.record)
            .field("ip_group_kind", &self.ip_group.kind())
            .finish()
    }
}

/// Compile a URL pattern, reporting the pattern on failure.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::InvalidUrlPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{IpRange, RangeGroup};

    fn rule(url_pattern: &str, action: Action) -> Rule {
        let record = RuleRecord {
            id: RuleId(1),
            url_pattern: url_pattern.to_string(),
            ip_group: ALL_GROUP.to_string(),
            action,
            rank: 1,
        };
        Rule::compile(record, Arc::new(RangeGroup::all())).unwrap()
    }

    #[test]
    fn test_restriction_methods_for_allow_rule() {
        let rule = rule("", Action::Allow);
        assert!(rule.is_allowed());
        assert!(!rule.is_restricted());
    }

    #[test]
    fn test_restriction_methods_for_deny_rule() {
        let rule = rule("", Action::Deny);
        assert!(!rule.is_allowed());
        assert!(rule.is_restricted());
    }

    #[test]
    fn test_matches_url_pattern_regex() {
        let rule = rule("^/pre/[a-d]+[/]?$", Action::Allow);
        assert!(rule.matches_url("/pre/a/"));
        assert!(rule.matches_url("/pre/a"));
        assert!(!rule.matches_url("/pre/e/"));
        assert!(!rule.matches_url("/pre/a//"));
    }

    #[test]
    fn test_unanchored_pattern_matches_anywhere() {
        let admin = rule("admin", Action::Deny);
        assert!(admin.matches_url("/x/admin/y"));
        assert!(!admin.matches_url("/public"));

        let empty = rule("", Action::Allow);
        assert!(empty.matches_url("/anything"));
    }

    #[test]
    fn test_matches_requires_url_and_ip() {
        let group = RangeGroup::with_ranges("local", vec![IpRange::cidr("10.0.0.0", 8)]);
        group.load().unwrap();
        let record = RuleRecord {
            id: RuleId(2),
            url_pattern: "^/admin/".to_string(),
            ip_group: "local".to_string(),
            action: Action::Deny,
            rank: 1,
        };
        let rule = Rule::compile(record, Arc::new(group)).unwrap();

        assert!(rule.matches("/admin/x", "10.1.2.3"));
        assert!(!rule.matches("/admin/x", "8.8.8.8"));
        assert!(!rule.matches("/public", "10.1.2.3"));
        assert!(!rule.matches("/admin/x", "garbage"));
    }

    #[test]
    fn test_invalid_pattern_fails_at_compile() {
        let record = RuleRecord {
            id: RuleId(3),
            url_pattern: "^/(unclosed".to_string(),
            ip_group: ALL_GROUP.to_string(),
            action: Action::Allow,
            rank: 1,
        };
        let err = Rule::compile(record, Arc::new(RangeGroup::all())).unwrap_err();
        assert!(matches!(err, Error::InvalidUrlPattern { pattern, .. } if pattern == "^/(unclosed"));
    }

    #[test]
    fn test_new_rule_deserialize_defaults() {
        let rule: NewRule =
            serde_yaml::from_str("url_pattern: ^/api/\naction: deny\n").unwrap();
        assert_eq!(rule, NewRule::new("^/api/", ALL_GROUP, Action::Deny));

        let ranked = NewRule::new("x", "office", Action::Allow).with_rank(10);
        assert_eq!(ranked.rank, Some(10));
    }
}
