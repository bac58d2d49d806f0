//! The decision entry point used by request pipelines.

use std::path::Path;

use crate::error::Result;
use crate::ruleset::{RestrictConfig, RuleSet};
use crate::Action;

/// Restrictor answers whether a request may proceed.
///
/// The caller extracts the request path and the client address (after any
/// proxy handling) and turns a restricted verdict into whatever response
/// it wants, typically HTTP 403.
///
/// # Examples
/// ```
/// use iprestrict::{Action, NewRule, Restrictor, ALL_GROUP};
///
/// let restrictor = Restrictor::allow_all().unwrap();
/// restrictor
///     .rules()
///     .create(NewRule::new("^/private/", ALL_GROUP, Action::Deny))
///     .unwrap();
///
/// assert!(restrictor.is_restricted("/private/x", "1.2.3.4"));
/// assert!(!restrictor.is_restricted("/public", "1.2.3.4"));
/// ```
pub struct Restrictor {
    rules: RuleSet,
}

impl Restrictor {
    /// Create a Restrictor over an existing rule set.
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Create a Restrictor with only the default rule, allowing everything.
    pub fn allow_all() -> Result<Self> {
        Ok(Self::new(RuleSet::in_memory()?))
    }

    /// Build a Restrictor from configuration.
    pub fn from_config(config: &RestrictConfig) -> Result<Self> {
        let geolocator = config.geolocator()?;
        Ok(Self::new(config.build_ruleset(geolocator)?))
    }

    /// Build a Restrictor from a YAML or JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&RestrictConfig::from_path(path)?)
    }

    /// Decide a request.
    pub fn decide(&self, url: &str, client_ip: &str) -> Action {
        self.rules.evaluate(url, client_ip)
    }

    /// Whether access to `url` from `client_ip` is refused.
    pub fn is_restricted(&self, url: &str, client_ip: &str) -> bool {
        let restricted = self.decide(url, client_ip).is_restricted();
        if restricted {
            log::info!("Denying access of {} to {}", url, client_ip);
        }
        restricted
    }

    /// Reload every IP group, then the rules.
    pub fn reload(&self) -> Result<()> {
        self.rules.reload_groups()
    }

    /// The underlying rule set, for administration.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{IpMatcher, IpRange, RangeGroup};
    use crate::rule::NewRule;
    use std::sync::Arc;

    fn restrictor_with_admin_rule() -> (Restrictor, Arc<RangeGroup>) {
        let restrictor = Restrictor::allow_all().unwrap();
        let internal = Arc::new(RangeGroup::with_ranges(
            "internal",
            vec![IpRange::cidr("10.0.0.0", 8)],
        ));
        internal.load().unwrap();
        restrictor.rules().groups().register(internal.clone()).unwrap();
        restrictor
            .rules()
            .create(NewRule::new("^/admin/", "internal", Action::Deny))
            .unwrap();
        (restrictor, internal)
    }

    #[test]
    fn test_is_restricted() {
        let (restrictor, _) = restrictor_with_admin_rule();

        assert!(restrictor.is_restricted("/admin/x", "10.1.2.3"));
        assert!(!restrictor.is_restricted("/admin/x", "8.8.8.8"));
        assert!(!restrictor.is_restricted("/public", "10.1.2.3"));
        // Nothing, not even the default rule, matches an unparseable address
        assert!(restrictor.is_restricted("/admin/x", "bogus"));
        assert_eq!(restrictor.decide("/admin/y", "10.0.0.1"), Action::Deny);
    }

    #[test]
    fn test_reload_picks_up_group_changes() {
        let (restrictor, internal) = restrictor_with_admin_rule();
        internal.add_range(IpRange::single("8.8.8.8")).unwrap();
        assert!(!restrictor.is_restricted("/admin/x", "8.8.8.8"));

        restrictor.reload().unwrap();
        assert!(restrictor.is_restricted("/admin/x", "8.8.8.8"));
    }

    #[test]
    fn test_reload_failure_is_reported() {
        let (restrictor, internal) = restrictor_with_admin_rule();
        internal.set_ranges(vec![IpRange::single("nope")]);

        assert!(restrictor.reload().is_err());
        assert!(restrictor.is_restricted("/admin/x", "10.1.2.3"));
    }

    #[test]
    fn test_failed_reload_keeps_every_group() {
        let (restrictor, internal) = restrictor_with_admin_rule();
        let partners = Arc::new(RangeGroup::new("partners"));
        restrictor.rules().groups().register(partners.clone()).unwrap();

        internal.set_ranges(vec![IpRange::single("8.8.8.8")]);
        partners.set_ranges(vec![IpRange::span("10.0.0.9", "10.0.0.1")]);
        assert!(restrictor.reload().is_err());

        assert!(restrictor.is_restricted("/admin/x", "10.1.2.3"));
        assert!(!restrictor.is_restricted("/admin/x", "8.8.8.8"));
    }

    #[test]
    fn test_from_config() {
        let config = RestrictConfig::from_yaml_str(
            "rules:\n  - url_pattern: ^/secret\n    action: deny\n",
        )
        .unwrap();
        let restrictor = Restrictor::from_config(&config).unwrap();

        assert!(restrictor.is_restricted("/secret/file", "127.0.0.1"));
        assert!(!restrictor.is_restricted("/open", "127.0.0.1"));
    }
}
