//! Declarative rule set configuration (YAML or JSON).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::RuleSet;
use crate::error::Result;
use crate::geoip::{Geolocator, MaxMindGeolocator, NoGeolocation};
use crate::group::{GroupRegistry, IpLocation, IpMatcher, IpRange, LocationGroup, RangeGroup};
use crate::rule::NewRule;
use crate::store::MemoryRuleStore;

/// One IP group definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GroupConfig {
    /// Explicit ranges and CIDR blocks
    Range {
        name: String,
        #[serde(default)]
        ranges: Vec<IpRange>,
    },
    /// Country codes
    Location {
        name: String,
        #[serde(default)]
        locations: Vec<IpLocation>,
    },
}

impl GroupConfig {
    /// Get the group name.
    pub fn name(&self) -> &str {
        match self {
            GroupConfig::Range { name, .. } | GroupConfig::Location { name, .. } => name,
        }
    }

    /// Build and load the group.
    pub fn build(&self, geolocator: &Arc<dyn Geolocator>) -> Result<Arc<dyn IpMatcher>> {
        let group: Arc<dyn IpMatcher> = match self {
            GroupConfig::Range { name, ranges } => {
                Arc::new(RangeGroup::with_ranges(name.clone(), ranges.clone()))
            }
            GroupConfig::Location { name, locations } => Arc::new(LocationGroup::with_locations(
                name.clone(),
                geolocator.clone(),
                locations.clone(),
            )),
        };
        group.load()?;
        Ok(group)
    }
}

/// Configuration for a rule set: IP groups and the rules using them.
///
/// # Examples
/// ```
/// use iprestrict::RestrictConfig;
///
/// let config = RestrictConfig::from_yaml_str(r#"
/// groups:
///   - name: office
///     type: range
///     ranges:
///       - first_ip: 10.0.0.0
///         cidr_prefix_length: 8
/// rules:
///   - url_pattern: ^/admin/
///     ip_group: office
///     action: deny
/// "#).unwrap();
///
/// let ruleset = config.build_ruleset(config.geolocator().unwrap()).unwrap();
/// assert!(ruleset.evaluate("/admin/", "10.0.0.1").is_restricted());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictConfig {
    /// MaxMind country database used by location groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoip_database: Option<PathBuf>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Rules in creation order
    #[serde(default)]
    pub rules: Vec<NewRule>,
}

impl RestrictConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a configuration file. `.json` files are parsed as JSON,
    /// anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Geolocator for location groups: the configured MaxMind database,
    /// or one that resolves nothing.
    pub fn geolocator(&self) -> Result<Arc<dyn Geolocator>> {
        match &self.geoip_database {
            Some(path) => Ok(Arc::new(MaxMindGeolocator::open(path)?)),
            None => Ok(Arc::new(NoGeolocation)),
        }
    }

    /// Build and load every configured group into a registry alongside
    /// the built-in `ALL` group.
    pub fn build_groups(&self, geolocator: Arc<dyn Geolocator>) -> Result<GroupRegistry> {
        let registry = GroupRegistry::new();
        for group in &self.groups {
            registry.register(group.build(&geolocator)?)?;
        }
        Ok(registry)
    }

    /// Build an in-memory rule set: the default rule plus every
    /// configured rule, created in document order.
    pub fn build_ruleset(&self, geolocator: Arc<dyn Geolocator>) -> Result<RuleSet> {
        let groups = self.build_groups(geolocator)?;
        let ruleset = RuleSet::new(Arc::new(MemoryRuleStore::new()), Arc::new(groups))?;
        for rule in &self.rules {
            ruleset.create(rule.clone())?;
        }
        log::debug!(
            "Built rule set from config: {} groups, {} rules",
            self.groups.len(),
            ruleset.len()
        );
        Ok(ruleset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::geoip::StaticGeolocator;
    use crate::Action;
    use std::io::Write;

    const SAMPLE: &str = r#"
groups:
  - name: office
    type: range
    ranges:
      - first_ip: 10.0.0.0
        cidr_prefix_length: 8
      - first_ip: 192.168.1.1
        last_ip: 192.168.1.10
  - name: embargo
    type: location
    locations: ["AU, HU", "BR"]
rules:
  - url_pattern: ^/admin/
    ip_group: office
    action: allow
  - url_pattern: ^/admin/
    action: deny
  - url_pattern: ^/shop/
    ip_group: embargo
    action: D
    rank: 10
"#;

    #[test]
    fn test_parse_yaml() {
        let config = RestrictConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.geoip_database, None);
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[0].name(), "office");
        assert_eq!(
            config.groups[1],
            GroupConfig::Location {
                name: "embargo".to_string(),
                locations: vec![IpLocation::new("AU, HU"), IpLocation::new("BR")],
            }
        );
        assert_eq!(config.rules[1].ip_group, "ALL");
        assert_eq!(config.rules[2].action, Action::Deny);
        assert_eq!(config.rules[2].rank, Some(10));
    }

    #[test]
    fn test_build_ruleset() {
        let config = RestrictConfig::from_yaml_str(SAMPLE).unwrap();
        let geo = StaticGeolocator::new().with("1.1.1.1".parse().unwrap(), "AU");
        let ruleset = config.build_ruleset(Arc::new(geo)).unwrap();

        let ranks: Vec<u32> = ruleset.rules().iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 10, 65536]);

        assert_eq!(ruleset.evaluate("/admin/", "10.9.9.9"), Action::Allow);
        assert_eq!(ruleset.evaluate("/admin/", "192.168.1.5"), Action::Allow);
        assert_eq!(ruleset.evaluate("/admin/", "192.168.1.50"), Action::Deny);
        assert_eq!(ruleset.evaluate("/shop/", "1.1.1.1"), Action::Deny);
        assert_eq!(ruleset.evaluate("/shop/", "8.8.8.8"), Action::Allow);
    }

    #[test]
    fn test_bad_range_is_fatal() {
        let config = RestrictConfig::from_yaml_str(
            r#"
groups:
  - name: office
    type: range
    ranges:
      - first_ip: 10.0.0.300
"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_ruleset(Arc::new(NoGeolocation)),
            Err(Error::InvalidIpAddress(_))
        ));
    }

    #[test]
    fn test_bad_pattern_is_fatal() {
        let config =
            RestrictConfig::from_yaml_str("rules:\n  - url_pattern: '(('\n    action: deny\n")
                .unwrap();
        assert!(matches!(
            config.build_ruleset(Arc::new(NoGeolocation)),
            Err(Error::InvalidUrlPattern { .. })
        ));
    }

    #[test]
    fn test_redefining_all_is_rejected() {
        let config = RestrictConfig::from_yaml_str(
            "groups:\n  - name: ALL\n    type: range\n",
        )
        .unwrap();
        assert!(matches!(
            config.build_groups(Arc::new(NoGeolocation)),
            Err(Error::DuplicateGroup(_))
        ));
    }

    #[test]
    fn test_unknown_field_type_is_rejected() {
        let err = RestrictConfig::from_yaml_str("groups:\n  - name: x\n    type: magic\n");
        assert!(matches!(err, Err(Error::Yaml(_))));
    }

    #[test]
    fn test_from_path_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("rules.json");
        let mut file = fs::File::create(&json_path).unwrap();
        write!(
            file,
            r#"{{"rules": [{{"url_pattern": "^/x", "action": "deny"}}]}}"#
        )
        .unwrap();
        let config = RestrictConfig::from_path(&json_path).unwrap();
        assert_eq!(config.rules.len(), 1);

        let yaml_path = dir.path().join("rules.yaml");
        fs::write(&yaml_path, SAMPLE).unwrap();
        let config = RestrictConfig::from_path(&yaml_path).unwrap();
        assert_eq!(config.groups.len(), 2);

        assert!(matches!(
            RestrictConfig::from_path(dir.path().join("missing.yaml")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_default_geolocator() {
        let config = RestrictConfig::default();
        let geo = config.geolocator().unwrap();
        assert_eq!(geo.country_code("1.1.1.1"), None);
    }
}
