//! Location-based IP group: country codes resolved through geolocation.

use ahash::AHashSet;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{GroupKind, IpMatcher, PreparedLoad};
use crate::error::Result;
use crate::geoip::Geolocator;

/// One configured entry of a [`LocationGroup`]: a comma and/or space
/// separated list of country codes, e.g. `"AU, HU"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpLocation {
    pub country_codes: String,
}

impl IpLocation {
    pub fn new(country_codes: impl Into<String>) -> Self {
        Self {
            country_codes: country_codes.into(),
        }
    }

    /// The normalized (trimmed, uppercase) codes in this entry.
    pub fn codes(&self) -> impl Iterator<Item = String> + '_ {
        self.country_codes
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|code| !code.is_empty())
            .map(|code| code.to_uppercase())
    }
}

/// LocationGroup matches client addresses by the country they resolve to.
///
/// # Examples
/// ```
/// use iprestrict::geoip::StaticGeolocator;
/// use iprestrict::group::{IpLocation, IpMatcher, LocationGroup};
/// use std::sync::Arc;
///
/// let geo = StaticGeolocator::new().with("1.1.1.1".parse().unwrap(), "AU");
/// let group = LocationGroup::new("oceania", Arc::new(geo));
/// group.add_location(IpLocation::new("AU, NZ"));
/// group.load().unwrap();
///
/// assert!(group.matches("1.1.1.1"));
/// ```
pub struct LocationGroup {
    name: String,
    /// Configured entries, compiled on `load`
    locations: RwLock<Vec<IpLocation>>,
    /// Uppercase country codes
    countries: ArcSwap<AHashSet<String>>,
    geolocator: Arc<dyn Geolocator>,
}

impl LocationGroup {
    /// Create an empty group. It matches nothing until loaded with locations.
    pub fn new(name: impl Into<String>, geolocator: Arc<dyn Geolocator>) -> Self {
        Self {
            name: name.into(),
            locations: RwLock::new(Vec::new()),
            countries: ArcSwap::from_pointee(AHashSet::new()),
            geolocator,
        }
    }

    /// Create an unloaded group with the given entries.
    pub fn with_locations(
        name: impl Into<String>,
        geolocator: Arc<dyn Geolocator>,
        locations: Vec<IpLocation>,
    ) -> Self {
        let group = Self::new(name, geolocator);
        *group.locations.write() = locations;
        group
    }

    /// Add an entry. Takes effect on the next `load`.
    pub fn add_location(&self, location: IpLocation) {
        self.locations.write().push(location);
    }

    /// Replace all entries. Takes effect on the next `load`.
    pub fn set_locations(&self, locations: Vec<IpLocation>) {
        *self.locations.write() = locations;
    }

    /// Get a copy of the configured entries.
    pub fn locations(&self) -> Vec<IpLocation> {
        self.locations.read().clone()
    }

    /// Get the number of distinct loaded country codes.
    pub fn count(&self) -> usize {
        self.countries.load().len()
    }

    /// Check if a country code is loaded in this group.
    pub fn contains(&self, country: &str) -> bool {
        self.countries.load().contains(&country.trim().to_uppercase())
    }
}

impl IpMatcher for LocationGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GroupKind {
        GroupKind::Location
    }

    fn matches(&self, ip: &str) -> bool {
        match self.geolocator.country_code(ip) {
            Some(country) => self.contains(&country),
            None => false,
        }
    }

    fn prepare(&self) -> Result<PreparedLoad<'_>> {
        let locations = self.locations.read();
        let countries: AHashSet<String> = locations
            .iter()
            .flat_map(|location| location.codes())
            .collect();
        Ok(PreparedLoad::new(move || {
            log::debug!(
                "Loaded location group {}: {} country codes",
                self.name,
                countries.len()
            );
            self.countries.store(Arc::new(countries));
            drop(locations);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Geolocator answering with whatever code the test set last.
    #[derive(Default)]
    struct FixedAnswer(Mutex<Option<String>>);

    impl FixedAnswer {
        fn set(&self, code: Option<&str>) {
            *self.0.lock() = code.map(str::to_string);
        }
    }

    impl Geolocator for FixedAnswer {
        fn country_code(&self, _ip: &str) -> Option<String> {
            self.0.lock().clone()
        }
    }

    fn group_with(geo: Arc<FixedAnswer>) -> LocationGroup {
        let group = LocationGroup::new("test location", geo);
        group.add_location(IpLocation::new("AU, HU"));
        group.add_location(IpLocation::new("BR"));
        group.load().unwrap();
        group
    }

    #[test]
    fn test_matches_ips() {
        let geo = Arc::new(FixedAnswer::default());
        let group = group_with(geo.clone());

        geo.set(Some("AU"));
        assert!(group.matches("192.168.1.1"));

        geo.set(Some("HU"));
        assert!(group.matches("192.168.1.2"));

        geo.set(Some("BR"));
        assert!(group.matches("192.168.1.3"));

        geo.set(Some("FR"));
        assert!(!group.matches("10.1.1.1"));
    }

    #[test]
    fn test_unresolved_ip_does_not_match() {
        let geo = Arc::new(FixedAnswer::default());
        let group = group_with(geo.clone());

        geo.set(None);
        assert!(!group.matches("192.168.1.1"));
    }

    #[test]
    fn test_resolved_code_is_normalized() {
        let geo = Arc::new(FixedAnswer::default());
        let group = group_with(geo.clone());

        geo.set(Some(" hu"));
        assert!(group.matches("192.168.1.1"));
    }

    #[test]
    fn test_codes_parsing() {
        let location = IpLocation::new(" au,hu  br ,, nz ");
        let codes: Vec<String> = location.codes().collect();
        assert_eq!(codes, vec!["AU", "HU", "BR", "NZ"]);
    }

    #[test]
    fn test_unloaded_group_matches_nothing() {
        let geo = Arc::new(FixedAnswer::default());
        geo.set(Some("AU"));
        let group = LocationGroup::with_locations("test", geo, vec![IpLocation::new("AU")]);

        assert!(!group.matches("1.1.1.1"));
        group.load().unwrap();
        assert!(group.matches("1.1.1.1"));
    }

    #[test]
    fn test_count_and_reload() {
        let geo = Arc::new(FixedAnswer::default());
        let group = group_with(geo);
        assert_eq!(group.count(), 3);

        group.add_location(IpLocation::new("hu, FR"));
        group.load().unwrap();
        assert_eq!(group.count(), 4);
        assert!(group.contains("fr"));

        group.set_locations(Vec::new());
        group.load().unwrap();
        assert_eq!(group.count(), 0);
        assert!(group.locations().is_empty());
    }
}
