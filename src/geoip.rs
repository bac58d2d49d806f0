//! Geolocation collaborators used by location-based IP groups.

use ahash::AHashMap;
use std::net::IpAddr;
use std::path::Path;

use crate::error::{Error, Result};

/// Geolocator resolves a client address to an ISO country code.
///
/// Returns `None` when the address is unknown, cannot be parsed, or the
/// lookup fails. Implementations that reach out over the network should
/// bound the lookup with their own timeout and return `None` when it
/// expires.
pub trait Geolocator: Send + Sync {
    /// Resolve `ip` to a country code such as `"HU"`.
    fn country_code(&self, ip: &str) -> Option<String>;
}

impl<F> Geolocator for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn country_code(&self, ip: &str) -> Option<String> {
        self(ip)
    }
}

/// Geolocator that never resolves anything.
///
/// Used when no GeoIP database is configured: location groups then
/// never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeolocation;

impl Geolocator for NoGeolocation {
    fn country_code(&self, _ip: &str) -> Option<String> {
        None
    }
}

/// Geolocator backed by a fixed address-to-country table.
#[derive(Debug, Clone, Default)]
pub struct StaticGeolocator {
    table: AHashMap<IpAddr, String>,
}

impl StaticGeolocator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn with(mut self, ip: IpAddr, country_code: &str) -> Self {
        self.insert(ip, country_code);
        self
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, ip: IpAddr, country_code: &str) {
        self.table.insert(ip, country_code.trim().to_uppercase());
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Geolocator for StaticGeolocator {
    fn country_code(&self, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.trim().parse().ok()?;
        self.table.get(&ip).cloned()
    }
}

/// Geolocator backed by a MaxMind country database (GeoLite2-Country
/// or compatible).
pub struct MaxMindGeolocator {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeolocator {
    /// Open a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| Error::GeoIp(format!("{}: {}", path.display(), e)))?;
        Ok(Self { reader })
    }

    /// Load a database from bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let reader =
            maxminddb::Reader::from_source(data).map_err(|e| Error::GeoIp(e.to_string()))?;
        Ok(Self { reader })
    }

    /// Look up the country code for a parsed address.
    pub fn lookup(&self, ip: IpAddr) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct Country {
            iso_code: Option<String>,
        }

        #[derive(serde::Deserialize)]
        struct GeoIpResponse {
            country: Option<Country>,
        }

        let result: GeoIpResponse = match self.reader.lookup(ip) {
            Ok(result) => result,
            Err(e) => {
                log::debug!("GeoIP lookup for {} failed: {}", ip, e);
                return None;
            }
        };
        result.country?.iso_code
    }
}

impl Geolocator for MaxMindGeolocator {
    fn country_code(&self, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.trim().parse().ok()?;
        self.lookup(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_geolocator() {
        let geo = StaticGeolocator::new()
            .with("1.1.1.1".parse().unwrap(), "au")
            .with("2001:db8::1".parse().unwrap(), " HU ");

        assert_eq!(geo.len(), 2);
        assert_eq!(geo.country_code("1.1.1.1").as_deref(), Some("AU"));
        assert_eq!(geo.country_code("2001:DB8::1").as_deref(), Some("HU"));
        assert_eq!(geo.country_code("8.8.8.8"), None);
        assert_eq!(geo.country_code("not an ip"), None);
    }

    #[test]
    fn test_closure_geolocator() {
        let geo = |ip: &str| (ip == "10.0.0.1").then(|| "BR".to_string());
        assert_eq!(geo.country_code("10.0.0.1").as_deref(), Some("BR"));
        assert_eq!(geo.country_code("10.0.0.2"), None);
    }

    #[test]
    fn test_no_geolocation() {
        assert_eq!(NoGeolocation.country_code("1.1.1.1"), None);
    }

    #[test]
    fn test_maxmind_rejects_garbage() {
        assert!(matches!(
            MaxMindGeolocator::from_bytes(b"not a database".to_vec()),
            Err(Error::GeoIp(_))
        ));
    }

    #[test]
    fn test_maxmind_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mmdb");
        assert!(matches!(
            MaxMindGeolocator::open(&path),
            Err(Error::GeoIp(_))
        ));
    }
}
