//! GeoIP lookups (§6): the MMDB reader's match predicate. Only the
//! "country / iso_code" field is needed.

use std::net::IpAddr;
use std::path::Path;

use crate::error::{Error, Result};

pub trait GeoDb: Send + Sync {
    fn country_of(&self, ip: IpAddr) -> Option<String>;
}

pub struct MaxMindGeoDb {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| Error::misc(format!("failed to open geo database: {e}")))?;
        Ok(Self { reader })
    }
}

impl GeoDb for MaxMindGeoDb {
    fn country_of(&self, ip: IpAddr) -> Option<String> {
        let country: maxminddb::geoip2::Country = self.reader.lookup(ip).ok()?;
        country
            .country?
            .iso_code
            .map(|code| code.to_ascii_uppercase())
    }
}

/// A no-op Geo database, used when `--geo` resolves no records or in
/// tests that don't exercise `country` rules.
pub struct NullGeoDb;

impl GeoDb for NullGeoDb {
    fn country_of(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

#[cfg(test)]
pub struct FakeGeoDb(pub std::collections::HashMap<IpAddr, String>);

#[cfg(test)]
impl GeoDb for FakeGeoDb {
    fn country_of(&self, ip: IpAddr) -> Option<String> {
        self.0.get(&ip).cloned()
    }
}
