//! Thin adapter over a MaxMind-format country database.
//!
//! The reader is read-only after load and safe for concurrent lookups.
//! Database load failure degrades the filter to permissive rather than
//! aborting startup; per-lookup failures are swallowed and treated as
//! "unknown country".

use std::collections::HashSet;
use std::path::Path;

use crate::addr;

/// A resolved country for a peer address, produced on demand and never
/// cached beyond the caller's frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub ip: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

#[derive(serde::Deserialize)]
struct CountryLookup<'a> {
    #[serde(borrow)]
    country: Option<Country<'a>>,
}

#[derive(serde::Deserialize)]
struct Country<'a> {
    iso_code: Option<&'a str>,
    #[serde(borrow)]
    names: Option<Names<'a>>,
}

#[derive(serde::Deserialize)]
struct Names<'a> {
    #[serde(borrow)]
    en: Option<&'a str>,
}

pub struct GeoFilter {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl GeoFilter {
    /// Loads the MaxMind GeoLite2-Country (or compatible) database at
    /// `path`. A load failure is logged and the filter degrades to
    /// fail-open rather than aborting the process — fetching and
    /// refreshing the database file is an out-of-band concern, not this
    /// gateway's.
    pub fn load(path: &Path) -> Self {
        match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), "GeoIP database loaded");
                GeoFilter { reader: Some(reader) }
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to load GeoIP database, geo-filter disabled");
                GeoFilter { reader: None }
            }
        }
    }

    pub fn disabled() -> Self {
        GeoFilter { reader: None }
    }

    /// Looks up the country for `ip`. Returns `None` if the database is not
    /// loaded or the lookup fails for any reason.
    pub fn lookup(&self, ip: &str) -> Option<GeoRecord> {
        let reader = self.reader.as_ref()?;
        let canonical = addr::normalize(ip);
        let parsed: std::net::IpAddr = canonical.parse().ok()?;

        let lookup: CountryLookup<'_> = reader.lookup(parsed).ok()?;
        let country = lookup.country?;
        let country_code = country.iso_code.map(|c| c.to_uppercase());
        let country_name = country.names.and_then(|n| n.en).map(str::to_string);

        Some(GeoRecord { ip: canonical, country_code, country_name })
    }

    /// Fails open if the database is unavailable, and applies
    /// `block_unknown` when no country could be determined.
    pub fn is_blocked(&self, ip: &str, blocked: &HashSet<String>, block_unknown: bool) -> bool {
        if self.reader.is_none() {
            return false;
        }

        match self.lookup(ip).and_then(|record| record.country_code) {
            Some(code) => blocked.contains(&code.to_uppercase()),
            None => block_unknown,
        }
    }
}
