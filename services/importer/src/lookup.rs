//! Country code resolver
//!
//! Built once per run from the UID/ISO/FIPS lookup table. Resolves country
//! names and ISO3 codes to ISO2 codes, the join key stored as `country_code`.
//! A miss is `None`, never an error: reference completeness must not block
//! ingestion of case data.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{ImportError, Result};
use crate::normalize::{csv_reader, read_header, COUNTRY_COLUMNS, ISO3_COLUMNS, PROVINCE_COLUMNS};

const ISO2_COLUMNS: &[&str] = &["iso2"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryLookupEntry {
    pub country_name: String,
    pub iso2: String,
    pub iso3: String,
}

#[derive(Debug, Clone)]
struct Code {
    iso2: String,
    country_level: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CountryLookup {
    by_name: HashMap<String, Code>,
    by_iso3: HashMap<String, Code>,
}

impl CountryLookup {
    /// Parse the lookup table feed. Rows whose width differs from the header
    /// are skipped.
    pub fn from_csv(feed: &str, content: &str) -> Result<Self> {
        let mut records = csv_reader(content).into_records();
        let header = read_header(feed, &mut records)?;

        let country_idx = header
            .find_column(COUNTRY_COLUMNS)
            .ok_or_else(|| ImportError::missing_column(feed, COUNTRY_COLUMNS))?;
        let iso2_idx = header
            .find_column(ISO2_COLUMNS)
            .ok_or_else(|| ImportError::missing_column(feed, ISO2_COLUMNS))?;
        let iso3_idx = header
            .find_column(ISO3_COLUMNS)
            .ok_or_else(|| ImportError::missing_column(feed, ISO3_COLUMNS))?;
        let province_idx = header.find_column(PROVINCE_COLUMNS);

        let mut lookup = Self::default();
        let mut skipped = 0;

        for result in records {
            let record = match result {
                Ok(r) if r.len() == header.len() => r,
                Ok(_) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    debug!(feed, error = %e, "skipping unreadable lookup row");
                    skipped += 1;
                    continue;
                }
            };

            let country_level = province_idx
                .and_then(|i| record.get(i))
                .map_or(true, |p| p.trim().is_empty());

            lookup.insert(
                CountryLookupEntry {
                    country_name: record[country_idx].to_string(),
                    iso2: record[iso2_idx].to_string(),
                    iso3: record[iso3_idx].to_string(),
                },
                country_level,
            );
        }

        info!(
            feed,
            names = lookup.by_name.len(),
            iso3 = lookup.by_iso3.len(),
            skipped,
            "loaded country lookup"
        );

        Ok(lookup)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CountryLookupEntry>) -> Self {
        let mut lookup = Self::default();
        for entry in entries {
            lookup.insert(entry, true);
        }
        lookup
    }

    /// Country-level rows win over province rows; otherwise the first row wins.
    pub fn insert(&mut self, entry: CountryLookupEntry, country_level: bool) {
        if entry.iso2.trim().is_empty() {
            return;
        }
        let code = Code {
            iso2: entry.iso2.trim().to_string(),
            country_level,
        };
        if !entry.country_name.is_empty() {
            upsert(&mut self.by_name, entry.country_name, code.clone());
        }
        if !entry.iso3.trim().is_empty() {
            upsert(&mut self.by_iso3, entry.iso3.trim().to_string(), code);
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|c| c.iso2.as_str())
    }

    pub fn by_iso3(&self, iso3: &str) -> Option<&str> {
        self.by_iso3.get(iso3).map(|c| c.iso2.as_str())
    }

    /// Resolve by ISO3 when the feed provides one, falling back to the name.
    pub fn resolve(&self, name: &str, iso3: Option<&str>) -> Option<&str> {
        iso3.map(str::trim)
            .filter(|code| !code.is_empty())
            .and_then(|code| self.by_iso3(code))
            .or_else(|| self.by_name(name))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_iso3.is_empty()
    }
}

fn upsert(map: &mut HashMap<String, Code>, key: String, code: Code) {
    match map.get(&key) {
        Some(existing) if existing.country_level || !code.country_level => {}
        _ => {
            map.insert(key, code);
        }
    }
}
