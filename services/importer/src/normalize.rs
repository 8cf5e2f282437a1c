//! Tabular parser and normalizer for narrow (one row per country per day)
//! feeds.
//!
//! The first CSV row is the header. Every later row is
//! 1. dropped if its width differs from the header's,
//! 2. given a canonical `YYYY-MM-DD` date when it carries an `M/D/YY` one,
//! 3. extended with a `country_code` resolved through [`CountryLookup`],
//!
//! then projected onto the destination table and written to the shadow
//! table in batches of [`INSERT_BATCH`].

use std::collections::HashSet;
use std::sync::LazyLock;

use csv::StringRecord;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ImportError, Result};
use crate::lookup::CountryLookup;
use crate::schema::{Column, TableSchema, Value};
use crate::store::TableStore;

// =============================================================================
// Columns
// =============================================================================

pub const INSERT_BATCH: usize = 100;

pub const COUNTRY_COLUMNS: &[&str] = &["country_region", "country/region"];
pub const PROVINCE_COLUMNS: &[&str] = &["province_state", "province/state"];
pub const ISO3_COLUMNS: &[&str] = &["iso3"];
pub const DATE_COLUMNS: &[&str] = &["last_update"];

/// Derived column appended to every narrow record
pub const CODE_COLUMN: &str = "country_code";

// =============================================================================
// Dates
// =============================================================================

static US_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{2})").expect("invalid date regex"));

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid date regex"));

/// Map an `M/D/YY` date to `20YY-MM-DD`.
///
/// The century is fixed at `20`: years 80 and above are misread as 20XX.
/// Returns `None` when the field carries no `M/D/YY` date.
pub fn map_date(raw: &str) -> Option<String> {
    let caps = US_DATE_RE.captures(raw)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    Some(format!("20{}-{:02}-{:02}", &caps[3], month, day))
}

pub fn is_iso_date(value: &str) -> bool {
    ISO_DATE_RE.is_match(value)
}

// =============================================================================
// Reading
// =============================================================================

/// Comma-delimited, quote-aware reader. Headers and width checks are ours.
pub fn csv_reader(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes())
}

/// Column names of a feed's first row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Vec<String>,
}

impl Header {
    pub fn new(record: &StringRecord) -> Self {
        Self {
            names: record.iter().map(|h| h.trim().to_string()).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of the first column whose lowercased name equals a candidate
    pub fn find_column(&self, candidates: &[&str]) -> Option<usize> {
        self.names.iter().position(|header| {
            let normalized = header.to_lowercase();
            candidates.iter().any(|candidate| normalized == *candidate)
        })
    }
}

pub fn read_header(
    feed: &str,
    records: &mut impl Iterator<Item = csv::Result<StringRecord>>,
) -> Result<Header> {
    match records.next() {
        Some(Ok(record)) => Ok(Header::new(&record)),
        Some(Err(e)) => Err(ImportError::csv(feed, e)),
        None => Err(ImportError::empty_feed(feed)),
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Row-level counters for one feed import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub feed: String,
    pub table: String,
    pub rows_read: usize,
    /// Rows written to the table (or updates applied, for merges)
    pub imported: usize,
    /// Width mismatches and unreadable rows
    pub malformed: usize,
    pub unresolved_codes: usize,
    pub unparsed_dates: usize,
    /// Province rows and duplicate days left out on purpose
    pub skipped: usize,
}

impl FeedReport {
    pub fn new(feed: &str, table: &str) -> Self {
        Self {
            feed: feed.to_string(),
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn log(&self) {
        info!(
            feed = %self.feed,
            table = %self.table,
            rows_read = self.rows_read,
            imported = self.imported,
            malformed = self.malformed,
            unresolved_codes = self.unresolved_codes,
            unparsed_dates = self.unparsed_dates,
            skipped = self.skipped,
            "feed imported"
        );
    }
}

// =============================================================================
// Normalization
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NarrowOptions {
    /// Import only rows whose province field is empty
    pub country_level_only: bool,
    /// Drop rows whose date is not `YYYY-MM-DD` after normalization
    pub require_iso_date: bool,
    /// Keep the first row per (country, date)
    pub unique_country_day: bool,
}

impl NarrowOptions {
    /// One row per country and day
    pub const TIME_SERIES: Self = Self {
        country_level_only: true,
        require_iso_date: true,
        unique_country_day: true,
    };

    /// Rows taken as they come
    pub const SNAPSHOT: Self = Self {
        country_level_only: false,
        require_iso_date: false,
        unique_country_day: false,
    };
}

/// A feed row projected onto a destination table
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub country: String,
    pub date: Option<String>,
    pub values: Vec<Value>,
}

/// Maps feed rows of one header onto one destination table.
#[derive(Debug)]
pub struct RowNormalizer<'a> {
    table: &'static TableSchema,
    lookup: &'a CountryLookup,
    options: NarrowOptions,
    width: usize,
    /// Header index feeding each table column
    sources: Vec<Option<usize>>,
    country: usize,
    date: Option<usize>,
    province: Option<usize>,
    iso3: Option<usize>,
}

impl<'a> RowNormalizer<'a> {
    pub fn new(
        feed: &str,
        header: &Header,
        table: &'static TableSchema,
        lookup: &'a CountryLookup,
        options: NarrowOptions,
    ) -> Result<Self> {
        let country = header
            .find_column(COUNTRY_COLUMNS)
            .ok_or_else(|| ImportError::missing_column(feed, COUNTRY_COLUMNS))?;
        let date = header.find_column(DATE_COLUMNS);
        if date.is_none() && options.require_iso_date {
            return Err(ImportError::missing_column(feed, DATE_COLUMNS));
        }

        let sources = table
            .columns
            .iter()
            .map(|column| match column.name {
                CODE_COLUMN => None,
                _ => header.find_column(aliases(column)),
            })
            .collect();

        Ok(Self {
            table,
            lookup,
            options,
            width: header.len(),
            sources,
            country,
            date,
            province: header.find_column(PROVINCE_COLUMNS),
            iso3: header.find_column(ISO3_COLUMNS),
        })
    }

    /// Returns `None` for rows that must not be persisted, counting why.
    pub fn normalize(
        &self,
        record: &StringRecord,
        report: &mut FeedReport,
    ) -> Option<NormalizedRecord> {
        if record.len() != self.width {
            report.malformed += 1;
            return None;
        }

        if self.options.country_level_only && !self.is_country_level(record) {
            report.skipped += 1;
            return None;
        }

        let date = match self.date {
            Some(i) => Some(self.normalize_date(&record[i], report)?),
            None => None,
        };

        let country = record[self.country].to_string();
        let iso3 = self.iso3.map(|i| &record[i]);
        let code = self.lookup.resolve(&country, iso3);
        if code.is_none() {
            report.unresolved_codes += 1;
        }

        let values = self
            .table
            .columns
            .iter()
            .zip(&self.sources)
            .map(|(column, source)| match (column.name, source) {
                (CODE_COLUMN, _) => Value::from(code),
                (_, Some(i)) if Some(*i) == self.date => date
                    .as_deref()
                    .map_or(Value::Null, |d| Value::parse(d, column.sql_type)),
                (_, Some(i)) => Value::parse(&record[*i], column.sql_type),
                (_, None) => Value::Null,
            })
            .collect();

        Some(NormalizedRecord {
            country,
            date,
            values,
        })
    }

    fn is_country_level(&self, record: &StringRecord) -> bool {
        self.province
            .and_then(|i| record.get(i))
            .map_or(true, |p| p.trim().is_empty())
    }

    fn normalize_date(&self, raw: &str, report: &mut FeedReport) -> Option<String> {
        if let Some(date) = map_date(raw) {
            return Some(date);
        }
        if is_iso_date(raw) {
            return Some(raw.to_string());
        }
        report.unparsed_dates += 1;
        if self.options.require_iso_date {
            return None;
        }
        Some(raw.to_string())
    }
}

/// Header names accepted for a table column
fn aliases(column: &'static Column) -> &'static [&'static str] {
    match column.name {
        "country_region" => COUNTRY_COLUMNS,
        "province_state" => PROVINCE_COLUMNS,
        "last_update" => DATE_COLUMNS,
        "iso3" => ISO3_COLUMNS,
        _ => std::slice::from_ref(&column.name),
    }
}

pub(crate) async fn flush_batch<S: TableStore>(
    store: &S,
    table: &TableSchema,
    batch: &mut Vec<Vec<Value>>,
    report: &mut FeedReport,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    store.insert_batch(table, batch).await?;
    report.imported += batch.len();
    batch.clear();
    Ok(())
}

// =============================================================================
// Import
// =============================================================================

/// Import a narrow feed into `table` through its shadow table.
pub async fn import_narrow<S: TableStore>(
    store: &S,
    feed: &str,
    table: &'static TableSchema,
    content: &str,
    lookup: &CountryLookup,
    options: NarrowOptions,
) -> Result<FeedReport> {
    let mut report = FeedReport::new(feed, table.name);
    let mut records = csv_reader(content).into_records();
    let header = read_header(feed, &mut records)?;
    let normalizer = RowNormalizer::new(feed, &header, table, lookup, options)?;

    store.prepare_shadow(table).await?;

    let mut batch = Vec::with_capacity(INSERT_BATCH);
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for result in records {
        report.rows_read += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(feed, error = %e, "skipping unreadable row");
                report.malformed += 1;
                continue;
            }
        };

        let Some(row) = normalizer.normalize(&record, &mut report) else {
            continue;
        };

        if options.unique_country_day {
            let key = (row.country.clone(), row.date.clone().unwrap_or_default());
            if !seen.insert(key) {
                report.skipped += 1;
                continue;
            }
        }

        batch.push(row.values);
        if batch.len() == INSERT_BATCH {
            flush_batch(store, table, &mut batch, &mut report).await?;
        }
    }
    flush_batch(store, table, &mut batch, &mut report).await?;

    store.swap_in(table).await?;
    report.log();

    Ok(report)
}
