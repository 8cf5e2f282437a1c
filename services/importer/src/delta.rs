//! Per-country totals from a narrow time series
//!
//! `cases_total` holds one row per country: the most recent day seen, with
//! `delta_deaths` set to the deaths on that day minus the deaths on the
//! country's first day.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{ImportError, Result};
use crate::lookup::CountryLookup;
use crate::normalize::{
    csv_reader, flush_batch, read_header, FeedReport, NarrowOptions, RowNormalizer, INSERT_BATCH,
};
use crate::schema::{Value, CASES_TOTAL};
use crate::store::TableStore;

const DEATHS_COLUMNS: &[&str] = &["deaths"];
const DELTA_DEATHS_COLUMNS: &[&str] = &["delta_deaths"];

/// One country-level row of the series
#[derive(Debug, Clone, PartialEq)]
pub struct CountryDay {
    pub country: String,
    pub date: String,
    pub deaths: i64,
    pub values: Vec<Value>,
}

/// The last day of a country's run
#[derive(Debug, Clone, PartialEq)]
pub struct CountryTotal {
    pub country: String,
    pub date: String,
    pub delta_deaths: i64,
    pub values: Vec<Value>,
}

/// True when every country forms one contiguous run with ascending dates.
pub fn is_grouped(days: &[CountryDay]) -> bool {
    let mut finished: HashSet<&str> = HashSet::new();
    for pair in days.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.country == next.country {
            if next.date < prev.date {
                return false;
            }
            continue;
        }
        finished.insert(prev.country.as_str());
        if finished.contains(next.country.as_str()) {
            return false;
        }
    }
    true
}

/// Collapse a series into one total per country.
///
/// Out-of-order input is stable-sorted by (country, date) first, so rows of
/// the same country and day keep their feed order.
pub fn derive_totals(mut days: Vec<CountryDay>) -> Vec<CountryTotal> {
    if !is_grouped(&days) {
        warn!(rows = days.len(), "series not grouped by country and date, sorting");
        days.sort_by(|a, b| (&a.country, &a.date).cmp(&(&b.country, &b.date)));
    }

    let mut totals = Vec::new();
    let mut run: Option<(i64, CountryDay)> = None;

    for day in days {
        run = match run {
            Some((first_deaths, last)) if last.country == day.country => Some((first_deaths, day)),
            Some((first_deaths, last)) => {
                totals.push(finalize(first_deaths, last));
                Some((day.deaths, day))
            }
            None => Some((day.deaths, day)),
        };
    }
    if let Some((first_deaths, last)) = run {
        totals.push(finalize(first_deaths, last));
    }

    totals
}

fn finalize(first_deaths: i64, last: CountryDay) -> CountryTotal {
    CountryTotal {
        delta_deaths: last.deaths.saturating_sub(first_deaths),
        country: last.country,
        date: last.date,
        values: last.values,
    }
}

/// Import `cases_total` from the `cases_time` payload.
pub async fn import_totals<S: TableStore>(
    store: &S,
    feed: &str,
    content: &str,
    lookup: &CountryLookup,
) -> Result<FeedReport> {
    let table = &CASES_TOTAL;
    let mut report = FeedReport::new(feed, table.name);
    let mut records = csv_reader(content).into_records();
    let header = read_header(feed, &mut records)?;
    if header.find_column(DEATHS_COLUMNS).is_none() {
        return Err(ImportError::missing_column(feed, DEATHS_COLUMNS));
    }
    let normalizer = RowNormalizer::new(feed, &header, table, lookup, NarrowOptions::TIME_SERIES)?;

    let deaths_idx = table
        .column_index("deaths")
        .ok_or_else(|| ImportError::missing_column(table.name, DEATHS_COLUMNS))?;
    let delta_idx = table
        .column_index("delta_deaths")
        .ok_or_else(|| ImportError::missing_column(table.name, DELTA_DEATHS_COLUMNS))?;

    store.prepare_shadow(table).await?;

    let mut days = Vec::new();
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
        let Some(deaths) = row.values[deaths_idx].as_i64() else {
            report.skipped += 1;
            continue;
        };
        days.push(CountryDay {
            country: row.country,
            date: row.date.unwrap_or_default(),
            deaths,
            values: row.values,
        });
    }

    let mut batch = Vec::with_capacity(INSERT_BATCH);
    for total in derive_totals(days) {
        let mut values = total.values;
        values[delta_idx] = Value::Int(total.delta_deaths);
        batch.push(values);
        if batch.len() == INSERT_BATCH {
            flush_batch(store, table, &mut batch, &mut report).await?;
        }
    }
    flush_batch(store, table, &mut batch, &mut report).await?;

    store.swap_in(table).await?;
    report.log();

    Ok(report)
}
