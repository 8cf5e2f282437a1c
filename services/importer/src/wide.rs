//! Wide (column-per-date) series merged into existing rows
//!
//! Each source row is one country or one province. Its cumulative values are
//! turned into day-over-day deltas, negative deltas clamped to zero. Province
//! rows are summed per country and date. The merged series updates matching
//! `cases_time` rows, and each country's last date updates its
//! `cases_total` row.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::{ImportError, Result};
use crate::normalize::{csv_reader, map_date, read_header, FeedReport, COUNTRY_COLUMNS, PROVINCE_COLUMNS};
use crate::schema::{SqlType, Value, CASES_TIME, CASES_TOTAL};
use crate::store::{MetricColumns, SeriesUpdate, TableStore, TotalUpdate};

pub const UPDATE_BATCH: usize = 500;

/// Stand-in for "any `M/D/YY` header" in errors
const DATE_HEADERS: &[&str] = &["M/D/YY"];

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRow {
    pub country: String,
    pub province: Option<String>,
    /// Cumulative value per date column
    pub values: Vec<i64>,
}

impl WideRow {
    pub fn is_province(&self) -> bool {
        self.province.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideSeries {
    /// Date columns as `YYYY-MM-DD`, in header order
    pub dates: Vec<String>,
    pub rows: Vec<WideRow>,
}

/// Parse a wide feed. Headers that carry an `M/D/YY` date are date columns.
/// A blank or unparsable cell repeats the previous day's value.
pub fn parse_wide(feed: &str, content: &str, report: &mut FeedReport) -> Result<WideSeries> {
    let mut records = csv_reader(content).into_records();
    let header = read_header(feed, &mut records)?;

    let country_idx = header
        .find_column(COUNTRY_COLUMNS)
        .ok_or_else(|| ImportError::missing_column(feed, COUNTRY_COLUMNS))?;
    let province_idx = header.find_column(PROVINCE_COLUMNS);

    let (date_idx, dates): (Vec<usize>, Vec<String>) = header
        .names()
        .iter()
        .enumerate()
        .filter_map(|(i, name)| map_date(name).map(|date| (i, date)))
        .unzip();
    if dates.is_empty() {
        return Err(ImportError::missing_column(feed, DATE_HEADERS));
    }

    let mut rows = Vec::new();
    for result in records {
        report.rows_read += 1;
        let record = match result {
            Ok(r) if r.len() == header.len() => r,
            Ok(_) => {
                report.malformed += 1;
                continue;
            }
            Err(e) => {
                debug!(feed, error = %e, "skipping unreadable row");
                report.malformed += 1;
                continue;
            }
        };

        let mut previous = 0;
        let values = date_idx
            .iter()
            .map(|&i| {
                let value = Value::parse(&record[i], SqlType::BigInt)
                    .as_i64()
                    .unwrap_or(previous);
                previous = value;
                value
            })
            .collect();

        rows.push(WideRow {
            country: record[country_idx].to_string(),
            province: province_idx
                .map(|i| record[i].trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            values,
        });
    }

    Ok(WideSeries { dates, rows })
}

// =============================================================================
// Deltas
// =============================================================================

/// Day-over-day differences, the first day against zero. Negative
/// differences become zero; saturates at the `i64` bounds.
pub fn clamped_deltas(values: &[i64]) -> Vec<i64> {
    let mut previous = 0;
    values
        .iter()
        .map(|&value| {
            let delta = value.saturating_sub(previous).max(0);
            previous = value;
            delta
        })
        .collect()
}

// =============================================================================
// Grouping
// =============================================================================

/// True when every country is one contiguous run in which only the last
/// row may be country-level.
pub fn is_grouped(rows: &[WideRow]) -> bool {
    let mut finished: HashSet<&str> = HashSet::new();
    for pair in rows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.country == next.country {
            if !prev.is_province() {
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

/// Stable-sort by country, province rows before the country-level row.
pub fn group_rows(rows: &mut [WideRow]) {
    rows.sort_by(|a, b| {
        a.country
            .cmp(&b.country)
            .then(a.is_province().cmp(&b.is_province()).reverse())
    });
}

// =============================================================================
// Merging
// =============================================================================

#[derive(Debug)]
enum MergeState {
    Streaming,
    Accumulating {
        country: String,
        values: Vec<i64>,
        deltas: Vec<i64>,
    },
}

/// Streams grouped rows into series and totals updates.
#[derive(Debug)]
pub struct WideMerger {
    dates: Vec<String>,
    state: MergeState,
    series: Vec<SeriesUpdate>,
    totals: Vec<TotalUpdate>,
}

impl WideMerger {
    pub fn new(dates: Vec<String>) -> Self {
        Self {
            dates,
            state: MergeState::Streaming,
            series: Vec::new(),
            totals: Vec::new(),
        }
    }

    pub fn push(&mut self, row: WideRow) {
        if let MergeState::Accumulating { country, .. } = &self.state {
            if *country != row.country {
                self.close_group();
            }
        }

        let deltas = clamped_deltas(&row.values);
        let is_province = row.is_province();
        match &mut self.state {
            MergeState::Accumulating {
                values,
                deltas: delta_sums,
                ..
            } => {
                add_into(values, &row.values);
                add_into(delta_sums, &deltas);
            }
            MergeState::Streaming if is_province => {
                self.state = MergeState::Accumulating {
                    country: row.country,
                    values: row.values,
                    deltas,
                };
            }
            MergeState::Streaming => {
                self.emit(row.country, &row.values, &deltas);
            }
        }

        // a country-level row closes its country's province group
        if !is_province {
            self.close_group();
        }
    }

    /// Series updates waiting to be written
    pub fn pending_len(&self) -> usize {
        self.series.len()
    }

    /// Remove up to `size` of the oldest series updates
    pub fn take_batch(&mut self, size: usize) -> Vec<SeriesUpdate> {
        let size = size.min(self.series.len());
        self.series.drain(..size).collect()
    }

    /// Flush any open province group and return what is left.
    pub fn finish(mut self) -> (Vec<SeriesUpdate>, Vec<TotalUpdate>) {
        self.close_group();
        (self.series, self.totals)
    }

    fn close_group(&mut self) {
        if let MergeState::Accumulating {
            country,
            values,
            deltas,
        } = std::mem::replace(&mut self.state, MergeState::Streaming)
        {
            self.emit(country, &values, &deltas);
        }
    }

    fn emit(&mut self, country: String, values: &[i64], deltas: &[i64]) {
        for ((date, &value), &delta) in self.dates.iter().zip(values).zip(deltas) {
            self.series.push(SeriesUpdate {
                country: country.clone(),
                date: date.clone(),
                value,
                delta,
            });
        }
        if let (Some(&value), Some(&delta)) = (values.last(), deltas.last()) {
            self.totals.push(TotalUpdate {
                country,
                value,
                delta,
            });
        }
    }
}

fn add_into(sums: &mut [i64], values: &[i64]) {
    for (sum, value) in sums.iter_mut().zip(values) {
        *sum = sum.saturating_add(*value);
    }
}

// =============================================================================
// Import
// =============================================================================

/// Merge a wide feed into `metric` of `cases_time` and `cases_total`.
pub async fn apply_wide<S: TableStore>(
    store: &S,
    feed: &str,
    content: &str,
    metric: MetricColumns,
) -> Result<FeedReport> {
    let mut report = FeedReport::new(feed, CASES_TIME.name);
    let mut series = parse_wide(feed, content, &mut report)?;

    if !is_grouped(&series.rows) {
        warn!(feed, rows = series.rows.len(), "wide rows not grouped by country, sorting");
        group_rows(&mut series.rows);
    }

    let mut merger = WideMerger::new(series.dates);
    for row in series.rows {
        merger.push(row);
        while merger.pending_len() >= UPDATE_BATCH {
            let batch = merger.take_batch(UPDATE_BATCH);
            report.imported += store.apply_series_updates(&CASES_TIME, metric, &batch).await? as usize;
        }
    }

    let (rest, totals) = merger.finish();
    for batch in rest.chunks(UPDATE_BATCH) {
        report.imported += store.apply_series_updates(&CASES_TIME, metric, batch).await? as usize;
    }

    let mut totals_updated = 0;
    for batch in totals.chunks(UPDATE_BATCH) {
        totals_updated += store.apply_total_updates(&CASES_TOTAL, metric, batch).await?;
    }
    info!(
        feed,
        table = CASES_TOTAL.name,
        countries = totals.len(),
        updated = totals_updated,
        "merged latest values"
    );
    report.log();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::store::memory::MemoryStore;
    use crate::store::RECOVERED;

    fn row(country: &str, province: Option<&str>, values: &[i64]) -> WideRow {
        WideRow {
            country: country.to_string(),
            province: province.map(str::to_string),
            values: values.to_vec(),
        }
    }

    fn dates(n: usize) -> Vec<String> {
        (1..=n).map(|d| format!("2020-03-{:02}", d)).collect()
    }

    fn series_of<'a>(updates: &'a [SeriesUpdate], country: &str) -> Vec<(&'a str, i64, i64)> {
        updates
            .iter()
            .filter(|u| u.country == country)
            .map(|u| (u.date.as_str(), u.value, u.delta))
            .collect()
    }

    // -------------------------------------------------------------------------
    // DELTAS
    // -------------------------------------------------------------------------

    #[test]
    fn test_negative_delta_clamped() {
        assert_eq!(clamped_deltas(&[10, 7]), vec![10, 0]);
    }

    #[test]
    fn test_deltas_resume_after_correction() {
        assert_eq!(clamped_deltas(&[0, 4, 4, 2, 9]), vec![0, 4, 0, 0, 7]);
        assert!(clamped_deltas(&[]).is_empty());
    }

    #[test]
    fn test_deltas_saturate_at_bounds() {
        assert_eq!(clamped_deltas(&[i64::MIN, i64::MAX]), vec![0, i64::MAX]);
        assert_eq!(clamped_deltas(&[i64::MAX, i64::MIN]), vec![i64::MAX, 0]);
    }

    #[test]
    fn test_out_of_range_cells_do_not_overflow() {
        let csv = "Province/State,Country/Region,3/1/20,3/2/20\n,Germany,-1e19,1e19\n";
        let mut report = FeedReport::default();
        let series = parse_wide("recovered_series", csv, &mut report).unwrap();
        assert_eq!(series.rows[0].values, vec![i64::MIN, i64::MAX]);

        let mut merger = WideMerger::new(series.dates);
        merger.push(series.rows[0].clone());
        let (updates, _) = merger.finish();
        assert_eq!(
            series_of(&updates, "Germany"),
            vec![("2020-03-01", i64::MIN, 0), ("2020-03-02", i64::MAX, i64::MAX)]
        );
    }

    // -------------------------------------------------------------------------
    // PARSING
    // -------------------------------------------------------------------------

    const RECOVERED_CSV: &str = "Province/State,Country/Region,Lat,Long,3/1/20,3/2/20,3/3/20
,Germany,51.1657,10.4515,10,7,12
Hubei,China,30.9756,112.2707,3,4,
Beijing,China,40.1824,116.4142,5,6,9
,Italy,41.87,12.56,1,2
";

    #[test]
    fn test_parse_wide() {
        let mut report = FeedReport::default();
        let series = parse_wide("recovered_series", RECOVERED_CSV, &mut report).unwrap();

        assert_eq!(series.dates, vec!["2020-03-01", "2020-03-02", "2020-03-03"]);
        assert_eq!(
            series.rows,
            vec![
                row("Germany", None, &[10, 7, 12]),
                row("China", Some("Hubei"), &[3, 4, 4]),
                row("China", Some("Beijing"), &[5, 6, 9]),
            ]
        );
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.malformed, 1);
    }

    #[test]
    fn test_parse_wide_without_dates() {
        let mut report = FeedReport::default();
        let err = parse_wide("recovered_series", "Country/Region,Lat\nGermany,51\n", &mut report)
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn { .. }));
    }

    // -------------------------------------------------------------------------
    // GROUPING
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_grouped() {
        assert!(is_grouped(&[
            row("China", Some("Hubei"), &[]),
            row("China", Some("Beijing"), &[]),
            row("China", None, &[]),
            row("Germany", None, &[]),
        ]));
        assert!(!is_grouped(&[
            row("China", None, &[]),
            row("China", Some("Hubei"), &[]),
        ]));
        assert!(!is_grouped(&[
            row("China", Some("Hubei"), &[]),
            row("Germany", None, &[]),
            row("China", Some("Beijing"), &[]),
        ]));
    }

    #[test]
    fn test_group_rows_puts_provinces_first() {
        let mut rows = vec![
            row("Germany", None, &[]),
            row("China", None, &[]),
            row("China", Some("Hubei"), &[]),
            row("Germany", Some("Bavaria"), &[]),
            row("China", Some("Beijing"), &[]),
        ];
        group_rows(&mut rows);
        let order: Vec<(&str, Option<&str>)> = rows
            .iter()
            .map(|r| (r.country.as_str(), r.province.as_deref()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("China", Some("Hubei")),
                ("China", Some("Beijing")),
                ("China", None),
                ("Germany", Some("Bavaria")),
                ("Germany", None),
            ]
        );
        assert!(is_grouped(&rows));
    }

    // -------------------------------------------------------------------------
    // MERGING
    // -------------------------------------------------------------------------

    #[test]
    fn test_country_row_emitted_directly() {
        let mut merger = WideMerger::new(dates(2));
        merger.push(row("Germany", None, &[10, 7]));
        assert_eq!(merger.pending_len(), 2);

        let (series, totals) = merger.finish();
        assert_eq!(
            series_of(&series, "Germany"),
            vec![("2020-03-01", 10, 10), ("2020-03-02", 7, 0)]
        );
        assert_eq!(
            totals,
            vec![TotalUpdate {
                country: "Germany".to_string(),
                value: 7,
                delta: 0,
            }]
        );
    }

    #[test]
    fn test_provinces_summed() {
        let mut merger = WideMerger::new(dates(2));
        merger.push(row("China", Some("Hubei"), &[1, 3]));
        merger.push(row("China", Some("Beijing"), &[4, 5]));
        assert_eq!(merger.pending_len(), 0);
        merger.push(row("Germany", None, &[0, 1]));

        let (series, totals) = merger.finish();
        // deltas are summed per province: (1 -> 3) + (4 -> 5)
        assert_eq!(
            series_of(&series, "China"),
            vec![("2020-03-01", 5, 5), ("2020-03-02", 8, 3)]
        );
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].country, "China");
        assert_eq!((totals[0].value, totals[0].delta), (8, 3));
    }

    #[test]
    fn test_province_sums_saturate() {
        let mut merger = WideMerger::new(dates(1));
        merger.push(row("China", Some("Hubei"), &[i64::MAX]));
        merger.push(row("China", Some("Beijing"), &[1]));

        let (series, totals) = merger.finish();
        assert_eq!(
            series_of(&series, "China"),
            vec![("2020-03-01", i64::MAX, i64::MAX)]
        );
        assert_eq!((totals[0].value, totals[0].delta), (i64::MAX, i64::MAX));
    }

    #[test]
    fn test_trailing_provinces_flushed_on_finish() {
        let mut merger = WideMerger::new(dates(1));
        merger.push(row("Australia", Some("Victoria"), &[3]));
        merger.push(row("Australia", Some("Queensland"), &[5]));

        let (series, totals) = merger.finish();
        assert_eq!(series_of(&series, "Australia"), vec![("2020-03-01", 8, 8)]);
        assert_eq!(totals.len(), 1);
    }

    #[test]
    fn test_country_row_closes_province_group() {
        let mut merger = WideMerger::new(dates(1));
        merger.push(row("United Kingdom", Some("Bermuda"), &[2]));
        merger.push(row("United Kingdom", None, &[40]));
        assert_eq!(merger.pending_len(), 1);

        let (series, totals) = merger.finish();
        assert_eq!(series_of(&series, "United Kingdom"), vec![("2020-03-01", 42, 42)]);
        assert_eq!(totals.len(), 1);
    }

    #[test]
    fn test_take_batch() {
        let mut merger = WideMerger::new(dates(3));
        merger.push(row("Germany", None, &[1, 2, 3]));
        assert_eq!(merger.take_batch(2).len(), 2);
        assert_eq!(merger.pending_len(), 1);
        assert_eq!(merger.take_batch(5).len(), 1);
        assert_eq!(merger.pending_len(), 0);
    }

    // -------------------------------------------------------------------------
    // STORE
    // -------------------------------------------------------------------------

    fn stored_row(table: &TableSchema, country: &str, date: &str) -> Vec<Value> {
        let mut row = vec![Value::Null; table.columns.len()];
        row[table.column_index("country_region").unwrap()] = Value::Text(country.to_string());
        row[table.column_index("last_update").unwrap()] = Value::Text(date.to_string());
        row
    }

    #[tokio::test]
    async fn test_apply_wide_updates_tables() {
        let store = MemoryStore::default();
        store.set_rows(
            &CASES_TIME,
            vec![
                stored_row(&CASES_TIME, "Germany", "2020-03-01"),
                stored_row(&CASES_TIME, "Germany", "2020-03-02"),
                stored_row(&CASES_TIME, "China", "2020-03-02"),
            ],
        );
        store.set_rows(
            &CASES_TOTAL,
            vec![
                stored_row(&CASES_TOTAL, "Germany", "2020-03-03"),
                stored_row(&CASES_TOTAL, "China", "2020-03-03"),
            ],
        );

        let report = apply_wide(&store, "recovered_series", RECOVERED_CSV, RECOVERED)
            .await
            .unwrap();
        assert_eq!(report.imported, 3);

        assert_eq!(
            store.column(&CASES_TIME, "recovered"),
            vec![Value::Int(10), Value::Int(7), Value::Int(10)]
        );
        assert_eq!(
            store.column(&CASES_TIME, "delta_recovered"),
            vec![Value::Int(10), Value::Int(0), Value::Int(2)]
        );

        let recovered = CASES_TOTAL.column_index("recovered").unwrap();
        let delta = CASES_TOTAL.column_index("delta_recovered").unwrap();
        let germany = store.row_for(&CASES_TOTAL, "Germany").unwrap();
        assert_eq!((&germany[recovered], &germany[delta]), (&Value::Int(12), &Value::Int(5)));
        let china = store.row_for(&CASES_TOTAL, "China").unwrap();
        assert_eq!((&china[recovered], &china[delta]), (&Value::Int(13), &Value::Int(3)));
    }

    #[tokio::test]
    async fn test_apply_wide_in_batches() {
        let store = MemoryStore::default();
        store.set_rows(&CASES_TIME, vec![stored_row(&CASES_TIME, "Germany", "2021-01-01")]);
        store.set_rows(&CASES_TOTAL, Vec::new());

        // month and day cycle every 84 columns, so 2021-01-01 repeats
        let days = UPDATE_BATCH + 20;
        let mut csv = String::from("Country/Region");
        for d in 0..days {
            csv.push_str(&format!(",{}/{}/21", d % 12 + 1, d % 28 + 1));
        }
        csv.push_str("\nGermany");
        for d in 0..days {
            csv.push_str(&format!(",{}", d));
        }
        csv.push('\n');

        let report = apply_wide(&store, "recovered_series", &csv, RECOVERED).await.unwrap();
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.imported, 7);
        // the last matching column (504) sits in the second batch
        assert_eq!(store.column(&CASES_TIME, "recovered"), vec![Value::Int(504)]);
        assert_eq!(store.column(&CASES_TIME, "delta_recovered"), vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_apply_wide_requires_tables() {
        let store = MemoryStore::default();
        let err = apply_wide(&store, "recovered_series", RECOVERED_CSV, RECOVERED)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Store(_)));
    }
}
