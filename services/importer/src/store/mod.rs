//! Snapshot table replacement
//!
//! Each import stages its rows in `<table>_new` and swaps it in for the
//! served table. Readers see either the old or the new snapshot.

mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use thiserror::Error;

use crate::schema::{TableSchema, Value};

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("{operation} on table '{table}' failed: {source}")]
    Database {
        operation: &'static str,
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("table '{table}' does not exist")]
    MissingTable { table: String },
}

impl StoreError {
    pub fn database(operation: &'static str, table: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation,
            table: table.into(),
            source,
        }
    }

    pub fn missing_table(table: impl Into<String>) -> Self {
        Self::MissingTable {
            table: table.into(),
        }
    }
}

/// Value and delta columns a series merge writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricColumns {
    pub value: &'static str,
    pub delta: &'static str,
}

pub const RECOVERED: MetricColumns = MetricColumns {
    value: "recovered",
    delta: "delta_recovered",
};

/// New value and delta for the row of `country` on `date`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesUpdate {
    pub country: String,
    pub date: String,
    pub value: i64,
    pub delta: i64,
}

/// Latest value and delta for `country`'s totals row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalUpdate {
    pub country: String,
    pub value: i64,
    pub delta: i64,
}

/// The storage engine as seen by the pipeline.
#[allow(async_fn_in_trait)]
pub trait TableStore {
    /// Create the destination tables if they do not exist yet
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Drop any leftover shadow table and create an empty one
    async fn prepare_shadow(&self, table: &TableSchema) -> Result<(), StoreError>;

    /// Append rows, in table column order, to the shadow table
    async fn insert_batch(&self, table: &TableSchema, rows: &[Vec<Value>])
        -> Result<(), StoreError>;

    /// Replace the served table with the shadow table
    async fn swap_in(&self, table: &TableSchema) -> Result<(), StoreError>;

    /// Update `(country_region, last_update)` rows in one committed batch.
    /// Returns the number of rows changed.
    async fn apply_series_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[SeriesUpdate],
    ) -> Result<u64, StoreError>;

    /// Update per-country rows in one committed batch.
    async fn apply_total_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[TotalUpdate],
    ) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_message() {
        let err = StoreError::database("swap", "cases_time", sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("swap on table 'cases_time' failed"));
    }

    #[test]
    fn test_missing_table_message() {
        let err = StoreError::missing_table("countries_new");
        assert_eq!(err.to_string(), "table 'countries_new' does not exist");
    }
}
