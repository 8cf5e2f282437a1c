use std::collections::HashMap;
use std::sync::Mutex;

use super::{MetricColumns, SeriesUpdate, StoreError, TableStore, TotalUpdate};
use crate::schema::{TableSchema, Value, ALL_TABLES};

/// In-memory tables keyed by name, for pipeline tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Vec<Value>>>>,
}

impl MemoryStore {
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().unwrap().contains_key(table)
    }

    /// Cell `column` of every row in `table`
    pub fn column(&self, table: &TableSchema, column: &str) -> Vec<Value> {
        let idx = table.column_index(column).unwrap();
        self.rows(table.name)
            .into_iter()
            .map(|row| row[idx].clone())
            .collect()
    }

    /// First row whose `country_region` equals `country`
    pub fn row_for(&self, table: &TableSchema, country: &str) -> Option<Vec<Value>> {
        let idx = table.column_index("country_region").unwrap();
        self.rows(table.name)
            .into_iter()
            .find(|row| row[idx] == Value::Text(country.to_string()))
    }

    pub fn set_rows(&self, table: &TableSchema, rows: Vec<Vec<Value>>) {
        self.tables
            .lock()
            .unwrap()
            .insert(table.name.to_string(), rows);
    }
}

impl TableStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        for table in ALL_TABLES {
            tables.entry(table.name.to_string()).or_default();
        }
        Ok(())
    }

    async fn prepare_shadow(&self, table: &TableSchema) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .insert(table.shadow_name(), Vec::new());
        Ok(())
    }

    async fn insert_batch(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<(), StoreError> {
        let shadow = table.shadow_name();
        let mut tables = self.tables.lock().unwrap();
        let target = tables
            .get_mut(&shadow)
            .ok_or_else(|| StoreError::missing_table(&shadow))?;
        target.extend(rows.iter().cloned());
        Ok(())
    }

    async fn swap_in(&self, table: &TableSchema) -> Result<(), StoreError> {
        let shadow = table.shadow_name();
        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .remove(&shadow)
            .ok_or_else(|| StoreError::missing_table(&shadow))?;
        tables.insert(table.name.to_string(), rows);
        Ok(())
    }

    async fn apply_series_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[SeriesUpdate],
    ) -> Result<u64, StoreError> {
        let country_idx = column(table, "country_region")?;
        let date_idx = column(table, "last_update")?;
        let value_idx = column(table, metric.value)?;
        let delta_idx = column(table, metric.delta)?;

        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .get_mut(table.name)
            .ok_or_else(|| StoreError::missing_table(table.name))?;

        let mut changed = 0;
        for update in updates {
            for row in rows.iter_mut() {
                if row[country_idx] == Value::Text(update.country.clone())
                    && row[date_idx] == Value::Text(update.date.clone())
                {
                    row[value_idx] = Value::Int(update.value);
                    row[delta_idx] = Value::Int(update.delta);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn apply_total_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[TotalUpdate],
    ) -> Result<u64, StoreError> {
        let country_idx = column(table, "country_region")?;
        let value_idx = column(table, metric.value)?;
        let delta_idx = column(table, metric.delta)?;

        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .get_mut(table.name)
            .ok_or_else(|| StoreError::missing_table(table.name))?;

        let mut changed = 0;
        for update in updates {
            for row in rows.iter_mut() {
                if row[country_idx] == Value::Text(update.country.clone()) {
                    row[value_idx] = Value::Int(update.value);
                    row[delta_idx] = Value::Int(update.delta);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

fn column(table: &TableSchema, name: &str) -> Result<usize, StoreError> {
    table
        .column_index(name)
        .ok_or_else(|| StoreError::missing_table(format!("{}.{}", table.name, name)))
}
