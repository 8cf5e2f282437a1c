use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{MetricColumns, SeriesUpdate, StoreError, TableStore, TotalUpdate};
use crate::schema::{SqlType, TableSchema, Value, ALL_TABLES};

/// PostgreSQL-backed store. DDL is transactional here, so the
/// drop-and-rename swap commits as one unit.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self { pool })
    }

    async fn execute(&self, operation: &'static str, table: &str, sql: &str) -> Result<(), StoreError> {
        debug!(table, sql, "executing");
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database(operation, table, e))?;
        Ok(())
    }

    /// Run an update statement in its own transaction.
    async fn execute_update(
        &self,
        operation: &'static str,
        table: &str,
        mut builder: QueryBuilder<'static, Postgres>,
    ) -> Result<u64, StoreError> {
        let update_err = |e| StoreError::database(operation, table, e);
        let mut tx = self.pool.begin().await.map_err(update_err)?;
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(update_err)?;
        tx.commit().await.map_err(update_err)?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Statements
// =============================================================================

/// Drop any leftover shadow, then create it empty.
fn shadow_statements(table: &TableSchema) -> [String; 2] {
    let shadow = table.shadow_name();
    [
        format!("DROP TABLE IF EXISTS {}", shadow),
        table.create_sql(&shadow, false),
    ]
}

/// Run in one transaction: drop the served table, rename the shadow over it.
fn swap_statements(table: &TableSchema) -> [String; 2] {
    [
        format!("DROP TABLE IF EXISTS {}", table.name),
        format!("ALTER TABLE {} RENAME TO {}", table.shadow_name(), table.name),
    ]
}

/// Multi-row insert into the shadow table
fn insert_builder(table: &TableSchema, rows: &[Vec<Value>]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.shadow_name(),
        table.column_list()
    ));
    builder.push_values(rows, |mut b, row| {
        for (column, value) in table.columns.iter().zip(row) {
            // bind with the column's own type so NULLs are typed too
            match column.sql_type {
                SqlType::Text => b.push_bind(value.as_text()),
                SqlType::BigInt => b.push_bind(value.as_i64()),
                SqlType::Double => b.push_bind(value.as_f64()),
            };
        }
    });
    builder
}

fn metric_update_head(table: &TableSchema, metric: MetricColumns) -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!(
        "UPDATE {} AS t SET {} = v.value, {} = v.delta FROM (",
        table.name, metric.value, metric.delta
    ))
}

/// Updates rows matched on country and `last_update`
fn series_update_builder(
    table: &TableSchema,
    metric: MetricColumns,
    updates: &[SeriesUpdate],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = metric_update_head(table, metric);
    builder.push_values(updates, |mut b, u| {
        b.push_bind(u.country.clone())
            .push_bind(u.date.clone())
            .push_bind(u.value)
            .push_bind(u.delta);
    });
    builder.push(
        ") AS v(country, day, value, delta) \
         WHERE t.country_region = v.country AND t.last_update = v.day",
    );
    builder
}

/// Updates rows matched on country alone
fn total_update_builder(
    table: &TableSchema,
    metric: MetricColumns,
    updates: &[TotalUpdate],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = metric_update_head(table, metric);
    builder.push_values(updates, |mut b, u| {
        b.push_bind(u.country.clone())
            .push_bind(u.value)
            .push_bind(u.delta);
    });
    builder.push(") AS v(country, value, delta) WHERE t.country_region = v.country");
    builder
}

// =============================================================================
// Store
// =============================================================================

impl TableStore for PgStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for table in ALL_TABLES {
            self.execute("create table", table.name, &table.create_sql(table.name, true))
                .await?;
        }
        Ok(())
    }

    async fn prepare_shadow(&self, table: &TableSchema) -> Result<(), StoreError> {
        let shadow = table.shadow_name();
        let [drop_sql, create_sql] = shadow_statements(table);
        self.execute("drop shadow", &shadow, &drop_sql).await?;
        self.execute("create shadow", &shadow, &create_sql).await?;
        Ok(())
    }

    async fn insert_batch(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        insert_builder(table, rows)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("insert", table.shadow_name(), e))?;
        Ok(())
    }

    async fn swap_in(&self, table: &TableSchema) -> Result<(), StoreError> {
        let swap_err = |e| StoreError::database("swap", table.name, e);

        let mut tx = self.pool.begin().await.map_err(swap_err)?;
        for sql in swap_statements(table) {
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(swap_err)?;
        }
        tx.commit().await.map_err(swap_err)?;

        info!(table = table.name, "swapped in new snapshot");
        Ok(())
    }

    async fn apply_series_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[SeriesUpdate],
    ) -> Result<u64, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let builder = series_update_builder(table, metric, updates);
        self.execute_update("update series", table.name, builder).await
    }

    async fn apply_total_updates(
        &self,
        table: &TableSchema,
        metric: MetricColumns,
        updates: &[TotalUpdate],
    ) -> Result<u64, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let builder = total_update_builder(table, metric, updates);
        self.execute_update("update totals", table.name, builder).await
    }
}
