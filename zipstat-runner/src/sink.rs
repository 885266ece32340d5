//! Relational sinks for finished tables.
//!
//! `persist` creates or replaces one relation with the frame's exact columns
//! and row order. Each table is written in its own transaction; nothing groups
//! writes across tables.
//!
//! [`SqlSink`] talks to PostgreSQL (or SQLite) through sqlx's `any` driver and
//! drives it from synchronous code with a private current-thread runtime.
//! [`MemorySink`] keeps frames in memory for dry runs and tests.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum SinkError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("write error on {table}: {detail}")]
    WriteError { table: String, detail: String },
}

impl SinkError {
    fn write(table: &str, detail: impl ToString) -> Self {
        Self::WriteError {
            table: table.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Trait for relational sinks.
pub trait RelationalSink: Send + Sync {
    /// Human-readable name of this sink.
    fn name(&self) -> &str;

    /// Create or replace `table` with the contents of `frame`.
    ///
    /// Returns the number of rows written.
    fn persist(&self, frame: &DataFrame, table: &str) -> Result<usize, SinkError>;
}

// ─── Column extraction ──────────────────────────────────────────────

/// A frame column materialized into bindable values.
#[derive(Debug, Clone, PartialEq)]
enum SqlColumn {
    Text(String, Vec<Option<String>>),
    Integer(String, Vec<Option<i64>>),
    Real(String, Vec<Option<f64>>),
}

impl SqlColumn {
    fn from_frame(frame: &DataFrame, table: &str) -> Result<Vec<Self>, SinkError> {
        let err = |e: PolarsError| SinkError::write(table, e);

        frame
            .get_columns()
            .iter()
            .map(|column| {
                let name = column.name().to_string();
                let dtype = column.dtype();
                if dtype == &DataType::String {
                    let values = column.str().map_err(err)?;
                    Ok(Self::Text(
                        name,
                        values.into_iter().map(|v| v.map(str::to_string)).collect(),
                    ))
                } else if dtype.is_integer() {
                    let cast = column.cast(&DataType::Int64).map_err(err)?;
                    let values = cast.i64().map_err(err)?;
                    Ok(Self::Integer(name, values.into_iter().collect()))
                } else if dtype.is_float() {
                    let cast = column.cast(&DataType::Float64).map_err(err)?;
                    let values = cast.f64().map_err(err)?;
                    Ok(Self::Real(name, values.into_iter().collect()))
                } else {
                    Err(SinkError::write(
                        table,
                        format!("column {name} has unsupported type {dtype}"),
                    ))
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        match self {
            Self::Text(name, _) | Self::Integer(name, _) | Self::Real(name, _) => name,
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            Self::Text(..) => "TEXT",
            Self::Integer(..) => "BIGINT",
            Self::Real(..) => "DOUBLE PRECISION",
        }
    }

    fn bind<'q>(
        &self,
        query: Query<'q, Any, AnyArguments<'q>>,
        row: usize,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        match self {
            Self::Text(_, values) => query.bind(values[row].clone()),
            Self::Integer(_, values) => query.bind(values[row]),
            Self::Real(_, values) => query.bind(values[row]),
        }
    }
}

/// Double-quote an identifier so mixed-case names survive.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(table: &str, columns: &[SqlColumn]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name()), c.sql_type()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

fn insert_sql(table: &str, columns: &[SqlColumn]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c.name())).collect();
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        params.join(", ")
    )
}

// ─── SQL sink ───────────────────────────────────────────────────────

/// sqlx-backed sink. The pool connects lazily, so a dead server surfaces as
/// a `ConnectionError` on each `persist` rather than at construction.
pub struct SqlSink {
    runtime: tokio::runtime::Runtime,
    pool: AnyPool,
}

impl SqlSink {
    pub fn connect_lazy(url: &str, acquire_timeout: Duration) -> Result<Self, SinkError> {
        sqlx::any::install_default_drivers();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::ConnectionError(format!("failed to start runtime: {e}")))?;

        let pool = {
            let _guard = runtime.enter();
            AnyPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(acquire_timeout)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_lazy(url)
                .map_err(|e| SinkError::ConnectionError(e.to_string()))?
        };

        Ok(Self { runtime, pool })
    }

    /// Row count of an existing relation.
    pub fn row_count(&self, table: &str) -> Result<i64, SinkError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        self.runtime.block_on(async {
            sqlx::query_scalar::<Any, i64>(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| SinkError::write(table, e))
        })
    }

    async fn write_table(
        &self,
        columns: &[SqlColumn],
        rows: usize,
        table: &str,
    ) -> Result<(), SinkError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;

        let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        sqlx::query(&drop_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| SinkError::write(table, e))?;

        let create_sql = create_table_sql(table, columns);
        debug!(sql = %create_sql, "creating relation");
        sqlx::query(&create_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| SinkError::write(table, e))?;

        let insert = insert_sql(table, columns);
        for row in 0..rows {
            let query = columns
                .iter()
                .fold(sqlx::query(&insert), |query, column| column.bind(query, row));
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| SinkError::write(table, e))?;
        }

        tx.commit().await.map_err(|e| SinkError::write(table, e))
    }
}

impl RelationalSink for SqlSink {
    fn name(&self) -> &str {
        "sql"
    }

    fn persist(&self, frame: &DataFrame, table: &str) -> Result<usize, SinkError> {
        let columns = SqlColumn::from_frame(frame, table)?;
        let rows = frame.height();
        self.runtime.block_on(self.write_table(&columns, rows, table))?;
        info!(table, rows, "persisted relation");
        Ok(rows)
    }
}

// ─── In-memory sink ─────────────────────────────────────────────────

/// Keeps persisted frames in memory. Tables named in `fail_on` are rejected
/// with a `WriteError`.
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, DataFrame>>,
    fail_on: BTreeSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: Mutex::default(),
            fail_on: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, table: &str) -> Option<DataFrame> {
        self.lock().get(table).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DataFrame>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RelationalSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn persist(&self, frame: &DataFrame, table: &str) -> Result<usize, SinkError> {
        if self.fail_on.contains(table) {
            return Err(SinkError::write(table, "rejected by sink"));
        }
        self.lock().insert(table.to_string(), frame.clone());
        Ok(frame.height())
    }
}
