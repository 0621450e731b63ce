// PostgreSQL query runner over sqlx

use super::{with_timeout, ConnectionSettings, QueryRunner};
use crate::errors::ExecutionError;
use crate::models::QueryResult;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, PgPool, Row, ValueRef};

/// Runs queries against databases on one PostgreSQL server
pub struct PostgresRunner {
    settings: ConnectionSettings,
}

impl PostgresRunner {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.settings.host)
            .port(self.settings.port)
            .username(&self.settings.username)
            .password(&self.settings.password)
            .database(database)
    }

    async fn run_query(pool: &PgPool, query: &str) -> Result<QueryResult, ExecutionError> {
        tracing::debug!("Executing raw SQL query");

        let rows = sqlx::query(query).fetch_all(pool).await.map_err(|e| {
            ExecutionError::DatabaseQueryFailed(format!("PostgreSQL query failed: {}", e))
        })?;

        // Column names come from the statement description when no row is returned
        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => pool
                .describe(query)
                .await
                .map_err(|e| {
                    ExecutionError::DatabaseQueryFailed(format!(
                        "Failed to describe PostgreSQL query: {}",
                        e
                    ))
                })?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let mut table = QueryResult::new(columns, Vec::with_capacity(rows.len()));
        for row in &rows {
            let mut cells = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                // NUMERIC only decodes as Decimal; other types fail the type check here
                match row.try_get::<Option<Decimal>, _>(i) {
                    Ok(Some(value)) => {
                        let (text, scale) = decimal_to_json(value);
                        table.note_decimal_scale(i, scale);
                        cells.push(text);
                    }
                    _ => cells.push(cell_to_json(row, i)),
                }
            }
            table.rows.push(cells);
        }

        Ok(table)
    }
}

#[async_trait]
impl QueryRunner for PostgresRunner {
    #[tracing::instrument(skip(self, query), fields(database_type = "postgresql"))]
    async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError> {
        tracing::debug!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(self.connect_options(target))
            .await
            .map_err(|e| {
                ExecutionError::DatabaseConnectionFailed(format!(
                    "Failed to connect to PostgreSQL database {}: {}",
                    target, e
                ))
            })?;

        let result = with_timeout(self.settings.query_timeout, Self::run_query(&pool, query)).await;

        pool.close().await;
        result
    }
}

/// Exact text of a NUMERIC value with its scale
fn decimal_to_json(value: Decimal) -> (Value, u8) {
    // rust_decimal caps scale at 28
    let scale = u8::try_from(value.scale()).unwrap_or(u8::MAX);
    (Value::String(value.to_string()), scale)
}

fn cell_to_json(row: &PgRow, i: usize) -> Value {
    if row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true) {
        return Value::Null;
    }

    if let Ok(v) = row.try_get::<String, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<i16, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<i32, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<i64, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f32, _>(i) {
        json!(v as f64)
    } else if let Ok(v) = row.try_get::<f64, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<bool, _>(i) {
        json!(v)
    } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(i) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::DateTime<Utc>, _>(i) {
        json!(v.to_rfc3339())
    } else if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(i) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<uuid::Uuid, _>(i) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<serde_json::Value, _>(i) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
        json!(hex::encode(v))
    } else {
        tracing::debug!(column = i, "Unsupported PostgreSQL column type, storing null");
        Value::Null
    }
}
