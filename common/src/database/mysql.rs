// MySQL query runner over mysql_async

use super::{with_timeout, ConnectionSettings, QueryRunner};
use crate::errors::ExecutionError;
use crate::models::QueryResult;
use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use serde_json::{json, Value};

/// Runs queries against schemas on one MySQL server
pub struct MySqlRunner {
    settings: ConnectionSettings,
}

impl MySqlRunner {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn opts(&self, database: &str) -> mysql_async::Opts {
        mysql_async::OptsBuilder::default()
            .ip_or_hostname(self.settings.host.clone())
            .tcp_port(self.settings.port)
            .user(Some(self.settings.username.clone()))
            .pass(Some(self.settings.password.clone()))
            .db_name(Some(database.to_string()))
            .into()
    }

    async fn run_query(
        conn: &mut mysql_async::Conn,
        query: &str,
    ) -> Result<QueryResult, ExecutionError> {
        let mut result = conn.query_iter(query).await.map_err(|e| {
            ExecutionError::DatabaseQueryFailed(format!("MySQL query failed: {}", e))
        })?;

        let metadata = result.columns();
        let columns: Vec<String> = metadata
            .as_deref()
            .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();
        let decimal_scales: Vec<(usize, u8)> = metadata
            .as_deref()
            .map(|cols| {
                cols.iter()
                    .enumerate()
                    .filter_map(|(i, c)| {
                        decimal_scale(c.column_type(), c.decimals()).map(|scale| (i, scale))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<mysql_async::Row> = result.collect().await.map_err(|e| {
            ExecutionError::DatabaseQueryFailed(format!("Failed to read MySQL rows: {}", e))
        })?;

        let rows = rows
            .into_iter()
            .map(|row| {
                row.unwrap_raw()
                    .into_iter()
                    .map(|cell| cell.map_or(Value::Null, value_to_json))
                    .collect()
            })
            .collect();

        let mut table = QueryResult::new(columns, rows);
        for (index, scale) in decimal_scales {
            table.note_decimal_scale(index, scale);
        }
        Ok(table)
    }
}

#[async_trait]
impl QueryRunner for MySqlRunner {
    #[tracing::instrument(skip(self, query), fields(database_type = "mysql"))]
    async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError> {
        tracing::debug!("Connecting to MySQL database");

        let mut conn = with_timeout(self.settings.connect_timeout, async {
            mysql_async::Conn::new(self.opts(target)).await.map_err(|e| {
                ExecutionError::DatabaseConnectionFailed(format!(
                    "Failed to connect to MySQL database {}: {}",
                    target, e
                ))
            })
        })
        .await?;

        let result = with_timeout(self.settings.query_timeout, Self::run_query(&mut conn, query)).await;

        if let Err(e) = conn.disconnect().await {
            tracing::debug!(error = %e, "Error while closing MySQL connection");
        }
        result
    }
}

/// DECIMAL columns arrive as text; their declared scale comes from the metadata
fn decimal_scale(column_type: ColumnType, decimals: u8) -> Option<u8> {
    match column_type {
        ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => Some(decimals),
        _ => None,
    }
}

fn value_to_json(value: mysql_async::Value) -> Value {
    use mysql_async::Value as My;

    match value {
        My::NULL => Value::Null,
        My::Int(v) => json!(v),
        My::UInt(v) => json!(v),
        My::Float(v) => json!(v as f64),
        My::Double(v) => json!(v),
        My::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => json!(text),
            Err(e) => json!(hex::encode(e.as_bytes())),
        },
        My::Date(year, month, day, hour, minute, second, micros) => json!(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micros
        )),
        My::Time(negative, days, hours, minutes, seconds, micros) => json!(format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            if negative { "-" } else { "" },
            days * 24 + hours as u32,
            minutes,
            seconds,
            micros
        )),
    }
}
