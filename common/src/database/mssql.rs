// SQL Server query runner over tiberius

use super::{with_timeout, ConnectionSettings, QueryRunner};
use crate::decimal::format_scaled;
use crate::errors::ExecutionError;
use crate::models::QueryResult;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, instrument};

/// Runs queries against databases hosted on one SQL Server instance
pub struct MssqlRunner {
    settings: ConnectionSettings,
}

impl MssqlRunner {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn build_config(&self, database: &str) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.host);
        config.port(self.settings.port);
        config.database(database);
        config.authentication(AuthMethod::sql_server(
            &self.settings.username,
            &self.settings.password,
        ));
        if self.settings.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    async fn connect(&self, database: &str) -> Result<Client<Compat<TcpStream>>, ExecutionError> {
        let config = self.build_config(database);

        let tcp = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect(config.get_addr()),
        )
        .await
        .map_err(|_| ExecutionError::Timeout(self.settings.connect_timeout.as_secs()))?
        .map_err(|e| {
            error!(error = %e, host = %self.settings.host, "Failed to open TCP connection");
            ExecutionError::DatabaseConnectionFailed(format!(
                "Failed to connect to {}:{}: {}",
                self.settings.host, self.settings.port, e
            ))
        })?;
        tcp.set_nodelay(true).ok();

        with_timeout(self.settings.connect_timeout, async {
            Client::connect(config, tcp.compat_write()).await.map_err(|e| {
                error!(error = %e, database = %database, "SQL Server login failed");
                ExecutionError::DatabaseConnectionFailed(format!(
                    "Failed to connect to database {}: {}",
                    database, e
                ))
            })
        })
        .await
    }

    async fn run_query(
        client: &mut Client<Compat<TcpStream>>,
        query: &str,
    ) -> Result<QueryResult, ExecutionError> {
        let mut stream = client.simple_query(query).await.map_err(|e| {
            ExecutionError::DatabaseQueryFailed(format!("SQL Server query failed: {}", e))
        })?;

        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(|e| {
                ExecutionError::DatabaseQueryFailed(format!("Failed to read result columns: {}", e))
            })?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream.into_first_result().await.map_err(|e| {
            ExecutionError::DatabaseQueryFailed(format!("Failed to read result rows: {}", e))
        })?;

        let mut table = QueryResult::new(columns, Vec::with_capacity(rows.len()));
        for row in rows {
            let mut cells = Vec::with_capacity(table.column_count());
            for (index, data) in row.into_iter().enumerate() {
                if let Some(scale) = numeric_scale(&data) {
                    table.note_decimal_scale(index, scale);
                }
                cells.push(column_to_json(data));
            }
            table.rows.push(cells);
        }

        Ok(table)
    }
}

#[async_trait]
impl QueryRunner for MssqlRunner {
    #[instrument(skip(self, query), fields(database_type = "mssql"))]
    async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError> {
        debug!("Connecting to SQL Server database");
        let mut client = self.connect(target).await?;

        let result = with_timeout(
            self.settings.query_timeout,
            Self::run_query(&mut client, query),
        )
        .await;

        if let Err(e) = client.close().await {
            debug!(error = %e, "Error while closing SQL Server connection");
        }

        if let Ok(table) = &result {
            debug!(rows = table.row_count(), cols = table.column_count(), "SQL Server query finished");
        }
        result
    }
}

fn numeric_scale(data: &ColumnData<'static>) -> Option<u8> {
    match data {
        ColumnData::Numeric(Some(n)) => Some(n.scale()),
        _ => None,
    }
}

fn column_to_json(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|f| Value::from(f as f64)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .map(|b| Value::String(hex::encode(b)))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| Value::String(format_scaled(n.value(), n.scale())))
            .unwrap_or(Value::Null),
        other => temporal_to_json(&other),
    }
}

// Date/time columns are rendered as text; anything else unsupported becomes null.
fn temporal_to_json(data: &ColumnData<'static>) -> Value {
    if let Ok(v) = NaiveDateTime::from_sql(data) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = NaiveDate::from_sql(data) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = NaiveTime::from_sql(data) {
        return v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = DateTime::<FixedOffset>::from_sql(data) {
        return v.map(|d| Value::String(d.to_rfc3339())).unwrap_or(Value::Null);
    }
    debug!(column_type = ?data, "Unsupported SQL Server column type, storing null");
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_scalar_columns_convert_to_json() {
        assert_eq!(column_to_json(ColumnData::I32(Some(7))), Value::from(7));
        assert_eq!(column_to_json(ColumnData::Bit(Some(true))), Value::Bool(true));
        assert_eq!(
            column_to_json(ColumnData::String(Some(Cow::Owned("abc".to_string())))),
            Value::String("abc".to_string())
        );
        assert_eq!(column_to_json(ColumnData::I64(None)), Value::Null);
    }

    #[test]
    fn test_numeric_is_exact() {
        let numeric = tiberius::numeric::Numeric::new_with_scale(1_234_567_890_123_456_789, 2);
        let data = ColumnData::Numeric(Some(numeric));

        assert_eq!(numeric_scale(&data), Some(2));
        assert_eq!(
            column_to_json(data),
            Value::String("12345678901234567.89".to_string())
        );
        assert_eq!(numeric_scale(&ColumnData::I32(Some(1))), None);
    }

    #[test]
    fn test_binary_is_hex() {
        assert_eq!(
            column_to_json(ColumnData::Binary(Some(Cow::Owned(vec![0x0a, 0xff])))),
            Value::String("0aff".to_string())
        );
    }
}
