//! PostgreSQL wire protocol adapter (PostgreSQL HEAP, PostgreSQL+FDW, CedarDB) using sqlx

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{Column, Connection, Postgres, Row, TypeInfo};

use super::{EngineAdapter, EngineConnection, sql_preview, validate_table_name};
use crate::Result;
use crate::dialect::Dialect;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::types::{Cell, ResultSet, Row as OutputRow};

/// Connect to PostgreSQL with automatic SSL retry.
/// If the initial connection fails with an "insecure connection" error,
/// retries with `sslmode=require` appended to the connection string.
async fn connect_with_ssl_retry(
    connection_string: &str,
) -> std::result::Result<PgConnection, sqlx::Error> {
    match PgConnection::connect(connection_string).await {
        Ok(conn) => Ok(conn),
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("connection is insecure") || error_msg.contains("sslmode=require")
            {
                let ssl_connection_string = if connection_string.contains('?') {
                    format!("{}&sslmode=require", connection_string)
                } else {
                    format!("{}?sslmode=require", connection_string)
                };
                PgConnection::connect(&ssl_connection_string).await
            } else {
                Err(e)
            }
        }
    }
}

/// Adapter for engines speaking the PostgreSQL protocol
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresAdapter;

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    async fn connect(&self, profile: &EngineProfile) -> Result<Box<dyn EngineConnection>> {
        let conn = connect_with_ssl_retry(profile.url().as_str())
            .await
            .map_err(|e| BenchError::connection(profile.name(), e))?;

        tracing::debug!(engine = %profile.name(), url = %profile.display_url(), "connected");
        Ok(Box::new(PostgresConnection {
            conn,
            dialect: profile.dialect(),
        }))
    }
}

pub struct PostgresConnection {
    conn: PgConnection,
    dialect: Dialect,
}

impl PostgresConnection {
    fn explain_statement(&self, sql: &str) -> String {
        match self.dialect {
            Dialect::Cedar => format!("EXPLAIN {}", sql),
            _ => format!("EXPLAIN (FORMAT TEXT) {}", sql),
        }
    }
}

#[async_trait]
impl EngineConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| BenchError::Query(format!("{} (sql: {})", e, sql_preview(sql))))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| decode_cell(row, idx))
                    .collect::<Result<OutputRow>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultSet::new(columns, rows))
    }

    async fn explain(&mut self, sql: &str) -> Result<String> {
        let rows = sqlx::query(&self.explain_statement(sql))
            .fetch_all(&mut self.conn)
            .await?;

        let lines = rows
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", validate_table_name(table)?);
        let row = sqlx::query(&sql).fetch_one(&mut self.conn).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "error closing connection");
        }
    }

    async fn force_close(self: Box<Self>) {
        if let Err(e) = self.conn.close_hard().await {
            tracing::debug!(error = %e, "error force-closing connection");
        }
    }
}

fn decode<'r, T>(row: &'r PgRow, idx: usize, to_cell: impl FnOnce(T) -> Cell) -> Result<Cell>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(value)) => Ok(to_cell(value)),
        Ok(None) => Ok(Cell::Null),
        Err(e) => Err(BenchError::Query(format!("failed to decode column {}: {}", idx, e))),
    }
}

fn decode_cell(row: &PgRow, idx: usize) -> Result<Cell> {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();

    match type_name.as_str() {
        "BOOL" => decode::<bool>(row, idx, Cell::Bool),
        "INT2" => decode::<i16>(row, idx, |v| Cell::Int(v.into())),
        "INT4" => decode::<i32>(row, idx, |v| Cell::Int(v.into())),
        "INT8" => decode::<i64>(row, idx, Cell::Int),
        "FLOAT4" => decode::<f32>(row, idx, |v| Cell::Float(v.into())),
        "FLOAT8" => decode::<f64>(row, idx, Cell::Float),
        "NUMERIC" => decode::<Decimal>(row, idx, |v| match v.to_f64() {
            Some(f) => Cell::Float(f),
            None => Cell::Text(v.to_string()),
        }),
        "DATE" => decode::<NaiveDate>(row, idx, |v| Cell::Text(v.to_string())),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, idx, |v| {
            Cell::Text(v.format("%Y-%m-%d %H:%M:%S").to_string())
        }),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, idx, |v| {
            Cell::Text(v.format("%Y-%m-%d %H:%M:%S").to_string())
        }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => decode::<String>(row, idx, Cell::Text),
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(s)) => Ok(Cell::Text(s)),
            Ok(None) => Ok(Cell::Null),
            Err(_) => Ok(Cell::Text(format!("<{}>", type_name.to_lowercase()))),
        },
    }
}
