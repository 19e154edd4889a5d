//! Engine adapters: one connection type per wire protocol.
//!
//! An [`EngineAdapter`] opens connections for a profile; an [`EngineConnection`]
//! is exclusively owned by the run that opened it and must be released with
//! either [`EngineConnection::close`] or, after a timeout,
//! [`EngineConnection::force_close`]. Dropping a connection also releases its
//! socket, so an early return never leaks it.

pub mod clickhouse;
pub mod postgres;
pub mod scripted;

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::Result;
use crate::dialect::Dialect;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::types::ResultSet;

pub use clickhouse::ClickHouseAdapter;
pub use postgres::PostgresAdapter;
pub use scripted::{AdapterStats, Script, ScriptedAdapter};

/// Opens connections to one kind of engine
#[async_trait]
pub trait EngineAdapter: Send + Sync + std::fmt::Debug {
    /// Connect to the engine described by `profile`. Failures are [`BenchError::Connection`].
    async fn connect(&self, profile: &EngineProfile) -> Result<Box<dyn EngineConnection>>;
}

/// A live session with an engine
#[async_trait]
pub trait EngineConnection: Send {
    /// Run a query and collect every output row.
    async fn execute(&mut self, sql: &str) -> Result<ResultSet>;

    /// Fetch the engine's plan for a query without running it.
    async fn explain(&mut self, sql: &str) -> Result<String>;

    /// `SELECT count(*)` over a table, for parity checks.
    async fn row_count(&mut self, table: &str) -> Result<u64>;

    /// Graceful release.
    async fn close(self: Box<Self>);

    /// Non-graceful release after a timeout; must not wait on the engine.
    async fn force_close(self: Box<Self>);
}

/// Output and wall-clock time of one timed execution
#[derive(Debug, Clone)]
pub struct Execution {
    pub output: ResultSet,
    pub duration: Duration,
}

/// Execute with a bound. On [`BenchError::Timeout`] the caller owns force-closing the connection.
pub async fn execute_with_timeout(
    conn: &mut dyn EngineConnection,
    sql: &str,
    timeout: Duration,
) -> Result<Execution> {
    let start = tokio::time::Instant::now();
    match tokio::time::timeout(timeout, conn.execute(sql)).await {
        Ok(Ok(output)) => Ok(Execution {
            output,
            duration: start.elapsed(),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BenchError::Timeout(timeout)),
    }
}

/// Adapter for a dialect's wire protocol
pub fn adapter_for(dialect: Dialect) -> Arc<dyn EngineAdapter> {
    match dialect {
        Dialect::Postgres | Dialect::Cedar => Arc::new(PostgresAdapter),
        Dialect::ClickHouse => Arc::new(ClickHouseAdapter::default()),
    }
}

/// Reject anything but a plain or schema-qualified identifier.
pub(crate) fn validate_table_name(table: &str) -> Result<&str> {
    static IDENT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("static pattern")
    });

    if IDENT.is_match(table) {
        Ok(table)
    } else {
        Err(BenchError::InvalidConfig(format!("invalid table name '{}'", table)))
    }
}

/// First characters of a statement, for error messages and logs
pub(crate) fn sql_preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(100).collect()
}
