//! Scripted in-memory adapter.
//!
//! Answers from a fixed table of SQL → response entries instead of a real
//! engine, and counts connection lifecycle events so tests can assert that
//! every connection was released.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{EngineAdapter, EngineConnection, validate_table_name};
use crate::Result;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::types::ResultSet;

/// Canned response for one SQL text
#[derive(Debug, Clone)]
pub enum Script {
    /// Return rows after `latency`
    Rows { output: ResultSet, latency: Duration },
    /// Fail with an engine error
    Fail(String),
}

impl Script {
    pub fn rows(output: ResultSet) -> Self {
        Script::Rows {
            output,
            latency: Duration::ZERO,
        }
    }

    pub fn slow(output: ResultSet, latency: Duration) -> Self {
        Script::Rows {
            output,
            latency,
        }
    }
}

/// Lifecycle counters, shared by the adapter and its connections
#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    executions: AtomicUsize,
    explains: AtomicUsize,
    closes: AtomicUsize,
    force_closes: AtomicUsize,
}

/// Snapshot of an adapter's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterStats {
    pub connects: usize,
    pub executions: usize,
    pub explains: usize,
    pub closes: usize,
    pub force_closes: usize,
}

impl AdapterStats {
    /// Every opened connection was closed one way or the other
    pub fn all_released(&self) -> bool {
        self.connects == self.closes + self.force_closes
    }
}

#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    responses: HashMap<String, Script>,
    tables: HashMap<String, u64>,
    unreachable: bool,
    counters: Arc<Counters>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `sql` (matched after trimming) with `script`.
    pub fn respond(mut self, sql: &str, script: Script) -> Self {
        self.responses.insert(sql.trim().to_string(), script);
        self
    }

    pub fn with_table(mut self, table: &str, rows: u64) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Refuse every connection attempt.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn stats(&self) -> AdapterStats {
        let c = &self.counters;
        AdapterStats {
            connects: c.connects.load(Ordering::SeqCst),
            executions: c.executions.load(Ordering::SeqCst),
            explains: c.explains.load(Ordering::SeqCst),
            closes: c.closes.load(Ordering::SeqCst),
            force_closes: c.force_closes.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl EngineAdapter for ScriptedAdapter {
    async fn connect(&self, profile: &EngineProfile) -> Result<Box<dyn EngineConnection>> {
        if self.unreachable {
            return Err(BenchError::connection(profile.name(), "connection refused"));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            engine: profile.name().to_string(),
            responses: self.responses.clone(),
            tables: self.tables.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedConnection {
    engine: String,
    responses: HashMap<String, Script>,
    tables: HashMap<String, u64>,
    counters: Arc<Counters>,
}

#[async_trait]
impl EngineConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(sql.trim()) {
            Some(Script::Rows { output, latency }) => {
                if !latency.is_zero() {
                    tokio::time::sleep(*latency).await;
                }
                Ok(output.clone())
            }
            Some(Script::Fail(message)) => Err(BenchError::Query(message.clone())),
            None => Err(BenchError::Query(format!(
                "{}: no scripted response for '{}'",
                self.engine,
                sql.trim()
            ))),
        }
    }

    async fn explain(&mut self, sql: &str) -> Result<String> {
        self.counters.explains.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Scripted Scan on {} ({})", self.engine, sql.trim()))
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        let table = validate_table_name(table)?;
        self.tables
            .get(table)
            .copied()
            .ok_or_else(|| BenchError::Query(format!("relation \"{}\" does not exist", table)))
    }

    async fn close(self: Box<Self>) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn force_close(self: Box<Self>) {
        self.counters.force_closes.fetch_add(1, Ordering::SeqCst);
    }
}
