//! Execution runner: one query against one engine, timed and bounded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::adapter::{EngineAdapter, EngineConnection, execute_with_timeout};
use crate::catalog::QueryCatalog;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::types::ResultSet;

/// When to fetch the EXPLAIN plan relative to the timed execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainMode {
    Off,
    Before,
    #[default]
    After,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Bound on each execution and EXPLAIN
    pub query_timeout: Duration,
    pub connect_timeout: Duration,
    /// Untimed executions on the same connection before the timed one
    pub warmup_runs: usize,
    pub explain: ExplainMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            warmup_runs: 0,
            explain: ExplainMode::default(),
        }
    }
}

/// A registered engine: its profile, its adapter and its registration position
#[derive(Debug, Clone)]
pub struct Engine {
    pub index: usize,
    pub profile: EngineProfile,
    pub adapter: Arc<dyn EngineAdapter>,
}

impl Engine {
    pub fn name(&self) -> &str {
        self.profile.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    QueryError,
    Timeout,
    ConnectionError,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::QueryError => "query_error",
            RunStatus::Timeout => "timeout",
            RunStatus::ConnectionError => "connection_error",
            RunStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    Connection,
    EngineError,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl From<BenchError> for RunError {
    fn from(err: BenchError) -> Self {
        let kind = match &err {
            BenchError::Timeout(_) => RunErrorKind::Timeout,
            BenchError::Connection { .. } => RunErrorKind::Connection,
            _ => RunErrorKind::EngineError,
        };
        RunError {
            kind,
            message: err.to_string(),
        }
    }
}

/// Outcome of one (engine, query) pair. Never mutated after the runner returns it.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub engine: String,
    /// Registration position of the engine, used for deterministic ordering
    pub engine_index: usize,
    pub query: String,
    /// Wall-clock time of the timed execution; absent unless it completed
    pub duration: Option<Duration>,
    pub row_count: Option<u64>,
    pub plan: Option<String>,
    pub output: Option<ResultSet>,
    pub warmup_runs: usize,
    pub error: Option<RunError>,
}

impl RunResult {
    fn new(engine: &Engine, query: &str) -> Self {
        Self {
            engine: engine.name().to_string(),
            engine_index: engine.index,
            query: query.to_string(),
            duration: None,
            row_count: None,
            plan: None,
            output: None,
            warmup_runs: 0,
            error: None,
        }
    }

    /// A pair that was not attempted
    pub fn skipped(engine: &Engine, query: &str, reason: impl Into<String>) -> Self {
        Self {
            error: Some(RunError {
                kind: RunErrorKind::Skipped,
                message: reason.into(),
            }),
            ..Self::new(engine, query)
        }
    }

    pub fn status(&self) -> RunStatus {
        match self.error.as_ref().map(|e| e.kind) {
            None => RunStatus::Ok,
            Some(RunErrorKind::EngineError) => RunStatus::QueryError,
            Some(RunErrorKind::Timeout) => RunStatus::Timeout,
            Some(RunErrorKind::Connection) => RunStatus::ConnectionError,
            Some(RunErrorKind::Skipped) => RunStatus::Skipped,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == RunStatus::Ok
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64() * 1000.0)
    }
}

/// What happened on an open connection
#[derive(Default)]
struct Measurement {
    duration: Option<Duration>,
    output: Option<ResultSet>,
    plan: Option<String>,
    warmups: usize,
    error: Option<RunError>,
    /// A bounded operation timed out; the connection state is unknown
    abandoned: bool,
}

impl Measurement {
    fn fail(mut self, err: BenchError) -> Self {
        self.abandoned |= matches!(err, BenchError::Timeout(_));
        self.error = Some(err.into());
        self
    }
}

/// Runs single (engine, query) pairs. Holds no state between runs.
pub struct ExecutionRunner<'a> {
    catalog: &'a QueryCatalog,
    config: RunnerConfig,
}

impl<'a> ExecutionRunner<'a> {
    pub fn new(catalog: &'a QueryCatalog, config: RunnerConfig) -> Self {
        Self {
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `query_id` on `engine` over a fresh connection.
    ///
    /// Always yields a result: failures are recorded in [`RunResult::error`].
    /// The connection is closed on every path, and force-closed after a timeout.
    pub async fn run(&self, engine: &Engine, query_id: &str) -> RunResult {
        let mut result = RunResult::new(engine, query_id);

        let sql = match self.catalog.get(query_id, engine.profile.dialect()) {
            Ok(sql) => sql,
            Err(e) => {
                result.error = Some(RunError {
                    kind: RunErrorKind::Skipped,
                    message: e.to_string(),
                });
                return result;
            }
        };

        let connect = engine.adapter.connect(&engine.profile);
        let mut conn = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!(engine = %engine.name(), error = %e, "connection failed");
                result.error = Some(RunError {
                    kind: RunErrorKind::Connection,
                    message: e.to_string(),
                });
                return result;
            }
            Err(_) => {
                tracing::warn!(engine = %engine.name(), "connection attempt timed out");
                result.error = Some(RunError {
                    kind: RunErrorKind::Connection,
                    message: format!("connect timed out after {:?}", self.config.connect_timeout),
                });
                return result;
            }
        };

        let measurement = self.measure(conn.as_mut(), engine, query_id, sql).await;
        if measurement.abandoned {
            conn.force_close().await;
        } else {
            conn.close().await;
        }

        result.duration = measurement.duration;
        result.row_count = measurement.output.as_ref().map(|o| o.row_count() as u64);
        result.output = measurement.output;
        result.plan = measurement.plan;
        result.warmup_runs = measurement.warmups;
        result.error = measurement.error;

        match result.status() {
            RunStatus::Ok => tracing::info!(
                engine = %result.engine,
                query = %query_id,
                duration_ms = result.duration_ms().unwrap_or_default(),
                rows = result.row_count.unwrap_or_default(),
                "run complete"
            ),
            status => tracing::warn!(
                engine = %result.engine,
                query = %query_id,
                status = status.as_str(),
                error = result.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default(),
                "run failed"
            ),
        }
        result
    }

    async fn measure(
        &self,
        conn: &mut dyn EngineConnection,
        engine: &Engine,
        query_id: &str,
        sql: &str,
    ) -> Measurement {
        let mut m = Measurement::default();

        if self.config.explain == ExplainMode::Before {
            match self.fetch_plan(conn, engine, query_id, sql).await {
                Ok(plan) => m.plan = plan,
                Err(e) => return m.fail(e),
            }
        }

        for warmup in 0..self.config.warmup_runs {
            match execute_with_timeout(conn, sql, self.config.query_timeout).await {
                Ok(execution) => {
                    tracing::debug!(
                        engine = %engine.name(),
                        query = %query_id,
                        warmup = warmup + 1,
                        duration_ms = execution.duration.as_secs_f64() * 1000.0,
                        "warmup run"
                    );
                    m.warmups += 1;
                }
                Err(e) => return m.fail(e),
            }
        }

        match execute_with_timeout(conn, sql, self.config.query_timeout).await {
            Ok(execution) => {
                m.duration = Some(execution.duration);
                m.output = Some(execution.output);
            }
            Err(e) => return m.fail(e),
        }

        if self.config.explain == ExplainMode::After {
            match self.fetch_plan(conn, engine, query_id, sql).await {
                Ok(plan) => m.plan = plan,
                // The timed run already completed; only the plan is lost
                Err(e) => {
                    tracing::warn!(
                        engine = %engine.name(),
                        query = %query_id,
                        error = %e,
                        "explain timed out"
                    );
                    m.abandoned = true;
                }
            }
        }

        m
    }

    /// Plan text, `None` if the engine refused to explain the query.
    /// Only a timeout is returned as an error, since it leaves the connection unusable.
    async fn fetch_plan(
        &self,
        conn: &mut dyn EngineConnection,
        engine: &Engine,
        query_id: &str,
        sql: &str,
    ) -> Result<Option<String>, BenchError> {
        match timeout(self.config.query_timeout, conn.explain(sql)).await {
            Ok(Ok(plan)) => Ok(Some(plan)),
            Ok(Err(e)) => {
                tracing::warn!(
                    engine = %engine.name(),
                    query = %query_id,
                    error = %e,
                    "explain rejected"
                );
                Ok(None)
            }
            Err(_) => Err(BenchError::Timeout(self.config.query_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Script, ScriptedAdapter};
    use crate::catalog::QueryDefinition;
    use crate::dialect::Dialect;
    use crate::types::Cell;

    const SQL: &str = "SELECT count(*) FROM events";

    fn engine(adapter: Arc<ScriptedAdapter>) -> Engine {
        Engine {
            index: 0,
            profile: EngineProfile::new("pg_heap", "postgres://localhost/bench", Dialect::Postgres)
                .unwrap(),
            adapter,
        }
    }

    fn catalog() -> QueryCatalog {
        let q = QueryDefinition::new("q0", "count").with_variant(Dialect::Postgres, SQL);
        QueryCatalog::load(vec![q], &[]).unwrap().0
    }

    fn count(n: i64) -> ResultSet {
        ResultSet::new(vec!["count".into()], vec![vec![Cell::Int(n)]])
    }

    #[tokio::test]
    async fn test_successful_run_records_everything() {
        let adapter = Arc::new(ScriptedAdapter::new().respond(
            SQL,
            Script::slow(count(42), Duration::from_millis(2)),
        ));
        let catalog = catalog();
        let runner = ExecutionRunner::new(&catalog, RunnerConfig::default());

        let result = runner.run(&engine(adapter.clone()), "q0").await;
        assert_eq!(result.status(), RunStatus::Ok);
        assert_eq!(result.row_count, Some(1));
        assert!(result.duration.unwrap() >= Duration::from_millis(2));
        assert!(result.plan.as_deref().unwrap().contains("Scripted"));

        let stats = adapter.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.explains, 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_recorded() {
        let adapter = Arc::new(
            ScriptedAdapter::new().respond(SQL, Script::Fail("relation does not exist".into())),
        );
        let catalog = catalog();
        let runner = ExecutionRunner::new(&catalog, RunnerConfig::default());

        let result = runner.run(&engine(adapter.clone()), "q0").await;
        assert_eq!(result.status(), RunStatus::QueryError);
        assert!(result.error.unwrap().message.contains("relation does not exist"));
        assert!(result.duration.is_none());
        assert!(adapter.stats().all_released());
    }

    #[tokio::test]
    async fn test_warmup_runs_are_explicit() {
        let adapter = Arc::new(ScriptedAdapter::new().respond(SQL, Script::rows(count(1))));
        let catalog = catalog();
        let config = RunnerConfig {
            warmup_runs: 3,
            explain: ExplainMode::Off,
            ..RunnerConfig::default()
        };
        let runner = ExecutionRunner::new(&catalog, config);

        let result = runner.run(&engine(adapter.clone()), "q0").await;
        assert!(result.is_ok());
        assert_eq!(result.warmup_runs, 3);
        assert!(result.plan.is_none());
        assert_eq!(adapter.stats().executions, 4);
        assert_eq!(adapter.stats().explains, 0);
    }

    #[tokio::test]
    async fn test_no_implicit_retry() {
        let adapter = Arc::new(ScriptedAdapter::new().respond(SQL, Script::Fail("boom".into())));
        let catalog = catalog();
        let runner = ExecutionRunner::new(&catalog, RunnerConfig::default());

        runner.run(&engine(adapter.clone()), "q0").await;
        assert_eq!(adapter.stats().executions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_force_closes_connection() {
        let adapter = Arc::new(ScriptedAdapter::new().respond(
            SQL,
            Script::slow(count(1), Duration::from_secs(10)),
        ));
        let catalog = catalog();
        let config = RunnerConfig {
            query_timeout: Duration::from_secs(5),
            ..RunnerConfig::default()
        };
        let runner = ExecutionRunner::new(&catalog, config);

        let start = tokio::time::Instant::now();
        let result = runner.run(&engine(adapter.clone()), "q0").await;
        let elapsed = start.elapsed();

        assert_eq!(result.status(), RunStatus::Timeout);
        assert!(result.duration.is_none());
        assert!(elapsed < Duration::from_millis(5500), "took {:?}", elapsed);

        let stats = adapter.stats();
        assert_eq!(stats.force_closes, 1);
        assert_eq!(stats.closes, 0);
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let adapter = Arc::new(ScriptedAdapter::new().unreachable());
        let catalog = catalog();
        let runner = ExecutionRunner::new(&catalog, RunnerConfig::default());

        let result = runner.run(&engine(adapter), "q0").await;
        assert_eq!(result.status(), RunStatus::ConnectionError);
    }
}
