//! Benchmark driver: every selected (query, engine) pair, then validation and the report.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::adapter::adapter_for;
use crate::catalog::{CatalogWarning, QueryCatalog};
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::report::ComparisonReport;
use crate::runner::{Engine, ExecutionRunner, RunResult, RunStatus, RunnerConfig};
use crate::validator::{DEFAULT_TOLERANCE_PCT, ResultValidator};

/// How engines are scheduled for one query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// One run at a time
    #[default]
    Sequential,
    /// All engines at once for the same query; queries still run one after another
    Parallel,
}

/// Row count of one table on one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCount {
    pub engine: String,
    pub rows: Option<u64>,
    pub error: Option<String>,
}

/// True when every engine answered and all counts agree
pub fn row_counts_match(counts: &[RowCount]) -> bool {
    let mut rows = counts.iter().map(|c| c.rows);
    match rows.next() {
        Some(Some(first)) => rows.all(|r| r == Some(first)),
        _ => false,
    }
}

/// Results gathered by a parallel unit survive a panicked sibling
fn lock_collected(collected: &Mutex<Vec<RunResult>>) -> MutexGuard<'_, Vec<RunResult>> {
    collected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn push_collected(collected: &Mutex<Vec<RunResult>>, result: RunResult) {
    lock_collected(collected).push(result);
}

pub struct Benchmark {
    engines: Vec<Engine>,
    catalog: QueryCatalog,
    query_ids: Vec<String>,
    runner: RunnerConfig,
    schedule: Schedule,
    tolerance_pct: f64,
}

impl Benchmark {
    /// Plan a benchmark of `query_ids` (all catalog queries if empty) on `engines`.
    ///
    /// Fails before anything connects if a selected query has no usable
    /// variant for a selected engine.
    pub fn new(
        engines: Vec<Engine>,
        catalog: QueryCatalog,
        query_ids: Vec<String>,
        runner: RunnerConfig,
    ) -> Result<Self> {
        if engines.is_empty() {
            return Err(BenchError::InvalidConfig("no engines selected".to_string()));
        }
        let mut names = HashSet::new();
        for engine in &engines {
            if !names.insert(engine.name()) {
                return Err(BenchError::InvalidConfig(format!(
                    "duplicate engine name '{}'",
                    engine.name()
                )));
            }
        }

        let mut query_ids = if query_ids.is_empty() {
            catalog.queries().map(|q| q.id().to_string()).collect()
        } else {
            query_ids
        };
        query_ids.sort();
        query_ids.dedup();

        let profiles: Vec<EngineProfile> = engines.iter().map(|e| e.profile.clone()).collect();
        catalog.check_coverage(&query_ids, &profiles)?;

        Ok(Self {
            engines,
            catalog,
            query_ids,
            runner,
            schedule: Schedule::default(),
            tolerance_pct: DEFAULT_TOLERANCE_PCT,
        })
    }

    /// Build from configuration, keeping only the named engines and queries when filters are given.
    pub fn from_config(
        config: &BenchConfig,
        engine_filter: &[String],
        query_filter: &[String],
    ) -> Result<(Self, Vec<CatalogWarning>)> {
        let profiles = config.profiles()?;
        for name in engine_filter {
            if !profiles.iter().any(|p| p.name() == name) {
                return Err(BenchError::InvalidConfig(format!("unknown engine '{}'", name)));
            }
        }

        let engines: Vec<Engine> = profiles
            .into_iter()
            .enumerate()
            .filter(|(_, p)| engine_filter.is_empty() || engine_filter.iter().any(|n| n == p.name()))
            .map(|(index, profile)| Engine {
                index,
                adapter: adapter_for(profile.dialect()),
                profile,
            })
            .collect();

        let selected: Vec<EngineProfile> = engines.iter().map(|e| e.profile.clone()).collect();
        let (catalog, warnings) = QueryCatalog::load(config.query_definitions()?, &selected)?;

        let benchmark = Self::new(engines, catalog, query_filter.to_vec(), config.runner_config())?
            .with_schedule(config.run.schedule)
            .with_tolerance_pct(config.run.tolerance_pct);
        Ok((benchmark, warnings))
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_tolerance_pct(mut self, pct: f64) -> Self {
        self.tolerance_pct = pct;
        self
    }

    /// Selected engines, in registration order
    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    /// Selected queries, in lexical order
    pub fn query_ids(&self) -> &[String] {
        &self.query_ids
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Run every pair, validate, and build the report.
    ///
    /// Cancellation is honored between runs; pairs not started are recorded as skipped.
    /// Once an engine fails to connect its remaining pairs are skipped as well.
    pub async fn execute(&self, cancel: &CancellationToken) -> ComparisonReport {
        tracing::info!(
            engines = self.engines.len(),
            queries = self.query_ids.len(),
            schedule = ?self.schedule,
            "starting benchmark"
        );

        let runner = ExecutionRunner::new(&self.catalog, self.runner.clone());
        let mut results: Vec<RunResult> = Vec::new();
        let mut unreachable: HashSet<usize> = HashSet::new();

        for query_id in &self.query_ids {
            match self.schedule {
                Schedule::Sequential => {
                    for engine in &self.engines {
                        let result = match self.skip_reason(engine, query_id, &unreachable, cancel) {
                            Some(reason) => RunResult::skipped(engine, query_id, reason),
                            None => runner.run(engine, query_id).await,
                        };
                        if result.status() == RunStatus::ConnectionError {
                            unreachable.insert(engine.index);
                        }
                        results.push(result);
                    }
                }
                Schedule::Parallel => {
                    let collected = Arc::new(Mutex::new(Vec::with_capacity(self.engines.len())));
                    let runs = self.engines.iter().map(|engine| {
                        let collected = Arc::clone(&collected);
                        let reason = self.skip_reason(engine, query_id, &unreachable, cancel);
                        let runner = &runner;
                        async move {
                            let result = match reason {
                                Some(reason) => RunResult::skipped(engine, query_id, reason),
                                None => runner.run(engine, query_id).await,
                            };
                            push_collected(&collected, result);
                        }
                    });
                    join_all(runs).await;

                    let collected = std::mem::take(&mut *lock_collected(&collected));
                    for result in collected {
                        if result.status() == RunStatus::ConnectionError {
                            unreachable.insert(result.engine_index);
                        }
                        results.push(result);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::warn!("benchmark cancelled; remaining runs were skipped");
        }

        let profiles: Vec<EngineProfile> = self.engines.iter().map(|e| e.profile.clone()).collect();
        let validator = ResultValidator::new(&profiles, self.tolerance_pct);
        let validations = self
            .query_ids
            .iter()
            .filter_map(|id| self.catalog.query(id))
            .map(|query| {
                let runs: Vec<&RunResult> = results.iter().filter(|r| r.query == query.id()).collect();
                validator.validate(query, &runs)
            })
            .collect();

        ComparisonReport::build(results, validations)
    }

    fn skip_reason(
        &self,
        engine: &Engine,
        query_id: &str,
        unreachable: &HashSet<usize>,
        cancel: &CancellationToken,
    ) -> Option<&'static str> {
        if cancel.is_cancelled() {
            Some("cancelled")
        } else if self
            .catalog
            .query(query_id)
            .is_some_and(|q| q.is_skipped_for(engine.name()))
        {
            Some("excluded for this engine")
        } else if unreachable.contains(&engine.index) {
            Some("engine unreachable")
        } else {
            None
        }
    }

    /// Count the rows of `table` on every selected engine, one engine at a time.
    pub async fn row_counts(&self, table: &str) -> Vec<RowCount> {
        let mut counts = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            let outcome = self.row_count(engine, table).await;
            match &outcome {
                Ok(rows) => tracing::info!(engine = %engine.name(), table = %table, rows, "row count"),
                Err(e) => tracing::warn!(engine = %engine.name(), table = %table, error = %e, "row count failed"),
            }
            counts.push(RowCount {
                engine: engine.name().to_string(),
                rows: outcome.as_ref().ok().copied(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }
        counts
    }

    async fn row_count(&self, engine: &Engine, table: &str) -> Result<u64> {
        let mut conn = timeout(self.runner.connect_timeout, engine.adapter.connect(&engine.profile))
            .await
            .map_err(|_| BenchError::connection(engine.name(), "connect timed out"))??;

        match timeout(self.runner.query_timeout, conn.row_count(table)).await {
            Ok(outcome) => {
                conn.close().await;
                outcome
            }
            Err(_) => {
                conn.force_close().await;
                Err(BenchError::Timeout(self.runner.query_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(engine: &str, rows: Option<u64>) -> RowCount {
        RowCount {
            engine: engine.to_string(),
            rows,
            error: rows.is_none().then(|| "refused".to_string()),
        }
    }

    #[test]
    fn test_row_counts_match() {
        assert!(row_counts_match(&[count("a", Some(10)), count("b", Some(10))]));
        assert!(!row_counts_match(&[count("a", Some(10)), count("b", Some(9))]));
        assert!(!row_counts_match(&[count("a", Some(10)), count("b", None)]));
        assert!(!row_counts_match(&[]));
    }

    #[test]
    fn test_poisoned_collector_keeps_results() {
        let engine = Engine {
            index: 0,
            profile: EngineProfile::new("pg_heap", "postgres://localhost/db", crate::Dialect::Postgres)
                .unwrap(),
            adapter: Arc::new(crate::adapter::ScriptedAdapter::new()),
        };
        let collected = Arc::new(Mutex::new(Vec::new()));
        push_collected(&collected, RunResult::skipped(&engine, "q1", "first"));

        let poisoner = Arc::clone(&collected);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("unit panicked while holding the collector");
        })
        .join();
        assert!(collected.is_poisoned());

        push_collected(&collected, RunResult::skipped(&engine, "q2", "second"));
        let results = std::mem::take(&mut *lock_collected(&collected));
        let queries: Vec<&str> = results.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, ["q1", "q2"]);
    }
}
