//! Comparison report: every run, ordered deterministically, with per-query rankings.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::runner::{RunResult, RunStatus};
use crate::validator::ValidationOutcome;

/// One row of a per-query summary table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub query: String,
    pub engine: String,
    pub duration_ms: Option<f64>,
    pub row_count: Option<u64>,
    pub status: RunStatus,
    /// Id of the persisted plan artifact
    pub plan_ref: Option<String>,
    /// 1 = fastest; absent for runs that did not succeed
    pub rank: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySummary {
    pub query: String,
    pub runs: Vec<RunSummary>,
    /// Engines fastest to slowest
    pub ranking: Vec<String>,
    pub validation: Option<ValidationOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub runs: usize,
    pub ok: usize,
    pub query_errors: usize,
    pub timeouts: usize,
    pub connection_errors: usize,
    pub skipped: usize,
    pub divergences: usize,
}

/// Built once per benchmark invocation, read-only afterwards
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    #[serde(skip)]
    results: Vec<RunResult>,
    queries: Vec<QuerySummary>,
    totals: Totals,
}

/// Artifact id of a run's plan
pub fn plan_ref(query: &str, engine: &str) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect::<String>()
    };
    format!("{}__{}", sanitize(query), sanitize(engine))
}

impl ComparisonReport {
    /// Order runs by (query id, engine registration) and derive summaries.
    pub fn build(mut results: Vec<RunResult>, validations: Vec<ValidationOutcome>) -> Self {
        results.sort_by(|a, b| {
            a.query
                .cmp(&b.query)
                .then(a.engine_index.cmp(&b.engine_index))
                .then_with(|| a.engine.cmp(&b.engine))
        });

        let mut validations: BTreeMap<String, ValidationOutcome> = validations
            .into_iter()
            .map(|v| (v.query.clone(), v))
            .collect();

        let mut queries: Vec<QuerySummary> = Vec::new();
        for chunk in results.chunk_by(|a, b| a.query == b.query) {
            let query = chunk[0].query.clone();

            let mut ranked: Vec<&RunResult> =
                chunk.iter().filter(|r| r.is_ok() && r.duration.is_some()).collect();
            ranked.sort_by(|a, b| a.duration.cmp(&b.duration).then(a.engine_index.cmp(&b.engine_index)));
            let ranking: Vec<String> = ranked.iter().map(|r| r.engine.clone()).collect();

            let runs = chunk
                .iter()
                .map(|r| RunSummary {
                    query: r.query.clone(),
                    engine: r.engine.clone(),
                    duration_ms: r.duration_ms(),
                    row_count: r.row_count,
                    status: r.status(),
                    plan_ref: r.plan.as_ref().map(|_| plan_ref(&r.query, &r.engine)),
                    rank: ranking.iter().position(|e| *e == r.engine).map(|p| p + 1),
                    error: r.error.as_ref().map(|e| e.message.clone()),
                })
                .collect();

            queries.push(QuerySummary {
                validation: validations.remove(&query),
                query,
                runs,
                ranking,
            });
        }

        let mut totals = Totals {
            runs: results.len(),
            ..Totals::default()
        };
        for r in &results {
            match r.status() {
                RunStatus::Ok => totals.ok += 1,
                RunStatus::QueryError => totals.query_errors += 1,
                RunStatus::Timeout => totals.timeouts += 1,
                RunStatus::ConnectionError => totals.connection_errors += 1,
                RunStatus::Skipped => totals.skipped += 1,
            }
        }
        totals.divergences = queries
            .iter()
            .filter_map(|q| q.validation.as_ref())
            .map(|v| v.divergences().count())
            .sum();

        Self {
            results,
            queries,
            totals,
        }
    }

    /// Every run, in report order
    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    pub fn queries(&self) -> &[QuerySummary] {
        &self.queries
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn summaries(&self) -> impl Iterator<Item = &RunSummary> {
        self.queries.iter().flat_map(|q| q.runs.iter())
    }

    /// Connectivity failures kept every attempted run from executing
    pub fn connectivity_prevented_all_runs(&self) -> bool {
        self.totals.connection_errors > 0
            && self
                .results
                .iter()
                .all(|r| matches!(r.status(), RunStatus::ConnectionError | RunStatus::Skipped))
    }
}
