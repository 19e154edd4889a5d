//! Cross-engine parity checks.
//!
//! The first successful run (in engine registration order) is the baseline and
//! every other successful run is compared to it. For percentile queries the
//! baseline is the first successful engine that computes percentiles exactly.
//! Row counts must always match.
//! Output cells are compared exactly, or within a relative tolerance band when
//! the query is declared approximate or computes a percentile on an engine
//! that estimates percentiles. A divergence is reported, never raised.

use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::{ComparisonPolicy, QueryDefinition};
use crate::profile::{Capabilities, EngineProfile};
use crate::runner::RunResult;
use crate::types::{Cell, ResultSet, Row};

/// Default tolerance band, in percent
pub const DEFAULT_TOLERANCE_PCT: f64 = 1.0;

/// Relative slack allowed for float rounding in exact comparisons
const FLOAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonKind {
    /// Equality required
    Exact,
    /// Numeric cells may differ by up to `relative_pct` percent
    Tolerance { relative_pct: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Match,
    Divergence { detail: String },
}

/// One engine compared against the baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub baseline: String,
    pub engine: String,
    #[serde(flatten)]
    pub kind: ComparisonKind,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub query: String,
    pub baseline: Option<String>,
    pub comparisons: Vec<Comparison>,
    /// Engines whose run did not succeed
    pub not_compared: Vec<String>,
}

impl ValidationOutcome {
    pub fn has_divergence(&self) -> bool {
        self.divergences().next().is_some()
    }

    pub fn divergences(&self) -> impl Iterator<Item = &Comparison> {
        self.comparisons
            .iter()
            .filter(|c| matches!(c.verdict, Verdict::Divergence { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct ResultValidator {
    capabilities: HashMap<String, Capabilities>,
    tolerance_pct: f64,
}

impl ResultValidator {
    pub fn new(engines: &[EngineProfile], tolerance_pct: f64) -> Self {
        Self {
            capabilities: engines
                .iter()
                .map(|e| (e.name().to_string(), e.capabilities()))
                .collect(),
            tolerance_pct,
        }
    }

    /// Compare all runs of one query.
    pub fn validate(&self, query: &QueryDefinition, results: &[&RunResult]) -> ValidationOutcome {
        let mut results: Vec<&RunResult> =
            results.iter().copied().filter(|r| r.query == query.id()).collect();
        results.sort_by_key(|r| r.engine_index);

        let not_compared = results
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.engine.clone())
            .collect();
        let succeeded: Vec<&RunResult> = results.into_iter().filter(|r| r.is_ok()).collect();

        // A percentile baseline must come from an exact engine when one succeeded,
        // so exact engines are still compared exactly against each other
        let baseline = if query.uses_percentile() {
            succeeded
                .iter()
                .copied()
                .find(|r| !self.estimates_percentiles(&r.engine))
                .or_else(|| succeeded.first().copied())
        } else {
            succeeded.first().copied()
        };
        let Some(baseline) = baseline else {
            return ValidationOutcome {
                query: query.id().to_string(),
                baseline: None,
                comparisons: Vec::new(),
                not_compared,
            };
        };

        let comparisons = succeeded
            .iter()
            .copied()
            .filter(|other| other.engine_index != baseline.engine_index)
            .map(|other| {
                let kind = self.comparison_kind(query, &baseline.engine, &other.engine);
                let verdict = compare(baseline, other, kind, query.is_ordered());
                if let Verdict::Divergence { detail } = &verdict {
                    tracing::warn!(
                        query = %query.id(),
                        baseline = %baseline.engine,
                        engine = %other.engine,
                        detail = %detail,
                        "result divergence"
                    );
                }
                Comparison {
                    baseline: baseline.engine.clone(),
                    engine: other.engine.clone(),
                    kind,
                    verdict,
                }
            })
            .collect();

        ValidationOutcome {
            query: query.id().to_string(),
            baseline: Some(baseline.engine.clone()),
            comparisons,
            not_compared,
        }
    }

    fn estimates_percentiles(&self, engine: &str) -> bool {
        self.capabilities
            .get(engine)
            .is_some_and(|c| !c.exact_percentile)
    }

    /// Exact unless the query is declared approximate, or it computes a
    /// percentile and one of the two engines only estimates percentiles.
    pub fn comparison_kind(&self, query: &QueryDefinition, a: &str, b: &str) -> ComparisonKind {
        let approximate = query.comparison() == ComparisonPolicy::Tolerance
            || (query.uses_percentile()
                && (self.estimates_percentiles(a) || self.estimates_percentiles(b)));

        if approximate {
            ComparisonKind::Tolerance {
                relative_pct: query.tolerance_pct().unwrap_or(self.tolerance_pct),
            }
        } else {
            ComparisonKind::Exact
        }
    }
}

fn compare(
    baseline: &RunResult,
    other: &RunResult,
    kind: ComparisonKind,
    ordered: bool,
) -> Verdict {
    if baseline.row_count != other.row_count {
        return Verdict::Divergence {
            detail: format!(
                "row count {} vs {}",
                fmt_count(baseline.row_count),
                fmt_count(other.row_count)
            ),
        };
    }

    match (&baseline.output, &other.output) {
        (Some(a), Some(b)) => compare_rows(a, b, kind, ordered),
        _ => Verdict::Match,
    }
}

fn fmt_count(count: Option<u64>) -> String {
    count.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

fn compare_rows(a: &ResultSet, b: &ResultSet, kind: ComparisonKind, ordered: bool) -> Verdict {
    let (rows_a, rows_b): (Vec<&Row>, Vec<&Row>) = if ordered {
        (a.rows.iter().collect(), b.rows.iter().collect())
    } else {
        (a.canonical_rows(), b.canonical_rows())
    };

    for (i, (ra, rb)) in rows_a.iter().zip(rows_b.iter()).enumerate() {
        if ra.len() != rb.len() {
            return Verdict::Divergence {
                detail: format!("row {}: {} columns vs {}", i, ra.len(), rb.len()),
            };
        }
        for (j, (ca, cb)) in ra.iter().zip(rb.iter()).enumerate() {
            if !cells_match(ca, cb, kind) {
                let column = a.columns.get(j).map(String::as_str).unwrap_or("?");
                return Verdict::Divergence {
                    detail: format!("row {} column '{}': {} vs {}", i, column, ca, cb),
                };
            }
        }
    }
    Verdict::Match
}

fn cells_match(a: &Cell, b: &Cell, kind: ComparisonKind) -> bool {
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) if kind == ComparisonKind::Exact => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => {
                let allowed = match kind {
                    ComparisonKind::Exact => FLOAT_EPSILON,
                    ComparisonKind::Tolerance { relative_pct } => relative_pct / 100.0,
                };
                relative_error(x, y) <= allowed + f64::EPSILON
            }
            _ => match (a, b) {
                (Cell::Null, Cell::Null) => true,
                (Cell::Text(x), Cell::Text(y)) => x == y,
                _ => false,
            },
        },
    }
}

/// |a - b| relative to the larger magnitude; zero when both are zero
pub fn relative_error(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::runner::{RunError, RunErrorKind};

    fn run(engine: &str, index: usize, rows: u64, output: Option<ResultSet>) -> RunResult {
        RunResult {
            engine: engine.to_string(),
            engine_index: index,
            query: "q".to_string(),
            duration: Some(std::time::Duration::from_millis(5)),
            row_count: Some(rows),
            plan: None,
            output,
            warmup_runs: 0,
            error: None,
        }
    }

    fn engines() -> Vec<EngineProfile> {
        vec![
            EngineProfile::new("pg_heap", "postgres://localhost/db", Dialect::Postgres).unwrap(),
            EngineProfile::new("clickhouse", "http://localhost:8123", Dialect::ClickHouse).unwrap(),
            EngineProfile::new("cedar", "postgres://localhost:5433/db", Dialect::Cedar).unwrap(),
        ]
    }

    fn count_query() -> QueryDefinition {
        QueryDefinition::new("q", "count").with_variant(Dialect::Postgres, "SELECT count(*) FROM t")
    }

    fn median_query() -> QueryDefinition {
        QueryDefinition::new("q", "median")
            .with_variant(
                Dialect::Postgres,
                "SELECT PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY amount) FROM t",
            )
            .with_variant(Dialect::ClickHouse, "SELECT quantileTDigest(0.5)(amount) FROM t")
    }

    fn single(value: f64) -> Option<ResultSet> {
        Some(ResultSet::new(vec!["median".into()], vec![vec![Cell::Float(value)]]))
    }

    #[test]
    fn test_equal_row_counts_match() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let a = run("pg_heap", 0, 1000, None);
        let b = run("cedar", 2, 1000, None);
        let outcome = validator.validate(&count_query(), &[&a, &b]);
        assert_eq!(outcome.baseline.as_deref(), Some("pg_heap"));
        assert!(!outcome.has_divergence());
    }

    #[test]
    fn test_row_count_mismatch_diverges() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let a = run("pg_heap", 0, 1000, None);
        let b = run("cedar", 2, 995, None);
        let outcome = validator.validate(&count_query(), &[&a, &b]);
        assert!(outcome.has_divergence());
        let divergence = outcome.divergences().next().unwrap();
        assert_eq!(divergence.kind, ComparisonKind::Exact);
        assert!(matches!(&divergence.verdict, Verdict::Divergence { detail } if detail.contains("995")));
    }

    #[test]
    fn test_median_within_tolerance() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let pg = run("pg_heap", 0, 1, single(100.0));
        let ch = run("clickhouse", 1, 1, single(100.5));
        let outcome = validator.validate(&median_query(), &[&pg, &ch]);
        assert_eq!(
            outcome.comparisons[0].kind,
            ComparisonKind::Tolerance { relative_pct: 1.0 }
        );
        assert!(!outcome.has_divergence());
    }

    #[test]
    fn test_median_outside_tolerance() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let pg = run("pg_heap", 0, 1, single(100.0));
        let ch = run("clickhouse", 1, 1, single(102.0));
        let outcome = validator.validate(&median_query(), &[&pg, &ch]);
        assert!(outcome.has_divergence());
    }

    #[test]
    fn test_exact_percentile_engines_compare_exactly() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let pg = run("pg_heap", 0, 1, single(100.0));
        let cedar = run("cedar", 2, 1, single(100.5));
        let outcome = validator.validate(&median_query(), &[&pg, &cedar]);
        assert_eq!(outcome.comparisons[0].kind, ComparisonKind::Exact);
        assert!(outcome.has_divergence());
    }

    #[test]
    fn test_percentile_baseline_is_an_exact_engine() {
        let engines = vec![
            EngineProfile::new("clickhouse", "http://localhost:8123", Dialect::ClickHouse).unwrap(),
            EngineProfile::new("cedar", "postgres://localhost:5433/db", Dialect::Cedar).unwrap(),
            EngineProfile::new("pg_heap", "postgres://localhost/db", Dialect::Postgres).unwrap(),
        ];
        let validator = ResultValidator::new(&engines, DEFAULT_TOLERANCE_PCT);
        let ch = run("clickhouse", 0, 1, single(100.5));
        let cedar = run("cedar", 1, 1, single(100.0));
        let pg = run("pg_heap", 2, 1, single(100.9));

        let outcome = validator.validate(&median_query(), &[&ch, &cedar, &pg]);
        assert_eq!(outcome.baseline.as_deref(), Some("cedar"));
        assert_eq!(outcome.comparisons.len(), 2);
        assert_eq!(outcome.comparisons[0].engine, "clickhouse");
        assert_eq!(
            outcome.comparisons[0].kind,
            ComparisonKind::Tolerance { relative_pct: 1.0 }
        );
        let divergences: Vec<&Comparison> = outcome.divergences().collect();
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].engine, "pg_heap");
        assert_eq!(divergences[0].kind, ComparisonKind::Exact);

        // Without a successful exact engine the estimate is the baseline
        let outcome = validator.validate(&median_query(), &[&ch]);
        assert_eq!(outcome.baseline.as_deref(), Some("clickhouse"));
    }

    #[test]
    fn test_per_query_tolerance_override() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let query = median_query().with_tolerance_pct(5.0);
        let pg = run("pg_heap", 0, 1, single(100.0));
        let ch = run("clickhouse", 1, 1, single(103.0));
        assert!(!validator.validate(&query, &[&pg, &ch]).has_divergence());
    }

    #[test]
    fn test_unordered_rows_are_canonicalized() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let out_a = ResultSet::new(
            vec!["category".into(), "n".into()],
            vec![
                vec![Cell::Text("b".into()), Cell::Int(2)],
                vec![Cell::Text("a".into()), Cell::Int(1)],
            ],
        );
        // ClickHouse returns the same groups in another order, sums as floats
        let out_b = ResultSet::new(
            vec!["category".into(), "n".into()],
            vec![
                vec![Cell::Text("a".into()), Cell::Float(1.0)],
                vec![Cell::Text("b".into()), Cell::Float(2.0)],
            ],
        );
        let a = run("pg_heap", 0, 2, Some(out_a.clone()));
        let b = run("clickhouse", 1, 2, Some(out_b.clone()));
        assert!(!validator.validate(&count_query(), &[&a, &b]).has_divergence());

        let ordered = count_query().ordered(true);
        assert!(validator.validate(&ordered, &[&a, &b]).has_divergence());
    }

    #[test]
    fn test_failed_runs_are_not_compared() {
        let validator = ResultValidator::new(&engines(), DEFAULT_TOLERANCE_PCT);
        let mut failed = run("pg_heap", 0, 0, None);
        failed.row_count = None;
        failed.error = Some(RunError {
            kind: RunErrorKind::Timeout,
            message: "timed out".into(),
        });
        let ok = run("cedar", 2, 1000, None);
        let outcome = validator.validate(&count_query(), &[&failed, &ok]);
        assert_eq!(outcome.baseline.as_deref(), Some("cedar"));
        assert_eq!(outcome.not_compared, vec!["pg_heap".to_string()]);
        assert!(outcome.comparisons.is_empty());
    }

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(0.0, 0.0), 0.0);
        assert!((relative_error(100.0, 99.5) - 0.005).abs() < 1e-12);
    }
}
