//! Common test utilities for integration tests
//!
//! Builds a four-engine line-up (ClickHouse, CedarDB, PostgreSQL heap and
//! PostgreSQL over FDW) backed by scripted adapters, plus a small catalog
//! with one exact and one percentile query.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use engine_bench::adapter::{Script, ScriptedAdapter};
use engine_bench::{Cell, Dialect, Engine, EngineProfile, QueryCatalog, QueryDefinition, ResultSet};

pub const COUNT_PG: &str = "SELECT COUNT(*) FROM events";
pub const COUNT_CH: &str = "SELECT count() FROM events";
pub const MEDIAN_PG: &str =
    "SELECT category, PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY amount) FROM events GROUP BY category";
pub const MEDIAN_CH: &str =
    "SELECT category, quantileTDigest(0.5)(amount) FROM events GROUP BY category";

/// Engine names in registration order
pub const ENGINES: [&str; 4] = ["clickhouse", "cedardb", "pg_heap", "pg_fdw"];

pub fn count_rows(n: i64) -> ResultSet {
    ResultSet::new(vec!["count".into()], vec![vec![Cell::Int(n)]])
}

pub fn median_rows(medians: &[(&str, f64)]) -> ResultSet {
    ResultSet::new(
        vec!["category".into(), "median".into()],
        medians
            .iter()
            .map(|(category, median)| vec![Cell::Text(category.to_string()), Cell::Float(*median)])
            .collect(),
    )
}

/// Catalog with `q1_count` (exact) and `q3_median` (percentile)
pub fn catalog_definitions() -> Vec<QueryDefinition> {
    vec![
        QueryDefinition::new("q3_median", "median amount per category")
            .with_variant(Dialect::Postgres, MEDIAN_PG)
            .with_variant(Dialect::Cedar, MEDIAN_PG)
            .with_variant(Dialect::ClickHouse, MEDIAN_CH),
        QueryDefinition::new("q1_count", "row count")
            .with_variant(Dialect::Postgres, COUNT_PG)
            .with_variant(Dialect::Cedar, COUNT_PG)
            .with_variant(Dialect::ClickHouse, COUNT_CH),
    ]
}

pub fn catalog() -> QueryCatalog {
    QueryCatalog::load(catalog_definitions(), &[])
        .expect("valid catalog")
        .0
}

/// A ClickHouse-style adapter: estimated median
pub fn clickhouse_adapter() -> ScriptedAdapter {
    ScriptedAdapter::new()
        .respond(COUNT_CH, Script::slow(count_rows(1000), Duration::from_millis(1)))
        .respond(
            MEDIAN_CH,
            Script::rows(median_rows(&[("books", 41.7), ("games", 19.95)])),
        )
        .with_table("events", 1000)
}

/// A PostgreSQL-style adapter: exact median
pub fn postgres_adapter() -> ScriptedAdapter {
    ScriptedAdapter::new()
        .respond(COUNT_PG, Script::slow(count_rows(1000), Duration::from_millis(1)))
        .respond(
            MEDIAN_PG,
            Script::rows(median_rows(&[("games", 20.0), ("books", 41.5)])),
        )
        .with_table("events", 1000)
}

/// Adapters in registration order, one per entry of [`ENGINES`]
pub fn standard_adapters() -> Vec<ScriptedAdapter> {
    vec![
        clickhouse_adapter(),
        postgres_adapter(),
        postgres_adapter(),
        postgres_adapter(),
    ]
}

pub struct Fleet {
    pub engines: Vec<Engine>,
    pub adapters: Vec<Arc<ScriptedAdapter>>,
}

impl Fleet {
    pub fn adapter(&self, name: &str) -> &ScriptedAdapter {
        let index = ENGINES
            .iter()
            .position(|e| *e == name)
            .expect("known engine");
        &self.adapters[index]
    }

    pub fn total_connects(&self) -> usize {
        self.adapters.iter().map(|a| a.stats().connects).sum()
    }

    pub fn all_released(&self) -> bool {
        self.adapters.iter().all(|a| a.stats().all_released())
    }
}

/// Register the four engines over the given adapters
pub fn fleet(adapters: Vec<ScriptedAdapter>) -> Fleet {
    let profiles = [
        ("clickhouse", "http://localhost:8123/bench", Dialect::ClickHouse),
        ("cedardb", "postgres://postgres@localhost:5433/postgres", Dialect::Cedar),
        ("pg_heap", "postgres://postgres@localhost:5432/bench", Dialect::Postgres),
        ("pg_fdw", "postgres://postgres@localhost:5432/bench_fdw", Dialect::Postgres),
    ];

    let adapters: Vec<Arc<ScriptedAdapter>> = adapters.into_iter().map(Arc::new).collect();
    let engines = profiles
        .iter()
        .zip(adapters.iter())
        .enumerate()
        .map(|(index, ((name, url, dialect), adapter))| Engine {
            index,
            profile: EngineProfile::new(*name, url, *dialect).expect("valid profile"),
            adapter: adapter.clone(),
        })
        .collect();

    Fleet {
        engines,
        adapters,
    }
}
