//! # engine-bench
//!
//! A benchmark harness that runs the same analytical queries against several
//! database engines and compares both speed and results.
//!
//! ## Overview
//!
//! Supported engines:
//! - **ClickHouse** over its HTTP interface
//! - **CedarDB** over the PostgreSQL wire protocol
//! - **PostgreSQL**, heap tables or foreign tables behind an FDW
//!
//! Each query carries one SQL variant per dialect. Every (query, engine) pair
//! runs on a fresh connection with a bounded timeout, results from different
//! engines are checked for parity, and a report with per-query rankings is
//! written as JSON and CSV.
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> engine_bench::Result<()> {
//! use std::path::Path;
//! use engine_bench::{BenchConfig, Benchmark};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = BenchConfig::load(Path::new("bench.toml"))?;
//! let (benchmark, _warnings) = Benchmark::from_config(&config, &[], &[])?;
//!
//! let report = benchmark.execute(&CancellationToken::new()).await;
//! engine_bench::report_writer::write(&report, &config.run.output)?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bench;
pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod profile;
pub mod report;
pub mod report_writer;
pub mod runner;
pub mod types;
pub mod validator;

pub use adapter::{EngineAdapter, EngineConnection, adapter_for};
pub use bench::{Benchmark, RowCount, Schedule, row_counts_match};
pub use catalog::{CatalogWarning, ComparisonPolicy, QueryCatalog, QueryDefinition};
pub use config::{BenchConfig, RunOverrides};
pub use dialect::{Dialect, SqlFeature};
pub use error::BenchError;
pub use profile::{Capabilities, EngineProfile};
pub use report::ComparisonReport;
pub use runner::{Engine, ExecutionRunner, ExplainMode, RunResult, RunStatus, RunnerConfig};
pub use types::{Cell, ResultSet};
pub use validator::{ResultValidator, ValidationOutcome};

/// Result type for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;
