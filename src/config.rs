//! Benchmark configuration: a TOML file with an `ENGINE_BENCH_` environment overlay.
//!
//! ```toml
//! [run]
//! warmup_runs = 1
//! timeout_secs = 300
//! schedule = "sequential"
//!
//! [[engines]]
//! name = "clickhouse"
//! url = "http://localhost:8123/bench"
//! dialect = "clickhouse"
//!
//! [[queries]]
//! id = "q1_count"
//! description = "row count"
//! sql.postgres = "SELECT COUNT(*) FROM events"
//! files.clickhouse = "queries/q1_count.clickhouse.sql"
//! ```
//!
//! Environment variables override file values, with `__` between path segments:
//! `ENGINE_BENCH_RUN__TIMEOUT_SECS=60`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::bench::Schedule;
use crate::catalog::{ComparisonPolicy, QueryDefinition};
use crate::dialect::{Dialect, SqlFeature};
use crate::error::BenchError;
use crate::profile::{Capabilities, EngineProfile};
use crate::runner::{ExplainMode, RunnerConfig};
use crate::validator::DEFAULT_TOLERANCE_PCT;

const ENV_PREFIX: &str = "ENGINE_BENCH";

#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub run: RunOptions,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub queries: Vec<QueryConfig>,
    /// Directory `.sql` file paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub warmup_runs: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Global tolerance band, in percent
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
    #[serde(default)]
    pub explain: ExplainMode,
    #[serde(default)]
    pub schedule: Schedule,
    /// Directory the report is written to
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_tolerance_pct() -> f64 {
    DEFAULT_TOLERANCE_PCT
}

fn default_output() -> PathBuf {
    PathBuf::from("results")
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            warmup_runs: 0,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            tolerance_pct: default_tolerance_pct(),
            explain: ExplainMode::default(),
            schedule: Schedule::default(),
            output: default_output(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub url: String,
    pub dialect: Dialect,
    /// Overrides the dialect default (false for ClickHouse)
    pub exact_percentile: Option<bool>,
    pub window_functions: Option<bool>,
    /// Replaces the dialect's construct set
    pub features: Option<Vec<SqlFeature>>,
}

impl EngineConfig {
    pub fn profile(&self) -> Result<EngineProfile> {
        let defaults = Capabilities::for_dialect(self.dialect);
        let capabilities = Capabilities {
            exact_percentile: self.exact_percentile.unwrap_or(defaults.exact_percentile),
            window_functions: self.window_functions.unwrap_or(defaults.window_functions),
        };

        let mut profile = EngineProfile::new(&self.name, &self.url, self.dialect)?
            .with_capabilities(capabilities);
        if let Some(features) = &self.features {
            profile = profile.with_features(features.iter().copied());
        }
        Ok(profile)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Inline SQL per dialect
    #[serde(default)]
    pub sql: BTreeMap<Dialect, String>,
    /// `.sql` files per dialect, relative to the config file
    #[serde(default)]
    pub files: BTreeMap<Dialect, PathBuf>,
    /// Engines this query is not run on
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub comparison: ComparisonPolicy,
    pub tolerance_pct: Option<f64>,
    /// Row order is part of the result
    #[serde(default)]
    pub ordered: bool,
}

/// Command-line overrides of [`RunOptions`]
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub warmup_runs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub tolerance_pct: Option<f64>,
    pub output: Option<PathBuf>,
    pub explain: Option<ExplainMode>,
    pub parallel: bool,
}

impl BenchConfig {
    /// Load configuration from a TOML file and `ENGINE_BENCH_*` environment variables
    pub fn load(path: &Path) -> Result<Self> {
        let file = config::File::from(path)
            .format(config::FileFormat::Toml)
            .required(true);
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::build(file, Self::environment(), base_dir)
    }

    pub fn from_toml_str(toml: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let file = config::File::from_str(toml, config::FileFormat::Toml);
        Self::build(file, Self::environment(), base_dir.into())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn build<S>(file: S, env: config::Environment, base_dir: PathBuf) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let mut config: BenchConfig = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.base_dir = base_dir;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no engine or file access
    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(BenchError::InvalidConfig("no engines configured".to_string()));
        }
        if self.queries.is_empty() {
            return Err(BenchError::InvalidConfig("no queries configured".to_string()));
        }
        if self.run.timeout_secs == 0 {
            return Err(BenchError::InvalidConfig("timeout_secs must be positive".to_string()));
        }
        if self.run.connect_timeout_secs == 0 {
            return Err(BenchError::InvalidConfig(
                "connect_timeout_secs must be positive".to_string(),
            ));
        }
        if !(self.run.tolerance_pct.is_finite() && self.run.tolerance_pct >= 0.0) {
            return Err(BenchError::InvalidConfig(
                "tolerance_pct must be a non-negative percentage".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for engine in &self.engines {
            check_identifier("engine name", &engine.name)?;
            if !names.insert(engine.name.as_str()) {
                return Err(BenchError::InvalidConfig(format!(
                    "duplicate engine name '{}'",
                    engine.name
                )));
            }
        }

        for query in &self.queries {
            check_identifier("query id", &query.id)?;
            if let Some(dialect) = query.sql.keys().find(|d| query.files.contains_key(d)) {
                return Err(BenchError::InvalidConfig(format!(
                    "query '{}' has both inline SQL and a file for dialect '{}'",
                    query.id, dialect
                )));
            }
            for skipped in &query.skip {
                if !names.contains(skipped.as_str()) {
                    tracing::warn!(query = %query.id, engine = %skipped, "skip names an unknown engine");
                }
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, overrides: &RunOverrides) {
        if let Some(n) = overrides.warmup_runs {
            self.run.warmup_runs = n;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.run.timeout_secs = secs;
        }
        if let Some(pct) = overrides.tolerance_pct {
            self.run.tolerance_pct = pct;
        }
        if let Some(output) = &overrides.output {
            self.run.output = output.clone();
        }
        if let Some(explain) = overrides.explain {
            self.run.explain = explain;
        }
        if overrides.parallel {
            self.run.schedule = Schedule::Parallel;
        }
    }

    /// Engine profiles in registration order
    pub fn profiles(&self) -> Result<Vec<EngineProfile>> {
        self.engines.iter().map(EngineConfig::profile).collect()
    }

    /// Catalog entries, with `.sql` files read from disk
    pub fn query_definitions(&self) -> Result<Vec<QueryDefinition>> {
        self.queries
            .iter()
            .map(|q| {
                let mut definition = QueryDefinition::new(&q.id, &q.description)
                    .with_comparison(q.comparison)
                    .ordered(q.ordered);
                if let Some(pct) = q.tolerance_pct {
                    definition = definition.with_tolerance_pct(pct);
                }
                for engine in &q.skip {
                    definition = definition.skip_engine(engine);
                }
                for (dialect, sql) in &q.sql {
                    definition = definition.with_variant(*dialect, sql);
                }
                for (dialect, file) in &q.files {
                    let path = self.base_dir.join(file);
                    let sql = std::fs::read_to_string(&path).map_err(|e| {
                        BenchError::InvalidConfig(format!(
                            "query '{}': cannot read {}: {}",
                            q.id,
                            path.display(),
                            e
                        ))
                    })?;
                    definition = definition.with_variant(*dialect, sql);
                }
                Ok(definition)
            })
            .collect()
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            query_timeout: Duration::from_secs(self.run.timeout_secs),
            connect_timeout: Duration::from_secs(self.run.connect_timeout_secs),
            warmup_runs: self.run.warmup_runs,
            explain: self.run.explain,
        }
    }
}

/// Engine names and query ids end up in plan file names, so only
/// `[A-Za-z0-9_-]` is accepted
fn check_identifier(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BenchError::InvalidConfig(format!(
            "{} '{}' may only contain letters, digits, '_' and '-'",
            what, value
        )))
    }
}
