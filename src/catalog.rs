//! Query catalog: logical queries and their per-dialect SQL variants

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::dialect::{Dialect, SqlFeature};
use crate::error::BenchError;
use crate::profile::EngineProfile;

/// How results of a query are compared across engines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonPolicy {
    /// Exact equality unless an engine estimates percentiles
    #[default]
    Exact,
    /// Numeric cells may differ within the tolerance band
    Tolerance,
}

/// A canonical logical query
#[derive(Debug, Clone)]
pub struct QueryDefinition {
    id: String,
    description: String,
    variants: BTreeMap<Dialect, String>,
    skipped_engines: BTreeSet<String>,
    comparison: ComparisonPolicy,
    tolerance_pct: Option<f64>,
    ordered: bool,
}

impl QueryDefinition {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            variants: BTreeMap::new(),
            skipped_engines: BTreeSet::new(),
            comparison: ComparisonPolicy::default(),
            tolerance_pct: None,
            ordered: false,
        }
    }

    pub fn with_variant(mut self, dialect: Dialect, sql: impl Into<String>) -> Self {
        self.variants.insert(dialect, sql.into());
        self
    }

    /// Mark the query as intentionally not run on an engine.
    pub fn skip_engine(mut self, engine: impl Into<String>) -> Self {
        self.skipped_engines.insert(engine.into());
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonPolicy) -> Self {
        self.comparison = comparison;
        self
    }

    /// Override the global tolerance for this query (percent).
    pub fn with_tolerance_pct(mut self, pct: f64) -> Self {
        self.tolerance_pct = Some(pct);
        self
    }

    /// Output order is part of the result and must not be canonicalized.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn variant(&self, dialect: Dialect) -> Option<&str> {
        self.variants.get(&dialect).map(String::as_str)
    }

    pub fn dialects(&self) -> impl Iterator<Item = Dialect> + '_ {
        self.variants.keys().copied()
    }

    pub fn is_skipped_for(&self, engine: &str) -> bool {
        self.skipped_engines.contains(engine)
    }

    pub fn comparison(&self) -> ComparisonPolicy {
        self.comparison
    }

    pub fn tolerance_pct(&self) -> Option<f64> {
        self.tolerance_pct
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Whether any variant computes a percentile
    pub fn uses_percentile(&self) -> bool {
        self.variants
            .values()
            .any(|sql| SqlFeature::detect(sql).iter().any(SqlFeature::is_percentile))
    }
}

/// Non-fatal finding raised while loading the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    pub query: String,
    pub engine: String,
    pub dialect: Dialect,
}

/// Append-only set of query definitions, frozen after load
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    queries: Vec<QueryDefinition>,
    index: HashMap<String, usize>,
}

impl QueryCatalog {
    /// Load and validate definitions against the configured engines.
    ///
    /// Fails when a query has no variant at all, an id repeats, or a variant uses
    /// a construct its dialect lacks. A query without a variant for one of the
    /// engines (and not skipped for it) only produces a warning here; the
    /// benchmark itself refuses to start with such a gap, see [`QueryCatalog::check_coverage`].
    pub fn load(
        definitions: Vec<QueryDefinition>,
        engines: &[EngineProfile],
    ) -> Result<(Self, Vec<CatalogWarning>)> {
        let mut catalog = Self::default();

        for definition in definitions {
            if definition.id.trim().is_empty() {
                return Err(BenchError::InvalidConfig("query id must not be empty".to_string()));
            }
            if definition.variants.is_empty() {
                return Err(BenchError::InvalidConfig(format!(
                    "query '{}' has no SQL variants",
                    definition.id
                )));
            }
            if catalog.index.contains_key(&definition.id) {
                return Err(BenchError::InvalidConfig(format!(
                    "duplicate query id '{}'",
                    definition.id
                )));
            }
            if let Some(pct) = definition.tolerance_pct
                && !(pct.is_finite() && pct >= 0.0)
            {
                return Err(BenchError::InvalidConfig(format!(
                    "query '{}': tolerance must be a non-negative percentage",
                    definition.id
                )));
            }

            for (dialect, sql) in &definition.variants {
                if let Some(feature) = SqlFeature::detect(sql)
                    .into_iter()
                    .find(|f| !dialect.default_features().contains(f))
                {
                    return Err(BenchError::UnsupportedConstruct {
                        query: definition.id.clone(),
                        feature,
                        target: format!("dialect '{}'", dialect),
                    });
                }
            }

            catalog.index.insert(definition.id.clone(), catalog.queries.len());
            catalog.queries.push(definition);
        }

        let mut warnings = Vec::new();
        for query in &catalog.queries {
            for engine in engines {
                if query.variant(engine.dialect()).is_none() && !query.is_skipped_for(engine.name())
                {
                    tracing::warn!(
                        query = %query.id,
                        engine = %engine.name(),
                        dialect = %engine.dialect(),
                        "query has no variant for engine dialect"
                    );
                    warnings.push(CatalogWarning {
                        query: query.id.clone(),
                        engine: engine.name().to_string(),
                        dialect: engine.dialect(),
                    });
                }
            }
        }

        tracing::debug!(queries = catalog.queries.len(), "loaded query catalog");
        Ok((catalog, warnings))
    }

    /// SQL text of a query for a dialect
    pub fn get(&self, query_id: &str, dialect: Dialect) -> Result<&str> {
        self.query(query_id)
            .and_then(|q| q.variant(dialect))
            .ok_or_else(|| BenchError::MissingVariant {
                query: query_id.to_string(),
                dialect,
            })
    }

    pub fn query(&self, query_id: &str) -> Option<&QueryDefinition> {
        self.index.get(query_id).map(|&i| &self.queries[i])
    }

    /// Queries in load order
    pub fn queries(&self) -> impl Iterator<Item = &QueryDefinition> {
        self.queries.iter()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Fail if any selected query cannot run on a selected engine.
    ///
    /// Called before any connection is opened.
    pub fn check_coverage(&self, query_ids: &[String], engines: &[EngineProfile]) -> Result<()> {
        for id in query_ids {
            let query = self
                .query(id)
                .ok_or_else(|| BenchError::InvalidConfig(format!("unknown query '{}'", id)))?;

            for engine in engines {
                if query.is_skipped_for(engine.name()) {
                    continue;
                }
                let sql = self.get(id, engine.dialect())?;
                if let Some(feature) = SqlFeature::detect(sql)
                    .into_iter()
                    .find(|f| !engine.supports(*f))
                {
                    return Err(BenchError::UnsupportedConstruct {
                        query: id.clone(),
                        feature,
                        target: format!("engine '{}'", engine.name()),
                    });
                }
            }
        }
        Ok(())
    }
}
