//! Engine profiles: who to connect to, which dialect it speaks, what it can do.

use std::collections::BTreeSet;

use serde::Serialize;
use url::Url;

use crate::Result;
use crate::dialect::{Dialect, SqlFeature};
use crate::error::BenchError;

/// Capability flags that change how results are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Percentiles are computed exactly rather than estimated
    pub exact_percentile: bool,
    pub window_functions: bool,
}

impl Capabilities {
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            exact_percentile: dialect.exact_percentile_by_default(),
            window_functions: true,
        }
    }
}

/// A database engine under comparison. Immutable once built.
#[derive(Debug, Clone)]
pub struct EngineProfile {
    name: String,
    url: Url,
    dialect: Dialect,
    capabilities: Capabilities,
    features: BTreeSet<SqlFeature>,
}

impl EngineProfile {
    /// Create a profile with the dialect's default capabilities and feature set.
    pub fn new(name: impl Into<String>, url: &str, dialect: Dialect) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BenchError::InvalidConfig("engine name must not be empty".to_string()));
        }

        let url = Url::parse(url).map_err(|e| {
            BenchError::InvalidConfig(format!("engine '{}': invalid url: {}", name, e))
        })?;
        if !dialect.url_schemes().contains(&url.scheme()) {
            return Err(BenchError::InvalidConfig(format!(
                "engine '{}': scheme '{}' does not match dialect '{}' (expected one of {:?})",
                name,
                url.scheme(),
                dialect,
                dialect.url_schemes()
            )));
        }

        Ok(Self {
            name,
            url,
            dialect,
            capabilities: Capabilities::for_dialect(dialect),
            features: dialect.default_features().iter().copied().collect(),
        })
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        if !capabilities.window_functions {
            self.features.remove(&SqlFeature::WindowFunctions);
        }
        self
    }

    /// Narrow the constructs this engine accepts.
    pub fn with_features(mut self, features: impl IntoIterator<Item = SqlFeature>) -> Self {
        self.features = features.into_iter().collect();
        if !self.capabilities.window_functions {
            self.features.remove(&SqlFeature::WindowFunctions);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection descriptor, credentials included
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Connection descriptor with the password masked, for logs and reports
    pub fn display_url(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn features(&self) -> &BTreeSet<SqlFeature> {
        &self.features
    }

    pub fn supports(&self, feature: SqlFeature) -> bool {
        self.features.contains(&feature)
    }
}
