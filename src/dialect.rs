//! SQL dialect tags and the constructs each dialect understands.
//!
//! Dialects form a closed set. Query variants are keyed by [`Dialect`] and
//! checked at load time against the constructs the target supports, so a
//! ClickHouse-only function never reaches a PostgreSQL engine.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// SQL dialect spoken by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL, with or without foreign data wrappers
    Postgres,
    /// ClickHouse over its HTTP interface
    ClickHouse,
    /// CedarDB, PostgreSQL wire compatible
    Cedar,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Postgres, Dialect::ClickHouse, Dialect::Cedar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::ClickHouse => "clickhouse",
            Dialect::Cedar => "cedar",
        }
    }

    /// Constructs the dialect accepts when a profile does not narrow them.
    pub fn default_features(&self) -> &'static [SqlFeature] {
        match self {
            Dialect::Postgres | Dialect::Cedar => &[
                SqlFeature::Extract,
                SqlFeature::DateTrunc,
                SqlFeature::PercentileCont,
                SqlFeature::WindowFunctions,
            ],
            Dialect::ClickHouse => &[
                SqlFeature::Extract,
                SqlFeature::DateTrunc,
                SqlFeature::ToYear,
                SqlFeature::ToYyyyMm,
                SqlFeature::QuantileTDigest,
                SqlFeature::WindowFunctions,
            ],
        }
    }

    /// Whether the dialect's percentile function is exact (sort based).
    pub fn exact_percentile_by_default(&self) -> bool {
        !matches!(self, Dialect::ClickHouse)
    }

    /// URL schemes accepted for connection descriptors of this dialect.
    pub fn url_schemes(&self) -> &'static [&'static str] {
        match self {
            Dialect::Postgres | Dialect::Cedar => &["postgres", "postgresql"],
            Dialect::ClickHouse => &["http", "https"],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialect-sensitive SQL construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlFeature {
    Extract,
    DateTrunc,
    ToYear,
    #[serde(rename = "to_yyyymm")]
    ToYyyyMm,
    PercentileCont,
    QuantileTDigest,
    WindowFunctions,
}

impl SqlFeature {
    pub fn is_percentile(&self) -> bool {
        matches!(self, SqlFeature::PercentileCont | SqlFeature::QuantileTDigest)
    }

    fn pattern_source(&self) -> &'static str {
        match self {
            SqlFeature::Extract => r"(?i)\bextract\s*\(",
            SqlFeature::DateTrunc => r"(?i)\bdate_trunc\s*\(",
            SqlFeature::ToYear => r"(?i)\btoyear\s*\(",
            SqlFeature::ToYyyyMm => r"(?i)\btoyyyymm\s*\(",
            SqlFeature::PercentileCont => r"(?i)\bpercentile_cont\s*\(",
            SqlFeature::QuantileTDigest => r"(?i)\bquantiletdigest\s*\(",
            SqlFeature::WindowFunctions => r"(?i)\)\s*over\b",
        }
    }

    fn pattern(&self) -> &'static Regex {
        // Indexed by discriminant, in declaration order
        static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
            ALL_FEATURES
                .iter()
                .map(|f| Regex::new(f.pattern_source()).expect("static pattern"))
                .collect()
        });
        &PATTERNS[*self as usize]
    }

    /// Detect the constructs used by a SQL text, ignoring comments and string literals.
    pub fn detect(sql: &str) -> BTreeSet<SqlFeature> {
        static NOISE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?s)--[^\n]*|/\*.*?\*/|'(?:[^']|'')*'").expect("static pattern")
        });

        let code = NOISE.replace_all(sql, " ");
        ALL_FEATURES
            .iter()
            .copied()
            .filter(|feature| feature.pattern().is_match(&code))
            .collect()
    }
}

const ALL_FEATURES: [SqlFeature; 7] = [
    SqlFeature::Extract,
    SqlFeature::DateTrunc,
    SqlFeature::ToYear,
    SqlFeature::ToYyyyMm,
    SqlFeature::PercentileCont,
    SqlFeature::QuantileTDigest,
    SqlFeature::WindowFunctions,
];

impl fmt::Display for SqlFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlFeature::Extract => "EXTRACT",
            SqlFeature::DateTrunc => "DATE_TRUNC",
            SqlFeature::ToYear => "toYear",
            SqlFeature::ToYyyyMm => "toYYYYMM",
            SqlFeature::PercentileCont => "PERCENTILE_CONT",
            SqlFeature::QuantileTDigest => "quantileTDigest",
            SqlFeature::WindowFunctions => "window functions",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_clickhouse_constructs() {
        let sql = "SELECT toYYYYMM(ts) AS m, quantileTDigest(0.5)(amount) FROM events GROUP BY m";
        let features = SqlFeature::detect(sql);
        assert!(features.contains(&SqlFeature::ToYyyyMm));
        assert!(features.contains(&SqlFeature::QuantileTDigest));
        assert!(!features.contains(&SqlFeature::ToYear));
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_detect_window_and_percentile() {
        let sql = "SELECT category,
                          PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY amount),
                          rank() OVER (ORDER BY count(*) DESC)
                   FROM events GROUP BY category";
        let features = SqlFeature::detect(sql);
        assert!(features.contains(&SqlFeature::PercentileCont));
        assert!(features.contains(&SqlFeature::WindowFunctions));
    }

    #[test]
    fn test_detect_ignores_comments_and_literals() {
        let sql = "-- toYear(ts) was the old version\nSELECT 'date_trunc(x)' AS label /* EXTRACT( */";
        assert!(SqlFeature::detect(sql).is_empty());
    }

    #[test]
    fn test_column_named_over_is_not_a_window() {
        assert!(SqlFeature::detect("SELECT over, under FROM t").is_empty());
    }

    #[test]
    fn test_default_features() {
        assert!(Dialect::Postgres.default_features().contains(&SqlFeature::PercentileCont));
        assert!(!Dialect::Postgres.default_features().contains(&SqlFeature::ToYear));
        assert!(Dialect::ClickHouse.default_features().contains(&SqlFeature::QuantileTDigest));
        assert!(!Dialect::ClickHouse.default_features().contains(&SqlFeature::PercentileCont));
        assert!(Dialect::Postgres.exact_percentile_by_default());
        assert!(!Dialect::ClickHouse.exact_percentile_by_default());
    }
}
