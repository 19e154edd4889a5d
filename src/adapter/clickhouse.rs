//! ClickHouse adapter over the HTTP interface using reqwest.
//!
//! Every statement is POSTed to the server root with its own `query_id`, so a
//! statement abandoned after a timeout can be killed server-side. Result sets
//! are requested as `JSONCompact` and normalized into [`Cell`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{EngineAdapter, EngineConnection, sql_preview, validate_table_name};
use crate::Result;
use crate::error::BenchError;
use crate::profile::EngineProfile;
use crate::types::{Cell, ResultSet, Row};

/// Bound on the fire-and-forget `KILL QUERY` sent after a timeout
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ClickHouseAdapter {
    client: reqwest::Client,
}

impl ClickHouseAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }
}

#[async_trait]
impl EngineAdapter for ClickHouseAdapter {
    async fn connect(&self, profile: &EngineProfile) -> Result<Box<dyn EngineConnection>> {
        let endpoint = Endpoint::from_url(profile.url());
        let mut conn = ClickHouseConnection {
            client: self.client.clone(),
            endpoint,
            active_query: None,
        };

        // HTTP is connectionless; a ping is the only way to learn the server is unreachable
        conn.post("SELECT 1", &[])
            .await
            .map_err(|e| BenchError::connection(profile.name(), e))?;

        tracing::debug!(engine = %profile.name(), url = %profile.display_url(), "connected");
        Ok(Box::new(conn))
    }
}

/// Server address with credentials and database split out of the URL
#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    base: Url,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl Endpoint {
    fn from_url(url: &Url) -> Self {
        let mut base = url.clone();
        let user = Some(url.username()).filter(|u| !u.is_empty()).map(str::to_string);
        let password = url.password().map(str::to_string);
        let database = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|db| !db.is_empty())
            .map(str::to_string);

        let _ = base.set_username("");
        let _ = base.set_password(None);
        base.set_path("/");
        base.set_query(None);

        Self {
            base,
            user,
            password,
            database,
        }
    }
}

pub struct ClickHouseConnection {
    client: reqwest::Client,
    endpoint: Endpoint,
    /// Id of a statement that was sent but whose response has not been read
    active_query: Option<String>,
}

impl ClickHouseConnection {
    fn request(
        &self,
        sql: &str,
        query_id: &str,
        settings: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        let mut params: Vec<(&str, &str)> = vec![("query_id", query_id)];
        if let Some(db) = &self.endpoint.database {
            params.push(("database", db.as_str()));
        }
        params.extend_from_slice(settings);

        let mut request = self
            .client
            .post(self.endpoint.base.clone())
            .query(&params)
            .body(sql.to_string());
        if let Some(user) = &self.endpoint.user {
            request = request.basic_auth(user, self.endpoint.password.as_deref());
        }
        request
    }

    async fn post(&mut self, sql: &str, settings: &[(&str, &str)]) -> Result<String> {
        let query_id = format!("engine-bench-{}", uuid::Uuid::new_v4());
        self.active_query = Some(query_id.clone());

        let response = self.request(sql, &query_id, settings).send().await?;
        let status = response.status();
        let body = response.text().await?;
        self.active_query = None;

        if !status.is_success() {
            return Err(BenchError::Query(format!(
                "HTTP {}: {} (sql: {})",
                status.as_u16(),
                body.trim(),
                sql_preview(sql)
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl EngineConnection for ClickHouseConnection {
    async fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        let statement = format!("{}\nFORMAT JSONCompact", trim_statement(sql));
        let body = self
            .post(&statement, &[("output_format_json_quote_64bit_integers", "0")])
            .await?;
        parse_json_compact(&body)
    }

    async fn explain(&mut self, sql: &str) -> Result<String> {
        let body = self
            .post(&format!("EXPLAIN PLAN {}", trim_statement(sql)), &[])
            .await?;
        Ok(body.trim_end().to_string())
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        let sql = format!("SELECT count() FROM {} FORMAT TSV", validate_table_name(table)?);
        let body = self.post(&sql, &[]).await?;
        body.trim()
            .parse()
            .map_err(|e| BenchError::Query(format!("unexpected count '{}': {}", body.trim(), e)))
    }

    async fn close(self: Box<Self>) {}

    async fn force_close(self: Box<Self>) {
        let Some(query_id) = self.active_query.clone() else {
            return;
        };

        // The abandoned request was dropped with its socket; stop the server-side work too
        let kill = format!(
            "KILL QUERY WHERE query_id = '{}' ASYNC",
            query_id.replace('\'', "")
        );
        let kill_id = format!("{}-kill", query_id);
        let request = self.request(&kill, &kill_id, &[]).timeout(KILL_TIMEOUT);
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                tracing::debug!(query_id = %query_id, error = %e, "failed to kill query");
            }
        });
    }
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

#[derive(Debug, Deserialize)]
struct JsonCompact {
    meta: Vec<ColumnMeta>,
    data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

fn parse_json_compact(body: &str) -> Result<ResultSet> {
    let parsed: JsonCompact = serde_json::from_str(body)
        .map_err(|e| BenchError::Query(format!("malformed JSONCompact response: {}", e)))?;

    let rows: Vec<Row> = parsed
        .data
        .into_iter()
        .map(|values| {
            values
                .into_iter()
                .zip(parsed.meta.iter())
                .map(|(value, meta)| json_to_cell(value, &meta.data_type))
                .collect::<Row>()
        })
        .collect();
    let columns = parsed.meta.into_iter().map(|m| m.name).collect();

    Ok(ResultSet::new(columns, rows))
}

/// Strip `Nullable(...)` and `LowCardinality(...)` wrappers
fn base_type(data_type: &str) -> &str {
    let mut t = data_type;
    while let Some(inner) = ["Nullable(", "LowCardinality("]
        .iter()
        .find_map(|wrapper| t.strip_prefix(wrapper))
        .and_then(|s| s.strip_suffix(')'))
    {
        t = inner;
    }
    t
}

fn json_to_cell(value: serde_json::Value, data_type: &str) -> Cell {
    use serde_json::Value;

    let t = base_type(data_type);
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Cell::Int(i)
            } else if let Some(f) = n.as_f64() {
                Cell::Float(f)
            } else {
                Cell::Text(n.to_string())
            }
        }
        // 64-bit and wider integers and decimals may still arrive quoted
        Value::String(s) if t.starts_with("Int") || t.starts_with("UInt") => s
            .parse::<i64>()
            .map(Cell::Int)
            .or_else(|_| s.parse::<f64>().map(Cell::Float))
            .unwrap_or(Cell::Text(s)),
        Value::String(s) if t.starts_with("Float") || t.starts_with("Decimal") => {
            s.parse::<f64>().map(Cell::Float).unwrap_or(Cell::Text(s))
        }
        Value::String(s) => Cell::Text(s),
        other => Cell::Text(other.to_string()),
    }
}
