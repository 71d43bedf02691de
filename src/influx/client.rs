//! InfluxDB 1.x HTTP client.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{
    Boundary, InfluxError, QueryResponse, ReferenceMetric, Row, Series, TimeSeriesSource,
    DOWN_SENTINEL,
};

/// Client for the `/query` endpoint of one database.
#[derive(Debug, Clone)]
pub struct InfluxClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
}

impl InfluxClient {
    /// Create a client for `host:port`. The host may carry its own scheme.
    pub fn new(host: &str, port: u16, database: &str) -> Result<Self, InfluxError> {
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            base_url: base_url(host, port),
            database: database.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a read query and return every series it produced.
    pub async fn query(&self, query: &str) -> Result<Vec<Series>, InfluxError> {
        tracing::debug!("InfluxDB query: {}", query);

        let response = self
            .http
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The body usually carries {"error": "..."}; prefer that message
            if let Ok(parsed) = serde_json::from_str::<QueryResponse>(&body) {
                if let Some(err) = parsed.error {
                    return Err(InfluxError::Query(err));
                }
            }
            return Err(InfluxError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        parsed.into_series()
    }
}

impl TimeSeriesSource for InfluxClient {
    async fn boundary_sample(
        &self,
        reference: &ReferenceMetric,
        job_reference: &str,
        boundary: Boundary,
    ) -> Result<Option<String>, InfluxError> {
        let series = self
            .query(&boundary_query(reference, job_reference, boundary))
            .await?;

        for s in &series {
            if let Some(row) = s.rows()?.into_iter().next() {
                return Ok(Some(row.time));
            }
        }
        Ok(None)
    }

    async fn bucketed_status(
        &self,
        measurement: &str,
        job_reference: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        resolution: u32,
    ) -> Result<Vec<Row>, InfluxError> {
        let series = self
            .query(&status_query(measurement, job_reference, since, until, resolution))
            .await?;

        let mut rows = Vec::new();
        for s in &series {
            rows.extend(s.rows()?);
        }
        Ok(rows)
    }
}

/// Build the base URL, defaulting to plain HTTP.
pub fn base_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// `first`/`last` sample of the reference metric for a job.
pub fn boundary_query(
    reference: &ReferenceMetric,
    job_reference: &str,
    boundary: Boundary,
) -> String {
    format!(
        "SELECT {}({}) FROM {} WHERE \"job_reference\" = {}",
        boundary.selector(),
        quote_ident(&reference.field),
        quote_ident(&reference.measurement),
        quote_literal(job_reference),
    )
}

/// Per-bucket maximum of every status field, empty buckets filled as down.
pub fn status_query(
    measurement: &str,
    job_reference: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    resolution: u32,
) -> String {
    format!(
        "SELECT max(/.*_status/) FROM {} WHERE time >= {} AND time < {} AND \"job_reference\" = {} \
         GROUP BY time({}s) fill({})",
        quote_ident(measurement),
        quote_literal(&since.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        quote_literal(&until.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        quote_literal(job_reference),
        resolution,
        DOWN_SENTINEL,
    )
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}
