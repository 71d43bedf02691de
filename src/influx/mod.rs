//! InfluxDB data source.
//!
//! The availability estimator only depends on two query shapes, captured by
//! [`TimeSeriesSource`]. [`InfluxClient`] implements them over the InfluxDB
//! 1.x HTTP API.

mod client;
mod models;

pub use client::*;
pub use models::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Status value reporting a component as down. Empty buckets are filled
/// with it, so a missing sample reads exactly like a failure.
pub const DOWN_SENTINEL: f64 = 1.0;

/// Data source error types.
#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("query failed: {0}")]
    Query(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Which end of a series to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    First,
    Last,
}

impl Boundary {
    /// InfluxQL selector function for this boundary.
    pub fn selector(self) -> &'static str {
        match self {
            Boundary::First => "first",
            Boundary::Last => "last",
        }
    }
}

/// The metric whose first and last samples bound a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMetric {
    pub measurement: String,
    pub field: String,
}

impl Default for ReferenceMetric {
    fn default() -> Self {
        Self {
            measurement: "processes".to_string(),
            field: "total".to_string(),
        }
    }
}

/// The two queries the uptime estimator issues.
#[allow(async_fn_in_trait)]
pub trait TimeSeriesSource {
    /// Raw time string of the first or last sample of `reference` tagged
    /// with `job_reference`, or `None` if there is no such sample.
    async fn boundary_sample(
        &self,
        reference: &ReferenceMetric,
        job_reference: &str,
        boundary: Boundary,
    ) -> Result<Option<String>, InfluxError>;

    /// Maximum of every `*_status` field of `measurement` per `resolution`
    /// bucket in `[since, until)`, with empty buckets filled with the down
    /// sentinel.
    async fn bucketed_status(
        &self,
        measurement: &str,
        job_reference: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        resolution: u32,
    ) -> Result<Vec<Row>, InfluxError>;
}
