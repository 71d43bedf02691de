//! Availability estimation for one run.
//!
//! [`discover_window`] finds the run boundaries, [`estimate`] turns bucketed
//! status samples of one measurement into downtime figures.

mod estimator;
mod window;

pub use estimator::*;
pub use window::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::influx::InfluxError;

/// Uptime estimation error types.
#[derive(Error, Debug)]
pub enum UptimeError {
    #[error("data source error: {0}")]
    Source(#[from] InfluxError),
    #[error("Error parsing a timestamp from influx: {0:?}")]
    TimestampParse(String),
    #[error("no {metric} samples recorded for job reference {job_reference:?}")]
    NoData { metric: String, job_reference: String },
    #[error("degenerate run window: {start} .. {end} leaves no measurement period")]
    DegenerateWindow { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("margin of {0}s does not fit the run window")]
    InvalidMargin(i64),
    #[error("job reference must not be empty")]
    EmptyJobReference,
    #[error("bucket resolution must be at least one second")]
    InvalidResolution,
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`TimeSeriesSource`] for tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, Utc};

    use crate::influx::{Boundary, InfluxError, ReferenceMetric, Row, TimeSeriesSource};

    /// Arguments of one `bucketed_status` call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BucketQuery {
        pub measurement: String,
        pub job_reference: String,
        pub since: DateTime<Utc>,
        pub until: DateTime<Utc>,
        pub resolution: u32,
    }

    #[derive(Debug, Default)]
    pub struct FakeSource {
        pub first: Option<String>,
        pub last: Option<String>,
        pub rows: HashMap<String, Vec<Row>>,
        pub failing: Option<String>,
        pub queries: Mutex<Vec<BucketQuery>>,
    }

    impl FakeSource {
        pub fn with_window(first: &str, last: &str) -> Self {
            Self {
                first: Some(first.to_string()),
                last: Some(last.to_string()),
                ..Default::default()
            }
        }

        pub fn with_rows(mut self, measurement: &str, rows: Vec<Row>) -> Self {
            self.rows.insert(measurement.to_string(), rows);
            self
        }
    }

    impl TimeSeriesSource for FakeSource {
        async fn boundary_sample(
            &self,
            _reference: &ReferenceMetric,
            _job_reference: &str,
            boundary: Boundary,
        ) -> Result<Option<String>, InfluxError> {
            Ok(match boundary {
                Boundary::First => self.first.clone(),
                Boundary::Last => self.last.clone(),
            })
        }

        async fn bucketed_status(
            &self,
            measurement: &str,
            job_reference: &str,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
            resolution: u32,
        ) -> Result<Vec<Row>, InfluxError> {
            self.queries.lock().unwrap().push(BucketQuery {
                measurement: measurement.to_string(),
                job_reference: job_reference.to_string(),
                since,
                until,
                resolution,
            });
            if self.failing.as_deref() == Some(measurement) {
                return Err(InfluxError::Query(format!("measurement {} unavailable", measurement)));
            }
            Ok(self.rows.get(measurement).cloned().unwrap_or_default())
        }
    }

    /// One row per bucket from `start`, `status(i)` giving the value of
    /// `column` in bucket `i`.
    pub fn bucket_rows(
        start: DateTime<Utc>,
        buckets: usize,
        resolution: i64,
        column: &str,
        status: impl Fn(usize) -> Option<f64>,
    ) -> Vec<Row> {
        (0..buckets)
            .map(|i| {
                let time = start + Duration::seconds(resolution * i as i64);
                Row::new(time.to_rfc3339(), vec![(column.to_string(), status(i))])
            })
            .collect()
    }
}
