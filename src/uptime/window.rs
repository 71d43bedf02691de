//! Run window discovery.

use chrono::{DateTime, Duration, Utc};

use super::UptimeError;
use crate::influx::{parse_influx_time, Boundary, ReferenceMetric, TimeSeriesSource};

/// Seconds trimmed from each end of a run to skip startup and shutdown noise.
pub const DEFAULT_MARGIN_SECONDS: i64 = 5;

/// Largest margin the command line accepts.
pub const MAX_MARGIN_SECONDS: i64 = 24 * 60 * 60;

/// The time range of one run, used to normalize every percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reference_id: String,
}

impl RunWindow {
    /// Build a window, rejecting any that spans less than one whole second.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reference_id: impl Into<String>,
    ) -> Result<Self, UptimeError> {
        if (end - start).num_seconds() <= 0 {
            return Err(UptimeError::DegenerateWindow { start, end });
        }

        Ok(Self {
            start,
            end,
            reference_id: reference_id.into(),
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Whole seconds between start and end. Always positive.
    pub fn measurement_period_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Locate the first and last samples of `reference` for `job_reference`
/// and shrink the range by `margin_seconds` at both ends.
pub async fn discover_window<S: TimeSeriesSource>(
    source: &S,
    reference: &ReferenceMetric,
    job_reference: &str,
    margin_seconds: i64,
) -> Result<RunWindow, UptimeError> {
    if job_reference.is_empty() {
        return Err(UptimeError::EmptyJobReference);
    }

    let margin =
        Duration::try_seconds(margin_seconds).ok_or(UptimeError::InvalidMargin(margin_seconds))?;
    let first = boundary_time(source, reference, job_reference, Boundary::First)
        .await?
        .checked_add_signed(margin)
        .ok_or(UptimeError::InvalidMargin(margin_seconds))?;
    let last = boundary_time(source, reference, job_reference, Boundary::Last)
        .await?
        .checked_sub_signed(margin)
        .ok_or(UptimeError::InvalidMargin(margin_seconds))?;

    tracing::info!("Metrics were gathered between {} and {}", first, last);

    RunWindow::new(first, last, job_reference)
}

async fn boundary_time<S: TimeSeriesSource>(
    source: &S,
    reference: &ReferenceMetric,
    job_reference: &str,
    boundary: Boundary,
) -> Result<DateTime<Utc>, UptimeError> {
    let raw = source
        .boundary_sample(reference, job_reference, boundary)
        .await?
        .ok_or_else(|| UptimeError::NoData {
            metric: format!("{}.{}", reference.measurement, reference.field),
            job_reference: job_reference.to_string(),
        })?;

    parse_influx_time(&raw).ok_or(UptimeError::TimestampParse(raw))
}
