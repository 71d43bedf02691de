//! Slice-based availability estimator.
//!
//! A measurement's status fields are sampled once per `resolution` bucket.
//! A bucket is "up" for a field only if a sample landed in it and that sample
//! is not the down sentinel; an empty bucket counts as down. The number of
//! down buckets times the resolution is the field's estimated downtime.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use super::{RunWindow, UptimeError};
use crate::influx::{parse_influx_time, Row, TimeSeriesSource, DOWN_SENTINEL};

/// Default bucket width in seconds.
pub const DEFAULT_RESOLUTION_SECONDS: u32 = 60;

/// What one bucket says about one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A sample reported the down sentinel.
    Down,
    /// A sample reported anything else.
    Up,
    /// No sample landed in the bucket.
    Absent,
}

impl Observation {
    pub fn classify(value: Option<f64>) -> Self {
        match value {
            None => Observation::Absent,
            Some(v) if v == DOWN_SENTINEL => Observation::Down,
            Some(_) => Observation::Up,
        }
    }

    /// Absent buckets are penalized exactly like explicit failures.
    pub fn counts_as_down(self) -> bool {
        !matches!(self, Observation::Up)
    }
}

/// Accumulated downtime of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDowntime {
    pub downtime_seconds: i64,
    /// Not capped at 100: buckets running past the window end still count.
    pub downtime_percent: f64,
}

/// Downtime of a whole measurement, averaged over its fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementDowntime {
    Observed {
        downtime_seconds: f64,
        downtime_percent: f64,
    },
    /// No status field was ever observed.
    NoData,
}

impl MeasurementDowntime {
    pub fn downtime_seconds(&self) -> Option<f64> {
        match self {
            MeasurementDowntime::Observed { downtime_seconds, .. } => Some(*downtime_seconds),
            MeasurementDowntime::NoData => None,
        }
    }

    pub fn downtime_percent(&self) -> Option<f64> {
        match self {
            MeasurementDowntime::Observed { downtime_percent, .. } => Some(*downtime_percent),
            MeasurementDowntime::NoData => None,
        }
    }
}

/// Estimated downtime of one measurement and each of its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementUptime {
    pub measurement: String,
    pub fields: BTreeMap<String, FieldDowntime>,
    pub downtime: MeasurementDowntime,
}

impl MeasurementUptime {
    pub fn is_no_data(&self) -> bool {
        self.downtime == MeasurementDowntime::NoData
    }
}

/// Per-field down-second counters. A field gets a zero entry the first
/// time any row mentions it and nothing else creates entries.
#[derive(Debug, Default)]
struct DowntimeAccumulator {
    seconds: BTreeMap<String, i64>,
}

impl DowntimeAccumulator {
    fn track(&mut self, field: &str) {
        if !self.seconds.contains_key(field) {
            self.seconds.insert(field.to_string(), 0);
        }
    }

    fn record(&mut self, field: &str, observation: Observation, resolution: i64) {
        if !observation.counts_as_down() {
            return;
        }
        if let Some(seconds) = self.seconds.get_mut(field) {
            *seconds += resolution;
        }
    }

    fn fields(&self) -> Vec<String> {
        self.seconds.keys().cloned().collect()
    }

    fn finish(self, measurement: &str, period_seconds: i64) -> MeasurementUptime {
        let field_count = self.seconds.len();
        let total: i64 = self.seconds.values().sum();

        let fields = self
            .seconds
            .into_iter()
            .map(|(name, downtime_seconds)| {
                let downtime_percent = downtime_seconds as f64 / period_seconds as f64 * 100.0;
                (name, FieldDowntime { downtime_seconds, downtime_percent })
            })
            .collect();

        let downtime = if field_count == 0 {
            MeasurementDowntime::NoData
        } else {
            MeasurementDowntime::Observed {
                downtime_seconds: total as f64 / field_count as f64,
                downtime_percent: total as f64 / (field_count as f64 * period_seconds as f64)
                    * 100.0,
            }
        };

        MeasurementUptime {
            measurement: measurement.to_string(),
            fields,
            downtime,
        }
    }
}

/// Estimate downtime of `measurement` over buckets from the window start up
/// to `until`.
///
/// `until` is normally the wall-clock time of the report run rather than the
/// window end, so buckets after the run finished are counted too.
pub async fn estimate<S: TimeSeriesSource>(
    source: &S,
    measurement: &str,
    window: &RunWindow,
    resolution: u32,
    until: DateTime<Utc>,
) -> Result<MeasurementUptime, UptimeError> {
    if resolution == 0 {
        return Err(UptimeError::InvalidResolution);
    }

    let rows = source
        .bucketed_status(measurement, window.reference_id(), window.start(), until, resolution)
        .await?;

    tracing::debug!("{}: {} rows at {}s resolution", measurement, rows.len(), resolution);

    let buckets = plan_buckets(window.start(), until, resolution);
    let period = window.measurement_period_seconds();
    aggregate_buckets(measurement, &rows, &buckets, resolution, period)
}

/// Start of every bucket overlapping `[since, until)`, aligned to the
/// resolution the same way the data source groups by time.
pub fn plan_buckets(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    resolution: u32,
) -> Vec<DateTime<Utc>> {
    let step = Duration::seconds(resolution as i64);
    let mut buckets = Vec::new();
    let mut next = truncate_to_window(since, resolution);

    while next < until {
        buckets.push(next);
        next += step;
    }
    buckets
}

/// Fold rows into per-field downtime over the planned buckets.
///
/// Rows are assigned to the bucket containing their timestamp; rows outside
/// the plan are ignored. Planned buckets with no row read as absent for every
/// field seen anywhere in the measurement.
pub fn aggregate_buckets(
    measurement: &str,
    rows: &[Row],
    buckets: &[DateTime<Utc>],
    resolution: u32,
    period_seconds: i64,
) -> Result<MeasurementUptime, UptimeError> {
    let mut accumulator = DowntimeAccumulator::default();
    let mut by_bucket: BTreeMap<DateTime<Utc>, BTreeMap<String, Option<f64>>> = BTreeMap::new();

    for row in rows {
        let time = parse_influx_time(&row.time)
            .ok_or_else(|| UptimeError::TimestampParse(row.time.clone()))?;
        let slot = by_bucket.entry(truncate_to_window(time, resolution)).or_default();

        for (column, value) in &row.values {
            let Some(field) = status_field(column) else {
                continue;
            };
            accumulator.track(field);

            // Several rows in one bucket merge the way max() would
            let merged = slot.entry(field.to_string()).or_insert(None);
            *merged = match (*merged, *value) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
    }

    let unplanned = by_bucket
        .keys()
        .filter(|t| buckets.binary_search(t).is_err())
        .count();
    if unplanned > 0 {
        tracing::debug!(
            "{}: ignoring {} buckets outside the {} planned",
            measurement,
            unplanned,
            buckets.len()
        );
    }

    let fields = accumulator.fields();
    let resolution = resolution as i64;
    for bucket in buckets {
        let slot = by_bucket.get(bucket);
        for field in &fields {
            let value = slot.and_then(|s| s.get(field).copied().flatten());
            accumulator.record(field, Observation::classify(value), resolution);
        }
    }

    Ok(accumulator.finish(measurement, period_seconds))
}

/// Field name for a status column, stripping the aggregate prefix.
/// Columns that are not status-bearing yield `None`.
pub fn status_field(column: &str) -> Option<&str> {
    static STATUS_COLUMN: OnceLock<Regex> = OnceLock::new();
    let re = STATUS_COLUMN.get_or_init(|| Regex::new(r"^(?:max_)?(?P<field>.+_status)$").unwrap());

    re.captures(column)
        .and_then(|caps| caps.name("field"))
        .map(|m| m.as_str())
}

/// Truncate a datetime to the start of its containing bucket.
pub fn truncate_to_window(dt: DateTime<Utc>, window_seconds: u32) -> DateTime<Utc> {
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(window_seconds as i64);
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}
