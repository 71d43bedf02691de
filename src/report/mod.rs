//! Report aggregation and rendering.
//!
//! A [`Report`] holds the estimated downtime of every measurement for one
//! run and renders it as a YAML document and as a subunit test stream.

mod document;
mod events;
mod subunit;

pub use document::*;
pub use events::*;
pub use subunit::*;

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::influx::TimeSeriesSource;
use crate::uptime::{estimate, MeasurementDowntime, MeasurementUptime, RunWindow, UptimeError};

/// Report rendering error types.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("subunit error: {0}")]
    Subunit(#[from] SubunitError),
}

/// Downtime of every measurement of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    measurements: Vec<MeasurementUptime>,
}

impl Report {
    pub fn new(measurements: Vec<MeasurementUptime>) -> Self {
        Self { measurements }
    }

    pub fn measurements(&self) -> &[MeasurementUptime] {
        &self.measurements
    }

    pub fn to_document(&self) -> ReportDocument {
        ReportDocument::from_measurements(&self.measurements)
    }

    pub fn to_yaml(&self) -> Result<String, ReportError> {
        Ok(self.to_document().to_yaml()?)
    }

    /// Start and end event for each measurement, in report order.
    pub fn test_events(&self, window: &RunWindow, max_downtime_seconds: u64) -> Vec<TestEvent> {
        let mut events = Vec::with_capacity(self.measurements.len() * 2);
        for m in &self.measurements {
            let status = verdict(&m.downtime, max_downtime_seconds);
            events.push(start_event(&m.measurement, window.start()));
            events.push(end_event(&m.measurement, status, window.end()));
        }
        events
    }

    /// Write the YAML report to `path`, replacing it only once fully written.
    pub fn write_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;
        tracing::info!("{}", yaml);

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut staging = NamedTempFile::new_in(dir)?;
        staging.write_all(yaml.as_bytes())?;
        staging.as_file().sync_all()?;
        staging.persist(path).map_err(|e| e.error)?;

        tracing::info!("Wrote YAML report to {}", path.display());
        Ok(())
    }

    /// Write the subunit stream to `path`, one test per measurement.
    pub fn write_subunit<P: AsRef<Path>>(
        &self,
        path: P,
        window: &RunWindow,
        max_downtime_seconds: u64,
    ) -> Result<(), ReportError> {
        let path = path.as_ref();
        let mut writer = SubunitWriter::create(path)?;
        for event in self.test_events(window, max_downtime_seconds) {
            writer.status(&event)?;
        }
        writer.finish()?;

        tracing::info!("Wrote subunit report to {}", path.display());
        Ok(())
    }
}

/// Estimate every measurement in order.
///
/// A measurement without data becomes a no-data entry; any query failure
/// aborts the whole report.
pub async fn build_report<S: TimeSeriesSource>(
    source: &S,
    measurements: &[String],
    window: &RunWindow,
    resolution: u32,
    until: DateTime<Utc>,
) -> Result<Report, UptimeError> {
    let mut results = Vec::with_capacity(measurements.len());

    for measurement in measurements {
        let result = estimate(source, measurement, window, resolution, until).await?;
        match &result.downtime {
            MeasurementDowntime::Observed {
                downtime_seconds,
                downtime_percent,
            } => tracing::info!(
                "{}: {:.1}s down ({:.2}%) across {} fields",
                measurement,
                downtime_seconds,
                downtime_percent,
                result.fields.len()
            ),
            MeasurementDowntime::NoData => {
                tracing::warn!("{}: no status fields observed", measurement)
            }
        }
        results.push(result);
    }

    Ok(Report::new(results))
}
