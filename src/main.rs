//! uptime-report - per-component downtime of one CI run
//!
//! Reads the maas_ status metrics a run pushed to InfluxDB, estimates how
//! long each component was down and writes a YAML report and a subunit
//! stream with one test per component.

mod config;
mod influx;
mod report;
mod uptime;

use config::{BucketUntil, CliArgs, ReportConfig};
use influx::{InfluxClient, ReferenceMetric};
use report::{build_report, TestStatus};
use uptime::discover_window;

use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status for failures after configuration was accepted.
const FATAL_EXIT_CODE: u8 = 4;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Invalid log filter: {}", e);
    }

    let args = CliArgs::parse();
    let cfg = match ReportConfig::load(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(&cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Uptime report failed: {}", e);
            ExitCode::from(FATAL_EXIT_CODE)
        }
    }
}

fn init_logging() -> Result<(), tracing_subscriber::filter::ParseError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_report=info".parse()?))
        .init();
    Ok(())
}

async fn run(cfg: &ReportConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = InfluxClient::new(&cfg.influx_host, cfg.influx_port, &cfg.database)?;
    tracing::info!(
        "Querying {} (database {}) for {}",
        client.base_url(),
        cfg.database,
        cfg.job_reference
    );

    // The telegraf process count is reported for the whole run, so its
    // first and last points bound every maas_ measurement
    let reference = ReferenceMetric::default();
    let window = discover_window(&client, &reference, &cfg.job_reference, cfg.margin).await?;

    let until = match cfg.bucket_until {
        BucketUntil::Now => Utc::now(),
        BucketUntil::End => window.end(),
    };

    let report = build_report(&client, &cfg.measurements, &window, cfg.resolution, until).await?;

    if let Some(path) = &cfg.yml_report {
        report.write_yaml(path)?;
    }

    if let Some(path) = &cfg.subunit_report {
        report.write_subunit(path, &window, cfg.max_downtime)?;
    }

    let mut failing = 0;
    for event in report.test_events(&window, cfg.max_downtime).iter().filter(|e| e.eof) {
        if event.status == TestStatus::Fail {
            failing += 1;
        }
        tracing::info!(
            "{}: {}",
            event.test_id.as_deref().unwrap_or_default(),
            event.status.as_str()
        );
    }

    let no_data = report.measurements().iter().filter(|m| m.is_no_data()).count();
    tracing::info!(
        "{} of {} measurements failed the {}s downtime limit ({} without data)",
        failing,
        report.measurements().len(),
        cfg.max_downtime,
        no_data
    );

    Ok(())
}
