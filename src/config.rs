//! Configuration module for uptime-report.
//!
//! Connection details and the job reference come from the environment;
//! report options come from the command line.

use std::env;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::report::DEFAULT_MAX_DOWNTIME_SECONDS;
use crate::uptime::{DEFAULT_MARGIN_SECONDS, DEFAULT_RESOLUTION_SECONDS, MAX_MARGIN_SECONDS};

/// Measurements reported when none are given on the command line.
pub const DEFAULT_MEASUREMENTS: [&str; 7] = [
    "maas_glance",
    "maas_cinder",
    "maas_keystone",
    "maas_heat",
    "maas_neutron",
    "maas_nova",
    "maas_horizon",
];

/// Missing or invalid environment, in the order it is checked.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please set INFLUX_IP")]
    MissingInfluxHost,
    #[error("Please set INFLUX_PORT")]
    MissingInfluxPort,
    #[error("INFLUX_PORT is not a valid port: {0:?}")]
    InvalidInfluxPort(String),
    #[error("Please set BUILD_TAG for its usage as job ref")]
    MissingBuildTag,
}

impl ConfigError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConfigError::MissingInfluxHost => 1,
            ConfigError::MissingInfluxPort | ConfigError::InvalidInfluxPort(_) => 2,
            ConfigError::MissingBuildTag => 3,
        }
    }
}

/// Where bucketing stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BucketUntil {
    /// Wall-clock time the report runs at
    Now,
    /// End of the discovered run window
    End,
}

/// Fetch maas_ metrics, and report downtime data.
#[derive(Debug, Parser)]
#[command(name = "uptime-report")]
#[command(about = "Fetch maas_ metrics, and report downtime data.")]
pub struct CliArgs {
    /// YAML report filename
    #[arg(long)]
    pub ymlreport: Option<PathBuf>,

    /// Subunit report filename
    #[arg(long)]
    pub subunitreport: Option<PathBuf>,

    /// Maximum allowable downtime per service (seconds)
    #[arg(long, default_value_t = DEFAULT_MAX_DOWNTIME_SECONDS)]
    pub max_downtime: u64,

    /// InfluxDB database holding the telegraf data
    #[arg(long, default_value = "telegraf")]
    pub database: String,

    /// Bucket width in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_RESOLUTION_SECONDS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub resolution: u32,

    /// Seconds trimmed from each end of the run (at most one day)
    #[arg(
        long,
        default_value_t = DEFAULT_MARGIN_SECONDS,
        value_parser = clap::value_parser!(i64).range(0..=MAX_MARGIN_SECONDS)
    )]
    pub margin: i64,

    /// Measurement to report on (repeatable, defaults to every maas_ component)
    #[arg(long = "measurement")]
    pub measurements: Vec<String>,

    /// Where the last bucket ends
    #[arg(long, value_enum, default_value_t = BucketUntil::Now)]
    pub bucket_until: BucketUntil,
}

/// Everything a report run needs.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub influx_host: String,
    pub influx_port: u16,
    pub job_reference: String,
    pub database: String,
    pub yml_report: Option<PathBuf>,
    pub subunit_report: Option<PathBuf>,
    pub max_downtime: u64,
    pub resolution: u32,
    pub margin: i64,
    pub measurements: Vec<String>,
    pub bucket_until: BucketUntil,
}

impl ReportConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `INFLUX_IP`: InfluxDB host (required)
    /// - `INFLUX_PORT`: InfluxDB port (required)
    /// - `BUILD_TAG`: job reference of the run (required)
    pub fn load(args: CliArgs) -> Result<Self, ConfigError> {
        Self::from_lookup(args, |key| env::var(key).ok())
    }

    /// Load configuration with a custom variable lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(args: CliArgs, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let influx_host = var("INFLUX_IP").ok_or(ConfigError::MissingInfluxHost)?;
        let port = var("INFLUX_PORT").ok_or(ConfigError::MissingInfluxPort)?;
        let influx_port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidInfluxPort(port.clone()))?;
        let job_reference = var("BUILD_TAG").ok_or(ConfigError::MissingBuildTag)?;

        let measurements = if args.measurements.is_empty() {
            DEFAULT_MEASUREMENTS.iter().map(|m| m.to_string()).collect()
        } else {
            args.measurements
        };

        Ok(Self {
            influx_host,
            influx_port,
            job_reference,
            database: args.database,
            yml_report: args.ymlreport,
            subunit_report: args.subunitreport,
            max_downtime: args.max_downtime,
            resolution: args.resolution,
            margin: args.margin,
            measurements,
            bucket_until: args.bucket_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["uptime-report"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ReportConfig::from_lookup(
            args(&[]),
            lookup(&[("INFLUX_IP", "10.0.0.5"), ("INFLUX_PORT", "8086"), ("BUILD_TAG", "job-1")]),
        )
        .unwrap();

        assert_eq!(cfg.influx_host, "10.0.0.5");
        assert_eq!(cfg.influx_port, 8086);
        assert_eq!(cfg.job_reference, "job-1");
        assert_eq!(cfg.database, "telegraf");
        assert_eq!(cfg.max_downtime, 3600);
        assert_eq!(cfg.resolution, 60);
        assert_eq!(cfg.margin, 5);
        assert_eq!(cfg.measurements.len(), 7);
        assert_eq!(cfg.measurements[0], "maas_glance");
        assert_eq!(cfg.bucket_until, BucketUntil::Now);
        assert!(cfg.yml_report.is_none());
        assert!(cfg.subunit_report.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = args(&[
            "--ymlreport",
            "uptime.yml",
            "--subunitreport",
            "uptime.subunit",
            "--max-downtime",
            "120",
            "--measurement",
            "maas_nova",
            "--measurement",
            "maas_heat",
            "--bucket-until",
            "end",
        ]);
        let cfg = ReportConfig::from_lookup(
            cli,
            lookup(&[("INFLUX_IP", "influx"), ("INFLUX_PORT", "8086"), ("BUILD_TAG", "job-1")]),
        )
        .unwrap();

        assert_eq!(cfg.yml_report, Some(PathBuf::from("uptime.yml")));
        assert_eq!(cfg.subunit_report, Some(PathBuf::from("uptime.subunit")));
        assert_eq!(cfg.max_downtime, 120);
        assert_eq!(cfg.measurements, vec!["maas_nova", "maas_heat"]);
        assert_eq!(cfg.bucket_until, BucketUntil::End);
    }

    #[test]
    fn test_zero_resolution_rejected_by_cli() {
        assert!(CliArgs::try_parse_from(["uptime-report", "--resolution", "0"]).is_err());
    }

    #[test]
    fn test_margin_bounds() {
        for bad in ["-1", "86401", "9223372036854775807"] {
            assert!(CliArgs::try_parse_from(["uptime-report", "--margin", bad]).is_err());
        }
        let cli = CliArgs::try_parse_from(["uptime-report", "--margin", "86400"]).unwrap();
        assert_eq!(cli.margin, MAX_MARGIN_SECONDS);
        let cli = CliArgs::try_parse_from(["uptime-report", "--margin", "0"]).unwrap();
        assert_eq!(cli.margin, 0);
    }

    #[test]
    fn test_missing_environment_in_order() {
        let err = ReportConfig::from_lookup(args(&[]), lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingInfluxHost);
        assert_eq!(err.exit_code(), 1);

        let env = lookup(&[("INFLUX_IP", "influx"), ("BUILD_TAG", "job-1")]);
        let err = ReportConfig::from_lookup(args(&[]), env).unwrap_err();
        assert_eq!(err, ConfigError::MissingInfluxPort);
        assert_eq!(err.exit_code(), 2);

        let env = lookup(&[("INFLUX_IP", "influx"), ("INFLUX_PORT", "8086")]);
        let err = ReportConfig::from_lookup(args(&[]), env).unwrap_err();
        assert_eq!(err, ConfigError::MissingBuildTag);
        assert_eq!(err.exit_code(), 3);

        let err = ReportConfig::from_lookup(
            args(&[]),
            lookup(&[("INFLUX_IP", "influx"), ("INFLUX_PORT", "8086"), ("BUILD_TAG", "")]),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingBuildTag);
    }

    #[test]
    fn test_invalid_port() {
        let err = ReportConfig::from_lookup(
            args(&[]),
            lookup(&[("INFLUX_IP", "influx"), ("INFLUX_PORT", "eighty"), ("BUILD_TAG", "job-1")]),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidInfluxPort("eighty".to_string()));
        assert_eq!(err.exit_code(), 2);
    }
}
