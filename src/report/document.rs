//! YAML document report.

use serde::Serialize;
use serde_yaml::{Mapping, Number, Value};

use crate::uptime::MeasurementUptime;

/// Downtime keyed by category, then by measurement.
///
/// Measurements keep report order; fields within a measurement are sorted.
/// A measurement without data shows `null` downtime and no fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub measurement_downtime_seconds: Mapping,
    pub measurement_downtime_percent: Mapping,
    pub per_field_downtime_seconds: Mapping,
    pub per_field_downtime_percent: Mapping,
}

impl ReportDocument {
    pub fn from_measurements(measurements: &[MeasurementUptime]) -> Self {
        let mut doc = Self {
            measurement_downtime_seconds: Mapping::new(),
            measurement_downtime_percent: Mapping::new(),
            per_field_downtime_seconds: Mapping::new(),
            per_field_downtime_percent: Mapping::new(),
        };

        for m in measurements {
            let key = Value::String(m.measurement.clone());

            doc.measurement_downtime_seconds
                .insert(key.clone(), optional_float(m.downtime.downtime_seconds()));
            doc.measurement_downtime_percent
                .insert(key.clone(), optional_float(m.downtime.downtime_percent()));

            let mut seconds = Mapping::new();
            let mut percent = Mapping::new();
            for (field, downtime) in &m.fields {
                let field = Value::String(field.clone());
                let secs = Number::from(downtime.downtime_seconds);
                seconds.insert(field.clone(), Value::Number(secs));
                percent.insert(field, Value::Number(Number::from(downtime.downtime_percent)));
            }
            doc.per_field_downtime_seconds.insert(key.clone(), Value::Mapping(seconds));
            doc.per_field_downtime_percent.insert(key, Value::Mapping(percent));
        }

        doc
    }

    /// Serialize as a YAML document, separator line included.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        // serde_yaml omits the separator; the artifact always starts with one
        if body.starts_with("---") {
            Ok(body)
        } else {
            Ok(format!("---\n{}", body))
        }
    }
}

fn optional_float(value: Option<f64>) -> Value {
    match value {
        Some(v) => Value::Number(Number::from(v)),
        None => Value::Null,
    }
}
