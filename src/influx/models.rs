//! InfluxDB query response types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::InfluxError;

/// Top-level body of a `/query` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of one statement in a query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: i64,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A series: one measurement (and tag set) with column-oriented values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// A single result row: the bucket or sample time plus each value column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Time as returned by the server (RFC 3339).
    pub time: String,
    /// Column name to value, in column order. `None` for nulls.
    pub values: Vec<(String, Option<f64>)>,
}

impl Row {
    pub fn new(time: impl Into<String>, values: Vec<(String, Option<f64>)>) -> Self {
        Self {
            time: time.into(),
            values,
        }
    }
}

#[cfg(test)]
impl Row {
    /// Look up a column value. Missing columns and nulls both yield `None`.
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, v)| *v)
    }
}

impl QueryResponse {
    /// Flatten every series of every statement, surfacing server-side errors.
    pub fn into_series(self) -> Result<Vec<Series>, InfluxError> {
        if let Some(err) = self.error {
            return Err(InfluxError::Query(err));
        }

        let mut series = Vec::new();
        for statement in self.results {
            if let Some(err) = statement.error {
                return Err(InfluxError::Query(format!(
                    "statement {}: {}",
                    statement.statement_id, err
                )));
            }
            series.extend(statement.series);
        }
        Ok(series)
    }
}

impl Series {
    /// Convert column-oriented values into rows keyed by column name.
    pub fn rows(&self) -> Result<Vec<Row>, InfluxError> {
        let time_idx = self
            .columns
            .iter()
            .position(|c| c == "time")
            .ok_or_else(|| {
                InfluxError::Decode(format!("series {} has no time column", self.name))
            })?;

        let mut rows = Vec::with_capacity(self.values.len());
        for raw in &self.values {
            let time = match raw.get(time_idx) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => {
                    return Err(InfluxError::Decode(format!(
                        "series {}: unexpected time value {}",
                        self.name, other
                    )))
                }
                None => {
                    return Err(InfluxError::Decode(format!(
                        "series {}: row shorter than its columns",
                        self.name
                    )))
                }
            };

            let values = self
                .columns
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != time_idx)
                .map(|(i, column)| (column.clone(), raw.get(i).and_then(numeric_value)))
                .collect();

            rows.push(Row::new(time, values));
        }
        Ok(rows)
    }
}

fn numeric_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Parse a timestamp string as returned by InfluxDB.
pub fn parse_influx_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Timezone-less forms some proxies and older servers emit
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
