//! Test events: one test case per measurement.

use chrono::{DateTime, Utc};

use super::subunit::{TestEvent, TestStatus};
use crate::uptime::MeasurementDowntime;

/// Default allowed downtime per measurement, in seconds.
pub const DEFAULT_MAX_DOWNTIME_SECONDS: u64 = 60 * 60;

/// MIME type announced on end-of-test packets.
pub const EVENT_MIME_TYPE: &str = "text/plain; charset=UTF8";

/// A measurement passes unless its downtime strictly exceeds the threshold.
/// A measurement with no data fails: its downtime is unknown, not zero.
pub fn verdict(downtime: &MeasurementDowntime, max_downtime_seconds: u64) -> TestStatus {
    match downtime.downtime_seconds() {
        Some(seconds) if seconds > max_downtime_seconds as f64 => TestStatus::Fail,
        Some(_) => TestStatus::Success,
        None => TestStatus::Fail,
    }
}

pub fn start_event(test_id: &str, timestamp: DateTime<Utc>) -> TestEvent {
    TestEvent {
        test_id: Some(test_id.to_string()),
        timestamp: Some(timestamp),
        runnable: true,
        ..Default::default()
    }
}

pub fn end_event(test_id: &str, status: TestStatus, timestamp: DateTime<Utc>) -> TestEvent {
    TestEvent {
        test_id: Some(test_id.to_string()),
        status,
        timestamp: Some(timestamp),
        eof: true,
        mime_type: Some(EVENT_MIME_TYPE.to_string()),
        ..Default::default()
    }
}
