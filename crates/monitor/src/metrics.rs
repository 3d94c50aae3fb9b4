//! Metric recording for monitoring loops.
//!
//! Everything goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops. Run ids are deliberately not used as
//! labels to keep cardinality bounded.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use trainwatch_core::ResetReason;

pub const POLLS_TOTAL: &str = "trainwatch_polls_total";
pub const POLL_DURATION_SECONDS: &str = "trainwatch_poll_duration_seconds";
pub const LINES_INGESTED_TOTAL: &str = "trainwatch_lines_ingested_total";
pub const BYTES_READ_TOTAL: &str = "trainwatch_bytes_read_total";
pub const RESETS_TOTAL: &str = "trainwatch_resets_total";
pub const READ_ERRORS_TOTAL: &str = "trainwatch_read_errors_total";
pub const ACTIVE_MONITORS: &str = "trainwatch_active_monitors";

/// Register descriptions for all monitor metrics.
pub fn describe_metrics() {
    describe_counter!(POLLS_TOTAL, "Total number of completed log polls");
    describe_histogram!(POLL_DURATION_SECONDS, "Duration of one log poll in seconds");
    describe_counter!(LINES_INGESTED_TOTAL, "Complete log lines consumed");
    describe_counter!(BYTES_READ_TOTAL, "Bytes consumed by delta reads");
    describe_counter!(RESETS_TOTAL, "Detected log resets by reason");
    describe_counter!(READ_ERRORS_TOTAL, "Transient read errors (retried next poll)");
    describe_gauge!(ACTIVE_MONITORS, "Number of running polling loops");
}

/// Record one finished poll.
pub fn record_poll(duration: Duration) {
    counter!(POLLS_TOTAL).increment(1);
    histogram!(POLL_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_lines(lines: usize, bytes: u64) {
    if lines > 0 {
        counter!(LINES_INGESTED_TOTAL).increment(lines as u64);
    }
    if bytes > 0 {
        counter!(BYTES_READ_TOTAL).increment(bytes);
    }
}

pub fn record_reset(reason: ResetReason) {
    counter!(RESETS_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn record_read_error() {
    counter!(READ_ERRORS_TOTAL).increment(1);
}

pub fn monitor_started() {
    gauge!(ACTIVE_MONITORS).increment(1.0);
}

pub fn monitor_stopped() {
    gauge!(ACTIVE_MONITORS).decrement(1.0);
}
