// Copyright 2025 Tailor Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Metrics instrumentation for the tailing pipeline.
//!
//! Recorded through the `metrics` facade, so any exporter (Prometheus,
//! StatsD, ...) installed by the application picks them up. Without an
//! installed recorder every call is a no-op.
//!
//! # Naming Conventions
//!
//! - Prefix with `tailor_`
//! - Counters end with `_total`
//! - Include a unit suffix (`_seconds`)
//!
//! # Labels
//!
//! - **collection**: collection name (low cardinality)
//! - **operation**: `insert`, `update`, `delete`, `command`, ...
//! - **error_type**: one of [`PipelineError::category`](crate::pipeline::PipelineError::category)
//!
//! Never use document ids or error messages as labels.
//!
//! ```rust
//! use tailor_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_changes_emitted("orders", "insert");
//! metrics::increment_records_filtered();
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric name prefix for all tailor metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "tailor";

/// Change events delivered to subscribers.
///
/// Type: Counter
/// Labels: collection, operation
#[doc(hidden)]
pub const CHANGES_EMITTED_TOTAL: &str = "tailor_changes_emitted_total";

/// Oplog records dropped because their namespace is not watched.
///
/// Type: Counter
const RECORDS_FILTERED_TOTAL: &str = "tailor_records_filtered_total";

/// Errors reported on the pipeline's error channel.
///
/// Type: Counter
/// Labels: error_type
#[doc(hidden)]
pub const ERRORS_TOTAL: &str = "tailor_errors_total";

/// Time taken by full-document lookups.
///
/// Type: Histogram
/// Labels: collection
/// Unit: seconds
#[doc(hidden)]
pub const LOOKUP_DURATION_SECONDS: &str = "tailor_lookup_duration_seconds";

/// Full-document lookups currently outstanding.
///
/// Type: Gauge
const LOOKUPS_IN_FLIGHT: &str = "tailor_lookups_in_flight";

/// Current pipeline state (see [`PipelineStatus`]).
///
/// Type: Gauge
const PIPELINE_STATUS: &str = "tailor_pipeline_status";

/// Registers metric descriptions with the installed recorder.
///
/// Call once at startup, after installing an exporter.
pub fn init_metrics() {
    describe_counter!(
        CHANGES_EMITTED_TOTAL,
        "Total number of change events delivered to subscribers"
    );

    describe_counter!(
        RECORDS_FILTERED_TOTAL,
        "Total number of oplog records dropped because their collection is not watched"
    );

    describe_counter!(
        ERRORS_TOTAL,
        "Total number of errors reported on the pipeline error channel"
    );

    describe_histogram!(
        LOOKUP_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken to look up the current document for an update"
    );

    describe_gauge!(
        LOOKUPS_IN_FLIGHT,
        metrics::Unit::Count,
        "Number of full-document lookups currently outstanding"
    );

    describe_gauge!(
        PIPELINE_STATUS,
        "Current pipeline state: 0=created, 1=connecting, 2=connected, 3=destroyed"
    );
}

/// Increments the count of emitted change events.
pub fn increment_changes_emitted(collection: &str, operation: &str) {
    counter!(CHANGES_EMITTED_TOTAL, "collection" => collection.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of records dropped by namespace matching.
pub fn increment_records_filtered() {
    counter!(RECORDS_FILTERED_TOTAL).increment(1);
}

/// Increments the count of reported errors.
pub fn increment_errors(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "error_type" => error_type).increment(1);
}

/// Records how long a document lookup took.
pub fn record_lookup_duration(duration: Duration, collection: &str) {
    histogram!(LOOKUP_DURATION_SECONDS, "collection" => collection.to_string())
        .record(duration.as_secs_f64());
}

/// Marks a lookup as started.
pub fn increment_lookups_in_flight() {
    gauge!(LOOKUPS_IN_FLIGHT).increment(1.0);
}

/// Marks a lookup as finished.
pub fn decrement_lookups_in_flight() {
    gauge!(LOOKUPS_IN_FLIGHT).decrement(1.0);
}

/// Publishes the pipeline state.
pub fn set_pipeline_status(status: PipelineStatus) {
    gauge!(PIPELINE_STATUS).set(f64::from(status as u8));
}

/// Pipeline state for the `pipeline_status` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineStatus {
    /// Created, no I/O yet.
    Created = 0,
    /// Transport connect in progress (or failed).
    Connecting = 1,
    /// Connected and streaming.
    Connected = 2,
    /// Torn down.
    Destroyed = 3,
}

/// Times one document lookup and records it in the lookup histogram when
/// dropped, so a lookup that errors or is abandoned is still measured.
///
/// ```rust
/// use tailor_core::metrics::LookupTimer;
///
/// {
///     let _timer = LookupTimer::start("orders");
///     // ... lookup ...
/// } // recorded under collection="orders"
/// ```
#[derive(Debug)]
pub struct LookupTimer {
    started: Instant,
    collection: String,
}

impl LookupTimer {
    /// Starts timing a lookup against `collection`.
    #[must_use]
    pub fn start(collection: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            collection: collection.into(),
        }
    }

    /// Time spent since the lookup started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for LookupTimer {
    fn drop(&mut self) {
        record_lookup_duration(self.elapsed(), &self.collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(CHANGES_EMITTED_TOTAL.starts_with(METRIC_PREFIX));
        assert!(CHANGES_EMITTED_TOTAL.ends_with("_total"));
        assert!(ERRORS_TOTAL.ends_with("_total"));
        assert!(LOOKUP_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_pipeline_status_values() {
        assert_eq!(PipelineStatus::Created as u8, 0);
        assert_eq!(PipelineStatus::Connected as u8, 2);
        assert_eq!(PipelineStatus::Destroyed as u8, 3);
    }

    #[test]
    fn test_lookup_timer_measures_until_drop() {
        let timer = LookupTimer::start("users");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
        assert_eq!(timer.collection, "users");
        drop(timer);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        increment_changes_emitted("users", "insert");
        increment_records_filtered();
        increment_errors("lookup");
        increment_lookups_in_flight();
        decrement_lookups_in_flight();
        set_pipeline_status(PipelineStatus::Connected);
    }
}
