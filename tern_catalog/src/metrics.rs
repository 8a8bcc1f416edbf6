//! Metric names and recording helpers.
//!
//! Uses the `metrics` facade; deployments install whatever recorder they
//! export through.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub use crate::gate::{PARTIAL_FETCH_QUEUE_LEN_METRIC, PARTIAL_FETCH_TIMEOUTS_METRIC};

/// Duration of one topic update (delta build + publication).
pub const TOPIC_UPDATE_DURATION: &str = "catalog.topic-update.duration-seconds";

/// Objects carried by topic updates, labeled `deleted = true|false`.
pub const TOPIC_UPDATE_OBJECTS: &str = "catalog.topic-update.objects";

/// Tables currently queued or in flight in the loader.
pub const LOADER_QUEUE_DEPTH: &str = "catalog.table-loader.queue-depth";

/// Completed table loads, labeled `status = ok|failed|discarded`.
pub const LOADER_LOADS: &str = "catalog.table-loader.loads";

/// Registers metric descriptions; call once after installing a recorder.
pub fn register_metrics() {
    describe_histogram!(TOPIC_UPDATE_DURATION, "Duration of one topic update in seconds");
    describe_counter!(TOPIC_UPDATE_OBJECTS, "Objects carried by topic updates");
    describe_gauge!(LOADER_QUEUE_DEPTH, "Tables queued or in flight in the loader");
    describe_counter!(LOADER_LOADS, "Completed table loads by status");
    describe_gauge!(
        PARTIAL_FETCH_QUEUE_LEN_METRIC,
        "Partial fetches queued on the admission gate"
    );
    describe_counter!(
        PARTIAL_FETCH_TIMEOUTS_METRIC,
        "Partial fetches that timed out waiting for a permit"
    );
}

pub(crate) fn record_topic_update(duration: Duration, updates: u64, deletes: u64) {
    histogram!(TOPIC_UPDATE_DURATION).record(duration.as_secs_f64());
    counter!(TOPIC_UPDATE_OBJECTS, "deleted" => "false").increment(updates);
    counter!(TOPIC_UPDATE_OBJECTS, "deleted" => "true").increment(deletes);
}

pub(crate) fn set_loader_queue_depth(depth: usize) {
    gauge!(LOADER_QUEUE_DEPTH).set(depth as f64);
}

pub(crate) fn record_load(status: &'static str) {
    counter!(LOADER_LOADS, "status" => status).increment(1);
}
