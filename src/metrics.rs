//! Lightweight metrics helpers for Synapse.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing Synapse-specific
//! metric names.
//!
//! Provided metrics (labels vary by family):
//! * `synapse_requests_routed_total` (counter)
//! * `synapse_routing_failures_total` (counter)
//! * `synapse_admitted_total` (counter)
//! * `synapse_flow_controlled_total` (counter)
//! * `synapse_admission_wait_seconds` (histogram)
//! * `synapse_mux_entries` (gauge)
//!
//! The `*Timer` structs leverage `Drop` to record durations safely even when
//! early returns occur.

use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use once_cell::sync::Lazy;

// Synapse-specific metric names
pub const SYNAPSE_REQUESTS_ROUTED_TOTAL: &str = "synapse_requests_routed_total";
pub const SYNAPSE_ROUTING_FAILURES_TOTAL: &str = "synapse_routing_failures_total"; // labels: kind
pub const SYNAPSE_ADMITTED_TOTAL: &str = "synapse_admitted_total";
pub const SYNAPSE_FLOW_CONTROLLED_TOTAL: &str = "synapse_flow_controlled_total";
pub const SYNAPSE_ADMISSION_WAIT_SECONDS: &str = "synapse_admission_wait_seconds";
pub const SYNAPSE_MUX_ENTRIES: &str = "synapse_mux_entries";

/// One-time registration of metric descriptions.
static DESCRIBE: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        SYNAPSE_REQUESTS_ROUTED_TOTAL,
        Unit::Count,
        "Total number of requests resolved to a pipeline entry."
    );
    describe_counter!(
        SYNAPSE_ROUTING_FAILURES_TOTAL,
        Unit::Count,
        "Total number of requests the mux could not resolve (by kind)."
    );
    describe_counter!(
        SYNAPSE_ADMITTED_TOTAL,
        Unit::Count,
        "Total number of requests admitted by the throughput limiter."
    );
    describe_counter!(
        SYNAPSE_FLOW_CONTROLLED_TOTAL,
        Unit::Count,
        "Total number of requests rejected or timed out by the throughput limiter."
    );
    describe_histogram!(
        SYNAPSE_ADMISSION_WAIT_SECONDS,
        Unit::Seconds,
        "Time requests spent queued for an admission slot."
    );
    describe_gauge!(
        SYNAPSE_MUX_ENTRIES,
        "Number of entries in the published routing table."
    );
});

/// Increment the routed-request counter for a pipeline.
pub fn increment_routed_total(pipeline: &str) {
    counter!(SYNAPSE_REQUESTS_ROUTED_TOTAL, "pipeline" => pipeline.to_string()).increment(1);
}

/// Increment the routing failure counter for a failure kind.
pub fn increment_routing_failure(kind: &'static str) {
    counter!(SYNAPSE_ROUTING_FAILURES_TOTAL, "kind" => kind).increment(1);
}

/// Increment the admitted-request counter for one limiter instance.
pub fn increment_admitted(pipeline: &str, plugin: &str) {
    counter!(
        SYNAPSE_ADMITTED_TOTAL,
        "pipeline" => pipeline.to_string(),
        "plugin" => plugin.to_string()
    )
    .increment(1);
}

/// Increment the flow-controlled counter for one limiter instance.
pub fn increment_flow_controlled(pipeline: &str, plugin: &str) {
    counter!(
        SYNAPSE_FLOW_CONTROLLED_TOTAL,
        "pipeline" => pipeline.to_string(),
        "plugin" => plugin.to_string()
    )
    .increment(1);
}

/// Record a completed admission wait's duration.
pub fn record_admission_wait(pipeline: &str, plugin: &str, duration: std::time::Duration) {
    histogram!(
        SYNAPSE_ADMISSION_WAIT_SECONDS,
        "pipeline" => pipeline.to_string(),
        "plugin" => plugin.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set the current size of the published routing table.
pub fn set_mux_entries(count: usize) {
    gauge!(SYNAPSE_MUX_ENTRIES).set(count as f64);
}

/// RAII helper measuring how long a request queued for admission.
pub struct AdmissionWaitTimer {
    start: Instant,
    pipeline: String,
    plugin: String,
}

impl AdmissionWaitTimer {
    pub fn new(pipeline: &str, plugin: &str) -> Self {
        Self {
            start: Instant::now(),
            pipeline: pipeline.to_string(),
            plugin: plugin.to_string(),
        }
    }
}

impl Drop for AdmissionWaitTimer {
    fn drop(&mut self) {
        record_admission_wait(&self.pipeline, &self.plugin, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIBE);
}
