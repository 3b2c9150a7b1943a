//! Metric instrument factories for taskwire.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskwire"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for taskwire instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskwire")
}

/// Counter: business events persisted.
/// Labels: `module`, `event_type`.
pub fn events_detected() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.events.detected")
        .with_description("Number of business events persisted")
        .build()
}

/// Counter: detected events that matched an existing dedup key.
/// Labels: `module`, `event_type`.
pub fn events_deduplicated() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.events.deduplicated")
        .with_description("Number of redelivered events collapsed onto an existing event")
        .build()
}

/// Counter: business event status transitions.
/// Labels: `from`, `to`.
pub fn event_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.events.status_transitions")
        .with_description("Number of business event status transitions")
        .build()
}

/// Counter: tasks created from templates.
/// Labels: `template_id`.
pub fn tasks_generated() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.tasks.generated")
        .with_description("Number of tasks generated from templates")
        .build()
}

/// Counter: template instantiations that failed.
/// Labels: `template_id`.
pub fn template_failures() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.templates.failures")
        .with_description("Number of failed template instantiations")
        .build()
}

/// Counter: changes that could not be evaluated against patterns.
/// Labels: `module`.
pub fn detection_errors() -> Counter<u64> {
    meter()
        .u64_counter("taskwire.detection.errors")
        .with_description("Number of changes that failed detection")
        .build()
}

/// Histogram: time from event submission to a settled status, in milliseconds.
/// Labels: `status`.
pub fn pipeline_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskwire.pipeline.duration_ms")
        .with_description("Event pipeline duration in milliseconds")
        .with_unit("ms")
        .build()
}
