//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::KeyValue;
use taskwire::model::{EventId, EventStatus};
use taskwire::telemetry::{TelemetryConfig, event, init_telemetry, metrics};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // initialization by another test is allowed to fail.
    let _guard = init_telemetry(TelemetryConfig::new(None, "info"));
}

#[test]
fn event_span_creates_and_records_transition() {
    let id = EventId::new();
    let span = event::start_event_span("inventory", "stock_low", &id);
    event::record_status_transition(&span, EventStatus::Pending, EventStatus::Processing);
    event::record_status_transition(&span, EventStatus::Processing, EventStatus::Processed);
}

#[test]
fn metric_instruments_accept_measurements() {
    let labels = [
        KeyValue::new("module", "inventory"),
        KeyValue::new("event_type", "stock_low"),
    ];
    metrics::events_detected().add(1, &labels);
    metrics::events_deduplicated().add(1, &labels);
    metrics::event_status_transitions().add(
        1,
        &[KeyValue::new("from", "pending"), KeyValue::new("to", "processing")],
    );
    metrics::tasks_generated().add(2, &[KeyValue::new("template_id", "reorder_stock")]);
    metrics::template_failures().add(1, &[KeyValue::new("template_id", "reorder_stock")]);
    metrics::detection_errors().add(1, &[KeyValue::new("module", "inventory")]);
    metrics::pipeline_duration_ms().record(12.5, &[KeyValue::new("status", "processed")]);
}
