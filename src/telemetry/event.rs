//! Event pipeline span helpers.
//!
//! Provides span creation and status-transition recording for business
//! events flowing through detection and task generation.

use tracing::Span;

use crate::model::event::{EventId, EventStatus};

/// Start a span for one event's trip through the pipeline.
///
/// The `event.status` field is declared empty and can be updated via
/// [`record_status_transition`].
pub fn start_event_span(module: &str, event_type: &str, event_id: &EventId) -> Span {
    tracing::info_span!(
        "event.process",
        "event.module" = module,
        "event.type" = event_type,
        "event.id" = %event_id,
        "event.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
pub fn record_status_transition(span: &Span, from: EventStatus, to: EventStatus) {
    span.record("event.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "status_transition");
    });
}
