//! Business events: detected entity-state transitions and their lifecycle.
//!
//! The detected fact (type, severity, entity, snapshots) is fixed at creation.
//! Only `status`, `processed_at`, `generated_task_ids` and `error` change later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::{EventCategory, Severity};
use super::task::TaskId;
use super::value::Value;
use crate::error::{Error, Result};

/// Newtype for business event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Other(format!("invalid event id {s}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Processing status of a business event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Persisted, not yet handed to the generator.
    Pending,
    /// Generator is running.
    Processing,
    /// Every matching template was attempted successfully. Terminal.
    Processed,
    /// At least one template failed. Only left through a manual reprocess.
    Failed,
    /// Set by an operator. Terminal.
    Ignored,
}

impl EventStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Processed)
                | (Pending, Failed)
                | (Pending, Ignored)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Processing) // manual reprocess
                | (Failed, Ignored)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::Ignored)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
            EventStatus::Ignored => "ignored",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            "ignored" => Ok(EventStatus::Ignored),
            _ => Err(Error::Other(format!("unknown event status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// An event produced by the detector that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEvent {
    pub event_type: String,
    pub category: EventCategory,
    pub severity: Severity,
    pub source_module: String,
    pub subsidiary: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub title: String,
    pub description: String,
    pub previous_state: Option<Value>,
    pub current_state: Value,
    pub changed_fields: Vec<String>,
    pub triggered_by: Option<String>,
    /// Fingerprint of the change. Redelivered changes share it; manual events have none.
    pub dedup_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Business event
// ---------------------------------------------------------------------------

/// A persisted, detected entity-state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessEvent {
    pub id: EventId,
    pub event_type: String,
    pub category: EventCategory,
    pub severity: Severity,
    pub source_module: String,
    pub subsidiary: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub title: String,
    pub description: String,
    pub previous_state: Option<Value>,
    pub current_state: Value,
    pub changed_fields: Vec<String>,
    pub triggered_by: Option<String>,
    pub triggered_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
    pub status: EventStatus,
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generated_task_ids: Vec<TaskId>,
    pub error: Option<String>,
}

impl BusinessEvent {
    /// Materialize a draft at `triggered_at` with status pending.
    pub fn from_draft(id: EventId, draft: DraftEvent, triggered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: draft.event_type,
            category: draft.category,
            severity: draft.severity,
            source_module: draft.source_module,
            subsidiary: draft.subsidiary,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            entity_name: draft.entity_name,
            project_id: draft.project_id,
            project_name: draft.project_name,
            title: draft.title,
            description: draft.description,
            previous_state: draft.previous_state,
            current_state: draft.current_state,
            changed_fields: draft.changed_fields,
            triggered_by: draft.triggered_by,
            triggered_at,
            dedup_key: draft.dedup_key,
            status: EventStatus::Pending,
            processed_at: None,
            generated_task_ids: Vec::new(),
            error: None,
        }
    }

    /// The event as camelCase JSON, the shape template conditions address
    /// (`"currentState.status"`, `"severity"`, `"entityType"`).
    pub fn condition_view(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use EventStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(Pending));
        assert!(!Processed.can_transition_to(Failed));
        assert!(!Ignored.can_transition_to(Processing));
        assert!(Processed.is_terminal() && Ignored.is_terminal());
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in ["pending", "processing", "processed", "failed", "ignored"] {
            let status: EventStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("done".parse::<EventStatus>().is_err());
    }
}
