//! Business event operations: create with dedup, status lifecycle, queries.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::debug;

use super::{Page, timestamp};
use crate::error::{Error, Result};
use crate::model::event::{BusinessEvent, DraftEvent, EventId, EventStatus};
use crate::model::task::TaskId;
use crate::telemetry::metrics;

/// Result of persisting a draft event.
#[derive(Debug)]
pub enum CreateResult {
    /// New event stored at pending.
    Created(Box<BusinessEvent>),
    /// The draft's dedup key matched an event already stored; that event is returned.
    Duplicate(Box<BusinessEvent>),
}

impl CreateResult {
    pub fn event(&self) -> &BusinessEvent {
        match self {
            CreateResult::Created(event) | CreateResult::Duplicate(event) => event,
        }
    }

    pub fn into_event(self) -> BusinessEvent {
        match self {
            CreateResult::Created(event) | CreateResult::Duplicate(event) => *event,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreateResult::Duplicate(_))
    }
}

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: EventStatus, to: EventStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

fn record_transition(from: EventStatus, to: EventStatus) {
    metrics::event_status_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

fn same_ids(a: &[TaskId], b: &[TaskId]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

const SELECT_DOCUMENT: &str = "SELECT document FROM business_events";

impl super::Db {
    /// Persist a draft at pending with a fresh id and the clock's time.
    ///
    /// A draft whose dedup key is already stored is not inserted again.
    pub async fn create_event(&self, draft: DraftEvent) -> Result<CreateResult> {
        let event = BusinessEvent::from_draft(EventId::new(), draft, self.now());
        let document = serde_json::to_string(&event)?;

        let rows_affected = sqlx::query(
            "INSERT INTO business_events (id, event_type, source_module, entity_type, entity_id, status, severity, dedup_key, triggered_at, document)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(event.id.to_string())
        .bind(&event.event_type)
        .bind(&event.source_module)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.status.to_string())
        .bind(event.severity.to_string())
        .bind(&event.dedup_key)
        .bind(timestamp(&event.triggered_at))
        .bind(&document)
        .execute(self.pool())
        .await?
        .rows_affected();

        let labels = [
            KeyValue::new("module", event.source_module.clone()),
            KeyValue::new("event_type", event.event_type.clone()),
        ];

        if rows_affected == 0 {
            let key = event.dedup_key.as_deref().unwrap_or_default();
            let existing = self
                .find_event_by_dedup_key(key)
                .await?
                .ok_or_else(|| Error::Conflict(format!("event {} could not be stored", event.id)))?;
            debug!(event_id = %existing.id, event_type = %existing.event_type, "duplicate event");
            metrics::events_deduplicated().add(1, &labels);
            return Ok(CreateResult::Duplicate(Box::new(existing)));
        }

        metrics::events_detected().add(1, &labels);
        // No receivers is fine.
        let _ = self.pending.send(event.clone());
        Ok(CreateResult::Created(Box::new(event)))
    }

    /// Get an event by ID.
    pub async fn get_event(&self, id: EventId) -> Result<BusinessEvent> {
        let document: Option<String> =
            sqlx::query_scalar(&format!("{SELECT_DOCUMENT} WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?;
        let document = document.ok_or_else(|| Error::NotFound(format!("event {id}")))?;
        Ok(serde_json::from_str(&document)?)
    }

    pub async fn find_event_by_dedup_key(&self, dedup_key: &str) -> Result<Option<BusinessEvent>> {
        let document: Option<String> =
            sqlx::query_scalar(&format!("{SELECT_DOCUMENT} WHERE dedup_key = ?"))
                .bind(dedup_key)
                .fetch_optional(self.pool())
                .await?;
        document
            .map(|d| serde_json::from_str(&d).map_err(Error::from))
            .transpose()
    }

    /// Write back a mutated event if its stored status is still `expected`.
    async fn write_event(&self, event: &BusinessEvent, expected: EventStatus) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE business_events SET status = ?, document = ? WHERE id = ? AND status = ?",
        )
        .bind(event.status.to_string())
        .bind(serde_json::to_string(event)?)
        .bind(event.id.to_string())
        .bind(expected.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: expected,
                to: event.status,
            });
        }
        Ok(())
    }

    /// Transition an event's status with optimistic concurrency.
    pub async fn transition_event(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<BusinessEvent> {
        validate_transition(from, to)?;

        let mut event = self.get_event(id).await?;
        if event.status != from {
            return Err(Error::InvalidTransition {
                from: event.status,
                to,
            });
        }
        event.status = to;
        if to.is_terminal() {
            event.processed_at = Some(self.now());
        }
        self.write_event(&event, from).await?;
        record_transition(from, to);
        Ok(event)
    }

    /// Move a pending (or failed, for a manual reprocess) event to processing.
    /// An event already processing is returned unchanged.
    pub async fn mark_processing(&self, id: EventId) -> Result<BusinessEvent> {
        let event = self.get_event(id).await?;
        if event.status == EventStatus::Processing {
            return Ok(event);
        }
        self.transition_event(id, event.status, EventStatus::Processing)
            .await
    }

    /// Record the tasks generated so far without changing status.
    pub async fn set_generated_tasks(
        &self,
        id: EventId,
        task_ids: &[TaskId],
    ) -> Result<BusinessEvent> {
        let mut event = self.get_event(id).await?;
        if event.status.is_terminal() {
            if same_ids(&event.generated_task_ids, task_ids) {
                return Ok(event);
            }
            return Err(Error::Conflict(format!(
                "event {id} is {} and its tasks can no longer change",
                event.status
            )));
        }
        event.generated_task_ids = task_ids.to_vec();
        let status = event.status;
        self.write_event(&event, status).await?;
        Ok(event)
    }

    /// Mark an event processed with the ids of its generated tasks.
    ///
    /// Calling again with the same ids is a no-op; different ids are a conflict.
    pub async fn mark_processed(&self, id: EventId, task_ids: &[TaskId]) -> Result<BusinessEvent> {
        let mut event = self.get_event(id).await?;
        if event.status == EventStatus::Processed {
            if same_ids(&event.generated_task_ids, task_ids) {
                return Ok(event);
            }
            return Err(Error::Conflict(format!(
                "event {id} was already processed with different tasks"
            )));
        }

        let from = event.status;
        validate_transition(from, EventStatus::Processed)?;
        event.status = EventStatus::Processed;
        event.generated_task_ids = task_ids.to_vec();
        event.processed_at = Some(self.now());
        event.error = None;
        self.write_event(&event, from).await?;
        record_transition(from, EventStatus::Processed);
        Ok(event)
    }

    /// Mark an event failed. There is no automatic retry; an event already
    /// failed is left as it is.
    pub async fn mark_failed(&self, id: EventId, error: &str) -> Result<BusinessEvent> {
        let mut event = self.get_event(id).await?;
        if event.status == EventStatus::Failed {
            return Ok(event);
        }

        let from = event.status;
        validate_transition(from, EventStatus::Failed)?;
        event.status = EventStatus::Failed;
        event.processed_at = Some(self.now());
        event.error = Some(error.to_string());
        self.write_event(&event, from).await?;
        record_transition(from, EventStatus::Failed);
        Ok(event)
    }

    /// Mark an event ignored by an operator.
    pub async fn mark_ignored(&self, id: EventId) -> Result<BusinessEvent> {
        let event = self.get_event(id).await?;
        if event.status == EventStatus::Ignored {
            return Ok(event);
        }
        self.transition_event(id, event.status, EventStatus::Ignored)
            .await
    }

    /// Pending events, newest first.
    pub async fn pending_events(&self, page: Page) -> Result<Vec<BusinessEvent>> {
        self.events_by_status(EventStatus::Pending, page).await
    }

    /// Events in a given status, newest first.
    pub async fn events_by_status(
        &self,
        status: EventStatus,
        page: Page,
    ) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE status = ? ORDER BY triggered_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(status.to_string())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Events raised by one module, newest first.
    pub async fn events_for_module(&self, module: &str, page: Page) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE source_module = ? ORDER BY triggered_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(module)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Events raised by one module in one status, newest first.
    pub async fn events_for_module_in_status(
        &self,
        module: &str,
        status: EventStatus,
        page: Page,
    ) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE source_module = ? AND status = ? \
             ORDER BY triggered_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(module)
        .bind(status.to_string())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Every event raised for one entity, newest first.
    pub async fn events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE entity_type = ? AND entity_id = ? ORDER BY triggered_at DESC, rowid DESC"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Events triggered in `[from, to)`, newest first.
    pub async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE triggered_at >= ? AND triggered_at < ? ORDER BY triggered_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(timestamp(&from))
        .bind(timestamp(&to))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Most recent events regardless of status.
    pub async fn recent_events(&self, page: Page) -> Result<Vec<BusinessEvent>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} ORDER BY triggered_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }
}

fn decode_all(documents: Vec<String>) -> Result<Vec<BusinessEvent>> {
    documents
        .iter()
        .map(|d| serde_json::from_str(d).map_err(Error::from))
        .collect()
}
