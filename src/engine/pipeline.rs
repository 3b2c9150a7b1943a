//! Event pipeline: persist a draft, generate its tasks, settle its status.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, info, warn};

use crate::db::Db;
use crate::error::{Error, Result};
use crate::generator::TaskGenerator;
use crate::model::event::{BusinessEvent, DraftEvent, EventStatus};
use crate::model::task::{GeneratedTask, TaskId};
use crate::telemetry::event::{record_status_transition, start_event_span};
use crate::telemetry::metrics;

/// An event after its trip through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: BusinessEvent,
    pub tasks: Vec<GeneratedTask>,
    /// The draft matched an event already stored.
    pub duplicate: bool,
}

pub struct Pipeline {
    db: Arc<Db>,
    generator: Arc<TaskGenerator>,
}

impl Pipeline {
    pub fn new(db: Arc<Db>, generator: Arc<TaskGenerator>) -> Self {
        Self { db, generator }
    }

    /// Persist a draft and run it through generation.
    ///
    /// A duplicate still pending or processing was interrupted and is resumed.
    /// A settled duplicate is returned as stored, with its tasks.
    pub async fn submit(&self, draft: DraftEvent) -> Result<ProcessedEvent> {
        let created = self.db.create_event(draft).await?;
        let duplicate = created.is_duplicate();
        let event = created.into_event();

        if duplicate && !matches!(event.status, EventStatus::Pending | EventStatus::Processing) {
            info!(event_id = %event.id, status = %event.status, "redelivered event already settled");
            let tasks = self.db.tasks_for_event(event.id).await?;
            return Ok(ProcessedEvent {
                event,
                tasks,
                duplicate,
            });
        }

        let (event, tasks) = self.run(event).await?;
        Ok(ProcessedEvent {
            event,
            tasks,
            duplicate,
        })
    }

    /// Generate tasks for a stored event and mark it processed or failed.
    ///
    /// Tasks created before a template failure are kept and recorded on the
    /// event before it is marked failed.
    pub async fn run(&self, event: BusinessEvent) -> Result<(BusinessEvent, Vec<GeneratedTask>)> {
        let span = start_event_span(&event.source_module, &event.event_type, &event.id);

        async {
            let started = Instant::now();
            let from = event.status;
            let event = self.db.mark_processing(event.id).await?;
            if from != EventStatus::Processing {
                record_status_transition(&span, from, EventStatus::Processing);
            }

            let (settled, tasks) = match self.generator.generate(&event).await {
                Ok(outcome) => {
                    let ids = outcome.task_ids();
                    match outcome.failure_message() {
                        None => {
                            let settled = self.db.mark_processed(event.id, &ids).await?;
                            (settled, outcome.tasks)
                        }
                        Some(message) => {
                            self.db.set_generated_tasks(event.id, &ids).await?;
                            let settled = self.db.mark_failed(event.id, &message).await?;
                            (settled, outcome.tasks)
                        }
                    }
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "generation aborted");
                    let tasks = self.db.tasks_for_event(event.id).await?;
                    if !tasks.is_empty() {
                        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
                        self.db.set_generated_tasks(event.id, &ids).await?;
                    }
                    let settled = self.db.mark_failed(event.id, &e.to_string()).await?;
                    (settled, tasks)
                }
            };

            record_status_transition(&span, EventStatus::Processing, settled.status);
            metrics::pipeline_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("status", settled.status.to_string())],
            );
            info!(
                event_id = %settled.id,
                status = %settled.status,
                tasks = tasks.len(),
                "event settled"
            );
            Ok::<_, Error>((settled, tasks))
        }
        .instrument(span.clone())
        .await
    }
}
