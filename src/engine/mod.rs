//! Engine: wires registry, detector, store, generator and listener together
//! and exposes the operations the rest of the platform calls.

pub mod feed;
pub mod listener;
pub mod pipeline;

pub use feed::{ChangeFeed, ChangeRecord, ChangeType, CollectionChange, InProcessFeed};
pub use listener::{ModuleListener, SubscriptionKey};
pub use pipeline::{Pipeline, ProcessedEvent};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::catalog::TemplateCatalog;
use crate::db::{Db, Page};
use crate::detector::{EventDetector, ManualEvent};
use crate::error::{Error, Result};
use crate::generator::{RoleResolver, TaskGenerator, UnresolvedRoles};
use crate::model::event::{BusinessEvent, EventId, EventStatus};
use crate::model::task::{GeneratedTask, TaskId, TaskStatus};
use crate::registry::PatternRegistry;

/// Result of a manual trigger.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub event_id: EventId,
    pub event: BusinessEvent,
    pub tasks: Vec<GeneratedTask>,
}

/// Builder for [`Engine`]. Everything but the store has a default.
pub struct EngineBuilder {
    db: Arc<Db>,
    registry: Option<PatternRegistry>,
    catalog: Option<TemplateCatalog>,
    resolver: Option<Arc<dyn RoleResolver>>,
    feed: Option<Arc<dyn ChangeFeed>>,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: PatternRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn RoleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn build(self) -> Engine {
        let registry = Arc::new(self.registry.unwrap_or_else(PatternRegistry::builtin));
        let catalog = Arc::new(self.catalog.unwrap_or_else(TemplateCatalog::builtin));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(UnresolvedRoles));
        let feed = self
            .feed
            .unwrap_or_else(|| Arc::new(InProcessFeed::default()));

        let detector = Arc::new(EventDetector::new(Arc::clone(&registry)));
        let generator = Arc::new(TaskGenerator::new(
            Arc::clone(&self.db),
            Arc::clone(&catalog),
            resolver,
        ));
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.db), generator));
        let listener = ModuleListener::new(Arc::clone(&detector), Arc::clone(&pipeline), feed);

        Engine {
            db: self.db,
            registry,
            catalog,
            detector,
            pipeline,
            listener,
        }
    }
}

pub struct Engine {
    db: Arc<Db>,
    registry: Arc<PatternRegistry>,
    catalog: Arc<TemplateCatalog>,
    detector: Arc<EventDetector>,
    pipeline: Arc<Pipeline>,
    listener: ModuleListener,
}

impl Engine {
    pub fn builder(db: Arc<Db>) -> EngineBuilder {
        EngineBuilder {
            db,
            registry: None,
            catalog: None,
            resolver: None,
            feed: None,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Listening
    // -----------------------------------------------------------------------

    /// Subscribe to a module's collections. Registering a pair twice is a no-op.
    pub async fn register_module(&self, module_id: &str, collections: Option<&[String]>) -> Result<usize> {
        self.listener.register_module(module_id, collections).await
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.listener.subscriptions()
    }

    /// End all subscriptions. In-flight changes finish; nothing new is scheduled.
    pub async fn unsubscribe_all(&self) -> usize {
        self.listener.unsubscribe_all().await
    }

    /// Wake-up notifications for every newly stored pending event.
    pub fn subscribe_pending(&self) -> broadcast::Receiver<BusinessEvent> {
        self.db.subscribe_pending()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Synthesize an event without snapshot diffing and run it through the pipeline.
    /// Store failures are returned to the caller.
    pub async fn trigger_event(&self, request: ManualEvent) -> Result<TriggerOutcome> {
        let draft = self.detector.synthesize(request)?;
        info!(module = %draft.source_module, event_type = %draft.event_type, "manual trigger");
        let processed = self.pipeline.submit(draft).await?;
        Ok(TriggerOutcome {
            event_id: processed.event.id,
            event: processed.event,
            tasks: processed.tasks,
        })
    }

    pub async fn get_event(&self, id: EventId) -> Result<BusinessEvent> {
        self.db.get_event(id).await
    }

    pub async fn pending_events(&self, page: Page) -> Result<Vec<BusinessEvent>> {
        self.db.pending_events(page).await
    }

    pub async fn events_by_status(&self, status: EventStatus, page: Page) -> Result<Vec<BusinessEvent>> {
        self.db.events_by_status(status, page).await
    }

    pub async fn events_for_module(&self, module: &str, page: Page) -> Result<Vec<BusinessEvent>> {
        self.db.events_for_module(module, page).await
    }

    pub async fn events_for_module_in_status(
        &self,
        module: &str,
        status: EventStatus,
        page: Page,
    ) -> Result<Vec<BusinessEvent>> {
        self.db.events_for_module_in_status(module, status, page).await
    }

    pub async fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<BusinessEvent>> {
        self.db.events_for_entity(entity_type, entity_id).await
    }

    pub async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<BusinessEvent>> {
        self.db.events_between(from, to, page).await
    }

    /// Run a failed event through generation again with its stored data.
    /// Tasks that already exist are reused.
    pub async fn reprocess_event(&self, id: EventId) -> Result<ProcessedEvent> {
        let event = self.db.get_event(id).await?;
        if event.status != EventStatus::Failed {
            return Err(Error::InvalidTransition {
                from: event.status,
                to: EventStatus::Processing,
            });
        }
        let (event, tasks) = self.pipeline.run(event).await?;
        Ok(ProcessedEvent {
            event,
            tasks,
            duplicate: false,
        })
    }

    pub async fn ignore_event(&self, id: EventId) -> Result<BusinessEvent> {
        self.db.mark_ignored(id).await
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub async fn get_task(&self, id: TaskId) -> Result<GeneratedTask> {
        self.db.get_task(id).await
    }

    pub async fn tasks_for_event(&self, id: EventId) -> Result<Vec<GeneratedTask>> {
        self.db.tasks_for_event(id).await
    }

    pub async fn tasks_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<GeneratedTask>> {
        self.db.tasks_for_entity(entity_type, entity_id).await
    }

    pub async fn tasks_for_project(&self, project_id: &str) -> Result<Vec<GeneratedTask>> {
        self.db.tasks_for_project(project_id).await
    }

    pub async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<GeneratedTask>> {
        self.db.tasks_for_user(user_id).await
    }

    /// Complete or reopen one checklist item.
    pub async fn toggle_checklist_item(
        &self,
        task_id: TaskId,
        item_id: &str,
        completed: bool,
        actor: Option<&str>,
    ) -> Result<GeneratedTask> {
        let mut task = self.db.get_task(task_id).await?;
        task.set_checklist_item(item_id, completed, actor, self.db.now())?;
        self.db.update_task(&task).await?;
        Ok(task)
    }

    /// Completing a task requires every required checklist item done.
    pub async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<GeneratedTask> {
        let mut task = self.db.get_task(task_id).await?;
        task.set_status(status, self.db.now())?;
        self.db.update_task(&task).await?;
        Ok(task)
    }
}
