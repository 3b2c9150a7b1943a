//! Module listener: one worker per (module, collection) subscription.
//!
//! Each worker handles its collection's changes strictly in delivery order.
//! Workers for different collections run concurrently and share nothing but
//! the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::KeyValue;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::feed::{ChangeFeed, ChangeRecord, ChangeType};
use super::pipeline::Pipeline;
use crate::detector::{EntityChange, EventDetector};
use crate::error::{Error, Result};
use crate::model::value::{Value, first_str, values_equal};
use crate::registry::{CollectionBinding, ModuleDefinition};
use crate::telemetry::metrics;

const NAME_KEYS: &[&str] = &["name", "title", "displayName"];
const ACTOR_KEYS: &[&str] = &["updatedBy", "createdBy"];

/// Identifies one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub module: String,
    pub collection: String,
}

struct SubscriptionHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct ModuleListener {
    detector: Arc<EventDetector>,
    pipeline: Arc<Pipeline>,
    feed: Arc<dyn ChangeFeed>,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionHandle>>,
}

impl ModuleListener {
    pub fn new(detector: Arc<EventDetector>, pipeline: Arc<Pipeline>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            detector,
            pipeline,
            feed,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a module's collections (all of them when `collections` is `None`).
    ///
    /// Pairs already subscribed are skipped. Returns the number of new subscriptions.
    pub async fn register_module(&self, module_id: &str, collections: Option<&[String]>) -> Result<usize> {
        let module = self
            .detector
            .registry()
            .module(module_id)
            .ok_or_else(|| Error::NotFound(format!("module {module_id}")))?
            .clone();

        let bindings: Vec<CollectionBinding> = match collections {
            None => module.collections.clone(),
            Some(names) => names
                .iter()
                .map(|name| {
                    module.collection(name).cloned().ok_or_else(|| {
                        Error::NotFound(format!("collection {name} of module {module_id}"))
                    })
                })
                .collect::<Result<_>>()?,
        };

        let mut added = 0;
        for binding in bindings {
            let key = SubscriptionKey {
                module: module.id.clone(),
                collection: binding.name.clone(),
            };
            if self.is_subscribed(&key) {
                debug!(module = %key.module, collection = %key.collection, "already subscribed");
                continue;
            }

            let rx = self.feed.subscribe(&binding.name).await?;
            let mut subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if subscriptions.contains_key(&key) {
                continue;
            }

            let shutdown = Arc::new(Notify::new());
            let worker = CollectionWorker {
                module: module.clone(),
                binding,
                detector: Arc::clone(&self.detector),
                pipeline: Arc::clone(&self.pipeline),
                cache: HashMap::new(),
            };
            let span = info_span!("collection", module = %key.module, collection = %key.collection);
            let task = tokio::spawn(worker.run(rx, Arc::clone(&shutdown)).instrument(span));
            info!(module = %key.module, collection = %key.collection, "subscribed");
            subscriptions.insert(key, SubscriptionHandle { shutdown, task });
            added += 1;
        }
        Ok(added)
    }

    fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Current subscriptions, sorted.
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Stop every worker. A change already being handled finishes first;
    /// nothing further is picked up. Returns the number of subscriptions ended.
    pub async fn unsubscribe_all(&self) -> usize {
        let handles: Vec<(SubscriptionKey, SubscriptionHandle)> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (_, handle) in &handles {
            handle.shutdown.notify_one();
        }
        let count = handles.len();
        for (key, handle) in handles {
            if let Err(e) = handle.task.await {
                error!(module = %key.module, collection = %key.collection, "worker ended abnormally: {e}");
            }
        }
        info!(count, "unsubscribed all");
        count
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Owns one subscription's last-seen documents.
///
/// The cache recovers pre-change data for feeds that only deliver the new
/// document, and recognizes redeliveries of a change already handled.
struct CollectionWorker {
    module: ModuleDefinition,
    binding: CollectionBinding,
    detector: Arc<EventDetector>,
    pipeline: Arc<Pipeline>,
    cache: HashMap<String, Value>,
}

impl CollectionWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<ChangeRecord>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                change = rx.recv() => match change {
                    Some(change) => self.handle(change).await,
                    None => {
                        debug!("feed closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle(&mut self, record: ChangeRecord) {
        let id = record.document_id.clone();

        let previous = match record.change_type {
            ChangeType::Removed => {
                self.cache.remove(&id);
                debug!(document_id = %id, "document removed");
                return;
            }
            ChangeType::Added => None,
            ChangeType::Modified => {
                match record.before.clone().or_else(|| self.cache.get(&id).cloned()) {
                    Some(before) => Some(before),
                    None => {
                        warn!(
                            document_id = %id,
                            "modified document has no prior state; skipping detection"
                        );
                        if record.data.is_object() {
                            self.cache.insert(id, record.data);
                        }
                        return;
                    }
                }
            }
        };

        if self
            .cache
            .get(&id)
            .is_some_and(|cached| values_equal(cached, &record.data))
        {
            debug!(document_id = %id, "unchanged document, treating as redelivery");
            return;
        }

        let change = self.entity_change(&record, previous);
        // Only documents that passed detection become the prior state of the next change.
        let drafts = match self.detector.detect(&change) {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!(document_id = %change.entity_id, error = %e, "detection failed");
                metrics::detection_errors().add(1, &[KeyValue::new("module", self.module.id.clone())]);
                return;
            }
        };
        self.cache.insert(id, record.data);

        for draft in drafts {
            let event_type = draft.event_type.clone();
            if let Err(e) = self.pipeline.submit(draft).await {
                error!(
                    document_id = %change.entity_id,
                    event_type = %event_type,
                    error = %e,
                    "event could not be processed"
                );
            }
        }
    }

    fn entity_change(&self, record: &ChangeRecord, previous: Option<Value>) -> EntityChange {
        let data = &record.data;
        let name = first_str(data, NAME_KEYS).unwrap_or(&record.document_id);
        let mut change = EntityChange::new(
            self.module.id.clone(),
            self.binding.entity_type.clone(),
            record.document_id.clone(),
            name,
            data.clone(),
        );
        change.previous = previous;
        change.subsidiary = first_str(data, &["subsidiary"])
            .map(str::to_string)
            .or_else(|| self.module.subsidiary.clone());
        change.project_id = first_str(data, &["projectId"]).map(str::to_string);
        change.project_name = first_str(data, &["projectName"]).map(str::to_string);
        change.actor = first_str(data, ACTOR_KEYS).map(str::to_string);
        change
    }
}
