//! Change feed: per-collection document change notifications.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::model::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One change to one document in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    pub document_id: String,
    /// Post-change document. For `removed` this is the last known data.
    #[serde(default)]
    pub data: Value,
    /// Pre-change document, when the feed can supply it.
    #[serde(default)]
    pub before: Option<Value>,
}

impl ChangeRecord {
    pub fn added(document_id: impl Into<String>, data: Value) -> Self {
        Self {
            change_type: ChangeType::Added,
            document_id: document_id.into(),
            data,
            before: None,
        }
    }

    pub fn modified(document_id: impl Into<String>, data: Value) -> Self {
        Self {
            change_type: ChangeType::Modified,
            ..Self::added(document_id, data)
        }
    }

    pub fn removed(document_id: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Removed,
            ..Self::added(document_id, Value::Null)
        }
    }

    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }
}

/// A change addressed to a collection, as read from a line of JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionChange {
    pub collection: String,
    #[serde(flatten)]
    pub record: ChangeRecord,
}

/// Source of change notifications. Delivery is at-least-once and ordered
/// within one collection.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, collection: &str) -> Result<mpsc::Receiver<ChangeRecord>>;
}

/// Feed backed by in-process channels. Whoever holds it publishes changes.
pub struct InProcessFeed {
    buffer: usize,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<ChangeRecord>>>>,
}

impl InProcessFeed {
    /// `buffer` is the channel capacity per subscription; publishers wait when it is full.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver a change to every live subscriber of `collection`.
    /// Returns how many subscribers received it.
    pub async fn publish(&self, collection: &str, record: ChangeRecord) -> usize {
        let senders: Vec<mpsc::Sender<ChangeRecord>> = {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(list) = subscribers.get_mut(collection) else {
                debug!(collection, "no subscribers for change");
                return 0;
            };
            list.retain(|tx| !tx.is_closed());
            list.clone()
        };

        let mut delivered = 0;
        for tx in senders {
            if tx.send(record.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscriptions on a collection.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, |list| list.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl Default for InProcessFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeFeed for InProcessFeed {
    async fn subscribe(&self, collection: &str) -> Result<mpsc::Receiver<ChangeRecord>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_each_subscriber() {
        let feed = InProcessFeed::new(4);
        let mut a = feed.subscribe("deals").await.unwrap();
        let mut b = feed.subscribe("deals").await.unwrap();

        let delivered = feed
            .publish("deals", ChangeRecord::added("d1", json!({"name": "X"})))
            .await;
        assert_eq!(delivered, 2);
        assert_eq!(a.recv().await.unwrap().document_id, "d1");
        assert_eq!(b.recv().await.unwrap().document_id, "d1");
        assert_eq!(feed.publish("budgets", ChangeRecord::removed("b1")).await, 0);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let feed = InProcessFeed::new(4);
        let rx = feed.subscribe("deals").await.unwrap();
        drop(rx);
        assert_eq!(feed.subscriber_count("deals"), 0);
        assert_eq!(feed.publish("deals", ChangeRecord::removed("d1")).await, 0);
    }

    #[test]
    fn envelope_parses_from_json_line() {
        let line = r#"{"collection":"deals","changeType":"modified","documentId":"d1","data":{"stage":"won"},"before":{"stage":"open"}}"#;
        let change: CollectionChange = serde_json::from_str(line).unwrap();
        assert_eq!(change.collection, "deals");
        assert_eq!(change.record.change_type, ChangeType::Modified);
        assert_eq!(change.record.before, Some(json!({"stage": "open"})));
    }
}
