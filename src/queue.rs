//! Durable FIFO queue of mutations awaiting remote application.
//!
//! The whole queue is persisted under the `pendingOperations` key after every
//! mutation, so queued work survives restarts. Operations leave the queue
//! only when their remote call succeeds during a drain pass.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::model::{Collection, OperationPayload, PendingOperation};
use crate::storage::KeyValueStore;

pub const QUEUE_KEY: &str = "pendingOperations";

pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    ops: Vec<PendingOperation>,
}

impl PendingQueue {
    /// Restore the queue from durable storage. An unreadable or missing
    /// entry starts an empty queue.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let ops = match store.get(QUEUE_KEY).await {
            Ok(Some(encoded)) => match serde_json::from_str(&encoded) {
                Ok(ops) => ops,
                Err(err) => {
                    tracing::warn!(?err, "discarding unreadable pending queue");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(?err, "failed to read pending queue");
                Vec::new()
            }
        };
        debug!(len = ops.len(), "pending queue restored");
        Self { store, ops }
    }

    /// Append an operation and persist the queue.
    #[instrument(skip_all, fields(collection = %collection, kind = payload.kind()))]
    pub async fn enqueue(
        &mut self,
        collection: Collection,
        payload: OperationPayload,
    ) -> Result<PendingOperation> {
        let op = PendingOperation {
            id: Uuid::new_v4().to_string(),
            collection,
            payload,
            enqueued_at: Utc::now(),
        };
        self.ops.push(op.clone());
        self.persist().await?;
        Ok(op)
    }

    /// All queued operations in enqueue order.
    pub fn all(&self) -> Vec<PendingOperation> {
        self.ops.clone()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drop the operations resolved by a drain pass, preserving the order of
    /// the remainder, and persist.
    pub async fn remove_resolved(&mut self, resolved: &[String]) -> Result<()> {
        if resolved.is_empty() {
            return Ok(());
        }
        self.ops.retain(|op| !resolved.contains(&op.id));
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let encoded = serde_json::to_string(&self.ops)?;
        self.store.set(QUEUE_KEY, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_persists_and_reload_restores_order() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = PendingQueue::load(store.clone()).await;
        assert!(queue.is_empty());

        queue
            .enqueue(
                Collection::Dollys,
                OperationPayload::Create {
                    local_id: "temp_1_a".into(),
                    row: json!({"numero_dolly": 26010}),
                },
            )
            .await
            .unwrap();
        queue
            .enqueue(
                Collection::Tanques,
                OperationPayload::Delete { id: "srv-9".into() },
            )
            .await
            .unwrap();

        let reloaded = PendingQueue::load(store).await;
        assert_eq!(reloaded.len(), 2);
        let ops = reloaded.all();
        assert_eq!(ops[0].collection, Collection::Dollys);
        assert_eq!(ops[0].payload.kind(), "create");
        assert_eq!(ops[1].collection, Collection::Tanques);
        assert_eq!(ops[1].payload.kind(), "delete");
    }

    #[tokio::test]
    async fn remove_resolved_keeps_unresolved_in_order() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = PendingQueue::load(store.clone()).await;
        let first = queue
            .enqueue(
                Collection::Dollys,
                OperationPayload::Delete { id: "a".into() },
            )
            .await
            .unwrap();
        let second = queue
            .enqueue(
                Collection::Dollys,
                OperationPayload::Delete { id: "b".into() },
            )
            .await
            .unwrap();
        let third = queue
            .enqueue(
                Collection::Dollys,
                OperationPayload::Delete { id: "c".into() },
            )
            .await
            .unwrap();

        queue
            .remove_resolved(&[first.id.clone(), third.id.clone()])
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.all()[0], second);

        // Removal is durable.
        let reloaded = PendingQueue::load(store).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.all()[0].id, second.id);
    }

    #[tokio::test]
    async fn unreadable_persisted_queue_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "not json").await.unwrap();
        let queue = PendingQueue::load(store).await;
        assert!(queue.is_empty());
    }
}
