//! The sync engine: optimistic mutations against collection snapshots,
//! enqueue-on-failure, and gated drain passes replaying the pending queue.
//!
//! Every mutation verb follows the same contract: the local snapshot and the
//! cache are updated synchronously with the caller's action; the remote store
//! is only consulted afterwards, and a failed or skipped remote attempt parks
//! the operation in the durable queue instead of rolling anything back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::cache::CacheStore;
use crate::connectivity::ConnectivityHandle;
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::model::{
    insert_payload, merge_patch, temp_id, ChangeEvent, ChangeNotification, Collection,
    OperationPayload, PendingOperation, Record, ValidationError,
};
use crate::queue::PendingQueue;
use crate::remote::RemoteStore;
use crate::storage::KeyValueStore;

pub const LAST_SYNC_KEY: &str = "lastSyncTime";

/// Aggregate outcome of one drain pass, surfaced by the manual sync trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub resolved: usize,
    pub failed: usize,
}

/// Per-collection snapshot state owned by a collection controller. The mutex
/// around it is the serializing gate both write paths (optimistic mutations
/// and realtime merges) go through.
pub(crate) struct SnapshotState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for SnapshotState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

pub(crate) type SnapshotCell<T> = Arc<Mutex<SnapshotState<T>>>;

/// Type-erased access to a controller's snapshot, used by the drain pass to
/// reconcile queued results and by the realtime relay to merge pushed
/// changes.
#[async_trait]
pub(crate) trait SnapshotPort: Send + Sync {
    /// Replace the optimistic row carrying `local_id` with the committed row.
    async fn resolve_create(&self, local_id: &str, row: Value);

    /// Replace the row with the given id by the committed row.
    async fn apply_update(&self, id: &str, row: Value);

    /// Merge one realtime change notification.
    async fn apply_change(&self, notification: ChangeNotification);
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn KeyValueStore>,
    cache: CacheStore,
    queue: Mutex<PendingQueue>,
    connectivity: ConnectivityHandle,
    sink: Arc<dyn DiagnosticSink>,
    draining: AtomicBool,
    ports: StdMutex<HashMap<Collection, Weak<dyn SnapshotPort>>>,
}

/// Clears the drain gate when the pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub async fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn KeyValueStore>,
        connectivity: ConnectivityHandle,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Arc<Self> {
        let cache = CacheStore::new(store.clone(), sink.clone());
        let queue = PendingQueue::load(store.clone()).await;
        Arc::new(Self {
            remote,
            store,
            cache,
            queue: Mutex::new(queue),
            connectivity,
            sink,
            draining: AtomicBool::new(false),
            ports: StdMutex::new(HashMap::new()),
        })
    }

    pub(crate) fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.lock().await.all()
    }

    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        let encoded = self.store.get(LAST_SYNC_KEY).await.ok()??;
        DateTime::parse_from_rfc3339(&encoded)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub(crate) fn register_port(&self, collection: Collection, port: Weak<dyn SnapshotPort>) {
        self.ports.lock().unwrap().insert(collection, port);
    }

    pub(crate) fn port(&self, collection: Collection) -> Option<Arc<dyn SnapshotPort>> {
        self.ports
            .lock()
            .unwrap()
            .get(&collection)
            .and_then(Weak::upgrade)
    }

    /// Create a record: optimistic insert under a temporary id, then remote
    /// attempt or enqueue. Only validation failures surface to the caller.
    #[instrument(skip_all, fields(collection = %T::COLLECTION))]
    pub(crate) async fn create_record<T: Record>(
        &self,
        cell: &SnapshotCell<T>,
        mut record: T,
    ) -> Result<(), ValidationError> {
        let now = Utc::now();
        let local_id = temp_id(now);
        let snapshot = {
            let mut state = cell.lock().await;
            record.validate_new(&state.items)?;
            record.set_id(local_id.clone());
            record.apply_defaults(now);
            state.items.push(record.clone());
            state.items.sort_by(T::order);
            state.error = None;
            state.items.clone()
        };
        self.cache.save(T::COLLECTION, &snapshot).await;

        let row = insert_payload(&record);
        if !self.connectivity.is_online() {
            self.enqueue(T::COLLECTION, OperationPayload::Create { local_id, row })
                .await;
            return Ok(());
        }

        match self.remote.insert(T::COLLECTION, &row).await {
            Ok(committed) => self.finish_create::<T>(cell, &local_id, committed).await,
            Err(err) => {
                self.sink.record(DiagnosticEvent::RemoteAttemptFailed {
                    collection: T::COLLECTION,
                    kind: "create",
                    reason: err.to_string(),
                });
                self.enqueue(T::COLLECTION, OperationPayload::Create { local_id, row })
                    .await;
            }
        }
        Ok(())
    }

    /// Update a record by id: optimistic field splice, then remote attempt or
    /// enqueue. A missing id is not an error; the patch is still sent on.
    #[instrument(skip_all, fields(collection = %T::COLLECTION, id))]
    pub(crate) async fn update_record<T: Record>(
        &self,
        cell: &SnapshotCell<T>,
        id: &str,
        patch: Value,
    ) -> Result<(), ValidationError> {
        let snapshot = {
            let mut state = cell.lock().await;
            if let Some(pos) = state.items.iter().position(|item| item.id() == id) {
                let merged = merge_patch(&state.items[pos], &patch)?;
                state.items[pos] = merged;
            } else if !patch.is_object() {
                return Err(ValidationError::InvalidPatch(
                    "esperado objeto JSON".into(),
                ));
            }
            state.error = None;
            state.items.clone()
        };
        self.cache.save(T::COLLECTION, &snapshot).await;

        if !self.connectivity.is_online() {
            self.enqueue(
                T::COLLECTION,
                OperationPayload::Update {
                    id: id.to_string(),
                    patch,
                },
            )
            .await;
            return Ok(());
        }

        match self.remote.update(T::COLLECTION, id, &patch).await {
            Ok(committed) => self.finish_update::<T>(cell, id, committed).await,
            Err(err) => {
                self.sink.record(DiagnosticEvent::RemoteAttemptFailed {
                    collection: T::COLLECTION,
                    kind: "update",
                    reason: err.to_string(),
                });
                self.enqueue(
                    T::COLLECTION,
                    OperationPayload::Update {
                        id: id.to_string(),
                        patch,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Delete a record by id: optimistic removal, then remote attempt or
    /// enqueue. The removal is kept regardless of the remote outcome.
    #[instrument(skip_all, fields(collection = %T::COLLECTION, id))]
    pub(crate) async fn delete_record<T: Record>(
        &self,
        cell: &SnapshotCell<T>,
        id: &str,
    ) -> Result<(), ValidationError> {
        let snapshot = {
            let mut state = cell.lock().await;
            state.items.retain(|item| item.id() != id);
            state.error = None;
            state.items.clone()
        };
        self.cache.save(T::COLLECTION, &snapshot).await;

        if !self.connectivity.is_online() {
            self.enqueue(
                T::COLLECTION,
                OperationPayload::Delete { id: id.to_string() },
            )
            .await;
            return Ok(());
        }

        if let Err(err) = self.remote.delete(T::COLLECTION, id).await {
            self.sink.record(DiagnosticEvent::RemoteAttemptFailed {
                collection: T::COLLECTION,
                kind: "delete",
                reason: err.to_string(),
            });
            self.enqueue(
                T::COLLECTION,
                OperationPayload::Delete { id: id.to_string() },
            )
            .await;
        }
        Ok(())
    }

    /// Reload a snapshot: remote fetch when online (falling back to the cache
    /// on failure), cache only when offline.
    #[instrument(skip_all, fields(collection = %T::COLLECTION))]
    pub(crate) async fn refresh_records<T: Record>(&self, cell: &SnapshotCell<T>) {
        {
            let mut state = cell.lock().await;
            state.loading = true;
            state.error = None;
        }

        if !self.connectivity.is_online() {
            let cached = self.cache.load::<T>(T::COLLECTION).await;
            let mut state = cell.lock().await;
            if let Some(items) = cached {
                debug!(collection = %T::COLLECTION, "snapshot loaded from cache (offline)");
                state.items = items;
            }
            state.loading = false;
            return;
        }

        match self.remote.select(T::COLLECTION).await {
            Ok(rows) => {
                let mut items: Vec<T> = Vec::with_capacity(rows.len());
                for row in rows {
                    match serde_json::from_value(row) {
                        Ok(item) => items.push(item),
                        Err(err) => self.sink.record(DiagnosticEvent::MalformedRow {
                            collection: T::COLLECTION,
                            reason: err.to_string(),
                        }),
                    }
                }
                items.sort_by(T::order);
                let snapshot = {
                    let mut state = cell.lock().await;
                    state.items = items;
                    state.loading = false;
                    state.items.clone()
                };
                self.cache.save(T::COLLECTION, &snapshot).await;
            }
            Err(err) => {
                let cached = self.cache.load::<T>(T::COLLECTION).await;
                let mut state = cell.lock().await;
                state.error = Some(err.to_string());
                if let Some(items) = cached {
                    debug!(collection = %T::COLLECTION, "snapshot loaded from cache after fetch failure");
                    state.items = items;
                }
                state.loading = false;
            }
        }
    }

    /// Replay the pending queue against the remote store, FIFO. A no-op when
    /// offline, already draining, or the queue is empty. Individual failures
    /// are recorded and leave their operation queued for the next pass.
    #[instrument(skip_all)]
    pub async fn drain(&self) -> SyncReport {
        if !self.connectivity.is_online() {
            debug!("drain skipped: offline");
            return SyncReport::default();
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("drain skipped: pass already in flight");
            return SyncReport::default();
        }
        let _guard = DrainGuard(&self.draining);

        let ops = self.queue.lock().await.all();
        if ops.is_empty() {
            debug!("drain skipped: queue empty");
            return SyncReport::default();
        }

        info!(len = ops.len(), "drain pass started");
        let mut resolved = Vec::new();
        let mut failed = 0usize;
        for op in &ops {
            match self.apply_queued(op).await {
                Ok(()) => resolved.push(op.id.clone()),
                Err(err) => {
                    failed += 1;
                    self.sink.record(DiagnosticEvent::DrainOperationFailed {
                        operation_id: op.id.clone(),
                        collection: op.collection,
                        kind: op.payload.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Resolved operations leave the queue in one batch, keeping failed
        // ones in their original order.
        {
            let mut queue = self.queue.lock().await;
            if let Err(err) = queue.remove_resolved(&resolved).await {
                self.sink.record(DiagnosticEvent::QueuePersistFailed {
                    reason: err.to_string(),
                });
            }
        }
        self.record_sync_time().await;

        let report = SyncReport {
            resolved: resolved.len(),
            failed,
        };
        info!(resolved = report.resolved, failed = report.failed, "drain pass finished");
        report
    }

    /// Manual "sync now" trigger; shares the drain gate with the reconnect
    /// watcher.
    pub async fn sync_now(&self) -> SyncReport {
        self.drain().await
    }

    async fn apply_queued(&self, op: &PendingOperation) -> anyhow::Result<()> {
        match &op.payload {
            OperationPayload::Create { local_id, row } => {
                let committed = self.remote.insert(op.collection, row).await?;
                if let Some(port) = self.port(op.collection) {
                    port.resolve_create(local_id, committed).await;
                }
            }
            OperationPayload::Update { id, patch } => {
                let committed = self.remote.update(op.collection, id, patch).await?;
                if let Some(port) = self.port(op.collection) {
                    port.apply_update(id, committed).await;
                }
            }
            OperationPayload::Delete { id } => {
                self.remote.delete(op.collection, id).await?;
            }
        }
        Ok(())
    }

    /// Replace the optimistic row carrying `local_id` by the committed row
    /// and re-cache. Shared by the online create path and drain
    /// reconciliation.
    pub(crate) async fn finish_create<T: Record>(
        &self,
        cell: &SnapshotCell<T>,
        local_id: &str,
        row: Value,
    ) {
        match serde_json::from_value::<T>(row) {
            Ok(committed) => {
                let snapshot = {
                    let mut state = cell.lock().await;
                    if let Some(item) =
                        state.items.iter_mut().find(|item| item.id() == local_id)
                    {
                        *item = committed;
                    }
                    state.items.clone()
                };
                self.cache.save(T::COLLECTION, &snapshot).await;
            }
            Err(err) => self.sink.record(DiagnosticEvent::MalformedRow {
                collection: T::COLLECTION,
                reason: err.to_string(),
            }),
        }
    }

    pub(crate) async fn finish_update<T: Record>(
        &self,
        cell: &SnapshotCell<T>,
        id: &str,
        row: Value,
    ) {
        match serde_json::from_value::<T>(row) {
            Ok(committed) => {
                let snapshot = {
                    let mut state = cell.lock().await;
                    if let Some(item) = state.items.iter_mut().find(|item| item.id() == id) {
                        *item = committed;
                    }
                    state.items.clone()
                };
                self.cache.save(T::COLLECTION, &snapshot).await;
            }
            Err(err) => self.sink.record(DiagnosticEvent::MalformedRow {
                collection: T::COLLECTION,
                reason: err.to_string(),
            }),
        }
    }

    async fn enqueue(&self, collection: Collection, payload: OperationPayload) {
        let mut queue = self.queue.lock().await;
        if let Err(err) = queue.enqueue(collection, payload).await {
            self.sink.record(DiagnosticEvent::QueuePersistFailed {
                reason: err.to_string(),
            });
        }
    }

    async fn record_sync_time(&self) {
        let now = Utc::now().to_rfc3339();
        if let Err(err) = self.store.set(LAST_SYNC_KEY, &now).await {
            tracing::warn!(?err, "failed to persist last sync time");
        }
    }
}

/// Realtime merge rules shared by every collection controller: inserts are
/// deduplicated by id (a server echo of our own optimistic create must not
/// duplicate the row), updates and deletes are no-ops for unknown ids.
pub(crate) fn merge_notification<T: Record>(
    items: &mut Vec<T>,
    notification: ChangeNotification,
    sink: &dyn DiagnosticSink,
) -> bool {
    match notification.event {
        ChangeEvent::Insert => {
            let Some(row) = notification.new else {
                return false;
            };
            let incoming: T = match serde_json::from_value(row) {
                Ok(incoming) => incoming,
                Err(err) => {
                    sink.record(DiagnosticEvent::MalformedRow {
                        collection: T::COLLECTION,
                        reason: err.to_string(),
                    });
                    return false;
                }
            };
            if items.iter().any(|item| item.id() == incoming.id()) {
                return false;
            }
            items.push(incoming);
            items.sort_by(T::order);
            true
        }
        ChangeEvent::Update => {
            let Some(row) = notification.new else {
                return false;
            };
            let incoming: T = match serde_json::from_value(row) {
                Ok(incoming) => incoming,
                Err(err) => {
                    sink.record(DiagnosticEvent::MalformedRow {
                        collection: T::COLLECTION,
                        reason: err.to_string(),
                    });
                    return false;
                }
            };
            match items.iter_mut().find(|item| item.id() == incoming.id()) {
                Some(item) => {
                    *item = incoming;
                    true
                }
                None => false,
            }
        }
        ChangeEvent::Delete => {
            let Some(id) = notification.old_id else {
                return false;
            };
            let before = items.len();
            items.retain(|item| item.id() != id);
            items.len() != before
        }
    }
}
