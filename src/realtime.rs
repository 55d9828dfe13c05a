//! Realtime change relay.
//!
//! One subscription per collection translates pushed change notifications
//! into snapshot merges through the owning controller's serializing gate.
//! Delivery is at-least-once and unordered with respect to our own
//! optimistic writes; the insert-dedup-by-id rule in the merge keeps an echo
//! of our own create from duplicating the row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::model::{ChangeEvent, ChangeNotification, Collection};
use crate::remote::RemoteStore;
use crate::sync::SyncEngine;

/// Source of pushed change notifications, one stream per collection.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, collection: Collection) -> Result<mpsc::Receiver<ChangeNotification>>;
}

/// Descriptor of the most recent pushed change, for "last update" surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastUpdate {
    pub collection: Collection,
    pub event: ChangeEvent,
}

pub struct RealtimeRelay {
    tasks: Vec<JoinHandle<()>>,
    last_update: watch::Receiver<Option<LastUpdate>>,
}

impl RealtimeRelay {
    /// Subscribe to every collection and start forwarding notifications into
    /// the registered controllers.
    pub async fn spawn(engine: Arc<SyncEngine>, channel: Arc<dyn PushChannel>) -> Result<Self> {
        let (tx, last_update) = watch::channel(None);
        let tx = Arc::new(tx);
        let mut tasks = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let mut events = channel.subscribe(collection).await?;
            let engine = engine.clone();
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(notification) = events.recv().await {
                    let event = notification.event;
                    match engine.port(collection) {
                        Some(port) => port.apply_change(notification).await,
                        None => {
                            debug!(%collection, "change dropped: no controller registered")
                        }
                    }
                    let _ = tx.send(Some(LastUpdate { collection, event }));
                }
                debug!(%collection, "push subscription closed");
            }));
        }
        Ok(Self { tasks, last_update })
    }

    /// Watch the most recent pushed change across all collections.
    pub fn last_update(&self) -> watch::Receiver<Option<LastUpdate>> {
        self.last_update.clone()
    }
}

impl Drop for RealtimeRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Push channel that emulates notifications by periodically diffing the
/// remote collection against its previous poll. Used by deployments without
/// a native push feed; delivery timing follows the poll interval.
pub struct PollingPushChannel {
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
}

impl PollingPushChannel {
    pub fn new(remote: Arc<dyn RemoteStore>, interval: Duration) -> Self {
        Self { remote, interval }
    }

    fn diff(
        previous: &HashMap<String, Value>,
        current: &HashMap<String, Value>,
    ) -> Vec<ChangeNotification> {
        let mut notifications = Vec::new();
        for (id, row) in current {
            match previous.get(id) {
                None => notifications.push(ChangeNotification::insert(row.clone())),
                Some(old) if old != row => {
                    notifications.push(ChangeNotification::update(row.clone()))
                }
                Some(_) => {}
            }
        }
        for id in previous.keys() {
            if !current.contains_key(id) {
                notifications.push(ChangeNotification::delete(id.clone()));
            }
        }
        notifications
    }

    fn index_rows(rows: Vec<Value>) -> HashMap<String, Value> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(Value::as_str)?.to_string();
                Some((id, row))
            })
            .collect()
    }
}

#[async_trait]
impl PushChannel for PollingPushChannel {
    async fn subscribe(&self, collection: Collection) -> Result<mpsc::Receiver<ChangeNotification>> {
        let (tx, rx) = mpsc::channel(64);
        let remote = self.remote.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            // The first successful poll primes the baseline without emitting.
            let mut known: Option<HashMap<String, Value>> = None;
            loop {
                tokio::time::sleep(interval).await;
                let rows = match remote.select(collection).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        debug!(%collection, ?err, "poll failed");
                        continue;
                    }
                };
                let current = Self::index_rows(rows);
                if let Some(previous) = &known {
                    for notification in Self::diff(previous, &current) {
                        if tx.send(notification).await.is_err() {
                            return;
                        }
                    }
                }
                known = Some(current);
            }
        });
        Ok(rx)
    }
}
