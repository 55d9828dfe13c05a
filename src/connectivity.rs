//! Connectivity monitoring.
//!
//! The monitor owns a single process-wide online/offline flag fed by the
//! embedder's platform signals. Interested parties hold a cheap clonable
//! handle; a spawned watcher debounces offline→online transitions before
//! asking the sync engine to drain the pending queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sync::SyncEngine;

pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create the monitor with the platform's current status.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Feed a platform connectivity signal. Repeated signals with the same
    /// value are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<bool>,
}

impl ConnectivityHandle {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new state. `None` when
    /// the monitor has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow())
    }
}

/// Watch for reconnects and trigger a drain pass after a short debounce, so
/// a flapping link does not fire repeated passes. The drain is skipped if
/// the link dropped again while debouncing.
pub fn spawn_drain_on_reconnect(
    mut handle: ConnectivityHandle,
    engine: Arc<SyncEngine>,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(online) = handle.changed().await {
            if !online {
                continue;
            }
            debug!(debounce_ms = debounce.as_millis() as u64, "reconnected; debouncing");
            tokio::time::sleep(debounce).await;
            if !handle.is_online() {
                debug!("connection dropped during debounce; drain skipped");
                continue;
            }
            let report = engine.drain().await;
            info!(
                resolved = report.resolved,
                failed = report.failed,
                "reconnect drain finished"
            );
        }
    })
}
