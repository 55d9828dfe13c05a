//! Structured diagnostics for failures the sync core swallows on purpose.
//!
//! Cache reads, queue persistence and drain attempts must never block the
//! caller, so their failures are routed to an injected sink instead of being
//! propagated. The default sink forwards to `tracing`; `BoundedSink` also
//! retains a short in-memory tail for inspection.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::model::Collection;

/// One observable failure inside the best-effort layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    CacheWriteFailed {
        collection: Collection,
        reason: String,
    },
    CacheReadFailed {
        collection: Collection,
        reason: String,
    },
    QueuePersistFailed {
        reason: String,
    },
    /// First remote attempt of an optimistic mutation failed; the operation
    /// was handed to the pending queue.
    RemoteAttemptFailed {
        collection: Collection,
        kind: &'static str,
        reason: String,
    },
    /// One queued operation failed during a drain pass and stays queued.
    DrainOperationFailed {
        operation_id: String,
        collection: Collection,
        kind: &'static str,
        reason: String,
    },
    /// A remote or pushed row did not deserialize into the collection's
    /// entity type; the local snapshot was left untouched.
    MalformedRow {
        collection: Collection,
        reason: String,
    },
}

/// A recorded event with its observation time.
#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    pub at: DateTime<Utc>,
    pub event: DiagnosticEvent,
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Default sink: structured warnings through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::CacheWriteFailed { collection, reason } => {
                tracing::warn!(%collection, %reason, "cache write failed")
            }
            DiagnosticEvent::CacheReadFailed { collection, reason } => {
                tracing::warn!(%collection, %reason, "cache read failed")
            }
            DiagnosticEvent::QueuePersistFailed { reason } => {
                tracing::warn!(%reason, "pending queue persist failed")
            }
            DiagnosticEvent::RemoteAttemptFailed {
                collection,
                kind,
                reason,
            } => {
                tracing::warn!(%collection, kind, %reason, "remote attempt failed; queued")
            }
            DiagnosticEvent::DrainOperationFailed {
                operation_id,
                collection,
                kind,
                reason,
            } => {
                tracing::warn!(%operation_id, %collection, kind, %reason, "drain operation failed")
            }
            DiagnosticEvent::MalformedRow { collection, reason } => {
                tracing::warn!(%collection, %reason, "malformed remote row")
            }
        }
    }
}

const LOG_CAPACITY: usize = 20;

/// Sink retaining the most recent events, oldest dropped first.
#[derive(Debug, Default)]
pub struct BoundedSink {
    entries: Mutex<VecDeque<DiagnosticEntry>>,
}

impl BoundedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self) -> Vec<DiagnosticEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl DiagnosticSink for BoundedSink {
    fn record(&self, event: DiagnosticEvent) {
        TracingSink.record(event.clone());
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(DiagnosticEntry {
            at: Utc::now(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_sink_keeps_last_twenty() {
        let sink = BoundedSink::new();
        for i in 0..25 {
            sink.record(DiagnosticEvent::QueuePersistFailed {
                reason: format!("erro {i}"),
            });
        }
        let recent = sink.recent();
        assert_eq!(recent.len(), 20);
        assert_eq!(
            recent[0].event,
            DiagnosticEvent::QueuePersistFailed {
                reason: "erro 5".into()
            }
        );
        sink.clear();
        assert!(sink.recent().is_empty());
    }
}
