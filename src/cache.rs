//! Best-effort snapshot cache over the key/value store.
//!
//! Each collection caches its full snapshot under `cache_<collection>`
//! together with the write time; entries older than 24 hours read as absent.
//! Failures never propagate: a failed write is reported and dropped, a failed
//! read counts as "no cache available".

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::model::Collection;
use crate::storage::KeyValueStore;

const CACHE_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

fn cache_key(collection: Collection) -> String {
    format!("cache_{}", collection.as_str())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    data: Vec<Value>,
    /// Unix milliseconds of the write.
    timestamp: i64,
}

#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn DiagnosticSink>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { store, sink }
    }

    /// Overwrite the cached snapshot for a collection.
    pub async fn save<T: Serialize>(&self, collection: Collection, items: &[T]) {
        let result = async {
            let data = items
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            let envelope = CacheEnvelope {
                data,
                timestamp: Utc::now().timestamp_millis(),
            };
            let encoded = serde_json::to_string(&envelope)?;
            self.store.set(&cache_key(collection), &encoded).await
        }
        .await;

        if let Err(err) = result {
            self.sink.record(DiagnosticEvent::CacheWriteFailed {
                collection,
                reason: err.to_string(),
            });
        }
    }

    /// Load the cached snapshot, or `None` when missing, unreadable or older
    /// than 24 hours.
    pub async fn load<T: DeserializeOwned>(&self, collection: Collection) -> Option<Vec<T>> {
        let encoded = match self.store.get(&cache_key(collection)).await {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return None,
            Err(err) => {
                self.sink.record(DiagnosticEvent::CacheReadFailed {
                    collection,
                    reason: err.to_string(),
                });
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_str(&encoded) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.sink.record(DiagnosticEvent::CacheReadFailed {
                    collection,
                    reason: err.to_string(),
                });
                return None;
            }
        };

        let age = Utc::now().timestamp_millis() - envelope.timestamp;
        if age >= CACHE_TTL_MILLIS {
            debug!(%collection, age_millis = age, "cache entry expired");
            return None;
        }

        match envelope
            .data
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
        {
            Ok(items) => Some(items),
            Err(err) => {
                self.sink.record(DiagnosticEvent::CacheReadFailed {
                    collection,
                    reason: err.to_string(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::BoundedSink;
    use crate::model::{Dolly, EquipStatus};
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn cache_with_store() -> (CacheStore, Arc<MemoryStore>, Arc<BoundedSink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BoundedSink::new());
        (
            CacheStore::new(store.clone(), sink.clone()),
            store,
            sink,
        )
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let (cache, _, _) = cache_with_store();
        let dollys = vec![Dolly::new(26010, EquipStatus::Disponivel)];
        cache.save(Collection::Dollys, &dollys).await;

        let loaded: Vec<Dolly> = cache.load(Collection::Dollys).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].numero_dolly, 26010);
    }

    #[tokio::test]
    async fn entries_expire_after_twenty_four_hours() {
        let (cache, store, _) = cache_with_store();

        let write = |age_millis: i64| {
            json!({
                "data": [{"id": "srv-1", "numero_dolly": 26010, "tipo": null,
                          "status": "disponivel", "localizacao": null, "observacoes": null,
                          "created_at": null, "updated_at": null}],
                "timestamp": Utc::now().timestamp_millis() - age_millis,
            })
            .to_string()
        };

        // One minute short of the TTL: still served.
        store
            .set(&cache_key(Collection::Dollys), &write(CACHE_TTL_MILLIS - 60_000))
            .await
            .unwrap();
        assert!(cache.load::<Dolly>(Collection::Dollys).await.is_some());

        // One minute past the TTL: treated as absent.
        store
            .set(&cache_key(Collection::Dollys), &write(CACHE_TTL_MILLIS + 60_000))
            .await
            .unwrap();
        assert!(cache.load::<Dolly>(Collection::Dollys).await.is_none());
    }

    #[tokio::test]
    async fn unreadable_entry_reads_as_absent_and_is_reported() {
        let (cache, store, sink) = cache_with_store();
        store
            .set(&cache_key(Collection::Dollys), "not json")
            .await
            .unwrap();
        assert!(cache.load::<Dolly>(Collection::Dollys).await.is_none());
        assert!(sink
            .recent()
            .iter()
            .any(|e| matches!(e.event, DiagnosticEvent::CacheReadFailed { .. })));
    }
}
