//! Collection controllers: one thin adapter per entity kind binding the CRUD
//! verbs to the sync engine and exposing the snapshot the UI renders.
//!
//! The controller exclusively owns its snapshot; the sync engine and the
//! realtime relay mutate it only through the controller, so both write paths
//! serialize on the same lock.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{ChangeNotification, Dolly, Equipamento, Pendencia, Record, Tanque, ValidationError};
use crate::sync::{merge_notification, SnapshotCell, SnapshotPort, SyncEngine};

pub type EquipamentoController = CollectionController<Equipamento>;
pub type TanqueController = CollectionController<Tanque>;
pub type DollyController = CollectionController<Dolly>;
pub type PendenciaController = CollectionController<Pendencia>;

pub struct CollectionController<T: Record> {
    engine: Arc<SyncEngine>,
    state: SnapshotCell<T>,
}

impl<T: Record> CollectionController<T> {
    /// Build the controller and register it with the engine so drain
    /// reconciliation and realtime merges reach this snapshot.
    pub fn register(engine: Arc<SyncEngine>) -> Arc<Self> {
        let controller = Arc::new(Self {
            engine: engine.clone(),
            state: SnapshotCell::default(),
        });
        let port_arc: Arc<dyn SnapshotPort> = controller.clone();
        let port: Weak<dyn SnapshotPort> = Arc::downgrade(&port_arc);
        engine.register_port(T::COLLECTION, port);
        controller
    }

    /// The current snapshot in canonical order.
    pub async fn snapshot(&self) -> Vec<T> {
        self.state.lock().await.items.clone()
    }

    pub async fn loading(&self) -> bool {
        self.state.lock().await.loading
    }

    /// The last fetch failure, if cached data is being served in its place.
    pub async fn error(&self) -> Option<String> {
        self.state.lock().await.error.clone()
    }

    /// Reload from the remote store (or the cache when offline / on failure).
    pub async fn refresh(&self) {
        self.engine.refresh_records(&self.state).await;
    }

    pub async fn create(&self, record: T) -> Result<(), ValidationError> {
        self.engine.create_record(&self.state, record).await
    }

    pub async fn update(&self, id: &str, patch: Value) -> Result<(), ValidationError> {
        self.engine.update_record(&self.state, id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ValidationError> {
        self.engine.delete_record(&self.state, id).await
    }
}

#[async_trait]
impl<T: Record> SnapshotPort for CollectionController<T> {
    async fn resolve_create(&self, local_id: &str, row: Value) {
        self.engine.finish_create(&self.state, local_id, row).await;
    }

    async fn apply_update(&self, id: &str, row: Value) {
        self.engine.finish_update(&self.state, id, row).await;
    }

    async fn apply_change(&self, notification: ChangeNotification) {
        let mut state = self.state.lock().await;
        merge_notification(&mut state.items, notification, self.engine.sink().as_ref());
    }
}
