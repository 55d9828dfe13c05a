//! Offline-first synchronization core for a fleet/equipment logistics
//! tracker: trucks, their attached tanks and dollies, availability pools and
//! maintenance pendencies, backed by a remote relational store with pushed
//! change notifications.
//!
//! Mutations apply optimistically to a local snapshot, queue durably when the
//! remote store is unreachable, and replay in order once connectivity
//! returns. A realtime relay merges pushed changes into the same snapshots
//! without duplicating our own optimistic writes.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod diagnostics;
pub mod model;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod storage;
pub mod sync;

pub use connectivity::{spawn_drain_on_reconnect, ConnectivityHandle, ConnectivityMonitor};
pub use controller::{
    CollectionController, DollyController, EquipamentoController, PendenciaController,
    TanqueController,
};
pub use diagnostics::{BoundedSink, DiagnosticEvent, DiagnosticSink, TracingSink};
pub use model::{
    ChangeEvent, ChangeNotification, Collection, Dolly, EquipStatus, Equipamento,
    OperationPayload, Pendencia, PendingOperation, Record, Tanque, ValidationError,
};
pub use realtime::{LastUpdate, PollingPushChannel, PushChannel, RealtimeRelay};
pub use remote::{RemoteStore, RestRemoteStore};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use sync::{SyncEngine, SyncReport};
