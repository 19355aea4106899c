// ============================================================================
// Workspace Runtime Cache
// ============================================================================

pub mod core;
pub mod eviction;
pub mod gate;
pub mod manager;
pub mod notify;
pub mod policy;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod worker;

// Re-export main types for convenience
pub use core::{
    ComponentId, DocumentId, LayoutPosition, OpenDocument, Result, RuntimeError, WorkspaceId,
};
pub use eviction::{
    Admission, CapturedEvictionStates, EvictedRuntime, EvictionCoordinator, EvictionLookup,
};
pub use gate::CaptureGate;
pub use manager::{
    CapacityInfo, OpenDocumentsView, RuntimeDiagnostic, RuntimeStats, SaveDecision,
    WorkspaceRuntimeManager, hydrate_workspace, load_open_documents,
};
pub use notify::{ChangeCallback, NotificationBatch, Subscription, SubscriptionId};
pub use policy::{DeviceClass, RuntimeCachePolicy, normalize_policy};
pub use runtime::{ActiveToken, RuntimeRegistry, RuntimeState};
pub use snapshot::{RejectReason, ReplayKind, ReplayOutcome, Snapshot, SnapshotCodec};
pub use store::{
    FileSnapshotStore, InMemorySnapshotStore, PersistenceClient, SnapshotWriter, StoredRecordInfo,
    StoredSnapshot, WriteOutcome, WriteReport, WriteStatus,
};
pub use worker::{RuntimeMaintenanceWorker, spawn_runtime_maintenance_worker};
