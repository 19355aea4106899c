//! Durable snapshot storage behind a revision-guarded client interface.

pub mod file;
pub mod memory;
pub mod writer;

use crate::core::{Result, WorkspaceId};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use writer::{SnapshotWriter, WriteReport, WriteStatus, WriterFlushHandle, WriterStats};

/// A snapshot as held by durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub snapshot: Snapshot,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

/// Summary of one stored record, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecordInfo {
    pub workspace_id: WorkspaceId,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed {
        revision: u64,
    },
    /// The stored revision did not match `expected`; nothing was written.
    RevisionConflict {
        expected: Option<u64>,
        current: Option<u64>,
    },
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Conditional read/write of snapshots keyed by workspace.
///
/// `write` succeeds only when the stored revision equals `expected_revision`
/// (`None` meaning "no record yet"). A conflict is a normal outcome: it means a
/// newer write already landed, and callers drop the losing write.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn write(
        &self,
        workspace_id: &WorkspaceId,
        snapshot: &Snapshot,
        expected_revision: Option<u64>,
    ) -> Result<WriteOutcome>;

    async fn read(&self, workspace_id: &WorkspaceId) -> Result<Option<StoredSnapshot>>;

    async fn list(&self) -> Result<Vec<StoredRecordInfo>>;
}

pub(crate) fn check_snapshot_key(workspace_id: &WorkspaceId, snapshot: &Snapshot) -> Result<()> {
    if &snapshot.workspace_id != workspace_id {
        return Err(crate::core::RuntimeError::persistence(
            workspace_id,
            format!(
                "snapshot belongs to workspace '{}'",
                snapshot.workspace_id
            ),
        ));
    }
    Ok(())
}
