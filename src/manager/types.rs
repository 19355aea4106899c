use crate::core::{OpenDocument, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resident count against the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityInfo {
    pub resident: usize,
    pub max: usize,
}

/// Answer to "which documents are open in this workspace".
#[derive(Debug, Clone, PartialEq)]
pub enum OpenDocumentsView {
    /// Read from the resident runtime.
    Resident(Vec<OpenDocument>),
    /// Read from the eviction side table during the grace window.
    Evicted(Vec<OpenDocument>),
    /// Not resident and no fresh side-table entry; consult durable storage.
    NotFound,
}

impl OpenDocumentsView {
    pub fn documents(&self) -> &[OpenDocument] {
        match self {
            Self::Resident(documents) | Self::Evicted(documents) => documents,
            Self::NotFound => &[],
        }
    }

    pub fn into_documents(self) -> Vec<OpenDocument> {
        match self {
            Self::Resident(documents) | Self::Evicted(documents) => documents,
            Self::NotFound => Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// What an explicit or periodic save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDecision {
    /// A snapshot at `revision` was queued for writing.
    Submitted { revision: u64 },
    /// The capture cooldown is active for this workspace.
    Suppressed,
    /// Nothing changed since the last submitted snapshot.
    Clean,
    /// Storage may hold changes this runtime has not seen; hydrate it first.
    NeedsHydration,
    NotResident,
}

/// Recoverable conditions worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeDiagnostic {
    RevisionConflict,
    EmptySnapshotRejected,
    EvictionRaceExpired,
    CapacityExhausted,
    DuplicateResident,
    PersistFailed,
}

impl RuntimeDiagnostic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RevisionConflict => "revision_conflict",
            Self::EmptySnapshotRejected => "empty_snapshot_rejected",
            Self::EvictionRaceExpired => "eviction_race_expired",
            Self::CapacityExhausted => "capacity_exhausted",
            Self::DuplicateResident => "duplicate_resident",
            Self::PersistFailed => "persist_failed",
        }
    }
}

impl fmt::Display for RuntimeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DiagnosticCounters {
    pub(crate) revision_conflicts: u64,
    pub(crate) empty_snapshots_rejected: u64,
    pub(crate) eviction_races_expired: u64,
    pub(crate) capacity_exhausted: u64,
    pub(crate) duplicate_residents: u64,
    pub(crate) persist_failures: u64,
}

impl DiagnosticCounters {
    pub(crate) fn bump(&mut self, diagnostic: RuntimeDiagnostic) {
        let slot = match diagnostic {
            RuntimeDiagnostic::RevisionConflict => &mut self.revision_conflicts,
            RuntimeDiagnostic::EmptySnapshotRejected => &mut self.empty_snapshots_rejected,
            RuntimeDiagnostic::EvictionRaceExpired => &mut self.eviction_races_expired,
            RuntimeDiagnostic::CapacityExhausted => &mut self.capacity_exhausted,
            RuntimeDiagnostic::DuplicateResident => &mut self.duplicate_residents,
            RuntimeDiagnostic::PersistFailed => &mut self.persist_failures,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Number of resident runtimes.
    pub resident: usize,
    pub capacity: usize,
    /// Evicted snapshots still inside their grace window.
    pub side_table_entries: usize,
    pub active_workspace: Option<WorkspaceId>,
    pub pinned: usize,
    pub pending_notifications: usize,
    pub subscribers: usize,
    pub notifications_delivered: u64,
    pub evictions: u64,
    /// Admissions that had to exceed capacity.
    pub soft_overflows: u64,
    pub hydrations_adopted: u64,
    pub hydrations_merged: u64,
    pub replays_rejected: u64,
    pub empty_snapshots_rejected: u64,
    pub eviction_races_expired: u64,
    pub duplicate_residents: u64,
    /// Writes rejected by storage's revision check. Like `persist_failures`,
    /// counted once the writer's reports have been applied.
    pub revision_conflicts: u64,
    pub persist_failures: u64,
    /// Resident runtimes that must be hydrated before they are saved again.
    pub awaiting_hydration: usize,
    pub writes_submitted: u64,
    pub writes_committed: u64,
    pub suppressed_captures: u64,
    pub maintenance_worker_running: bool,
}
