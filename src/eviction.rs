//! Capacity enforcement: capture, side-table, remove, then persist in the background.

use crate::core::WorkspaceId;
use crate::runtime::RuntimeRegistry;
use crate::snapshot::{Snapshot, SnapshotCodec};
use crate::store::SnapshotWriter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{Level, event, info_span};

/// What admission of a new workspace required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// There was room; nothing was evicted.
    Admitted,
    /// `victim` was evicted at `revision` to make room.
    Evicted { victim: WorkspaceId, revision: u64 },
    /// No evictable entry existed; capacity is exceeded by one.
    OverCapacity,
}

/// An evicted runtime parked for the grace window.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictedRuntime {
    pub snapshot: Arc<Snapshot>,
    /// Expected revision for the next write of this lineage.
    pub base_revision: Option<u64>,
    /// No queued write covers `snapshot`.
    pub unpersisted: bool,
    pub needs_hydration: bool,
}

impl EvictedRuntime {
    pub(crate) fn write_failed(&mut self, failed_revision: u64, fallback: Option<u64>) -> bool {
        if self.base_revision != Some(failed_revision) {
            return false;
        }
        self.base_revision = fallback;
        self.unpersisted = true;
        true
    }

    pub(crate) fn write_conflicted(&mut self) {
        self.unpersisted = true;
        self.needs_hydration = true;
    }
}

#[derive(Debug, Clone)]
struct CapturedEviction {
    runtime: EvictedRuntime,
    expires_at: Instant,
}

/// Lookup result against the eviction side table.
#[derive(Debug, Clone, PartialEq)]
pub enum EvictionLookup {
    Fresh(Arc<Snapshot>),
    /// The grace window elapsed; the entry was dropped.
    Expired,
    Missing,
}

/// Short-lived copies of evicted state, keyed by workspace.
///
/// Bridges the window between removal from the registry and the background
/// write becoming visible in durable storage.
#[derive(Debug)]
pub struct CapturedEvictionStates {
    entries: HashMap<WorkspaceId, CapturedEviction>,
    grace: Duration,
}

impl CapturedEvictionStates {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn insert(&mut self, runtime: EvictedRuntime) {
        let expires_at = Instant::now() + self.grace;
        self.entries.insert(
            runtime.snapshot.workspace_id.clone(),
            CapturedEviction {
                runtime,
                expires_at,
            },
        );
    }

    pub fn lookup(&mut self, workspace_id: &WorkspaceId) -> EvictionLookup {
        let expired = match self.entries.get(workspace_id) {
            None => return EvictionLookup::Missing,
            Some(entry) if Instant::now() < entry.expires_at => {
                return EvictionLookup::Fresh(entry.runtime.snapshot.clone());
            }
            Some(_) => true,
        };
        if expired {
            self.entries.remove(workspace_id);
        }
        EvictionLookup::Expired
    }

    /// Removes and returns a still-fresh entry.
    pub fn take_fresh(&mut self, workspace_id: &WorkspaceId) -> Option<EvictedRuntime> {
        let entry = self.entries.remove(workspace_id)?;
        (Instant::now() < entry.expires_at).then_some(entry.runtime)
    }

    pub(crate) fn get_mut(&mut self, workspace_id: &WorkspaceId) -> Option<&mut EvictedRuntime> {
        self.entries
            .get_mut(workspace_id)
            .map(|entry| &mut entry.runtime)
    }

    /// Drops expired entries and returns them.
    pub fn prune_expired(&mut self) -> Vec<EvictedRuntime> {
        let now = Instant::now();
        let expired = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(workspace_id, _)| workspace_id.clone())
            .collect::<Vec<_>>();
        expired
            .iter()
            .filter_map(|workspace_id| self.entries.remove(workspace_id))
            .map(|entry| entry.runtime)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionCounters {
    pub evictions: u64,
    pub soft_overflows: u64,
    pub skipped_clean_writes: u64,
    pub submit_failures: u64,
}

/// Keeps the registry within capacity.
pub struct EvictionCoordinator {
    side_table: CapturedEvictionStates,
    counters: EvictionCounters,
}

impl EvictionCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            side_table: CapturedEvictionStates::new(grace),
            counters: EvictionCounters::default(),
        }
    }

    pub fn side_table(&self) -> &CapturedEvictionStates {
        &self.side_table
    }

    pub fn side_table_mut(&mut self) -> &mut CapturedEvictionStates {
        &mut self.side_table
    }

    pub fn counters(&self) -> EvictionCounters {
        self.counters
    }

    /// Makes room for `candidate` if the registry is full.
    ///
    /// Runs to completion without suspending: the victim is captured while
    /// still resident, parked in the side table, removed, and only then handed
    /// to the writer with its lineage's expected revision. A failed hand-off
    /// is logged and never re-inserts the victim.
    pub fn ensure_capacity(
        &mut self,
        registry: &mut RuntimeRegistry,
        candidate: &WorkspaceId,
        writer: &SnapshotWriter,
    ) -> Admission {
        if registry.contains(candidate) || !registry.is_full() {
            return Admission::Admitted;
        }

        let Some(victim) = registry.select_victim(candidate) else {
            self.counters.soft_overflows = self.counters.soft_overflows.saturating_add(1);
            event!(
                Level::WARN,
                candidate = %candidate,
                resident = registry.len(),
                capacity = registry.capacity(),
                "no evictable runtime; admitting over capacity"
            );
            return Admission::OverCapacity;
        };

        let span = info_span!("runtime.evict", victim = %victim, candidate = %candidate);
        let _entered = span.enter();

        let parked = match registry.get(&victim) {
            Some(state) => EvictedRuntime {
                snapshot: Arc::new(SnapshotCodec::capture(state)),
                base_revision: state.base_revision(),
                unpersisted: state.is_dirty(),
                needs_hydration: state.needs_hydration(),
            },
            None => return Admission::Admitted,
        };
        let snapshot = parked.snapshot.clone();
        let expected_revision = parked.base_revision;
        let dirty = parked.unpersisted;
        let needs_hydration = parked.needs_hydration;
        self.side_table.insert(parked);
        registry.remove(&victim);
        self.counters.evictions = self.counters.evictions.saturating_add(1);

        if dirty && needs_hydration {
            event!(
                Level::WARN,
                revision = snapshot.revision,
                "evicted runtime awaits hydration; its changes stay parked"
            );
        } else if dirty {
            match writer.submit(snapshot.as_ref().clone(), expected_revision) {
                Ok(()) => {
                    if let Some(parked) = self.side_table.get_mut(&victim) {
                        parked.base_revision = Some(snapshot.revision);
                        parked.unpersisted = false;
                    }
                }
                Err(err) => {
                    self.counters.submit_failures =
                        self.counters.submit_failures.saturating_add(1);
                    event!(Level::ERROR, error = %err, "eviction snapshot hand-off failed");
                }
            }
        } else {
            self.counters.skipped_clean_writes =
                self.counters.skipped_clean_writes.saturating_add(1);
        }

        event!(
            Level::DEBUG,
            revision = snapshot.revision,
            documents = snapshot.documents.len(),
            persisted = dirty && !needs_hydration,
            "runtime evicted"
        );

        Admission::Evicted {
            victim,
            revision: snapshot.revision,
        }
    }
}
