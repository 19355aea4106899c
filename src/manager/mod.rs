//! The public façade over registry, eviction, replay and persistence.
//!
//! Every mutation is a synchronous `&mut self` call that runs to completion.
//! Only durable reads go through `async` helpers, and those re-resolve the
//! runtime under the lock after their I/O finishes.

mod access;
mod lifecycle;
mod persistence;
mod replay;
mod types;

pub use access::{hydrate_workspace, load_open_documents};
pub use types::{CapacityInfo, OpenDocumentsView, RuntimeDiagnostic, RuntimeStats, SaveDecision};

use crate::core::{Result, WorkspaceId};
use crate::eviction::{Admission, EvictionCoordinator};
use crate::gate::CaptureGate;
use crate::notify::{ChangeCallback, ChangeNotifier, NotificationBatch, Subscription, SubscriptionId};
use crate::policy::{RuntimeCachePolicy, normalize_policy};
use crate::runtime::{ActiveToken, RuntimeRegistry, RuntimeState};
use crate::snapshot::SnapshotCodec;
use crate::store::{PersistenceClient, SnapshotWriter, WriteStatus, WriterFlushHandle};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Level, event};
use types::DiagnosticCounters;

/// Bounded cache of workspace runtimes backed by a snapshot store.
pub struct WorkspaceRuntimeManager {
    policy: RuntimeCachePolicy,
    registry: RuntimeRegistry,
    eviction: EvictionCoordinator,
    gate: CaptureGate,
    notifier: ChangeNotifier,
    writer: SnapshotWriter,
    persistence: Arc<dyn PersistenceClient>,
    revision_history: LruCache<WorkspaceId, u64>,
    diagnostics: DiagnosticCounters,
    hydrations_adopted: u64,
    hydrations_merged: u64,
    replays_rejected: u64,
    last_autosave_at: Instant,
    pub(crate) maintenance_worker_running: bool,
}

impl WorkspaceRuntimeManager {
    /// Creates a manager and starts its snapshot writer on the current tokio runtime.
    pub fn new(policy: RuntimeCachePolicy, persistence: Arc<dyn PersistenceClient>) -> Result<Self> {
        let policy = normalize_policy(policy);
        let writer = SnapshotWriter::spawn(persistence.clone())?;
        let history_entries = NonZeroUsize::new(policy.revision_history).unwrap_or(NonZeroUsize::MIN);

        event!(
            Level::INFO,
            capacity = policy.capacity,
            eviction_grace_ms = policy.eviction_grace_ms,
            capture_cooldown_ms = policy.capture_cooldown_ms,
            "workspace runtime manager started"
        );

        Ok(Self {
            registry: RuntimeRegistry::new(policy.capacity),
            eviction: EvictionCoordinator::new(policy.eviction_grace()),
            gate: CaptureGate::new(),
            notifier: ChangeNotifier::new(),
            writer,
            persistence,
            revision_history: LruCache::new(history_entries),
            diagnostics: DiagnosticCounters::default(),
            hydrations_adopted: 0,
            hydrations_merged: 0,
            replays_rejected: 0,
            last_autosave_at: Instant::now(),
            maintenance_worker_running: false,
            policy,
        })
    }

    pub fn policy(&self) -> &RuntimeCachePolicy {
        &self.policy
    }

    pub fn persistence(&self) -> Arc<dyn PersistenceClient> {
        self.persistence.clone()
    }

    /// Returns the resident runtime, creating it if absent.
    ///
    /// Creation runs eviction first when the registry is full. A workspace
    /// re-entered within its grace window is restored from the side table.
    /// One recreated after that starts at its last known revision and waits
    /// for hydration before it is saved.
    /// Never fails; capacity is exceeded by one when nothing is evictable.
    pub fn get_or_create(&mut self, workspace_id: &WorkspaceId) -> &RuntimeState {
        self.ensure_resident(workspace_id);
        self.registry.get_or_create(workspace_id).0
    }

    /// The resident runtime, without creating one.
    pub fn runtime(&self, workspace_id: &WorkspaceId) -> Option<&RuntimeState> {
        self.registry.get(workspace_id)
    }

    pub fn is_resident(&self, workspace_id: &WorkspaceId) -> bool {
        self.registry.contains(workspace_id)
    }

    pub fn resident_ids(&self) -> Vec<WorkspaceId> {
        self.registry.resident_ids()
    }

    /// Marks the workspace as seen in the foreground. False if not resident.
    pub fn touch(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.registry.touch(workspace_id)
    }

    /// Makes `workspace_id` the active workspace, creating its runtime if needed.
    ///
    /// The returned token is the only way to clear it again.
    pub fn set_active(&mut self, workspace_id: &WorkspaceId) -> ActiveToken {
        self.ensure_resident(workspace_id);
        self.registry.set_active(workspace_id.clone())
    }

    /// Clears the active workspace only if `token` still owns it.
    pub fn clear_active_if_owner(&mut self, token: &ActiveToken) -> bool {
        self.registry.clear_active_if_owner(token)
    }

    pub fn active_workspace(&self) -> Option<&WorkspaceId> {
        self.registry.active_workspace()
    }

    pub fn pin(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.registry.pin(workspace_id.clone())
    }

    pub fn unpin(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.registry.unpin(workspace_id)
    }

    pub fn capacity_info(&self) -> CapacityInfo {
        CapacityInfo {
            resident: self.registry.len(),
            max: self.registry.capacity(),
        }
    }

    pub fn subscribe(&mut self, callback: ChangeCallback) -> Subscription {
        self.notifier.subscribe(callback)
    }

    pub fn subscribe_fn<F>(&mut self, callback: F) -> Subscription
    where
        F: Fn(&WorkspaceId) + Send + Sync + 'static,
    {
        self.notifier.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Takes queued change notifications. Deliver them after releasing any
    /// lock held around the manager.
    pub fn drain_notifications(&mut self) -> NotificationBatch {
        self.notifier.drain()
    }

    /// Handle for awaiting queued snapshot writes.
    pub fn flush_handle(&self) -> WriterFlushHandle {
        self.writer.flush_handle()
    }

    /// Waits for queued writes, then applies their outcomes.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        self.apply_write_reports();
        Ok(())
    }

    /// Resident runtimes whose next save waits on a durable read.
    pub fn workspaces_needing_hydration(&self) -> Vec<WorkspaceId> {
        self.registry
            .iter()
            .filter(|state| state.needs_hydration())
            .map(|state| state.workspace_id().clone())
            .collect()
    }

    /// Highest revision this manager has evicted, removed, read or written
    /// for `workspace_id`, if still remembered.
    pub fn last_known_revision(&self, workspace_id: &WorkspaceId) -> Option<u64> {
        self.revision_history.peek(workspace_id).copied()
    }

    /// Saves every dirty runtime, then waits for the writer to drain.
    ///
    /// Runtimes still waiting for hydration are not written.
    pub async fn shutdown(mut self) -> Result<()> {
        for (workspace_id, decision) in self.save_all()? {
            if decision == SaveDecision::NeedsHydration {
                event!(
                    Level::WARN,
                    workspace_id = %workspace_id,
                    "unsaved changes dropped at shutdown; runtime was never hydrated"
                );
            }
        }
        self.writer.shutdown().await
    }

    pub fn stats(&self) -> RuntimeStats {
        let writer = self.writer.stats();
        let eviction = self.eviction.counters();

        RuntimeStats {
            resident: self.registry.len(),
            capacity: self.registry.capacity(),
            side_table_entries: self.eviction.side_table().len(),
            active_workspace: self.registry.active_workspace().cloned(),
            pinned: self.registry.pinned_count(),
            pending_notifications: self.notifier.pending(),
            subscribers: self.notifier.subscriber_count(),
            notifications_delivered: self.notifier.delivered(),
            evictions: eviction.evictions,
            soft_overflows: self.diagnostics.capacity_exhausted,
            hydrations_adopted: self.hydrations_adopted,
            hydrations_merged: self.hydrations_merged,
            replays_rejected: self.replays_rejected,
            empty_snapshots_rejected: self.diagnostics.empty_snapshots_rejected,
            eviction_races_expired: self.diagnostics.eviction_races_expired,
            duplicate_residents: self.diagnostics.duplicate_residents,
            revision_conflicts: self.diagnostics.revision_conflicts,
            persist_failures: self
                .diagnostics
                .persist_failures
                .saturating_add(eviction.submit_failures),
            awaiting_hydration: self
                .registry
                .iter()
                .filter(|state| state.needs_hydration())
                .count(),
            writes_submitted: writer.submitted,
            writes_committed: writer.committed,
            suppressed_captures: self.gate.suppressed_captures(),
            maintenance_worker_running: self.maintenance_worker_running,
        }
    }

    pub(crate) fn record_diagnostic(&mut self, diagnostic: RuntimeDiagnostic, workspace_id: &WorkspaceId) {
        self.diagnostics.bump(diagnostic);
        match diagnostic {
            RuntimeDiagnostic::DuplicateResident | RuntimeDiagnostic::PersistFailed => event!(
                Level::ERROR,
                workspace_id = %workspace_id,
                diagnostic = %diagnostic,
                "runtime diagnostic"
            ),
            RuntimeDiagnostic::EmptySnapshotRejected | RuntimeDiagnostic::CapacityExhausted => {
                event!(
                    Level::WARN,
                    workspace_id = %workspace_id,
                    diagnostic = %diagnostic,
                    "runtime diagnostic"
                )
            }
            RuntimeDiagnostic::RevisionConflict | RuntimeDiagnostic::EvictionRaceExpired => event!(
                Level::DEBUG,
                workspace_id = %workspace_id,
                diagnostic = %diagnostic,
                "runtime diagnostic"
            ),
        }
    }

    /// Keeps the highest revision seen for `workspace_id`.
    pub(crate) fn remember_revision(&mut self, workspace_id: &WorkspaceId, revision: u64) {
        if revision == 0 {
            return;
        }
        let known = self.revision_history.get(workspace_id).copied().unwrap_or(0);
        self.revision_history
            .put(workspace_id.clone(), known.max(revision));
    }

    /// Applies finished write outcomes to the runtime or parked entry they
    /// came from.
    ///
    /// A failed write puts its lineage back on the expectation it carried and
    /// marks the changes unsaved. A conflict means storage holds changes this
    /// lineage never saw, so the runtime waits for hydration.
    pub(crate) fn apply_write_reports(&mut self) {
        for report in self.writer.drain_reports() {
            let workspace_id = &report.workspace_id;
            match report.status {
                WriteStatus::Committed => self.remember_revision(workspace_id, report.revision),
                WriteStatus::Failed => {
                    self.record_diagnostic(RuntimeDiagnostic::PersistFailed, workspace_id);
                    let restored = if let Some(state) = self.registry.get_mut(workspace_id) {
                        state.write_failed(report.revision, report.expected_revision)
                    } else if let Some(parked) = self.eviction.side_table_mut().get_mut(workspace_id) {
                        parked.write_failed(report.revision, report.expected_revision)
                    } else {
                        event!(
                            Level::ERROR,
                            workspace_id = %workspace_id,
                            revision = report.revision,
                            "failed write outlived its runtime; changes were not persisted"
                        );
                        false
                    };
                    if restored {
                        event!(
                            Level::WARN,
                            workspace_id = %workspace_id,
                            revision = report.revision,
                            "write failed; changes marked unsaved"
                        );
                    }
                }
                WriteStatus::Conflict { current } => {
                    self.record_diagnostic(RuntimeDiagnostic::RevisionConflict, workspace_id);
                    if let Some(current) = current {
                        self.remember_revision(workspace_id, current);
                    }
                    let lineage = Some(report.revision);
                    if let Some(state) = self.registry.get_mut(workspace_id) {
                        if state.base_revision() == lineage {
                            state.write_conflicted();
                        }
                    } else if let Some(parked) = self.eviction.side_table_mut().get_mut(workspace_id) {
                        if parked.base_revision == lineage {
                            parked.write_conflicted();
                        }
                    }
                }
            }
        }
    }

    /// Admits `workspace_id` into the registry if it is not resident.
    fn ensure_resident(&mut self, workspace_id: &WorkspaceId) {
        if self.registry.contains(workspace_id) {
            return;
        }
        self.apply_write_reports();

        match self
            .eviction
            .ensure_capacity(&mut self.registry, workspace_id, &self.writer)
        {
            Admission::Admitted => {}
            Admission::Evicted { victim, revision } => {
                self.remember_revision(&victim, revision);
                self.notifier.enqueue(&victim);
            }
            Admission::OverCapacity => {
                self.record_diagnostic(RuntimeDiagnostic::CapacityExhausted, workspace_id)
            }
        }

        let mut state = RuntimeState::new(workspace_id.clone());
        if let Some(parked) = self.eviction.side_table_mut().take_fresh(workspace_id) {
            SnapshotCodec::apply(&parked.snapshot, &mut state);
            state.restore_lineage(parked.base_revision, parked.unpersisted, parked.needs_hydration);
            self.gate
                .suppress_for(workspace_id, self.policy.capture_cooldown());
            event!(
                Level::DEBUG,
                workspace_id = %workspace_id,
                revision = state.revision(),
                "runtime restored from eviction side table"
            );
        } else if let Some(last_known) = self.last_known_revision(workspace_id) {
            state.seed_from_history(last_known);
            event!(
                Level::DEBUG,
                workspace_id = %workspace_id,
                revision = last_known,
                "runtime recreated; awaiting hydration"
            );
        }

        if self.registry.insert(state).is_some() {
            self.record_diagnostic(RuntimeDiagnostic::DuplicateResident, workspace_id);
        }
        self.notifier.enqueue(workspace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentId, LayoutPosition};
    use crate::store::InMemorySnapshotStore;
    use tokio::time::Duration;

    fn manager(capacity: usize) -> (WorkspaceRuntimeManager, Arc<InMemorySnapshotStore>) {
        let store = Arc::new(InMemorySnapshotStore::new());
        let policy = RuntimeCachePolicy::default().with_capacity(capacity);
        let manager = WorkspaceRuntimeManager::new(policy, store.clone()).unwrap();
        (manager, store)
    }

    fn id(raw: &str) -> WorkspaceId {
        WorkspaceId::from(raw)
    }

    #[tokio::test]
    async fn get_or_create_stays_within_capacity() {
        let (mut manager, _store) = manager(2);
        for raw in ["w1", "w2", "w3", "w4"] {
            manager.get_or_create(&id(raw));
            assert!(manager.capacity_info().resident <= 2);
        }
        assert_eq!(manager.resident_ids().len(), 2);
        assert!(manager.is_resident(&id("w4")));
        assert_eq!(manager.stats().evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn revision_history_keeps_only_recent_workspaces() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let policy = RuntimeCachePolicy::default()
            .with_capacity(1)
            .with_revision_history(2);
        let mut manager = WorkspaceRuntimeManager::new(policy, store).unwrap();
        for raw in ["w1", "w2", "w3"] {
            manager.document_opened(&id(raw), "doc".into(), LayoutPosition::default());
        }
        manager.get_or_create(&id("w4"));
        manager.flush().await.unwrap();

        assert_eq!(manager.last_known_revision(&id("w1")), None);
        assert_eq!(manager.last_known_revision(&id("w2")), Some(1));
        assert_eq!(manager.last_known_revision(&id("w3")), Some(1));

        tokio::time::advance(Duration::from_secs(31)).await;
        manager.run_maintenance().unwrap();
        assert!(manager.eviction.side_table().is_empty());
        assert!(!manager.get_or_create(&id("w1")).needs_hydration());
        assert!(manager.get_or_create(&id("w3")).needs_hydration());
    }

    #[tokio::test]
    async fn all_pinned_admits_over_capacity() {
        let (mut manager, _store) = manager(1);
        manager.set_active(&id("w1"));
        manager.get_or_create(&id("w2"));

        let info = manager.capacity_info();
        assert_eq!(info, CapacityInfo { resident: 2, max: 1 });
        assert_eq!(manager.stats().soft_overflows, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reentry_within_grace_restores_side_table_state() {
        let (mut manager, _store) = manager(1);
        manager.document_opened(&id("w1"), "doc-A".into(), LayoutPosition::default());
        manager.get_or_create(&id("w2"));
        assert!(!manager.is_resident(&id("w1")));

        tokio::time::advance(Duration::from_secs(5)).await;
        let restored = manager.get_or_create(&id("w1"));
        assert_eq!(restored.document_ids(), vec![DocumentId::from("doc-A")]);
        assert_eq!(restored.revision(), 1);
        assert_eq!(manager.stats().side_table_entries, 0);
    }

    #[tokio::test]
    async fn creation_and_eviction_are_notified_after_drain() {
        let (mut manager, _store) = manager(1);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = manager.subscribe_fn(move |workspace_id| {
            sink.lock().unwrap().push(workspace_id.to_string());
        });

        manager.get_or_create(&id("w1"));
        manager.get_or_create(&id("w2"));
        assert!(seen.lock().unwrap().is_empty());

        manager.drain_notifications().deliver();
        assert_eq!(*seen.lock().unwrap(), vec!["w1", "w2"]);
    }

    #[tokio::test]
    async fn stale_active_token_cannot_clear_new_owner() {
        let (mut manager, _store) = manager(4);
        let first = manager.set_active(&id("w1"));
        let _second = manager.set_active(&id("w2"));

        assert!(!manager.clear_active_if_owner(&first));
        assert_eq!(manager.active_workspace(), Some(&id("w2")));
    }
}
