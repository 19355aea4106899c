use super::{RuntimeDiagnostic, SaveDecision, WorkspaceRuntimeManager};
use crate::core::{Result, RuntimeError, WorkspaceId};
use crate::notify::NotificationBatch;
use crate::snapshot::{Snapshot, SnapshotCodec};
use tokio::time::{Duration, Instant};
use tracing::{Level, event};

impl WorkspaceRuntimeManager {
    /// Hands a capture to the writer, expecting the runtime's base revision,
    /// and marks the runtime as submitted.
    pub(super) fn submit_snapshot(
        &mut self,
        workspace_id: &WorkspaceId,
        snapshot: Snapshot,
        expected_revision: Option<u64>,
    ) -> Result<SaveDecision> {
        let revision = snapshot.revision;
        match self.writer.submit(snapshot, expected_revision) {
            Ok(()) => {
                if let Some(state) = self.registry.get_mut(workspace_id) {
                    state.mark_submitted(revision);
                }
                Ok(SaveDecision::Submitted { revision })
            }
            Err(err) => {
                self.record_diagnostic(RuntimeDiagnostic::PersistFailed, workspace_id);
                Err(err)
            }
        }
    }

    /// Captures and queues a snapshot of a resident runtime.
    ///
    /// Skipped while the capture cooldown is active, when nothing changed, and
    /// while the runtime waits for hydration.
    pub fn save_workspace(&mut self, workspace_id: &WorkspaceId) -> Result<SaveDecision> {
        self.apply_write_reports();
        let Some(state) = self.registry.get(workspace_id) else {
            return Ok(SaveDecision::NotResident);
        };
        if !state.is_dirty() {
            return Ok(SaveDecision::Clean);
        }
        if state.needs_hydration() {
            event!(
                Level::DEBUG,
                workspace_id = %workspace_id,
                "save deferred until the runtime is hydrated"
            );
            return Ok(SaveDecision::NeedsHydration);
        }
        if !self.gate.admit_capture(workspace_id) {
            event!(
                Level::DEBUG,
                workspace_id = %workspace_id,
                "capture suppressed during cooldown"
            );
            return Ok(SaveDecision::Suppressed);
        }

        let snapshot = SnapshotCodec::capture(state);
        let expected_revision = state.base_revision();
        self.submit_snapshot(workspace_id, snapshot, expected_revision)
    }

    /// Saves every resident runtime; returns the non-trivial decisions.
    pub fn save_all(&mut self) -> Result<Vec<(WorkspaceId, SaveDecision)>> {
        let mut decisions = Vec::new();
        for workspace_id in self.registry.resident_ids() {
            match self.save_workspace(&workspace_id)? {
                SaveDecision::Clean | SaveDecision::NotResident => {}
                decision => decisions.push((workspace_id, decision)),
            }
        }
        Ok(decisions)
    }

    /// One maintenance tick.
    ///
    /// Applies finished write outcomes, prunes the eviction side table and
    /// elapsed cooldowns, autosaves when the autosave interval has passed, and
    /// returns the queued notifications.
    pub fn run_maintenance(&mut self) -> Result<NotificationBatch> {
        self.apply_write_reports();
        let expired = self.eviction.side_table_mut().prune_expired();
        for parked in expired.iter().filter(|parked| parked.unpersisted) {
            event!(
                Level::WARN,
                workspace_id = %parked.snapshot.workspace_id,
                revision = parked.snapshot.revision,
                "evicted changes expired before reaching storage"
            );
        }
        let pruned_evictions = expired.len();
        let pruned_windows = self.gate.prune();

        let mut saved = 0usize;
        if let Some(interval_ms) = self.policy.autosave_interval_ms {
            let now = Instant::now();
            if now.duration_since(self.last_autosave_at) >= Duration::from_millis(interval_ms) {
                self.last_autosave_at = now;
                saved = match self.save_all() {
                    Ok(decisions) => decisions
                        .iter()
                        .filter(|(_, decision)| matches!(decision, SaveDecision::Submitted { .. }))
                        .count(),
                    Err(RuntimeError::WriterClosed) => return Err(RuntimeError::WriterClosed),
                    Err(err) => {
                        event!(Level::ERROR, error = %err, "autosave failed");
                        0
                    }
                };
            }
        }

        if pruned_evictions > 0 || pruned_windows > 0 || saved > 0 {
            event!(
                Level::DEBUG,
                pruned_evictions,
                pruned_windows,
                saved,
                "runtime maintenance tick"
            );
        }

        Ok(self.notifier.drain())
    }
}
