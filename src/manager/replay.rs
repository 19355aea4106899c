use super::{OpenDocumentsView, RuntimeDiagnostic, WorkspaceRuntimeManager};
use crate::core::WorkspaceId;
use crate::eviction::EvictionLookup;
use crate::snapshot::{RejectReason, ReplayKind, ReplayOutcome, Snapshot, SnapshotCodec};
use crate::store::StoredSnapshot;
use tracing::{Level, event, info_span};

impl WorkspaceRuntimeManager {
    /// Replays a snapshot into its workspace's runtime.
    ///
    /// A cold runtime adopts the snapshot, a hot one merges it, and an empty
    /// snapshot against a hot runtime is rejected. Populating starts the capture
    /// cooldown for the workspace.
    pub fn replay_snapshot(&mut self, snapshot: &Snapshot) -> ReplayOutcome {
        let workspace_id = snapshot.workspace_id.clone();
        let span = info_span!(
            "runtime.replay",
            workspace_id = %workspace_id,
            snapshot_revision = snapshot.revision
        );
        let _entered = span.enter();

        self.ensure_resident(&workspace_id);
        let (state, _) = self.registry.get_or_create(&workspace_id);
        let outcome = SnapshotCodec::apply(snapshot, state);

        match outcome.kind {
            ReplayKind::Adopted => {
                self.hydrations_adopted = self.hydrations_adopted.saturating_add(1);
            }
            ReplayKind::Merged => {
                self.hydrations_merged = self.hydrations_merged.saturating_add(1);
            }
            ReplayKind::Rejected(reason) => {
                self.replays_rejected = self.replays_rejected.saturating_add(1);
                if reason == RejectReason::EmptySnapshot {
                    self.record_diagnostic(RuntimeDiagnostic::EmptySnapshotRejected, &workspace_id);
                }
            }
        }

        if outcome.populated() {
            self.gate
                .suppress_for(&workspace_id, self.policy.capture_cooldown());
            self.notifier.enqueue(&workspace_id);
        }

        event!(
            Level::DEBUG,
            kind = ?outcome.kind,
            revision = outcome.revision,
            added = outcome.added_documents.len(),
            live_only = outcome.live_only_documents.len(),
            "snapshot replayed"
        );
        outcome
    }

    /// Replays a record read from durable storage and rebases the runtime on
    /// its revision, so the next write expects it.
    pub fn replay_stored(&mut self, stored: &StoredSnapshot) -> ReplayOutcome {
        let workspace_id = stored.snapshot.workspace_id.clone();
        self.apply_write_reports();
        let outcome = self.replay_snapshot(&stored.snapshot);
        if let Some(state) = self.registry.get_mut(&workspace_id) {
            state.rebase_on_durable(Some(stored.revision));
        }
        self.remember_revision(&workspace_id, stored.revision);
        outcome
    }

    /// Records that storage holds nothing for `workspace_id`, which clears a
    /// pending hydration.
    pub(crate) fn observe_missing_record(&mut self, workspace_id: &WorkspaceId) {
        self.apply_write_reports();
        if let Some(state) = self.registry.get_mut(workspace_id) {
            state.rebase_on_durable(None);
        }
    }

    /// Open documents of a workspace, in layout order.
    ///
    /// Falls back to the eviction side table while its grace window lasts;
    /// after that the answer is [`OpenDocumentsView::NotFound`].
    pub fn query_open_documents(&mut self, workspace_id: &WorkspaceId) -> OpenDocumentsView {
        if let Some(state) = self.registry.get(workspace_id) {
            return OpenDocumentsView::Resident(state.open_documents().to_vec());
        }

        match self.eviction.side_table_mut().lookup(workspace_id) {
            EvictionLookup::Fresh(snapshot) => OpenDocumentsView::Evicted(snapshot.documents.clone()),
            EvictionLookup::Expired => {
                self.record_diagnostic(RuntimeDiagnostic::EvictionRaceExpired, workspace_id);
                OpenDocumentsView::NotFound
            }
            EvictionLookup::Missing => OpenDocumentsView::NotFound,
        }
    }
}
