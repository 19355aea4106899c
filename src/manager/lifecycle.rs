use super::{SaveDecision, WorkspaceRuntimeManager};
use crate::core::{ComponentId, DocumentId, LayoutPosition, WorkspaceId};
use crate::runtime::RuntimeState;
use crate::snapshot::Snapshot;
use crate::snapshot::SnapshotCodec;
use std::collections::HashSet;
use tracing::{Level, event};

impl WorkspaceRuntimeManager {
    /// Runs `mutate` against the resident runtime, creating it if needed, and
    /// queues a change notification when it reports a change.
    fn mutate_runtime<T>(
        &mut self,
        workspace_id: &WorkspaceId,
        mutate: impl FnOnce(&mut RuntimeState) -> T,
        changed: impl FnOnce(&T) -> bool,
    ) -> T {
        self.ensure_resident(workspace_id);
        let (state, _) = self.registry.get_or_create(workspace_id);
        let result = mutate(state);
        if changed(&result) {
            self.notifier.enqueue(workspace_id);
        }
        result
    }

    pub fn document_opened(
        &mut self,
        workspace_id: &WorkspaceId,
        document_id: DocumentId,
        position: LayoutPosition,
    ) -> bool {
        self.mutate_runtime(
            workspace_id,
            |state| state.open_document(document_id, position),
            |changed| *changed,
        )
    }

    pub fn document_closed(&mut self, workspace_id: &WorkspaceId, document_id: &DocumentId) -> bool {
        self.mutate_runtime(
            workspace_id,
            |state| state.close_document(document_id),
            |changed| *changed,
        )
    }

    pub fn component_registered(
        &mut self,
        workspace_id: &WorkspaceId,
        component_id: ComponentId,
        kind: impl Into<String>,
    ) -> bool {
        self.mutate_runtime(
            workspace_id,
            |state| state.register_component(component_id, kind),
            |changed| *changed,
        )
    }

    pub fn component_deregistered(
        &mut self,
        workspace_id: &WorkspaceId,
        component_id: &ComponentId,
    ) -> bool {
        self.mutate_runtime(
            workspace_id,
            |state| state.deregister_component(component_id),
            |changed| *changed,
        )
    }

    /// Render presence only; never touches component data or the revision.
    pub fn component_mounted(
        &mut self,
        workspace_id: &WorkspaceId,
        component_id: &ComponentId,
        mounted: bool,
    ) -> bool {
        self.mutate_runtime(
            workspace_id,
            |state| state.set_component_mounted(component_id, mounted),
            |_| false,
        )
    }

    pub fn set_layout_entry(
        &mut self,
        workspace_id: &WorkspaceId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.mutate_runtime(
            workspace_id,
            |state| state.set_layout_entry(key, value),
            |_| false,
        );
    }

    /// Closes open documents that are not in `keep`.
    ///
    /// After a replay, pass [`crate::snapshot::ReplayOutcome::target_documents`]
    /// rather than the raw snapshot's ids.
    pub fn retain_documents(
        &mut self,
        workspace_id: &WorkspaceId,
        keep: &HashSet<DocumentId>,
    ) -> Vec<DocumentId> {
        self.mutate_runtime(
            workspace_id,
            |state| state.retain_documents(keep),
            |closed| !closed.is_empty(),
        )
    }

    /// Drops a resident runtime without persisting it.
    ///
    /// Also unpins it and empties the active slot if it names this workspace,
    /// so neither refers to a runtime that is no longer resident.
    pub fn remove_workspace(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.registry.unpin(workspace_id);
        self.registry.release_active(workspace_id);
        let Some(state) = self.registry.remove(workspace_id) else {
            return false;
        };
        self.remember_revision(workspace_id, state.revision());
        self.gate.release(workspace_id);
        self.notifier.enqueue(workspace_id);
        true
    }

    /// Persists a dirty runtime and removes it from the registry.
    ///
    /// A runtime still waiting for hydration is not written. Returns the final
    /// capture, or `None` if the workspace was not resident.
    pub fn close_workspace(&mut self, workspace_id: &WorkspaceId) -> Option<Snapshot> {
        self.apply_write_reports();
        let state = self.registry.get(workspace_id)?;
        let snapshot = SnapshotCodec::capture(state);
        let expected_revision = state.base_revision();
        let needs_hydration = state.needs_hydration();
        let persisted = state.is_dirty()
            && !needs_hydration
            && matches!(
                self.submit_snapshot(workspace_id, snapshot.clone(), expected_revision),
                Ok(SaveDecision::Submitted { .. })
            );
        self.remove_workspace(workspace_id);

        if needs_hydration {
            event!(
                Level::WARN,
                workspace_id = %workspace_id,
                revision = snapshot.revision,
                "runtime closed before hydration; its changes were not written"
            );
        }
        event!(
            Level::DEBUG,
            workspace_id = %workspace_id,
            revision = snapshot.revision,
            persisted,
            "runtime closed"
        );
        Some(snapshot)
    }
}
