use super::Snapshot;
use crate::core::DocumentId;
use crate::runtime::RuntimeState;
use std::collections::HashSet;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayKind {
    /// Target was cold; snapshot content was adopted wholesale.
    Adopted,
    /// Target was hot; snapshot entries missing from live state were added.
    Merged,
    /// Snapshot was discarded; target left untouched.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Empty-documents snapshot against a hot runtime.
    EmptySnapshot,
    /// Snapshot belongs to another workspace.
    WorkspaceMismatch,
}

/// Result of replaying a snapshot into a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub kind: ReplayKind,
    pub revision: u64,
    /// Snapshot documents that were not live and got added.
    pub added_documents: Vec<DocumentId>,
    /// Live documents the snapshot did not know about; always kept.
    pub live_only_documents: Vec<DocumentId>,
    /// Open documents after replay, in layout order.
    pub documents: Vec<DocumentId>,
}

impl ReplayOutcome {
    /// The set any "close documents not in target" cleanup must use.
    ///
    /// Computed from the post-merge state, never from the raw snapshot, so a
    /// cleanup right after a hot merge cannot close the live-only documents
    /// the merge just kept.
    pub fn target_documents(&self) -> HashSet<DocumentId> {
        self.documents.iter().cloned().collect()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, ReplayKind::Rejected(_))
    }

    /// True when replay populated the runtime (capture should cool down).
    pub fn populated(&self) -> bool {
        matches!(self.kind, ReplayKind::Adopted | ReplayKind::Merged)
    }
}

/// Decides between cold adoption, hot merge and rejection.
pub struct ReplayReconciler;

impl ReplayReconciler {
    pub fn reconcile(snapshot: &Snapshot, target: &mut RuntimeState) -> ReplayOutcome {
        if snapshot.workspace_id != target.workspace_id {
            event!(
                Level::WARN,
                workspace_id = %target.workspace_id,
                snapshot_workspace_id = %snapshot.workspace_id,
                "snapshot replay rejected: workspace mismatch"
            );
            return Self::rejected(target, RejectReason::WorkspaceMismatch);
        }

        if !target.is_hot() {
            return Self::adopt(snapshot, target);
        }

        if snapshot.is_empty() {
            event!(
                Level::WARN,
                workspace_id = %target.workspace_id,
                live_documents = target.open_documents.len(),
                snapshot_revision = snapshot.revision,
                "empty snapshot rejected against live runtime"
            );
            return Self::rejected(target, RejectReason::EmptySnapshot);
        }

        Self::merge(snapshot, target)
    }

    fn rejected(target: &RuntimeState, reason: RejectReason) -> ReplayOutcome {
        ReplayOutcome {
            kind: ReplayKind::Rejected(reason),
            revision: target.revision,
            added_documents: Vec::new(),
            live_only_documents: Vec::new(),
            documents: target.document_ids(),
        }
    }

    fn adopt(snapshot: &Snapshot, target: &mut RuntimeState) -> ReplayOutcome {
        target.open_documents = snapshot.documents.clone();
        target.registered_components = snapshot.components.clone();
        target.mounted_components.clear();
        target.layout = snapshot.layout.clone();
        target.raise_revision_to(snapshot.revision);

        event!(
            Level::DEBUG,
            workspace_id = %target.workspace_id,
            documents = target.open_documents.len(),
            revision = target.revision,
            "snapshot adopted into cold runtime"
        );

        ReplayOutcome {
            kind: ReplayKind::Adopted,
            revision: target.revision,
            added_documents: snapshot.document_ids(),
            live_only_documents: Vec::new(),
            documents: target.document_ids(),
        }
    }

    fn merge(snapshot: &Snapshot, target: &mut RuntimeState) -> ReplayOutcome {
        let live_ids = target
            .open_documents
            .iter()
            .map(|doc| doc.document_id.clone())
            .collect::<HashSet<_>>();
        let snapshot_ids = snapshot
            .documents
            .iter()
            .map(|doc| doc.document_id.clone())
            .collect::<HashSet<_>>();

        let live_only_documents = target
            .open_documents
            .iter()
            .filter(|doc| !snapshot_ids.contains(&doc.document_id))
            .map(|doc| doc.document_id.clone())
            .collect::<Vec<_>>();

        let mut added_documents = Vec::new();
        for doc in &snapshot.documents {
            if !live_ids.contains(&doc.document_id) {
                added_documents.push(doc.document_id.clone());
                target.open_documents.push(doc.clone());
            }
        }

        let mut changed = !added_documents.is_empty();
        for (component_id, kind) in &snapshot.components {
            if !target.registered_components.contains_key(component_id) {
                target
                    .registered_components
                    .insert(component_id.clone(), kind.clone());
                changed = true;
            }
        }
        for (key, value) in &snapshot.layout {
            if !target.layout.contains_key(key) {
                target.layout.insert(key.clone(), value.clone());
                changed = true;
            }
        }

        target.raise_revision_to(snapshot.revision);
        if changed {
            target.dirty = true;
        }

        event!(
            Level::DEBUG,
            workspace_id = %target.workspace_id,
            added = added_documents.len(),
            live_only = live_only_documents.len(),
            revision = target.revision,
            "snapshot merged into hot runtime"
        );

        ReplayOutcome {
            kind: ReplayKind::Merged,
            revision: target.revision,
            added_documents,
            live_only_documents,
            documents: target.document_ids(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LayoutPosition, WorkspaceId};
    use crate::snapshot::SnapshotCodec;
    use serde_json::json;

    fn state_with(docs: &[&str]) -> RuntimeState {
        let mut state = RuntimeState::new(WorkspaceId::from("w"));
        for doc in docs {
            state.open_document((*doc).into(), LayoutPosition::default());
        }
        state
    }

    fn snapshot_with(docs: &[&str], revision: u64) -> Snapshot {
        let mut snapshot = SnapshotCodec::capture(&state_with(docs));
        snapshot.revision = revision;
        snapshot
    }

    fn ids(docs: &[&str]) -> Vec<DocumentId> {
        docs.iter().map(|doc| DocumentId::from(*doc)).collect()
    }

    #[test]
    fn cold_target_adopts_wholesale() {
        let mut target = RuntimeState::new(WorkspaceId::from("w"));
        let outcome = ReplayReconciler::reconcile(&snapshot_with(&["a", "b"], 7), &mut target);

        assert_eq!(outcome.kind, ReplayKind::Adopted);
        assert_eq!(target.document_ids(), ids(&["a", "b"]));
        assert_eq!(target.revision(), 7);
    }

    #[test]
    fn empty_snapshot_never_overwrites_hot_state() {
        let mut target = state_with(&["doc-A", "doc-B"]);
        let revision = target.revision();
        let outcome = ReplayReconciler::reconcile(&snapshot_with(&[], 50), &mut target);

        assert_eq!(outcome.kind, ReplayKind::Rejected(RejectReason::EmptySnapshot));
        assert_eq!(target.document_ids(), ids(&["doc-A", "doc-B"]));
        assert_eq!(target.revision(), revision);
    }

    #[test]
    fn hot_merge_adds_missing_and_keeps_revision_max() {
        let mut target = state_with(&["doc-A"]);
        target.raise_revision_to(5);
        let outcome = ReplayReconciler::reconcile(&snapshot_with(&["doc-A", "doc-B"], 4), &mut target);

        assert_eq!(outcome.kind, ReplayKind::Merged);
        assert_eq!(target.document_ids(), ids(&["doc-A", "doc-B"]));
        assert_eq!(outcome.added_documents, ids(&["doc-B"]));
        assert_eq!(target.revision(), 5);
    }

    #[test]
    fn hot_merge_keeps_live_only_documents() {
        let mut target = state_with(&["a", "b", "c"]);
        let outcome = ReplayReconciler::reconcile(&snapshot_with(&["a", "new"], 1), &mut target);

        assert_eq!(outcome.live_only_documents, ids(&["b", "c"]));
        assert_eq!(target.document_ids(), ids(&["a", "b", "c", "new"]));
    }

    #[test]
    fn cleanup_with_merged_target_set_keeps_everything() {
        let mut target = state_with(&["live-only", "shared"]);
        let snapshot = snapshot_with(&["shared", "stored-only"], 1);
        let outcome = ReplayReconciler::reconcile(&snapshot, &mut target);

        let closed = target.retain_documents(&outcome.target_documents());
        assert!(closed.is_empty());
        assert_eq!(target.document_ids(), ids(&["live-only", "shared", "stored-only"]));
    }

    #[test]
    fn hot_merge_prefers_live_positions_components_and_layout() {
        let mut target = state_with(&[]);
        target.open_document("a".into(), LayoutPosition::new(1.0, 1.0));
        target.register_component("panel".into(), "live-kind");
        target.set_layout_entry("viewport", json!("live"));

        let mut source = state_with(&[]);
        source.open_document("a".into(), LayoutPosition::new(9.0, 9.0));
        source.register_component("panel".into(), "stored-kind");
        source.register_component("chart".into(), "chart");
        source.set_layout_entry("viewport", json!("stored"));
        source.set_layout_entry("sidebar", json!(240));
        let snapshot = SnapshotCodec::capture(&source);

        ReplayReconciler::reconcile(&snapshot, &mut target);

        assert_eq!(target.open_documents()[0].position, LayoutPosition::new(1.0, 1.0));
        assert_eq!(target.registered_components().len(), 2);
        assert_eq!(
            target.registered_components().get(&crate::core::ComponentId::from("panel")).map(String::as_str),
            Some("live-kind")
        );
        assert_eq!(target.layout().get("viewport"), Some(&json!("live")));
        assert_eq!(target.layout().get("sidebar"), Some(&json!(240)));
    }

    #[test]
    fn merge_that_adds_content_marks_dirty() {
        let mut target = state_with(&["a"]);
        target.mark_submitted(1);
        ReplayReconciler::reconcile(&snapshot_with(&["a"], 1), &mut target);
        assert!(!target.is_dirty());

        ReplayReconciler::reconcile(&snapshot_with(&["a", "b"], 1), &mut target);
        assert!(target.is_dirty());
    }

    #[test]
    fn cold_round_trip_is_a_no_op() {
        let mut target = RuntimeState::new(WorkspaceId::from("w"));
        target.set_layout_entry("viewport", json!({"zoom": 1}));
        let before = target.clone();

        let snapshot = SnapshotCodec::capture(&target);
        SnapshotCodec::apply(&snapshot, &mut target);

        assert_eq!(target.open_documents(), before.open_documents());
        assert_eq!(target.registered_components(), before.registered_components());
        assert_eq!(target.layout(), before.layout());
        assert_eq!(target.revision(), before.revision());
        assert_eq!(target.is_dirty(), before.is_dirty());
    }

    #[test]
    fn foreign_snapshot_is_rejected() {
        let mut target = RuntimeState::new(WorkspaceId::from("other"));
        let outcome = ReplayReconciler::reconcile(&snapshot_with(&["a"], 3), &mut target);
        assert_eq!(outcome.kind, ReplayKind::Rejected(RejectReason::WorkspaceMismatch));
        assert_eq!(target.revision(), 0);
    }

    #[test]
    fn merged_result_is_superset_of_live_for_many_shapes() {
        let live_sets: [&[&str]; 4] = [&["a"], &["a", "b"], &["b", "c", "d"], &["x"]];
        let stored_sets: [&[&str]; 4] = [&["a"], &["b", "new"], &["new"], &["x", "a", "b"]];
        for live in live_sets {
            for stored in stored_sets {
                let mut target = state_with(live);
                ReplayReconciler::reconcile(&snapshot_with(stored, 1), &mut target);
                let merged = target.document_ids().into_iter().collect::<HashSet<_>>();
                for doc in live {
                    assert!(merged.contains(&DocumentId::from(*doc)), "{doc} lost");
                }
            }
        }
    }
}
