//! Durable snapshot representation of a workspace runtime.
//!
//! [`SnapshotCodec::capture`] reads the live values synchronously, so a capture
//! taken right before removal reflects exactly what was resident. The byte
//! encoding is an internal contract with the stores in [`crate::store`].

pub mod reconcile;

use crate::core::{ComponentId, OpenDocument, Result, RuntimeError, WorkspaceId};
use crate::runtime::{LayoutCache, RuntimeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use reconcile::{RejectReason, ReplayKind, ReplayOutcome, ReplayReconciler};

pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Immutable point-in-time copy of a workspace's documents, components and layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub workspace_id: WorkspaceId,
    pub documents: Vec<OpenDocument>,
    pub components: BTreeMap<ComponentId, String>,
    #[serde(default)]
    pub layout: LayoutCache,
    pub revision: u64,
    pub captured_at: DateTime<Utc>,
    /// Correlates a capture with the write and log lines it produces.
    pub capture_id: Uuid,
}

impl Snapshot {
    /// An empty-documents snapshot is suspicious: it is what a capture taken
    /// mid-transition looks like. Replay refuses to let one overwrite live state.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document_ids(&self) -> Vec<crate::core::DocumentId> {
        self.documents
            .iter()
            .map(|doc| doc.document_id.clone())
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: Snapshot,
}

/// Converts runtime state to and from [`Snapshot`]s.
pub struct SnapshotCodec;

impl SnapshotCodec {
    pub fn capture(state: &RuntimeState) -> Snapshot {
        Snapshot {
            workspace_id: state.workspace_id.clone(),
            documents: state.open_documents.clone(),
            components: state.registered_components.clone(),
            layout: state.layout.clone(),
            revision: state.revision,
            captured_at: Utc::now(),
            capture_id: Uuid::new_v4(),
        }
    }

    /// Replays `snapshot` into `target` under the hot/cold policy of
    /// [`ReplayReconciler`].
    pub fn apply(snapshot: &Snapshot, target: &mut RuntimeState) -> ReplayOutcome {
        ReplayReconciler::reconcile(snapshot, target)
    }

    pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
        let envelope = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        rmp_serde::to_vec_named(&envelope).map_err(|err| RuntimeError::Codec(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
        let envelope = rmp_serde::from_slice::<SnapshotEnvelope>(bytes)
            .map_err(|err| RuntimeError::Codec(err.to_string()))?;
        if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(RuntimeError::Codec(format!(
                "Unsupported snapshot format version {}",
                envelope.format_version
            )));
        }
        Ok(envelope.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentId, LayoutPosition};
    use serde_json::json;

    fn populated_state() -> RuntimeState {
        let mut state = RuntimeState::new(WorkspaceId::from("w1"));
        state.open_document("doc-a".into(), LayoutPosition::new(10.0, 20.0));
        state.open_document("doc-b".into(), LayoutPosition::default());
        state.register_component("calc".into(), "calculator");
        state.set_layout_entry("viewport", json!({"zoom": 2}));
        state
    }

    #[test]
    fn capture_reads_current_values() {
        let mut state = populated_state();
        let snapshot = SnapshotCodec::capture(&state);
        state.close_document(&DocumentId::from("doc-a"));

        assert_eq!(snapshot.revision, 3);
        assert_eq!(
            snapshot.document_ids(),
            vec![DocumentId::from("doc-a"), DocumentId::from("doc-b")]
        );
        assert_eq!(snapshot.layout.get("viewport"), Some(&json!({"zoom": 2})));
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn capture_skips_mount_state() {
        let mut state = populated_state();
        state.set_component_mounted(&"calc".into(), true);
        let snapshot = SnapshotCodec::capture(&state);
        assert_eq!(snapshot.components.len(), 1);

        let mut restored = RuntimeState::new(WorkspaceId::from("w1"));
        SnapshotCodec::apply(&snapshot, &mut restored);
        assert!(!restored.is_component_mounted(&"calc".into()));
        assert!(restored.registered_components().contains_key(&ComponentId::from("calc")));
    }

    #[test]
    fn empty_capture_is_flagged() {
        let state = RuntimeState::new(WorkspaceId::from("w1"));
        assert!(SnapshotCodec::capture(&state).is_empty());
    }

    #[test]
    fn encoded_snapshot_decodes_to_same_value() {
        let snapshot = SnapshotCodec::capture(&populated_state());
        let bytes = SnapshotCodec::encode(&snapshot).unwrap();
        assert_eq!(SnapshotCodec::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = SnapshotCodec::decode(b"not a snapshot").unwrap_err();
        assert!(matches!(err, RuntimeError::Codec(_)));
    }
}
