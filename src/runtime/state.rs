use crate::core::{ComponentId, DocumentId, LayoutPosition, OpenDocument, WorkspaceId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Opaque layout entries (viewport, panel sizes, ...) keyed by name.
pub type LayoutCache = BTreeMap<String, serde_json::Value>;

/// Live, editable state of one workspace.
///
/// Only document and component mutations advance `revision`. Layout updates and
/// mount changes never do: the former only mark the state dirty, the latter are
/// render facts and are not part of the workspace's data at all.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub(crate) workspace_id: WorkspaceId,
    pub(crate) open_documents: Vec<OpenDocument>,
    pub(crate) registered_components: BTreeMap<ComponentId, String>,
    pub(crate) mounted_components: BTreeSet<ComponentId>,
    pub(crate) layout: LayoutCache,
    pub(crate) revision: u64,
    pub(crate) last_visible_at: DateTime<Utc>,
    pub(crate) visible_seq: u64,
    pub(crate) dirty: bool,
    pub(crate) base_revision: Option<u64>,
    pub(crate) needs_hydration: bool,
}

impl RuntimeState {
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            open_documents: Vec::new(),
            registered_components: BTreeMap::new(),
            mounted_components: BTreeSet::new(),
            layout: LayoutCache::new(),
            revision: 0,
            last_visible_at: Utc::now(),
            visible_seq: 0,
            dirty: false,
            base_revision: None,
            needs_hydration: false,
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn open_documents(&self) -> &[OpenDocument] {
        &self.open_documents
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.open_documents
            .iter()
            .map(|doc| doc.document_id.clone())
            .collect()
    }

    pub fn has_document(&self, document_id: &DocumentId) -> bool {
        self.open_documents
            .iter()
            .any(|doc| &doc.document_id == document_id)
    }

    pub fn registered_components(&self) -> &BTreeMap<ComponentId, String> {
        &self.registered_components
    }

    pub fn is_component_mounted(&self, component_id: &ComponentId) -> bool {
        self.mounted_components.contains(component_id)
    }

    pub fn layout(&self) -> &LayoutCache {
        &self.layout
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_visible_at(&self) -> DateTime<Utc> {
        self.last_visible_at
    }

    /// True when the state holds changes that no submitted snapshot covers yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Durable revision this state descends from, counting writes already queued.
    ///
    /// Sent as the expected revision of the next write. `None` means no record
    /// is known to exist.
    pub fn base_revision(&self) -> Option<u64> {
        self.base_revision
    }

    /// True when storage may hold content this state has not seen, either
    /// because a write conflicted or because the workspace was recreated
    /// after an earlier copy reached storage. Cleared by replaying a stored record.
    pub fn needs_hydration(&self) -> bool {
        self.needs_hydration
    }

    /// A runtime with at least one open document or registered component.
    pub fn is_hot(&self) -> bool {
        !self.open_documents.is_empty() || !self.registered_components.is_empty()
    }

    pub(crate) fn touch(&mut self, visible_seq: u64) {
        self.last_visible_at = Utc::now();
        self.visible_seq = visible_seq;
    }

    fn commit(&mut self) {
        self.revision = self.revision.saturating_add(1);
        self.dirty = true;
    }

    pub(crate) fn raise_revision_to(&mut self, revision: u64) {
        self.revision = self.revision.max(revision);
    }

    /// Opens a document, or moves it if it is already open.
    ///
    /// Returns false when nothing changed.
    pub fn open_document(&mut self, document_id: DocumentId, position: LayoutPosition) -> bool {
        if let Some(existing) = self
            .open_documents
            .iter_mut()
            .find(|doc| doc.document_id == document_id)
        {
            if existing.position == position {
                return false;
            }
            existing.position = position;
        } else {
            self.open_documents
                .push(OpenDocument::new(document_id, position));
        }
        self.commit();
        true
    }

    pub fn close_document(&mut self, document_id: &DocumentId) -> bool {
        let before = self.open_documents.len();
        self.open_documents
            .retain(|doc| &doc.document_id != document_id);
        if self.open_documents.len() == before {
            return false;
        }
        self.commit();
        true
    }

    pub fn register_component(&mut self, component_id: ComponentId, kind: impl Into<String>) -> bool {
        let kind = kind.into();
        if self.registered_components.get(&component_id) == Some(&kind) {
            return false;
        }
        self.registered_components.insert(component_id, kind);
        self.commit();
        true
    }

    /// Removes a component's data. Unmounting alone never does this.
    pub fn deregister_component(&mut self, component_id: &ComponentId) -> bool {
        self.mounted_components.remove(component_id);
        if self.registered_components.remove(component_id).is_none() {
            return false;
        }
        self.commit();
        true
    }

    /// Records whether a component is currently rendered.
    ///
    /// Mount state is independent of the component's registered data: an
    /// unregistered component can't be mounted, and unmounting keeps the data.
    pub fn set_component_mounted(&mut self, component_id: &ComponentId, mounted: bool) -> bool {
        if mounted {
            if !self.registered_components.contains_key(component_id) {
                return false;
            }
            self.mounted_components.insert(component_id.clone())
        } else {
            self.mounted_components.remove(component_id)
        }
    }

    pub fn set_layout_entry(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if self.layout.get(&key) == Some(&value) {
            return;
        }
        self.layout.insert(key, value);
        self.dirty = true;
    }

    /// Closes every open document whose id is not in `keep`.
    ///
    /// Returns the closed ids. Commits one revision when anything was closed.
    pub fn retain_documents(&mut self, keep: &HashSet<DocumentId>) -> Vec<DocumentId> {
        let mut closed = Vec::new();
        self.open_documents.retain(|doc| {
            if keep.contains(&doc.document_id) {
                true
            } else {
                closed.push(doc.document_id.clone());
                false
            }
        });
        if !closed.is_empty() {
            self.commit();
        }
        closed
    }

    pub(crate) fn mark_submitted(&mut self, revision: u64) {
        self.dirty = false;
        self.base_revision = Some(revision);
    }

    /// The queued write that produced `failed_revision` never landed.
    ///
    /// Falls back to the expectation that write carried and marks the state
    /// dirty again. No-op when a later write has already been queued.
    pub(crate) fn write_failed(&mut self, failed_revision: u64, fallback: Option<u64>) -> bool {
        if self.base_revision != Some(failed_revision) {
            return false;
        }
        self.base_revision = fallback;
        self.dirty = true;
        true
    }

    pub(crate) fn restore_lineage(&mut self, base_revision: Option<u64>, dirty: bool, needs_hydration: bool) {
        self.base_revision = base_revision;
        self.dirty = dirty;
        self.needs_hydration = needs_hydration;
    }

    /// Starts a recreated state at the last revision known for its workspace.
    /// Storage may hold that revision's content, so it must be hydrated before
    /// it is written.
    pub(crate) fn seed_from_history(&mut self, last_known_revision: u64) {
        self.raise_revision_to(last_known_revision);
        self.needs_hydration = true;
    }

    /// Storage rejected a write descending from this state's lineage.
    pub(crate) fn write_conflicted(&mut self) {
        self.dirty = true;
        self.needs_hydration = true;
    }

    /// Records that storage holds `revision` (or nothing) and that this
    /// state has now seen it.
    ///
    /// A conflicted lineage is replaced outright. Otherwise the newer of the
    /// two wins, since a write queued after the read may not have landed yet.
    pub(crate) fn rebase_on_durable(&mut self, revision: Option<u64>) {
        self.base_revision = if self.needs_hydration {
            revision
        } else {
            match (self.base_revision, revision) {
                (Some(current), Some(stored)) => Some(current.max(stored)),
                (current, stored) => stored.or(current),
            }
        };
        self.needs_hydration = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RuntimeState {
        RuntimeState::new(WorkspaceId::from("w"))
    }

    #[test]
    fn new_state_is_cold_at_revision_zero() {
        let state = state();
        assert_eq!(state.revision(), 0);
        assert!(!state.is_hot());
        assert!(!state.is_dirty());
        assert_eq!(state.base_revision(), None);
        assert!(!state.needs_hydration());
    }

    #[test]
    fn failed_write_restores_previous_base() {
        let mut state = state();
        state.open_document("a".into(), LayoutPosition::default());
        state.mark_submitted(1);
        state.open_document("b".into(), LayoutPosition::default());
        state.mark_submitted(2);

        assert!(!state.write_failed(1, None));
        assert_eq!(state.base_revision(), Some(2));
        assert!(!state.is_dirty());

        assert!(state.write_failed(2, Some(1)));
        assert_eq!(state.base_revision(), Some(1));
        assert!(state.is_dirty());
    }

    #[test]
    fn conflict_waits_for_hydration() {
        let mut state = state();
        state.mark_submitted(4);
        state.write_conflicted();
        assert!(state.needs_hydration());
        assert!(state.is_dirty());

        state.rebase_on_durable(Some(2));
        assert_eq!(state.base_revision(), Some(2));
        assert!(!state.needs_hydration());

        state.mark_submitted(5);
        state.rebase_on_durable(Some(2));
        assert_eq!(state.base_revision(), Some(5));

        let mut fresh = RuntimeState::new(WorkspaceId::from("w"));
        fresh.rebase_on_durable(None);
        assert_eq!(fresh.base_revision(), None);
    }

    #[test]
    fn document_mutations_advance_revision() {
        let mut state = state();
        assert!(state.open_document("doc-a".into(), LayoutPosition::default()));
        assert!(state.open_document("doc-b".into(), LayoutPosition::new(1.0, 2.0)));
        assert_eq!(state.revision(), 2);

        assert!(!state.open_document("doc-a".into(), LayoutPosition::default()));
        assert_eq!(state.revision(), 2);

        assert!(state.open_document("doc-a".into(), LayoutPosition::new(5.0, 5.0)));
        assert_eq!(state.revision(), 3);
        assert_eq!(state.open_documents().len(), 2);

        assert!(state.close_document(&DocumentId::from("doc-a")));
        assert!(!state.close_document(&DocumentId::from("doc-a")));
        assert_eq!(state.revision(), 4);
        assert_eq!(state.document_ids(), vec![DocumentId::from("doc-b")]);
    }

    #[test]
    fn unmount_keeps_component_data() {
        let mut state = state();
        let component = ComponentId::from("calc-1");
        state.register_component(component.clone(), "calculator");
        assert!(state.set_component_mounted(&component, true));
        let revision = state.revision();

        assert!(state.set_component_mounted(&component, false));
        assert_eq!(state.revision(), revision);
        assert_eq!(
            state.registered_components().get(&component).map(String::as_str),
            Some("calculator")
        );
    }

    #[test]
    fn unregistered_component_cannot_mount() {
        let mut state = state();
        assert!(!state.set_component_mounted(&ComponentId::from("ghost"), true));
    }

    #[test]
    fn layout_updates_mark_dirty_without_revision() {
        let mut state = state();
        state.set_layout_entry("viewport", serde_json::json!({"zoom": 1.5}));
        assert!(state.is_dirty());
        assert_eq!(state.revision(), 0);
    }

    #[test]
    fn retain_documents_commits_once() {
        let mut state = state();
        for id in ["a", "b", "c"] {
            state.open_document(id.into(), LayoutPosition::default());
        }
        let keep = HashSet::from([DocumentId::from("b")]);
        let closed = state.retain_documents(&keep);
        assert_eq!(closed, vec![DocumentId::from("a"), DocumentId::from("c")]);
        assert_eq!(state.revision(), 4);
        assert!(state.retain_documents(&keep).is_empty());
        assert_eq!(state.revision(), 4);
    }
}
