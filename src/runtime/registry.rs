use super::{ActiveToken, ActiveWorkspace, RuntimeState};
use crate::core::WorkspaceId;
use lru::LruCache;
use std::collections::HashSet;
use tracing::{Level, event};

/// Capacity-bounded owner of every resident [`RuntimeState`].
///
/// The registry never evicts on its own; it only reports when admission needs
/// room and which entry should go. Eviction itself is driven by
/// [`crate::eviction::EvictionCoordinator`] so capture and persistence happen
/// before removal.
pub struct RuntimeRegistry {
    entries: LruCache<WorkspaceId, RuntimeState>,
    capacity: usize,
    pinned: HashSet<WorkspaceId>,
    active: ActiveWorkspace,
    visibility_clock: u64,
}

impl RuntimeRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity: capacity.max(1),
            pinned: HashSet::new(),
            active: ActiveWorkspace::new(),
            visibility_clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, workspace_id: &WorkspaceId) -> bool {
        self.entries.contains(workspace_id)
    }

    /// Admitting one more entry would exceed capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn get(&self, workspace_id: &WorkspaceId) -> Option<&RuntimeState> {
        self.entries.peek(workspace_id)
    }

    pub fn get_mut(&mut self, workspace_id: &WorkspaceId) -> Option<&mut RuntimeState> {
        self.entries.peek_mut(workspace_id)
    }

    /// Returns the resident state, inserting an empty one if absent.
    ///
    /// Does not make room; callers run eviction first when [`Self::is_full`].
    pub fn get_or_create(&mut self, workspace_id: &WorkspaceId) -> (&mut RuntimeState, bool) {
        let created = !self.entries.contains(workspace_id);
        let visible_seq = self.next_visible_seq();
        let state = self.entries.get_or_insert_mut(workspace_id.clone(), || {
            let mut state = RuntimeState::new(workspace_id.clone());
            state.touch(visible_seq);
            state
        });
        (state, created)
    }

    /// Inserts a state built elsewhere.
    ///
    /// A second instance for a resident key is a contract violation: it panics
    /// in debug builds, and in release the incoming duplicate is dropped and
    /// handed back.
    pub fn insert(&mut self, mut state: RuntimeState) -> Option<RuntimeState> {
        if self.entries.contains(&state.workspace_id) {
            event!(
                Level::ERROR,
                workspace_id = %state.workspace_id,
                "duplicate resident runtime; dropping the incoming instance"
            );
            debug_assert!(false, "duplicate resident runtime for {}", state.workspace_id);
            return Some(state);
        }
        let visible_seq = self.next_visible_seq();
        state.touch(visible_seq);
        self.entries.put(state.workspace_id.clone(), state);
        None
    }

    /// Marks a workspace as just seen in the foreground.
    pub fn touch(&mut self, workspace_id: &WorkspaceId) -> bool {
        let visible_seq = self.next_visible_seq();
        match self.entries.get_mut(workspace_id) {
            Some(state) => {
                state.touch(visible_seq);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, workspace_id: &WorkspaceId) -> Option<RuntimeState> {
        self.entries.pop(workspace_id)
    }

    /// Oldest-visible resident entry that may be evicted to admit `candidate`.
    ///
    /// The active workspace, pinned workspaces and the candidate itself are
    /// never chosen. Returns `None` when nothing is evictable.
    pub fn select_victim(&self, candidate: &WorkspaceId) -> Option<WorkspaceId> {
        self.entries
            .iter()
            .filter(|(workspace_id, _)| {
                *workspace_id != candidate && self.is_evictable(workspace_id)
            })
            .min_by_key(|(_, state)| state.visible_seq)
            .map(|(workspace_id, _)| workspace_id.clone())
    }

    pub fn is_evictable(&self, workspace_id: &WorkspaceId) -> bool {
        !self.active.is_active(workspace_id) && !self.pinned.contains(workspace_id)
    }

    pub fn pin(&mut self, workspace_id: WorkspaceId) -> bool {
        self.pinned.insert(workspace_id)
    }

    pub fn unpin(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.pinned.remove(workspace_id)
    }

    pub fn is_pinned(&self, workspace_id: &WorkspaceId) -> bool {
        self.pinned.contains(workspace_id)
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    pub fn active_workspace(&self) -> Option<&WorkspaceId> {
        self.active.current()
    }

    pub fn set_active(&mut self, workspace_id: WorkspaceId) -> ActiveToken {
        self.touch(&workspace_id);
        self.active.set(workspace_id)
    }

    /// Clears the active slot when it names `workspace_id`.
    pub fn release_active(&mut self, workspace_id: &WorkspaceId) -> bool {
        self.active.release(workspace_id)
    }

    pub fn clear_active_if_owner(&mut self, token: &ActiveToken) -> bool {
        self.active.clear_if_owner(token)
    }

    /// Resident workspace ids, most recently accessed first.
    pub fn resident_ids(&self) -> Vec<WorkspaceId> {
        self.entries
            .iter()
            .map(|(workspace_id, _)| workspace_id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeState> {
        self.entries.iter().map(|(_, state)| state)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RuntimeState> {
        self.entries.iter_mut().map(|(_, state)| state)
    }

    fn next_visible_seq(&mut self) -> u64 {
        self.visibility_clock = self.visibility_clock.saturating_add(1);
        self.visibility_clock
    }
}
