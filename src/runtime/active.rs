use crate::core::WorkspaceId;

/// Proof of having set the active workspace; required to clear it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveToken {
    workspace_id: WorkspaceId,
    generation: u64,
}

impl ActiveToken {
    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }
}

/// The foreground workspace, with compare-and-clear ownership.
///
/// Whoever sets the slot gets a token. Clearing only succeeds with the token of
/// the current owner, so a stale owner tearing down late cannot wipe a newer
/// owner's value.
#[derive(Debug, Default)]
pub struct ActiveWorkspace {
    current: Option<ActiveToken>,
    next_generation: u64,
}

impl ActiveWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, workspace_id: WorkspaceId) -> ActiveToken {
        self.next_generation = self.next_generation.wrapping_add(1);
        let token = ActiveToken {
            workspace_id,
            generation: self.next_generation,
        };
        self.current = Some(token.clone());
        token
    }

    pub fn current(&self) -> Option<&WorkspaceId> {
        self.current.as_ref().map(|token| &token.workspace_id)
    }

    pub fn is_active(&self, workspace_id: &WorkspaceId) -> bool {
        self.current() == Some(workspace_id)
    }

    /// Empties the slot if it names `workspace_id`, whoever set it.
    pub fn release(&mut self, workspace_id: &WorkspaceId) -> bool {
        if self.is_active(workspace_id) {
            self.current = None;
            return true;
        }
        false
    }

    pub fn clear_if_owner(&mut self, token: &ActiveToken) -> bool {
        if self.current.as_ref() == Some(token) {
            self.current = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_only_clears_matching_workspace() {
        let mut active = ActiveWorkspace::new();
        let token = active.set(WorkspaceId::from("w1"));
        assert!(!active.release(&WorkspaceId::from("w2")));
        assert!(active.release(&WorkspaceId::from("w1")));
        assert_eq!(active.current(), None);
        assert!(!active.clear_if_owner(&token));
    }

    #[test]
    fn owner_can_clear() {
        let mut active = ActiveWorkspace::new();
        let token = active.set(WorkspaceId::from("w1"));
        assert!(active.clear_if_owner(&token));
        assert_eq!(active.current(), None);
    }

    #[test]
    fn stale_owner_cannot_clear_newer_value() {
        let mut active = ActiveWorkspace::new();
        let first = active.set(WorkspaceId::from("w1"));
        let _second = active.set(WorkspaceId::from("w2"));

        assert!(!active.clear_if_owner(&first));
        assert_eq!(active.current(), Some(&WorkspaceId::from("w2")));
    }

    #[test]
    fn same_workspace_reset_invalidates_old_token() {
        let mut active = ActiveWorkspace::new();
        let first = active.set(WorkspaceId::from("w1"));
        let second = active.set(WorkspaceId::from("w1"));

        assert!(!active.clear_if_owner(&first));
        assert!(active.clear_if_owner(&second));
    }
}
