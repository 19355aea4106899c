use crate::core::WorkspaceId;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Cooldown that blocks captures right after a runtime was populated by replay.
///
/// Change listeners fire on the population itself; persisting at that moment
/// would store a state whose dependent structures have not caught up yet.
#[derive(Debug, Default)]
pub struct CaptureGate {
    suppressed_until: HashMap<WorkspaceId, Instant>,
    suppressed_captures: u64,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppresses captures for `duration` from now. Never shortens an existing window.
    pub fn suppress_for(&mut self, workspace_id: &WorkspaceId, duration: Duration) {
        let until = Instant::now() + duration;
        self.suppressed_until
            .entry(workspace_id.clone())
            .and_modify(|current| {
                if until > *current {
                    *current = until;
                }
            })
            .or_insert(until);
    }

    pub fn is_suppressed(&self, workspace_id: &WorkspaceId) -> bool {
        self.suppressed_until
            .get(workspace_id)
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Checks the gate on behalf of a capture and counts the ones it blocks.
    pub fn admit_capture(&mut self, workspace_id: &WorkspaceId) -> bool {
        if self.is_suppressed(workspace_id) {
            self.suppressed_captures = self.suppressed_captures.saturating_add(1);
            return false;
        }
        true
    }

    pub fn release(&mut self, workspace_id: &WorkspaceId) {
        self.suppressed_until.remove(workspace_id);
    }

    /// Drops elapsed windows; returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let now = Instant::now();
        let before = self.suppressed_until.len();
        self.suppressed_until.retain(|_, until| now < *until);
        before - self.suppressed_until.len()
    }

    pub fn suppressed_captures(&self) -> u64 {
        self.suppressed_captures
    }

    pub fn active_windows(&self) -> usize {
        self.suppressed_until.len()
    }
}
