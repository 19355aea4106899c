//! Deferred change notification.
//!
//! Mutations only enqueue the workspace id. Subscribers run when a
//! [`NotificationBatch`] is delivered, which happens after the mutating call
//! has returned and any lock around the manager has been released. A callback
//! can therefore never observe, or re-enter, a half-finished transition.

use crate::core::WorkspaceId;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

pub type ChangeCallback = Arc<dyn Fn(&WorkspaceId) + Send + Sync>;

type SubscriberTable = Mutex<BTreeMap<SubscriptionId, ChangeCallback>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive;
/// call [`Subscription::unsubscribe`] to end it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    subscribers: Weak<SubscriberTable>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns false if the notifier is gone or the subscription was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.subscribers.upgrade() {
            Some(subscribers) => lock_table(&subscribers).remove(&self.id).is_some(),
            None => false,
        }
    }
}

#[derive(Default)]
pub struct ChangeNotifier {
    subscribers: Arc<SubscriberTable>,
    pending: Vec<WorkspaceId>,
    pending_set: HashSet<WorkspaceId>,
    next_id: u64,
    delivered: u64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: ChangeCallback) -> Subscription {
        self.next_id = self.next_id.wrapping_add(1);
        let id = SubscriptionId(self.next_id);
        lock_table(&self.subscribers).insert(id, callback);
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        lock_table(&self.subscribers).remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock_table(&self.subscribers).len()
    }

    /// Queues a change. Repeated changes to one workspace within a batch collapse.
    pub fn enqueue(&mut self, workspace_id: &WorkspaceId) {
        if self.pending_set.insert(workspace_id.clone()) {
            self.pending.push(workspace_id.clone());
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Takes the queued changes together with the current subscriber list.
    pub fn drain(&mut self) -> NotificationBatch {
        self.pending_set.clear();
        let changes = std::mem::take(&mut self.pending);
        let subscribers = if changes.is_empty() {
            Vec::new()
        } else {
            lock_table(&self.subscribers).values().cloned().collect()
        };
        self.delivered = self
            .delivered
            .saturating_add((changes.len() * subscribers.len()) as u64);
        NotificationBatch {
            changes,
            subscribers,
        }
    }

    /// Callback invocations handed out in drained batches so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

/// Changes drained from the queue, delivered later by the caller.
#[must_use = "a batch does nothing until delivered"]
pub struct NotificationBatch {
    changes: Vec<WorkspaceId>,
    subscribers: Vec<ChangeCallback>,
}

impl NotificationBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[WorkspaceId] {
        &self.changes
    }

    pub fn deliver(self) {
        for workspace_id in &self.changes {
            for subscriber in &self.subscribers {
                subscriber(workspace_id);
            }
        }
    }
}

fn lock_table(
    table: &SubscriberTable,
) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, ChangeCallback>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
