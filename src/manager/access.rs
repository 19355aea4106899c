use super::{OpenDocumentsView, WorkspaceRuntimeManager};
use crate::core::{OpenDocument, Result, WorkspaceId};
use crate::snapshot::ReplayOutcome;
use tokio::sync::Mutex;
use tracing::{Level, event};

/// Loads a workspace's stored snapshot and replays it into the cache.
///
/// The lock is released while storage is read. Queued writes are flushed
/// first so the read observes this process's own evictions. Notifications
/// are delivered after the lock is released again. Returns `None` when
/// storage holds no record; a resident runtime then no longer waits for
/// hydration.
pub async fn hydrate_workspace(
    manager: &Mutex<WorkspaceRuntimeManager>,
    workspace_id: &WorkspaceId,
) -> Result<Option<ReplayOutcome>> {
    let (persistence, flush) = {
        let guard = manager.lock().await;
        (guard.persistence(), guard.flush_handle())
    };
    flush.flush().await?;

    let Some(stored) = persistence.read(workspace_id).await? else {
        event!(Level::DEBUG, workspace_id = %workspace_id, "no stored snapshot to hydrate");
        manager.lock().await.observe_missing_record(workspace_id);
        return Ok(None);
    };

    let (outcome, notifications) = {
        let mut guard = manager.lock().await;
        let outcome = guard.replay_stored(&stored);
        (outcome, guard.drain_notifications())
    };
    notifications.deliver();
    Ok(Some(outcome))
}

/// Open documents of a workspace from the cache, the eviction side table, or
/// durable storage, in that order. Does not make the workspace resident.
pub async fn load_open_documents(
    manager: &Mutex<WorkspaceRuntimeManager>,
    workspace_id: &WorkspaceId,
) -> Result<Vec<OpenDocument>> {
    let (persistence, flush) = {
        let mut guard = manager.lock().await;
        match guard.query_open_documents(workspace_id) {
            OpenDocumentsView::NotFound => (guard.persistence(), guard.flush_handle()),
            found => return Ok(found.into_documents()),
        }
    };
    flush.flush().await?;

    Ok(persistence
        .read(workspace_id)
        .await?
        .map(|stored| stored.snapshot.documents)
        .unwrap_or_default())
}
