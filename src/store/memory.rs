use super::{
    PersistenceClient, StoredRecordInfo, StoredSnapshot, WriteOutcome, check_snapshot_key,
};
use crate::core::{Result, WorkspaceId};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local store. Keeps the same revision contract as durable stores.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    records: Mutex<HashMap<WorkspaceId, StoredSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PersistenceClient for InMemorySnapshotStore {
    async fn write(
        &self,
        workspace_id: &WorkspaceId,
        snapshot: &Snapshot,
        expected_revision: Option<u64>,
    ) -> Result<WriteOutcome> {
        check_snapshot_key(workspace_id, snapshot)?;
        let mut records = self.records.lock().await;
        let current = records.get(workspace_id).map(|record| record.revision);
        if current != expected_revision {
            return Ok(WriteOutcome::RevisionConflict {
                expected: expected_revision,
                current,
            });
        }

        records.insert(
            workspace_id.clone(),
            StoredSnapshot {
                snapshot: snapshot.clone(),
                revision: snapshot.revision,
                updated_at: Utc::now(),
            },
        );
        Ok(WriteOutcome::Committed {
            revision: snapshot.revision,
        })
    }

    async fn read(&self, workspace_id: &WorkspaceId) -> Result<Option<StoredSnapshot>> {
        Ok(self.records.lock().await.get(workspace_id).cloned())
    }

    async fn list(&self) -> Result<Vec<StoredRecordInfo>> {
        let records = self.records.lock().await;
        let mut infos = records
            .values()
            .map(|record| StoredRecordInfo {
                workspace_id: record.snapshot.workspace_id.clone(),
                revision: record.revision,
                updated_at: record.updated_at,
            })
            .collect::<Vec<_>>();
        infos.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        Ok(infos)
    }
}
