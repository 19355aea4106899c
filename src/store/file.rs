use super::{
    PersistenceClient, StoredRecordInfo, StoredSnapshot, WriteOutcome, check_snapshot_key,
};
use crate::core::{Result, RuntimeError, WorkspaceId};
use crate::snapshot::{Snapshot, SnapshotCodec};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const RECORD_SUFFIX: &str = ".snapshot.json";
const RECORD_FORMAT_VERSION: u16 = 1;
const MAX_FILE_NAME_LEN: usize = 255;

/// On-disk record: revision metadata plus the codec's opaque blob.
#[derive(Debug, Serialize, Deserialize)]
struct FileSnapshotRecord {
    format_version: u16,
    workspace_id: WorkspaceId,
    revision: u64,
    updated_at: DateTime<Utc>,
    blob: String,
}

/// One JSON record per workspace under a root directory.
///
/// Check-and-write runs under a store-wide lock so the revision guard is atomic,
/// and every write goes to a temporary file that is then renamed into place.
pub struct FileSnapshotStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir).await?;
        Ok(Self {
            root_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// File holding `workspace_id`'s record.
    ///
    /// Fails for ids whose encoded name would exceed the usual 255-byte
    /// file name limit.
    pub fn record_path(&self, workspace_id: &WorkspaceId) -> Result<PathBuf> {
        let encoded = URL_SAFE_NO_PAD.encode(workspace_id.as_str());
        let file_name = format!("{encoded}{RECORD_SUFFIX}");
        if file_name.len() > MAX_FILE_NAME_LEN {
            return Err(RuntimeError::Store(format!(
                "workspace id of {} bytes is too long for a snapshot file name ({} of {} bytes)",
                workspace_id.as_str().len(),
                file_name.len(),
                MAX_FILE_NAME_LEN
            )));
        }
        Ok(self.root_dir.join(file_name))
    }

    async fn read_record(path: &Path) -> Result<Option<FileSnapshotRecord>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_slice::<FileSnapshotRecord>(&bytes).map_err(|err| {
            RuntimeError::Codec(format!(
                "Failed to parse snapshot record '{}': {}",
                path.display(),
                err
            ))
        })?;
        if record.format_version != RECORD_FORMAT_VERSION {
            return Err(RuntimeError::Codec(format!(
                "Unsupported snapshot record format version {} in '{}'",
                record.format_version,
                path.display()
            )));
        }
        Ok(Some(record))
    }

    async fn write_record_atomically(path: &Path, bytes: Vec<u8>) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    fn decode_record(record: FileSnapshotRecord) -> Result<StoredSnapshot> {
        let blob = STANDARD
            .decode(record.blob.as_bytes())
            .map_err(|err| RuntimeError::Codec(err.to_string()))?;
        let snapshot = SnapshotCodec::decode(&blob)?;
        Ok(StoredSnapshot {
            snapshot,
            revision: record.revision,
            updated_at: record.updated_at,
        })
    }
}

#[async_trait]
impl PersistenceClient for FileSnapshotStore {
    async fn write(
        &self,
        workspace_id: &WorkspaceId,
        snapshot: &Snapshot,
        expected_revision: Option<u64>,
    ) -> Result<WriteOutcome> {
        check_snapshot_key(workspace_id, snapshot)?;
        let path = self.record_path(workspace_id)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::read_record(&path).await?.map(|record| record.revision);
        if current != expected_revision {
            return Ok(WriteOutcome::RevisionConflict {
                expected: expected_revision,
                current,
            });
        }

        let record = FileSnapshotRecord {
            format_version: RECORD_FORMAT_VERSION,
            workspace_id: workspace_id.clone(),
            revision: snapshot.revision,
            updated_at: Utc::now(),
            blob: STANDARD.encode(SnapshotCodec::encode(snapshot)?),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        Self::write_record_atomically(&path, bytes).await?;

        Ok(WriteOutcome::Committed {
            revision: snapshot.revision,
        })
    }

    async fn read(&self, workspace_id: &WorkspaceId) -> Result<Option<StoredSnapshot>> {
        match Self::read_record(&self.record_path(workspace_id)?).await? {
            Some(record) => Self::decode_record(record).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<StoredRecordInfo>> {
        let mut entries = fs::read_dir(&self.root_dir).await?;
        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                infos.push(StoredRecordInfo {
                    workspace_id: record.workspace_id,
                    revision: record.revision,
                    updated_at: record.updated_at,
                });
            }
        }
        infos.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LayoutPosition;
    use crate::runtime::RuntimeState;
    use serde_json::json;
    use tempfile::tempdir;

    fn snapshot(workspace: &str, docs: &[&str]) -> Snapshot {
        let mut state = RuntimeState::new(WorkspaceId::from(workspace));
        for doc in docs {
            state.open_document((*doc).into(), LayoutPosition::new(1.0, 2.0));
        }
        state.set_layout_entry("viewport", json!({"zoom": 1.25}));
        SnapshotCodec::capture(&state)
    }

    #[tokio::test]
    async fn write_then_read_returns_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        let workspace = WorkspaceId::from("team/alpha");
        let original = snapshot("team/alpha", &["a", "b"]);

        let outcome = store.write(&workspace, &original, None).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Committed { revision: 2 });

        let stored = store.read(&workspace).await.unwrap().unwrap();
        assert_eq!(stored.snapshot, original);
        assert_eq!(stored.revision, 2);
        assert!(store.record_path(&workspace).unwrap().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn missing_record_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        assert!(store.read(&WorkspaceId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_expectation_conflicts_and_keeps_record() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        let workspace = WorkspaceId::from("w");
        store.write(&workspace, &snapshot("w", &["a"]), None).await.unwrap();

        let outcome = store
            .write(&workspace, &snapshot("w", &["x", "y", "z"]), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::RevisionConflict {
                expected: None,
                current: Some(1)
            }
        );
        let stored = store.read(&workspace).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.documents.len(), 1);
    }

    #[tokio::test]
    async fn reopened_store_lists_records() {
        let dir = tempdir().unwrap();
        {
            let store = FileSnapshotStore::open(dir.path()).await.unwrap();
            store
                .write(&WorkspaceId::from("w2"), &snapshot("w2", &["a"]), None)
                .await
                .unwrap();
            store
                .write(&WorkspaceId::from("w1"), &snapshot("w1", &["a", "b"]), None)
                .await
                .unwrap();
        }

        let reopened = FileSnapshotStore::open(dir.path()).await.unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].workspace_id, WorkspaceId::from("w1"));
        assert_eq!(listed[0].revision, 2);
        assert_eq!(listed[1].revision, 1);
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_codec_error() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        let workspace = WorkspaceId::from("w");
        std::fs::write(store.record_path(&workspace).unwrap(), b"{ not json").unwrap();

        let err = store.read(&workspace).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Codec(_)));
    }

    #[tokio::test]
    async fn overlong_workspace_id_is_rejected_with_store_error() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).await.unwrap();
        let long_id = "w".repeat(200);
        let workspace = WorkspaceId::from(long_id.as_str());

        let err = store
            .write(&workspace, &snapshot(&long_id, &["a"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Store(_)));
        assert!(matches!(store.read(&workspace).await, Err(RuntimeError::Store(_))));

        let fitting = "w".repeat(150);
        let workspace = WorkspaceId::from(fitting.as_str());
        let outcome = store
            .write(&workspace, &snapshot(&fitting, &["a"]), None)
            .await
            .unwrap();
        assert!(outcome.is_committed());
    }
}
