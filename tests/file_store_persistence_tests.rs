use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Mutex;
use workspace_runtime::{
    ComponentId, DocumentId, FileSnapshotStore, LayoutPosition, PersistenceClient, ReplayKind,
    RuntimeCachePolicy, SaveDecision, WorkspaceId, WorkspaceRuntimeManager, hydrate_workspace,
};

#[tokio::test]
async fn state_survives_manager_restart() {
    let dir = tempdir().unwrap();
    let workspace = WorkspaceId::from("research/notes");

    {
        let store = Arc::new(FileSnapshotStore::open(dir.path()).await.unwrap());
        let mut manager = WorkspaceRuntimeManager::new(RuntimeCachePolicy::default(), store).unwrap();
        manager.document_opened(&workspace, "doc-A".into(), LayoutPosition::new(10.0, 20.0));
        manager.component_registered(&workspace, ComponentId::from("chat"), "chat-panel");
        manager.set_layout_entry(&workspace, "viewport", json!({"zoom": 0.8}));
        manager.shutdown().await.unwrap();
    }

    let store = Arc::new(FileSnapshotStore::open(dir.path()).await.unwrap());
    let manager = Arc::new(Mutex::new(
        WorkspaceRuntimeManager::new(RuntimeCachePolicy::default(), store).unwrap(),
    ));
    let outcome = hydrate_workspace(&manager, &workspace).await.unwrap().unwrap();
    assert_eq!(outcome.kind, ReplayKind::Adopted);
    assert_eq!(outcome.revision, 2);

    let guard = manager.lock().await;
    let state = guard.runtime(&workspace).unwrap();
    assert_eq!(state.document_ids(), vec![DocumentId::from("doc-A")]);
    assert_eq!(state.open_documents()[0].position, LayoutPosition::new(10.0, 20.0));
    assert_eq!(state.layout().get("viewport"), Some(&json!({"zoom": 0.8})));
    assert!(state.registered_components().contains_key("chat"));
    assert!(!state.is_dirty());
}

#[tokio::test]
async fn writes_after_hydration_chain_on_stored_revision() {
    let dir = tempdir().unwrap();
    let workspace = WorkspaceId::from("w");
    let store = Arc::new(FileSnapshotStore::open(dir.path()).await.unwrap());

    {
        let mut manager =
            WorkspaceRuntimeManager::new(RuntimeCachePolicy::default(), store.clone()).unwrap();
        manager.document_opened(&workspace, "a".into(), LayoutPosition::default());
        manager.shutdown().await.unwrap();
    }

    let manager = Arc::new(Mutex::new(
        WorkspaceRuntimeManager::new(
            RuntimeCachePolicy::default().with_capture_cooldown_ms(0),
            store.clone(),
        )
        .unwrap(),
    ));
    hydrate_workspace(&manager, &workspace).await.unwrap();

    {
        let mut guard = manager.lock().await;
        guard.document_opened(&workspace, "b".into(), LayoutPosition::default());
        assert_eq!(
            guard.save_workspace(&workspace).unwrap(),
            SaveDecision::Submitted { revision: 2 }
        );
        guard.flush().await.unwrap();
        assert_eq!(guard.stats().revision_conflicts, 0);
    }

    let stored = store.read(&workspace).await.unwrap().unwrap();
    assert_eq!(stored.revision, 2);
    assert_eq!(stored.snapshot.documents.len(), 2);
}

#[tokio::test]
async fn unhydrated_runtime_cannot_clobber_newer_record() {
    let dir = tempdir().unwrap();
    let workspace = WorkspaceId::from("w");
    let store = Arc::new(FileSnapshotStore::open(dir.path()).await.unwrap());

    {
        let mut manager =
            WorkspaceRuntimeManager::new(RuntimeCachePolicy::default(), store.clone()).unwrap();
        for doc in ["a", "b", "c"] {
            manager.document_opened(&workspace, doc.into(), LayoutPosition::default());
        }
        manager.shutdown().await.unwrap();
    }

    let mut manager =
        WorkspaceRuntimeManager::new(RuntimeCachePolicy::default(), store.clone()).unwrap();
    manager.document_opened(&workspace, "x".into(), LayoutPosition::default());
    manager.save_workspace(&workspace).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(manager.stats().revision_conflicts, 1);
    let stored = store.read(&workspace).await.unwrap().unwrap();
    assert_eq!(stored.revision, 3);
    assert_eq!(stored.snapshot.documents.len(), 3);
}

#[tokio::test]
async fn listing_reports_every_saved_workspace() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::open(dir.path()).await.unwrap());
    let mut manager =
        WorkspaceRuntimeManager::new(RuntimeCachePolicy::default().with_capacity(2), store.clone())
            .unwrap();

    for raw in ["alpha", "beta", "gamma"] {
        manager.document_opened(&WorkspaceId::from(raw), "doc".into(), LayoutPosition::default());
    }
    manager.shutdown().await.unwrap();

    let listed = store.list().await.unwrap();
    let names = listed
        .iter()
        .map(|record| record.workspace_id.to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}
