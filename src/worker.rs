use crate::core::{Result, RuntimeError};
use crate::manager::{WorkspaceRuntimeManager, hydrate_workspace};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Background task running the manager's maintenance tick.
pub struct RuntimeMaintenanceWorker {
    manager: Arc<Mutex<WorkspaceRuntimeManager>>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl RuntimeMaintenanceWorker {
    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| RuntimeError::Store(format!("maintenance worker join: {}", err)))?;
        }

        let mut manager = self.manager.lock().await;
        manager.maintenance_worker_running = false;
        Ok(())
    }
}

impl Drop for RuntimeMaintenanceWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the periodic maintenance worker.
///
/// Each tick runs under the manager lock; the notifications it drains are
/// delivered after the lock is released. Runtimes left waiting for hydration
/// are then hydrated one by one, each reading storage outside the lock.
pub async fn spawn_runtime_maintenance_worker(
    manager: Arc<Mutex<WorkspaceRuntimeManager>>,
) -> RuntimeMaintenanceWorker {
    let interval = {
        let mut guard = manager.lock().await;
        guard.maintenance_worker_running = true;
        guard.policy().maintenance_interval()
    };

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let manager_for_worker = manager.clone();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    let (tick, pending) = {
                        let mut guard = manager_for_worker.lock().await;
                        let tick = guard.run_maintenance();
                        (tick, guard.workspaces_needing_hydration())
                    };
                    match tick {
                        Ok(notifications) => notifications.deliver(),
                        Err(err) => {
                            event!(Level::ERROR, error = %err, "runtime maintenance tick failed");
                            if matches!(err, RuntimeError::WriterClosed) {
                                break;
                            }
                        }
                    }
                    for workspace_id in pending {
                        if let Err(err) = hydrate_workspace(&manager_for_worker, &workspace_id).await {
                            event!(
                                Level::WARN,
                                workspace_id = %workspace_id,
                                error = %err,
                                "background hydration failed"
                            );
                        }
                    }
                }
            }
        }
    });

    RuntimeMaintenanceWorker {
        manager,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
