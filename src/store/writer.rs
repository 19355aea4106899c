use super::{PersistenceClient, WriteOutcome};
use crate::core::{Result, RuntimeError, WorkspaceId};
use crate::snapshot::Snapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

enum WriteJob {
    Write {
        snapshot: Snapshot,
        expected_revision: Option<u64>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct WriterCounters {
    submitted: AtomicU64,
    committed: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStats {
    pub submitted: u64,
    pub committed: u64,
    pub conflicts: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Committed,
    Conflict { current: Option<u64> },
    Failed,
}

/// Outcome of one queued write, handed back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub workspace_id: WorkspaceId,
    pub revision: u64,
    /// The expectation the write was applied with. For a failed write this is
    /// still the revision storage holds.
    pub expected_revision: Option<u64>,
    pub status: WriteStatus,
}

/// Fire-and-forget snapshot persistence.
///
/// Submission is synchronous and never blocks. A single background task applies
/// writes in submission order, so two writes for one workspace can never
/// overtake each other. The submitter picks each write's expected revision;
/// outcomes come back through [`SnapshotWriter::drain_reports`].
///
/// When a write fails outright, the next queued write that expected its
/// revision is applied with the failed write's own expectation instead.
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
    reports: mpsc::UnboundedReceiver<WriteReport>,
    counters: Arc<WriterCounters>,
    join_handle: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    /// Starts the writer task on the current tokio runtime.
    pub fn spawn(client: Arc<dyn PersistenceClient>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|err| RuntimeError::NoAsyncRuntime(err.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let counters = Arc::new(WriterCounters::default());
        let join_handle = handle.spawn(run_writer(client, rx, report_tx, counters.clone()));

        Ok(Self {
            tx,
            reports,
            counters,
            join_handle: Some(join_handle),
        })
    }

    /// Queues `snapshot` for a conditional write and returns immediately.
    pub fn submit(&self, snapshot: Snapshot, expected_revision: Option<u64>) -> Result<()> {
        self.tx
            .send(WriteJob::Write {
                snapshot,
                expected_revision,
            })
            .map_err(|_| RuntimeError::WriterClosed)?;
        self.counters.submitted.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Takes the reports of every write finished since the last call.
    pub fn drain_reports(&mut self) -> Vec<WriteReport> {
        let mut drained = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            drained.push(report);
        }
        drained
    }

    /// A cloneable handle for awaiting queued writes without borrowing the writer.
    pub fn flush_handle(&self) -> WriterFlushHandle {
        WriterFlushHandle {
            tx: self.tx.clone(),
        }
    }

    /// Waits until every write submitted so far has been applied or dropped.
    ///
    /// Their reports are available to [`SnapshotWriter::drain_reports`] afterwards.
    pub async fn flush(&self) -> Result<()> {
        self.flush_handle().flush().await
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            submitted: self.counters.submitted.load(AtomicOrdering::Relaxed),
            committed: self.counters.committed.load(AtomicOrdering::Relaxed),
            conflicts: self.counters.conflicts.load(AtomicOrdering::Relaxed),
            failures: self.counters.failures.load(AtomicOrdering::Relaxed),
        }
    }

    /// Stops accepting writes and waits for queued ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        let join_handle = self.join_handle.take();
        drop(self);
        if let Some(join_handle) = join_handle {
            join_handle
                .await
                .map_err(|err| RuntimeError::Store(format!("snapshot writer join: {}", err)))?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WriterFlushHandle {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriterFlushHandle {
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteJob::Flush(done_tx))
            .map_err(|_| RuntimeError::WriterClosed)?;
        done_rx.await.map_err(|_| RuntimeError::WriterClosed)
    }
}

async fn run_writer(
    client: Arc<dyn PersistenceClient>,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    report_tx: mpsc::UnboundedSender<WriteReport>,
    counters: Arc<WriterCounters>,
) {
    // Last failed write per workspace: (its revision, the expectation it carried).
    let mut failed_heads: HashMap<WorkspaceId, (u64, Option<u64>)> = HashMap::new();

    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Write {
                snapshot,
                expected_revision,
            } => {
                let expected_revision = match failed_heads.remove(&snapshot.workspace_id) {
                    Some((failed, fallback)) if expected_revision == Some(failed) => fallback,
                    _ => expected_revision,
                };
                let span = info_span!(
                    "runtime.snapshot.write",
                    workspace_id = %snapshot.workspace_id,
                    revision = snapshot.revision,
                    capture_id = %snapshot.capture_id
                );
                let status = write_one(client.as_ref(), &snapshot, expected_revision, &counters)
                    .instrument(span)
                    .await;
                if status == WriteStatus::Failed {
                    failed_heads.insert(
                        snapshot.workspace_id.clone(),
                        (snapshot.revision, expected_revision),
                    );
                }
                let _ = report_tx.send(WriteReport {
                    workspace_id: snapshot.workspace_id,
                    revision: snapshot.revision,
                    expected_revision,
                    status,
                });
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_one(
    client: &dyn PersistenceClient,
    snapshot: &Snapshot,
    expected_revision: Option<u64>,
    counters: &WriterCounters,
) -> WriteStatus {
    match client
        .write(&snapshot.workspace_id, snapshot, expected_revision)
        .await
    {
        Ok(WriteOutcome::Committed { revision }) => {
            counters.committed.fetch_add(1, AtomicOrdering::Relaxed);
            event!(Level::DEBUG, revision, "snapshot persisted");
            WriteStatus::Committed
        }
        Ok(WriteOutcome::RevisionConflict { expected, current }) => {
            counters.conflicts.fetch_add(1, AtomicOrdering::Relaxed);
            event!(
                Level::INFO,
                expected = ?expected,
                current = ?current,
                "snapshot write dropped after revision conflict"
            );
            WriteStatus::Conflict { current }
        }
        Err(err) => {
            counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
            event!(Level::ERROR, error = %err, "snapshot persist failed");
            WriteStatus::Failed
        }
    }
}
