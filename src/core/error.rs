use crate::core::WorkspaceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Snapshot codec error: {0}")]
    Codec(String),

    #[error("Persistence error for workspace '{workspace_id}': {message}")]
    Persistence {
        workspace_id: WorkspaceId,
        message: String,
    },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("No async runtime available: {0}")]
    NoAsyncRuntime(String),

    #[error("Snapshot writer is closed")]
    WriterClosed,

    #[error("Store error: {0}")]
    Store(String),
}

impl RuntimeError {
    pub fn persistence(workspace_id: &WorkspaceId, message: impl Into<String>) -> Self {
        Self::Persistence {
            workspace_id: workspace_id.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
