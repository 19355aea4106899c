pub mod error;
pub mod types;

pub use error::{Result, RuntimeError};
pub use types::{ComponentId, DocumentId, LayoutPosition, OpenDocument, WorkspaceId};
