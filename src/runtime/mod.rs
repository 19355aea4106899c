pub mod active;
pub mod registry;
pub mod state;

pub use active::{ActiveToken, ActiveWorkspace};
pub use registry::RuntimeRegistry;
pub use state::{LayoutCache, RuntimeState};
