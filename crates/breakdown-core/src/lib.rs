pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{BreakdownError, Result};
pub use event::{EventBus, WorkflowEvent};
pub use state::{MemoryState, TaskState};
pub use types::*;
