use thiserror::Error;

#[derive(Debug, Error)]
pub enum BreakdownError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Invalid workflow graph: {0}")]
    Graph(String),

    // External call errors
    #[error("Completion request failed: {0}")]
    Completion(String),

    #[error("Completion streaming error: {0}")]
    Stream(String),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Terminal run error surfaced by the orchestrator
    #[error("Task '{task}' failed under pattern {pattern}: {source}")]
    Execution {
        task: String,
        pattern: String,
        #[source]
        source: Box<BreakdownError>,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BreakdownError {
    /// Whether this error came from a call to an external service.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            BreakdownError::Completion(_)
                | BreakdownError::Stream(_)
                | BreakdownError::Memory(_)
                | BreakdownError::Embedding(_)
                | BreakdownError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BreakdownError>;
