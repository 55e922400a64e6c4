use thiserror::Error;

#[derive(Debug, Error)]
pub enum TetherError {
    // Graph errors
    #[error("Node not found in graph: {0}")]
    NodeNotFound(String),

    #[error("Recognized node failure: {0}")]
    RecognizedFailure(String),

    #[error("Node failed: {node}: {message}")]
    NodeFailed { node: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TetherError {
    /// Build the node-kind-specific failure that drives the bounded retry path.
    pub fn recognized(signature: impl Into<String>) -> Self {
        Self::RecognizedFailure(signature.into())
    }

    /// Build a fatal node fault.
    pub fn node_failed(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
