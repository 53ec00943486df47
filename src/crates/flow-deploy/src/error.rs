//! Error taxonomy for the Deployment Planner and Runner Adapter.
//!
//! Grounded on `flow_core::error::GraphError`'s shape (one `thiserror` enum,
//! a `Result<T>` alias, helper constructors for the common cases) and on the
//! original `OrchestratorError` this crate's lib.rs carried before the
//! rewrite.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("unknown node referenced while planning: {0}")]
    UnknownNode(String),

    #[error("pod {pod} failed to start: {reason}")]
    FailToStart { pod: String, reason: String },

    #[error("pod {pod} did not become ready within {timeout_ms}ms")]
    ReadinessTimeout { pod: String, timeout_ms: u64 },

    #[error("pod {pod} failed to shut down cleanly: {reason}")]
    FailToClose { pod: String, reason: String },

    #[error("io error while spawning a process: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl DeployError {
    pub fn unknown_node(name: impl Into<String>) -> Self {
        Self::UnknownNode(name.into())
    }

    pub fn fail_to_start(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FailToStart { pod: pod.into(), reason: reason.into() }
    }

    pub fn fail_to_close(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FailToClose { pod: pod.into(), reason: reason.into() }
    }
}
