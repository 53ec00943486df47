//! Error types for graph compilation and dispatch.
//!
//! [`GraphError`] covers the full taxonomy from compile-time validation
//! through dispatch-time RPC failures. Compile-time errors are surfaced
//! immediately and never produce a partial [`crate::graph::Graph`];
//! dispatch-time errors are carried as `is-error` metadata and short-circuit
//! propagation rather than unwinding the call stack (see
//! [`crate::dispatch`]).
//!
//! # Example
//!
//! ```rust
//! use flow_core::error::GraphError;
//!
//! let err = GraphError::duplicate_name("classifier");
//! assert!(matches!(err, GraphError::DuplicateName(_)));
//! ```

use thiserror::Error;

/// Convenience alias for results returned by compilation and dispatch.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced while compiling or dispatching a flow graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Two nodes were declared with the same name.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    /// A `needs`/`needs_all`/`join` reference named a node that was never added.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// A user-supplied name collided with `gateway`, `start-gateway`, or `end-gateway`.
    #[error("reserved name used as node name: {0}")]
    ReservedName(String),

    /// The declared edges form a cycle.
    #[error("cycle detected in graph involving node: {0}")]
    CycleDetected(String),

    /// A `polling_policy` entry used a value other than `ANY`/`ALL`.
    #[error("invalid polling policy for endpoint {endpoint:?}: {value}")]
    InvalidPolling { endpoint: String, value: String },

    /// Generic compile-time validation failure not covered by a more specific variant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required pod failed to become ready within its `timeout_ready` window.
    #[error("pod {pod} failed to start: {reason}")]
    RuntimeFailToStart { pod: String, reason: String },

    /// A node's RPC returned `is-error` metadata; carried upstream via short-circuit.
    #[error("node {node} returned an error response: {error}")]
    NodeExecution { node: String, error: String },

    /// A per-call deadline (`timeout_ready`, or a Connection Pool call deadline) elapsed.
    #[error("operation {operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// A parent delivered a part that could not be merged (e.g. a required part was `None`).
    #[error("merge mismatch at node {node}: {reason}")]
    MergeMismatch { node: String, reason: String },

    /// JSON (de)serialization failure, e.g. decoding a request/response body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization failure, e.g. parsing a flow description document.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure while spawning a runner process or probing readiness.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that don't fit the taxonomy above.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Build a [`GraphError::DuplicateName`].
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    /// Build a [`GraphError::UnknownDependency`].
    pub fn unknown_dependency(name: impl Into<String>) -> Self {
        Self::UnknownDependency(name.into())
    }

    /// Build a [`GraphError::ReservedName`].
    pub fn reserved_name(name: impl Into<String>) -> Self {
        Self::ReservedName(name.into())
    }

    /// Build a [`GraphError::CycleDetected`].
    pub fn cycle_detected(name: impl Into<String>) -> Self {
        Self::CycleDetected(name.into())
    }

    /// Build a [`GraphError::NodeExecution`] from a node name and an underlying error.
    pub fn node_execution(node: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.to_string(),
        }
    }

    /// True if this variant represents a dispatch-time error that should be
    /// carried as `is-error` response metadata rather than aborting compilation.
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Self::NodeExecution { .. } | Self::Timeout { .. } | Self::MergeMismatch { .. }
        )
    }
}
