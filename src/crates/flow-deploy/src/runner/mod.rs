//! Runner Adapter (C6) — turns a [`crate::planner::PodDeploymentPlan`] list
//! into running processes (or, via [`manifest`], a structured plan for some
//! other orchestrator to render).
//!
//! Grounded on `test_runtime_captures_signals.py`: starting a deployment
//! installs a signal handler that drives a cooperative shutdown — cancel
//! in-flight work, then call each child's `close()` hook exactly once,
//! before exiting. Startup itself proceeds in topological (`needs`) order
//! and, on any pod's failure, tears down everything already started in
//! reverse order rather than leaving partial state running.

pub mod local;
pub mod manifest;

use async_trait::async_trait;

use crate::error::Result;

/// One running (or runnable) unit the adapter can start, probe, and close.
/// Implemented by [`local::LocalProcess`] for real child processes and
/// trivially by test doubles standing in for an in-process mock executor.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Start the underlying process/task.
    async fn start(&self) -> Result<()>;

    /// Poll readiness; called repeatedly until true or [`DeployConfig::
    /// timeout_ready`](crate::config::DeployConfig::timeout_ready) elapses.
    async fn ready(&self) -> bool;

    /// Flush state and terminate exactly once, after any in-flight request
    /// completes. Mirrors the original `DummyExecutor.close()` contract.
    async fn close(&self) -> Result<()>;
}

pub use local::LocalProcess;
pub use manifest::{ManifestPlan, ManifestRenderer};
