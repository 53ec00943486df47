//! Flow-wide defaults, threaded explicitly rather than read from globals.
//!
//! Mirrors the re-architecture note in the design docs: the compiler accepts
//! a single [`FlowConfig`] value instead of reaching for process-global
//! state, and every default it table-drives lives here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::PollingMode;

/// Whether pods discover each other through the Connection Pool's own
/// membership tracking, or through an explicit address map baked into the
/// deployment plan (see [`crate::error`] and the Deployment Planner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPoolMode {
    /// Pods are auto-discovered; the gateway's `pod_addresses` map is empty.
    Enabled,
    /// Addresses are baked into the plan as an explicit `connection_list`.
    Disabled,
}

/// Flow-wide defaults consulted by the compiler and dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Default shard count for nodes that don't declare one.
    pub default_shards: usize,
    /// Default replica count for nodes that don't declare one.
    pub default_replicas: usize,
    /// Default polling mode applied to the `'*'` endpoint glob.
    pub default_polling: PollingMode,
    /// How pods discover each other at deployment time.
    pub connection_pool_mode: ConnectionPoolMode,
    /// DNS namespace used when rendering deployment addresses.
    pub namespace: String,
    /// Wait window for pod readiness; `None` means wait forever.
    pub timeout_ready: Option<Duration>,
    /// Graceful-shutdown window before a SIGTERM/SIGINT escalates to SIGKILL.
    pub shutdown_grace: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_shards: 1,
            default_replicas: 1,
            default_polling: PollingMode::Any,
            connection_pool_mode: ConnectionPoolMode::Enabled,
            namespace: "default".to_string(),
            timeout_ready: Some(Duration::from_secs(10)),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl FlowConfig {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default shard count.
    pub fn with_default_shards(mut self, shards: usize) -> Self {
        self.default_shards = shards;
        self
    }

    /// Set the default replica count.
    pub fn with_default_replicas(mut self, replicas: usize) -> Self {
        self.default_replicas = replicas;
        self
    }

    /// Set the connection-pool discovery mode.
    pub fn with_connection_pool_mode(mut self, mode: ConnectionPoolMode) -> Self {
        self.connection_pool_mode = mode;
        self
    }

    /// Set the DNS namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the readiness timeout; `None` waits forever (`-1` in the flow description).
    pub fn with_timeout_ready(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ready = timeout;
        self
    }
}
