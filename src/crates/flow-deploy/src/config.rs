//! Deployment-wide defaults, mirroring `flow_core::config::FlowConfig`'s
//! "plain value, no globals" shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known ports every deployment binds, mirrored from
/// `K8sGrpcConnectionPool`'s constants in the reference implementation.
pub const PORT_IN: u16 = 8081;
pub const PORT_EXPOSE: u16 = 8080;
pub const PORT_USES_BEFORE: u16 = 8082;
pub const PORT_USES_AFTER: u16 = 8083;

/// Mirrors `flow_core::config::ConnectionPoolMode`; kept as its own type so
/// `flow-deploy` doesn't need a compile-time dependency on `flow-core`'s
/// enum just to read one flag threaded through the flow description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPoolMode {
    Enabled,
    Disabled,
}

/// Deployment-wide defaults consulted by the planner and runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// DNS namespace deployments are rendered under (`{name}.{namespace}.svc`).
    pub namespace: String,
    /// How pods discover each other; `Disabled` bakes a `connection_list` into the head.
    pub connection_pool_mode: ConnectionPoolMode,
    /// How long the runner waits for a pod's readiness probe before failing startup.
    pub timeout_ready: Option<Duration>,
    /// Grace window between SIGTERM and a forced kill during teardown.
    pub shutdown_grace: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            connection_pool_mode: ConnectionPoolMode::Enabled,
            timeout_ready: Some(Duration::from_secs(10)),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl DeployConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_connection_pool_mode(mut self, mode: ConnectionPoolMode) -> Self {
        self.connection_pool_mode = mode;
        self
    }

    pub fn with_timeout_ready(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ready = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DeployConfig::default();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.connection_pool_mode, ConnectionPoolMode::Enabled);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = DeployConfig::new()
            .with_namespace("prod")
            .with_connection_pool_mode(ConnectionPoolMode::Disabled);
        assert_eq!(cfg.namespace, "prod");
        assert_eq!(cfg.connection_pool_mode, ConnectionPoolMode::Disabled);
    }
}
