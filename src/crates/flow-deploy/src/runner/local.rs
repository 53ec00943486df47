//! Local-process backend: spawns each pod's head as a real child process and
//! supervises startup order, readiness, and teardown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::planner::PodDeploymentPlan;
use crate::runner::Closeable;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A pod's head, running as a local child process.
pub struct LocalProcess {
    pod: String,
    command: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl LocalProcess {
    pub fn new(pod: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self { pod: pod.into(), command: command.into(), args, child: Mutex::new(None) }
    }

    /// Build the process that would run `plan`'s head, using `runtime_bin`
    /// as the executable (a real deployment substitutes the pod's actual
    /// runtime entrypoint; tests substitute something trivial like `true`).
    pub fn from_plan(plan: &PodDeploymentPlan, runtime_bin: &str) -> Self {
        Self::new(plan.pod.clone(), runtime_bin, plan.head.args.clone())
    }
}

#[async_trait]
impl Closeable for LocalProcess {
    #[tracing::instrument(skip(self), fields(pod = %self.pod))]
    async fn start(&self) -> Result<()> {
        let child = Command::new(&self.command).args(&self.args).kill_on_drop(true).spawn()?;
        tracing::info!(pod = %self.pod, pid = child.id(), "started");
        *self.child.lock() = Some(child);
        Ok(())
    }

    async fn ready(&self) -> bool {
        // No network readiness probe without a real transport; a child that
        // is still running, or that has already exited cleanly, counts as
        // the local stand-in for "ready". Only a missing child or a nonzero
        // exit status counts as not-ready.
        let mut guard = self.child.lock();
        match guard.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => status.success(),
            _ => false,
        }
    }

    #[tracing::instrument(skip(self), fields(pod = %self.pod))]
    async fn close(&self) -> Result<()> {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            child.start_kill().map_err(|e| DeployError::fail_to_close(&self.pod, e.to_string()))?;
            let _ = child.wait().await;
            tracing::info!(pod = %self.pod, "closed");
        }
        Ok(())
    }
}

/// Kahn's-algorithm order over `plans`' `needs` edges, so [`LocalRunner`]
/// starts every pod after its dependencies.
fn topological_order(plans: &[PodDeploymentPlan]) -> Vec<String> {
    use std::collections::HashMap;

    let known: HashSet<&str> = plans.iter().map(|p| p.pod.as_str()).collect();
    let mut indegree: HashMap<&str, usize> = plans.iter().map(|p| (p.pod.as_str(), 0usize)).collect();
    for plan in plans {
        for dep in &plan.needs {
            if known.contains(dep.as_str()) {
                *indegree.get_mut(plan.pod.as_str()).unwrap() += 1;
            }
        }
    }
    let mut ready: Vec<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
    ready.sort();
    let mut order = Vec::with_capacity(plans.len());
    let successors: HashMap<&str, Vec<&str>> = {
        let mut m: HashMap<&str, Vec<&str>> = HashMap::new();
        for plan in plans {
            for dep in &plan.needs {
                if known.contains(dep.as_str()) {
                    m.entry(dep.as_str()).or_default().push(plan.pod.as_str());
                }
            }
        }
        m
    };
    while let Some(name) = ready.pop() {
        order.push(name.to_string());
        if let Some(succs) = successors.get(name) {
            for succ in succs {
                let deg = indegree.get_mut(succ).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    ready.push(succ);
                }
            }
        }
        ready.sort();
    }
    order
}

/// Supervises a whole plan's worth of [`LocalProcess`]es: starts them in
/// dependency order, waits for each to become ready within
/// [`DeployConfig::timeout_ready`], and on any failure tears down everything
/// already started, in reverse order.
pub struct LocalRunner {
    config: DeployConfig,
    runtime_bin: String,
    started: Mutex<Vec<(String, Arc<dyn Closeable>)>>,
}

impl LocalRunner {
    pub fn new(config: DeployConfig, runtime_bin: impl Into<String>) -> Self {
        Self { config, runtime_bin: runtime_bin.into(), started: Mutex::new(Vec::new()) }
    }

    #[tracing::instrument(skip(self, plans), fields(pod_count = plans.len()))]
    pub async fn start_all(&self, plans: &[PodDeploymentPlan]) -> Result<()> {
        let order = topological_order(plans);
        let mut started: Vec<(String, Arc<dyn Closeable>)> = Vec::new();

        for pod in &order {
            let plan = plans.iter().find(|p| &p.pod == pod).expect("pod from topo order exists");
            let proc: Arc<dyn Closeable> = Arc::new(LocalProcess::from_plan(plan, &self.runtime_bin));

            if let Err(e) = proc.start().await {
                tracing::error!(pod, error = %e, "failed to start; tearing down already-started pods");
                self.teardown(&started).await;
                return Err(DeployError::fail_to_start(pod.clone(), e.to_string()));
            }
            started.push((pod.clone(), proc.clone()));

            if !self.wait_ready(proc.as_ref()).await {
                tracing::error!(pod, "did not become ready in time; tearing down");
                self.teardown(&started).await;
                let timeout_ms = self.config.timeout_ready.map(|d| d.as_millis() as u64).unwrap_or(0);
                return Err(DeployError::ReadinessTimeout { pod: pod.clone(), timeout_ms });
            }
        }

        *self.started.lock() = started;
        Ok(())
    }

    async fn wait_ready(&self, proc: &dyn Closeable) -> bool {
        let poll = async {
            while !proc.ready().await {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        match self.config.timeout_ready {
            Some(timeout) => tokio::time::timeout(timeout, poll).await.is_ok(),
            None => {
                poll.await;
                true
            }
        }
    }

    async fn teardown(&self, started: &[(String, Arc<dyn Closeable>)]) {
        for (pod, proc) in started.iter().rev() {
            if let Err(e) = proc.close().await {
                tracing::warn!(pod, error = %e, "close failed during teardown");
            }
        }
    }

    /// Block until SIGTERM or SIGINT, then gracefully close every started
    /// pod in reverse startup order. Mirrors `test_runtime_captures_signals.py`.
    pub async fn run_until_signal(&self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
        let started = self.started.lock().clone();
        self.teardown(&started).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::planner::{DeploymentPlanner, to_dns_name};
    use flow_core::compiler::FlowCompiler;
    use flow_core::config::FlowConfig;

    fn plans() -> Vec<PodDeploymentPlan> {
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add("a", None).unwrap();
        c.add("b", None).unwrap();
        let graph = c.compile().unwrap();
        DeploymentPlanner::new(&graph, DeployConfig::default()).plan().unwrap()
    }

    #[test]
    fn topo_order_respects_needs() {
        let plans = plans();
        let order = topological_order(&plans);
        let pos_a = order.iter().position(|n| n == "a").unwrap();
        let pos_b = order.iter().position(|n| n == "b").unwrap();
        assert!(pos_a < pos_b);
    }

    #[tokio::test]
    async fn start_all_succeeds_with_true_as_runtime() {
        let plans = plans();
        let runner = LocalRunner::new(
            DeployConfig::default().with_timeout_ready(Some(Duration::from_secs(2))),
            "true",
        );
        runner.start_all(&plans).await.unwrap();
        assert_eq!(runner.started.lock().len(), 2);
    }

    #[tokio::test]
    async fn start_all_tears_down_on_missing_binary() {
        let plans = plans();
        let runner = LocalRunner::new(DeployConfig::default(), "this-binary-does-not-exist-xyz");
        let err = runner.start_all(&plans).await.unwrap_err();
        assert!(matches!(err, DeployError::FailToStart { .. }));
        assert!(runner.started.lock().is_empty());
    }

    #[test]
    fn dns_name_used_for_workers_is_sanitized() {
        assert_eq!(to_dns_name("a/b_c"), "a-b-c");
    }
}
