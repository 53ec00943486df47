//! Deployment Planner (C5) — expands a compiled [`flow_core::graph::Graph`]
//! into one [`PodDeploymentPlan`] per node: a synthetic HEAD plus one worker
//! deployment per shard.
//!
//! Grounded directly on `K8sPodConfig`/`_K8sDeployment` in
//! `jina/peapods/pods/config/k8s.py`: every non-gateway pod gets a HEAD
//! deployment (`uses=None`, `port_in=K8S_PORT_IN`) fronting its shards, shard
//! workers are named `{name}-{i}` when `shards > 1` or bare `{name}`
//! otherwise, `uses_before`/`uses_after` become head-only sidecars reachable
//! over loopback, and a `connection_list` is baked into the head only when
//! the connection pool is disabled (`_get_deployment_args`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use flow_core::graph::{Graph, Node};

use crate::config::{ConnectionPoolMode, DeployConfig, PORT_IN, PORT_USES_AFTER, PORT_USES_BEFORE};
use crate::error::{DeployError, Result};

/// Sanitize a pod name into a DNS-compatible label: lowercase, `/` and `_`
/// become `-`. Grounded on `kubernetes_deployment.to_dns_name`.
pub fn to_dns_name(name: &str) -> String {
    name.replace('/', "-").replace('_', "-").to_lowercase()
}

/// The role a deployment plays, carried through to the Runner Adapter so it
/// knows which readiness port to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeaType {
    Head,
    Worker,
}

/// A sidecar rendered onto the head's container args, reachable over
/// loopback at a well-known port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarDeployment {
    pub uses: String,
    pub port_in: u16,
    pub address: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// The synthetic front door for one pod: receives every request addressed to
/// the pod, fans out to its shards/replicas, and runs `uses_before`/
/// `uses_after` sidecars around the main executor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadDeployment {
    pub name: String,
    pub dns_name: String,
    pub pea_type: PeaType,
    pub port_in: u16,
    /// Populated only when the connection pool is disabled: shard index -> address.
    pub connection_list: Option<HashMap<String, String>>,
    pub uses_before: Option<SidecarDeployment>,
    pub uses_after: Option<SidecarDeployment>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// One shard's worker deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDeployment {
    pub name: String,
    pub dns_name: String,
    pub pea_type: PeaType,
    pub shard_id: Option<usize>,
    pub replicas: usize,
    pub port_in: u16,
    pub uses: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub gpu_count: Option<u32>,
}

/// The full deployment plan for one pod: its head plus every shard worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodDeploymentPlan {
    pub pod: String,
    /// Topological predecessors, carried through so the Runner Adapter can
    /// start/tear down pods in dependency order without re-reading the graph.
    pub needs: Vec<String>,
    pub head: HeadDeployment,
    pub workers: Vec<WorkerDeployment>,
}

/// Fields re-injected explicitly after the generic arg pass, for correct
/// escaping — mirrors the `taboo={'uses_with', 'uses_metas', 'volumes'}` set
/// in `_construct_runtime_container_args`. Here `env` plays the role
/// `uses_with` played in the original: an arbitrary key/value map that must
/// be JSON-encoded rather than flattened into bare `--flag value` pairs.
fn build_container_args(node: &Node, pea_type: PeaType, shard_id: Option<usize>) -> Result<Vec<String>> {
    let mut args = vec!["executor".to_string(), "--name".to_string(), node.name.clone()];

    if let Some(uses) = &node.uses {
        args.push("--uses".to_string());
        args.push(uses.clone());
    }
    if pea_type == PeaType::Worker {
        args.push("--shards".to_string());
        args.push(node.shards.to_string());
        args.push("--replicas".to_string());
        args.push(node.replicas.to_string());
    }
    if let Some(shard_id) = shard_id {
        args.push("--shard-id".to_string());
        args.push(shard_id.to_string());
    }
    if let Some(gpu) = node.gpu_count {
        args.push("--gpus".to_string());
        args.push(gpu.to_string());
    }
    if pea_type == PeaType::Head {
        args.push("--native".to_string());
    }

    if !node.env.is_empty() {
        args.push("--uses-with".to_string());
        args.push(serde_json::to_string(&node.env)?);
    }

    Ok(args)
}

fn connection_list(node: &Node, namespace: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let dns = to_dns_name(&node.name);
    for i in 0..node.shards {
        let shard_dns = if node.shards > 1 { format!("{dns}-{i}") } else { dns.clone() };
        map.insert(i.to_string(), format!("{shard_dns}.{namespace}.svc:{PORT_IN}"));
    }
    map
}

fn sidecar(node: &Node, which_before: bool) -> Result<Option<SidecarDeployment>> {
    let spec = if which_before { &node.uses_before } else { &node.uses_after };
    let Some(spec) = spec else { return Ok(None) };
    let port = if which_before { PORT_USES_BEFORE } else { PORT_USES_AFTER };
    let mut args = vec!["executor".to_string(), "--uses".to_string(), spec.uses.clone()];
    if !spec.env.is_empty() {
        args.push("--uses-with".to_string());
        args.push(serde_json::to_string(&spec.env)?);
    }
    Ok(Some(SidecarDeployment {
        uses: spec.uses.clone(),
        port_in: port,
        address: format!("127.0.0.1:{port}"),
        args,
        env: spec.env.clone(),
    }))
}

/// Expands a compiled graph into a deployment plan, one entry per node.
pub struct DeploymentPlanner<'a> {
    graph: &'a Graph,
    config: DeployConfig,
}

impl<'a> DeploymentPlanner<'a> {
    pub fn new(graph: &'a Graph, config: DeployConfig) -> Self {
        Self { graph, config }
    }

    #[tracing::instrument(skip(self), fields(node_count = self.graph.nodes.len()))]
    pub fn plan(&self) -> Result<Vec<PodDeploymentPlan>> {
        let mut plans = Vec::with_capacity(self.graph.nodes.len());
        for name in self.graph.nodes.keys() {
            plans.push(self.plan_one(name)?);
        }
        plans.sort_by(|a, b| a.pod.cmp(&b.pod));
        Ok(plans)
    }

    fn plan_one(&self, name: &str) -> Result<PodDeploymentPlan> {
        let node = self.graph.node(name).ok_or_else(|| DeployError::unknown_node(name))?;
        let dns_name = to_dns_name(&node.name);

        let connection_list = match self.config.connection_pool_mode {
            ConnectionPoolMode::Disabled => Some(connection_list(node, &self.config.namespace)),
            ConnectionPoolMode::Enabled => None,
        };

        let head_args = build_container_args(node, PeaType::Head, None)?;
        let head = HeadDeployment {
            name: node.name.clone(),
            dns_name: dns_name.clone(),
            pea_type: PeaType::Head,
            port_in: PORT_IN,
            connection_list,
            uses_before: sidecar(node, true)?,
            uses_after: sidecar(node, false)?,
            args: head_args,
            env: node.env.clone(),
        };

        let mut workers = Vec::with_capacity(node.shards);
        for i in 0..node.shards {
            let worker_name = if node.shards > 1 { format!("{}-{i}", node.name) } else { node.name.clone() };
            let args = build_container_args(node, PeaType::Worker, Some(i))?;
            workers.push(WorkerDeployment {
                name: worker_name.clone(),
                dns_name: to_dns_name(&worker_name),
                pea_type: PeaType::Worker,
                shard_id: if node.shards > 1 { Some(i) } else { None },
                replicas: node.replicas,
                port_in: PORT_IN,
                uses: node.uses.clone(),
                args,
                env: node.env.clone(),
                gpu_count: node.gpu_count,
            });
        }

        Ok(PodDeploymentPlan {
            pod: node.name.clone(),
            needs: node.needs.clone(),
            head,
            workers,
        })
    }
}
