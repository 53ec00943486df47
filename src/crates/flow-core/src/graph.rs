//! The compiled, immutable graph model (C1).
//!
//! A [`Graph`] is a DAG of [`Node`]s wired together by `needs` edges. It is
//! produced once, by [`crate::compiler::FlowCompiler::compile`], and never
//! mutated afterward — every request dispatched against it (see
//! [`crate::dispatch`]) reads the same frozen structure concurrently.
//!
//! # Reserved names
//!
//! `gateway`, `start-gateway`, and `end-gateway` are synthetic nodes: the
//! client's raw request enters at `start-gateway` and the consolidated
//! response leaves from `end-gateway`. User-declared nodes may not use these
//! names (see [`crate::error::GraphError::ReservedName`]).
//!
//! # Example
//!
//! ```rust
//! use flow_core::graph::{Graph, Node, NodeKind};
//!
//! let mut graph = Graph::new();
//! graph.insert_node(Node::new("encoder", NodeKind::Head));
//! graph.insert_node(Node::new("ranker", NodeKind::Head));
//! graph.add_edge("encoder", "ranker");
//! assert_eq!(graph.node("ranker").unwrap().number_of_parts, 1);
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Synthetic entry node; receives the client's raw request.
pub const START_GATEWAY: &str = "start-gateway";
/// Synthetic exit node; its predecessors' outputs are the client-visible response.
pub const END_GATEWAY: &str = "end-gateway";
/// Reserved alias accepted in `needs` to mean "wire from the flow's entry point".
pub const GATEWAY: &str = "gateway";

/// True if `name` collides with one of the three synthetic node names.
pub fn is_reserved_name(name: &str) -> bool {
    matches!(name, GATEWAY | START_GATEWAY | END_GATEWAY)
}

/// The role a node plays when it is later expanded into deployments (§C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The flow's single entry/exit point.
    Gateway,
    /// A synthetic front-door that fans out to a pod's shards and merges their replies.
    Head,
    /// A user-declared processing unit.
    Worker,
}

/// Per-endpoint fan-out policy: broadcast to every shard, or load-balance to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollingMode {
    /// Route to exactly one shard (consistent-hashed across requests).
    Any,
    /// Broadcast to every shard; the head merges replies before returning.
    All,
}

/// Per-endpoint polling rules for a node with `shards > 1`.
///
/// `'*'` is always present after normalization (see
/// [`crate::compiler::FlowCompiler`]) and acts as the fallback for any
/// endpoint without a more specific entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingPolicy {
    default: PollingMode,
    overrides: HashMap<String, PollingMode>,
}

impl PollingPolicy {
    /// A policy where every endpoint uses `ANY`.
    pub fn any() -> Self {
        Self {
            default: PollingMode::Any,
            overrides: HashMap::new(),
        }
    }

    /// Build from a default mode plus per-endpoint overrides.
    pub fn new(default: PollingMode, overrides: HashMap<String, PollingMode>) -> Self {
        Self { default, overrides }
    }

    /// Resolve the mode for a given endpoint. `ALL` entries are authoritative:
    /// an explicit `ALL` override always wins, even over a looser default.
    pub fn resolve(&self, endpoint: &str) -> PollingMode {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.default)
    }

    /// Set (or replace) the policy for a specific endpoint.
    pub fn set(&mut self, endpoint: impl Into<String>, mode: PollingMode) {
        self.overrides.insert(endpoint.into(), mode);
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::any()
    }
}

/// A sidecar executor that wraps a node's head (`uses_before`/`uses_after`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarSpec {
    /// Executor reference (path / class / container URI), mirrors `uses`.
    pub uses: String,
    /// Key/value environment passed to the sidecar process.
    pub env: HashMap<String, String>,
}

impl SidecarSpec {
    /// Construct a sidecar with no environment overrides.
    pub fn new(uses: impl Into<String>) -> Self {
        Self {
            uses: uses.into(),
            env: HashMap::new(),
        }
    }
}

/// One logical pod in the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique name within the flow.
    pub name: String,
    /// Gateway / head / worker role.
    pub kind: NodeKind,
    /// Predecessor node names (edges point predecessor → node).
    pub needs: Vec<String>,
    /// Successor node names, derived as edges are added.
    pub outgoing: Vec<String>,
    /// Count of distinct incoming edges; input-arrival threshold for dispatch.
    pub number_of_parts: usize,
    /// Logical parallel partitions of the same executor.
    pub shards: usize,
    /// Redundant copies of each shard.
    pub replicas: usize,
    /// Per-endpoint `ANY`/`ALL` fan-out policy.
    pub polling_policy: PollingPolicy,
    /// True iff this node has no outgoing edges and is not a terminal.
    pub hanging: bool,
    /// Executor reference (path / class / container URI).
    pub uses: Option<String>,
    /// Sidecar invoked before the main executor on the head.
    pub uses_before: Option<SidecarSpec>,
    /// Sidecar invoked after the main executor on the head.
    pub uses_after: Option<SidecarSpec>,
    /// Key/value environment passed to the runtime.
    pub env: HashMap<String, String>,
    /// Optional GPU count hint consumed by the Runner Adapter; not scheduled on here.
    pub gpu_count: Option<u32>,
}

impl Node {
    /// Construct a node with default parallelism (`shards=1`, `replicas=1`) and `ANY` polling.
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            needs: Vec::new(),
            outgoing: Vec::new(),
            number_of_parts: 1,
            shards: 1,
            replicas: 1,
            polling_policy: PollingPolicy::default(),
            hanging: false,
            uses: None,
            uses_before: None,
            uses_after: None,
            env: HashMap::new(),
            gpu_count: None,
        }
    }

    /// True iff this node has no declared successors.
    pub fn is_leaf(&self) -> bool {
        self.outgoing.is_empty()
    }
}

/// The compiled, immutable DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    /// All nodes, including the user-visible ones but excluding the two
    /// gateways, keyed by name.
    pub nodes: HashMap<String, Node>,
    /// Node names that receive the client's raw request, in declaration order.
    pub origins: Vec<String>,
    /// Node names whose outputs feed `end-gateway`.
    pub terminals: HashSet<String>,
}

impl Graph {
    /// An empty graph with no nodes, origins, or terminals.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            origins: Vec::new(),
            terminals: HashSet::new(),
        }
    }

    /// Insert a node. Does not wire any edges; panics in debug builds are
    /// avoided in favor of a later [`Self::validate`] pass, so duplicate
    /// inserts silently overwrite — callers (the compiler) are expected to
    /// check [`GraphError::DuplicateName`] themselves before calling this.
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Wire a `from -> to` edge: appends `to` to `from`'s outgoing list and
    /// `from` to `to`'s needs list, and bumps `to`'s `number_of_parts`.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if let Some(n) = self.nodes.get_mut(from) {
            n.outgoing.push(to.to_string());
        }
        if let Some(n) = self.nodes.get_mut(to) {
            n.needs.push(from.to_string());
            n.number_of_parts = n.needs.len().max(1);
        }
    }

    /// Check all §3 invariants: acyclicity, reachability of every non-origin
    /// node from some origin, reachability of every terminal by forward walk,
    /// the `hanging` flag definition, and unique/non-reserved names.
    pub fn validate(&self) -> Result<()> {
        for name in self.nodes.keys() {
            if is_reserved_name(name) {
                return Err(GraphError::reserved_name(name.clone()));
            }
        }

        self.check_acyclic()?;
        self.check_reachable_from_origins()?;
        self.check_terminals_reachable()?;
        self.check_hanging_flags()?;

        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = self
            .nodes
            .keys()
            .map(|k| (k.as_str(), Mark::Unvisited))
            .collect();

        fn visit<'a>(
            name: &'a str,
            nodes: &'a HashMap<String, Node>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(GraphError::cycle_detected(name)),
                _ => {}
            }
            marks.insert(name, Mark::InProgress);
            if let Some(node) = nodes.get(name) {
                for next in &node.outgoing {
                    visit(next, nodes, marks)?;
                }
            }
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in self.nodes.keys() {
            visit(name, &self.nodes, &mut marks)?;
        }
        Ok(())
    }

    fn check_reachable_from_origins(&self) -> Result<()> {
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.origins.iter().map(|s| s.as_str()).collect();
        while let Some(name) = stack.pop() {
            if !reachable.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                for next in &node.outgoing {
                    stack.push(next.as_str());
                }
            }
        }
        for name in self.nodes.keys() {
            if !reachable.contains(name.as_str()) {
                return Err(GraphError::Validation(format!(
                    "node {name} is not reachable from any origin"
                )));
            }
        }
        Ok(())
    }

    fn check_terminals_reachable(&self) -> Result<()> {
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.origins.iter().map(|s| s.as_str()).collect();
        while let Some(name) = stack.pop() {
            if !reachable.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                for next in &node.outgoing {
                    stack.push(next.as_str());
                }
            }
        }
        for terminal in &self.terminals {
            if !reachable.contains(terminal.as_str()) {
                return Err(GraphError::Validation(format!(
                    "terminal {terminal} is not reachable from any origin"
                )));
            }
        }
        Ok(())
    }

    fn check_hanging_flags(&self) -> Result<()> {
        for (name, node) in &self.nodes {
            let should_hang = node.is_leaf() && !self.terminals.contains(name);
            if node.hanging != should_hang {
                return Err(GraphError::Validation(format!(
                    "node {name} hanging={} but should be {should_hang}",
                    node.hanging
                )));
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(name: &str) -> Node {
        Node::new(name, NodeKind::Head)
    }

    #[test]
    fn diamond_graph_parts_and_validation() {
        let mut g = Graph::new();
        g.insert_node(head("a"));
        g.insert_node(head("b"));
        g.insert_node(head("c"));
        g.insert_node(head("d"));
        g.add_edge("a", "b");
        g.add_edge("a", "c");
        g.add_edge("b", "d");
        g.add_edge("c", "d");
        g.origins.push("a".to_string());
        g.terminals.insert("d".to_string());

        assert_eq!(g.node("d").unwrap().number_of_parts, 2);
        g.validate().unwrap();
    }

    #[test]
    fn reserved_name_rejected() {
        let mut g = Graph::new();
        g.insert_node(head(START_GATEWAY));
        g.origins.push(START_GATEWAY.to_string());
        assert!(matches!(g.validate(), Err(GraphError::ReservedName(_))));
    }

    #[test]
    fn cycle_detected() {
        let mut g = Graph::new();
        g.insert_node(head("a"));
        g.insert_node(head("b"));
        g.add_edge("a", "b");
        g.add_edge("b", "a");
        g.origins.push("a".to_string());
        assert!(matches!(g.validate(), Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn hanging_flag_must_match_topology() {
        let mut g = Graph::new();
        let mut a = head("a");
        a.hanging = true; // wrong: a is a leaf AND a terminal
        g.insert_node(a);
        g.origins.push("a".to_string());
        g.terminals.insert("a".to_string());
        assert!(matches!(g.validate(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn polling_policy_all_is_authoritative() {
        let mut policy = PollingPolicy::any();
        policy.set("/custom", PollingMode::All);
        assert_eq!(policy.resolve("/custom"), PollingMode::All);
        assert_eq!(policy.resolve("/search"), PollingMode::Any);
    }
}
