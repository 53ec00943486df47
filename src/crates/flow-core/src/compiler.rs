//! Graph Compiler (C2) — turns an incremental flow description into a compiled [`Graph`].
//!
//! `FlowCompiler` is the fluent builder developers use to declare a flow:
//!
//! ```rust
//! use flow_core::compiler::{FlowCompiler, InspectMode};
//! use flow_core::config::FlowConfig;
//!
//! # fn main() -> flow_core::error::Result<()> {
//! let mut flow = FlowCompiler::new(FlowConfig::default());
//! flow.add("encoder", None)?;
//! flow.add("ranker", None)?; // implicit needs = {"encoder"}
//! let graph = flow.compile()?;
//! assert_eq!(graph.node("ranker").unwrap().needs, vec!["encoder".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! `compile()` performs the synthetic wiring described in the design docs:
//! every node whose `needs` includes `"gateway"` (or has no declared `needs`
//! and is the first node added) becomes an origin of `start-gateway`; every
//! node with no declared successors at finalization time is wired to
//! `end-gateway` and becomes a terminal.

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::graph::{is_reserved_name, Graph, Node, NodeKind, PollingMode, PollingPolicy, SidecarSpec, GATEWAY};
use crate::config::FlowConfig;

/// Compile-time directive controlling how an `inspect()` side-node is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectMode {
    /// The inspector node is not added; structure is unchanged.
    Remove,
    /// Added as an outgoing-only sibling, marked `hanging=true`; dispatched
    /// but never awaited by the client-visible result.
    Hang,
    /// Added and merged into the main path; becomes a predecessor of the
    /// next node added after it.
    Collect,
}

/// Options accepted by [`FlowCompiler::add`], mirroring the external-interface
/// option table (§6). All fields are optional; unset fields fall back to
/// [`FlowConfig`] defaults.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Predecessor name(s). `None` defaults to `{previous node}`, or
    /// `{start-gateway}` for the very first node added.
    pub needs: Option<Vec<String>>,
    /// Executor reference (path / class / container URI).
    pub uses: Option<String>,
    /// Sidecar invoked before the main executor on the head.
    pub uses_before: Option<SidecarSpec>,
    /// Sidecar invoked after the main executor on the head.
    pub uses_after: Option<SidecarSpec>,
    /// Partition count (alias: `parallel`).
    pub shards: Option<usize>,
    /// Replica count per shard.
    pub replicas: Option<usize>,
    /// Per-endpoint polling overrides; `'*'` sets the default.
    pub polling: HashMap<String, PollingMode>,
    /// Key/value environment passed to the runtime.
    pub env: HashMap<String, String>,
    /// GPU count hint, carried through to the Deployment Planner unreasoned-about.
    pub gpu_count: Option<u32>,
}

struct PendingNode {
    node: Node,
    needs: Vec<String>,
}

/// Incremental builder for a [`Graph`]. See module docs for the wiring rules
/// it applies at [`Self::compile`] time.
pub struct FlowCompiler {
    config: FlowConfig,
    pending: Vec<PendingNode>,
    order: Vec<String>,
    last_added: Option<String>,
    /// Pending `needs` override applied by `needs`/`join` to the *next* call
    /// to `add`, or, when no further `add` follows, treated as a standalone
    /// join node's dependency set.
}

impl FlowCompiler {
    /// Start a new, empty compiler with the given defaults.
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            order: Vec::new(),
            last_added: None,
        }
    }

    fn default_polling_policy(&self, opts: &AddOptions) -> PollingPolicy {
        let mut policy = PollingPolicy::new(self.config.default_polling, HashMap::new());
        for (endpoint, mode) in &opts.polling {
            if endpoint == "*" {
                policy = PollingPolicy::new(*mode, HashMap::new());
            } else {
                policy.set(endpoint.clone(), *mode);
            }
        }
        // Re-apply explicit overrides (the '*' branch above resets them).
        for (endpoint, mode) in &opts.polling {
            if endpoint != "*" {
                policy.set(endpoint.clone(), *mode);
            }
        }
        policy
    }

    /// Declare a node. Errors immediately on a duplicate or reserved name;
    /// dependency resolution and reachability are checked at [`Self::compile`].
    pub fn add(&mut self, name: impl Into<String>, opts: impl Into<Option<AddOptions>>) -> Result<&mut Self> {
        let name = name.into();
        let opts = opts.into().unwrap_or_default();

        if is_reserved_name(&name) {
            return Err(GraphError::reserved_name(name));
        }
        if self.pending.iter().any(|p| p.node.name == name) {
            return Err(GraphError::duplicate_name(name));
        }

        let needs = opts.needs.clone().unwrap_or_else(|| {
            match &self.last_added {
                Some(prev) => vec![prev.clone()],
                None => vec![GATEWAY.to_string()],
            }
        });

        let mut node = Node::new(&name, NodeKind::Worker);
        node.uses = opts.uses.clone();
        node.uses_before = opts.uses_before.clone();
        node.uses_after = opts.uses_after.clone();
        node.shards = opts.shards.unwrap_or(self.config.default_shards);
        node.replicas = opts.replicas.unwrap_or(self.config.default_replicas);
        node.env = opts.env.clone();
        node.gpu_count = opts.gpu_count;
        node.polling_policy = self.default_polling_policy(&opts);

        self.order.push(name.clone());
        self.last_added = Some(name.clone());
        self.pending.push(PendingNode { node, needs });
        Ok(self)
    }

    /// Explicit join: make `name` depend on exactly `needs`, overriding
    /// whatever implicit or `needs_all`-derived dependency set it had.
    /// Per the compile-time precedence rule, the **last** call for a given
    /// name wins outright rather than accumulating with earlier ones.
    pub fn needs(&mut self, names: Vec<String>, name: &str) -> Result<&mut Self> {
        let pending = self
            .pending
            .iter_mut()
            .find(|p| p.node.name == name)
            .ok_or_else(|| GraphError::unknown_dependency(name.to_string()))?;
        pending.needs = names;
        Ok(self)
    }

    /// Explicit join over all currently-leaf nodes (nodes with no declared
    /// successor yet). Leafness is evaluated against `needs` lists recorded
    /// so far, since outgoing edges aren't materialized until [`Self::compile`].
    pub fn needs_all(&mut self, name: &str) -> Result<&mut Self> {
        let leaves = self.current_leaf_names(name);
        self.needs(leaves, name)
    }

    /// Sugar for [`Self::needs_all`] restricted to the provided name set.
    pub fn join(&mut self, names: Vec<String>, name: &str) -> Result<&mut Self> {
        self.needs(names, name)
    }

    fn current_leaf_names(&self, exclude: &str) -> Vec<String> {
        let mut has_successor: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for p in &self.pending {
            // `exclude`'s own needs (its implicit or explicit predecessor)
            // don't count as giving that predecessor a successor — otherwise
            // `add(exclude, None)` chaining from the very node we're about
            // to join would suppress it from its own leaf set.
            if p.node.name == exclude {
                continue;
            }
            for dep in &p.needs {
                has_successor.insert(dep.as_str());
            }
        }
        self.pending
            .iter()
            .filter(|p| p.node.name != exclude && !has_successor.contains(p.node.name.as_str()))
            .map(|p| p.node.name.clone())
            .collect()
    }

    /// Insert an inspector node off the last node added, per `mode`.
    pub fn inspect(&mut self, uses: impl Into<String>, mode: InspectMode) -> Result<&mut Self> {
        if mode == InspectMode::Remove {
            return Ok(self);
        }
        let anchor = self
            .last_added
            .clone()
            .ok_or_else(|| GraphError::Validation("inspect() called before any node was added".to_string()))?;
        let inspect_name = format!("{anchor}-inspect");

        let mut node = Node::new(&inspect_name, NodeKind::Worker);
        node.uses = Some(uses.into());

        match mode {
            InspectMode::Hang => {
                node.hanging = true;
                self.pending.push(PendingNode {
                    node,
                    needs: vec![anchor],
                });
                // Hanging inspector does not become `last_added`: the main
                // path continues from its original anchor.
            }
            InspectMode::Collect => {
                self.pending.push(PendingNode {
                    node,
                    needs: vec![anchor],
                });
                self.last_added = Some(inspect_name.clone());
                self.order.push(inspect_name);
            }
            InspectMode::Remove => unreachable!(),
        }
        Ok(self)
    }

    /// Finalize: wire synthetic gateways, compute `hanging`/terminals, and validate.
    pub fn compile(&mut self) -> Result<Graph> {
        let mut graph = Graph::new();

        for p in &self.pending {
            graph.insert_node(p.node.clone());
        }

        // Wire explicit needs edges (excluding the synthetic gateway alias).
        for p in &self.pending {
            for dep in &p.needs {
                if dep == GATEWAY {
                    continue;
                }
                if !graph.nodes.contains_key(dep) {
                    return Err(GraphError::unknown_dependency(dep.clone()));
                }
                graph.add_edge(dep, &p.node.name);
            }
        }

        // Origins: nodes whose needs include the gateway alias, in declaration order.
        for p in &self.pending {
            if p.needs.iter().any(|d| d == GATEWAY) {
                graph.origins.push(p.node.name.clone());
            }
        }

        // Terminals: a non-hanging node whose every successor is hanging
        // (vacuously true for a true leaf with no successors at all) feeds
        // end-gateway. A HANG-mode inspect() gives its anchor an outgoing
        // edge to the hanging inspector, so a plain `is_leaf()` check would
        // wrongly drop the anchor from the terminal set.
        for name in self.order.clone() {
            let Some(node) = graph.node(&name) else { continue };
            if node.hanging {
                continue;
            }
            let all_successors_hanging = node
                .outgoing
                .iter()
                .all(|succ| graph.node(succ).map(|s| s.hanging).unwrap_or(false));
            if all_successors_hanging {
                graph.terminals.insert(name);
            }
        }

        graph.validate()?;
        Ok(graph)
    }
}
