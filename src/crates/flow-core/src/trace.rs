//! Route Tracer (C7) — per-node timing/status attached to each response.
//!
//! Grounded directly on the reference topology walker's `add_route`: a node
//! contributes an entry only if it actually ran (`start_time` was set), each
//! node contributes at most one entry even when reached via multiple paths,
//! and entries are appended pre-order from the origins through `outgoing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::graph::Graph;

/// One node's contribution to a response's route trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// The node name.
    pub pod: String,
    /// When the node's Connection Pool call was issued.
    pub start_time: DateTime<Utc>,
    /// When the node's Connection Pool call returned, if it has.
    pub end_time: Option<DateTime<Utc>>,
    /// Status string carried back from the head, if the call errored.
    pub status: Option<String>,
}

/// The full route trace attached to a response.
pub type RouteTrace = Vec<RouteEntry>;

/// Per-node timing captured during one dispatch, fed into [`append_routes`].
#[derive(Debug, Clone)]
pub struct NodeTiming {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// Walk `graph` pre-order from `origins`, appending one [`RouteEntry`] per
/// node whose timing shows it actually ran, deduplicated by pod name.
pub fn append_routes(
    graph: &Graph,
    origins: &[String],
    timings: &std::collections::HashMap<String, NodeTiming>,
) -> RouteTrace {
    let mut routes = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = origins.iter().map(|s| s.as_str()).rev().collect();

    while let Some(name) = stack.pop() {
        if seen.contains(name) {
            if let Some(node) = graph.node(name) {
                // Still need to walk descendants even if we don't re-add the entry.
                for next in node.outgoing.iter().rev() {
                    stack.push(next.as_str());
                }
            }
            continue;
        }
        seen.insert(name);

        if let Some(timing) = timings.get(name) {
            if let Some(start_time) = timing.start_time {
                routes.push(RouteEntry {
                    pod: name.to_string(),
                    start_time,
                    end_time: timing.end_time,
                    status: timing.status.clone(),
                });
            }
        }

        if let Some(node) = graph.node(name) {
            for next in node.outgoing.iter().rev() {
                stack.push(next.as_str());
            }
        }
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeKind};
    use std::collections::HashMap;

    fn timing(start: DateTime<Utc>) -> NodeTiming {
        NodeTiming {
            start_time: Some(start),
            end_time: Some(start),
            status: None,
        }
    }

    #[test]
    fn trace_completeness_for_diamond() {
        let mut g = Graph::new();
        for name in ["a", "b", "c", "d"] {
            g.insert_node(Node::new(name, NodeKind::Worker));
        }
        g.add_edge("a", "b");
        g.add_edge("a", "c");
        g.add_edge("b", "d");
        g.add_edge("c", "d");
        g.origins.push("a".to_string());
        g.terminals.insert("d".to_string());

        let t0 = Utc::now();
        let mut timings = HashMap::new();
        for name in ["a", "b", "c", "d"] {
            timings.insert(name.to_string(), timing(t0));
        }

        let routes = append_routes(&g, &g.origins.clone(), &timings);
        let pods: HashSet<_> = routes.iter().map(|r| r.pod.clone()).collect();
        assert_eq!(pods, HashSet::from(["a", "b", "c", "d"].map(String::from)));
        // d reached via two paths but appears exactly once.
        assert_eq!(routes.iter().filter(|r| r.pod == "d").count(), 1);
    }

    #[test]
    fn unvisited_nodes_produce_no_entry() {
        let mut g = Graph::new();
        g.insert_node(Node::new("a", NodeKind::Worker));
        g.insert_node(Node::new("b", NodeKind::Worker));
        g.add_edge("a", "b");
        g.origins.push("a".to_string());
        g.terminals.insert("b".to_string());

        let timings = HashMap::new(); // nobody ran
        let routes = append_routes(&g, &g.origins.clone(), &timings);
        assert!(routes.is_empty());
    }
}
