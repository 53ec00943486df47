//! Dispatch Engine (C4) — walks a compiled [`Graph`], fans a client request
//! out across reachable nodes, fans the results back in, and returns the
//! consolidated response plus its route trace.
//!
//! Grounded on the reference topology walker: one task per node
//! (`NodeExecution`), each awaiting its parents' results before deciding
//! whether to short-circuit on `is-error` metadata or batch its
//! `parts_received` and call the Connection Pool once the batch is full.
//! Rust expresses the same shape with [`futures::future::Shared`] futures
//! built in topological order instead of Python `asyncio.Task`s, per the
//! "explicit task graph with typed result channels" re-architecture.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::connection::{error_metadata, is_error, ConnectionPool, Document, Metadata};
use crate::graph::Graph;
use crate::trace::{append_routes, NodeTiming, RouteTrace};

type NodeFuture = Shared<BoxFuture<'static, (Document, Metadata)>>;

/// Cooperative cancellation signal threaded through a dispatch. Dropping the
/// sender or calling [`CancelToken::cancel`] cascades to every outstanding
/// node task that is still awaiting its parents or a pool call.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// True if [`Self::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Topologically order `graph`'s nodes so every parent is built before its
/// children (Kahn's algorithm over `needs`). The graph is acyclic by
/// construction (checked at compile time), so this always terminates.
fn topological_order(graph: &Graph) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = graph
        .nodes
        .keys()
        .map(|k| (k.as_str(), 0usize))
        .collect();
    for node in graph.nodes.values() {
        for needed in &node.needs {
            if graph.nodes.contains_key(needed) {
                *indegree.get_mut(node.name.as_str()).unwrap() += 1;
            }
        }
    }
    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(name, _)| *name)
        .collect();
    ready.sort(); // deterministic order among multiple origins
    let mut order = Vec::with_capacity(graph.nodes.len());
    let mut indegree = indegree;
    while let Some(name) = ready.pop() {
        order.push(name.to_string());
        if let Some(node) = graph.nodes.get(name) {
            for next in &node.outgoing {
                if let Some(deg) = indegree.get_mut(next.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(next.as_str());
                    }
                }
            }
        }
        ready.sort();
    }
    order
}

/// Dispatches requests against a compiled [`Graph`] using a [`ConnectionPool`].
pub struct DispatchEngine<P: ConnectionPool + 'static> {
    graph: Arc<Graph>,
    pool: Arc<P>,
}

impl<P: ConnectionPool + 'static> DispatchEngine<P> {
    /// Build an engine bound to one compiled graph and one pool.
    pub fn new(graph: Arc<Graph>, pool: Arc<P>) -> Self {
        Self { graph, pool }
    }

    /// Dispatch `request` at `endpoint`, returning the consolidated response
    /// and its route trace. See module docs for the algorithm.
    #[tracing::instrument(skip(self, request), fields(node_count = self.graph.nodes.len()))]
    pub async fn dispatch(&self, request: Document, endpoint: &str) -> (Document, Metadata, RouteTrace) {
        self.dispatch_cancellable(request, endpoint, CancelToken::new()).await
    }

    /// Like [`Self::dispatch`], but cancels every outstanding node task as
    /// soon as `cancel` is triggered (e.g. because the client dropped).
    pub async fn dispatch_cancellable(
        &self,
        request: Document,
        endpoint: &str,
        cancel: CancelToken,
    ) -> (Document, Metadata, RouteTrace) {
        let order = topological_order(&self.graph);
        let timings: Arc<Mutex<HashMap<String, NodeTiming>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut futures_by_name: HashMap<String, NodeFuture> = HashMap::new();
        let origins: std::collections::HashSet<&str> =
            self.graph.origins.iter().map(|s| s.as_str()).collect();

        for name in &order {
            let node = self.graph.node(name).expect("node from topo order exists");
            let is_origin = origins.contains(name.as_str());

            let parent_futs: Vec<NodeFuture> = if is_origin {
                Vec::new()
            } else {
                node.needs
                    .iter()
                    .filter_map(|p| futures_by_name.get(p).cloned())
                    .collect()
            };

            let pool = self.pool.clone();
            let timings = timings.clone();
            let cancel = cancel.clone();
            let node_name = name.clone();
            let number_of_parts = node.number_of_parts;
            let hanging = node.hanging;
            let endpoint = endpoint.to_string();
            let request_for_origin = if is_origin { Some(request.clone()) } else { None };

            let work: BoxFuture<'static, (Document, Metadata)> = async move {
                if cancel.is_cancelled() {
                    return (Document::Null, error_metadata("cancelled"));
                }

                let mut parts: Vec<Document> = Vec::new();

                if let Some(req) = request_for_origin {
                    parts.push(req);
                } else {
                    for fut in parent_futs {
                        let awaited = tokio::select! {
                            r = fut => r,
                            _ = cancel.cancelled() => (Document::Null, error_metadata("cancelled")),
                        };
                        let (doc, meta) = awaited;
                        if is_error(&meta) {
                            // Short-circuit: propagate verbatim, never call this node's pool.
                            return (doc, meta);
                        }
                        parts.push(doc);
                    }
                }

                if parts.len() != number_of_parts {
                    // A parent silently produced nothing (e.g. it was itself
                    // hanging-adjacent); treated as a merge mismatch per the
                    // error taxonomy.
                    return (
                        Document::Null,
                        error_metadata(format!(
                            "node {node_name} expected {number_of_parts} parts, got {}",
                            parts.len()
                        )),
                    );
                }

                let start_time = chrono::Utc::now();
                let (resp, metadata) = tokio::select! {
                    r = pool.send_requests_once(parts, &node_name, true, &endpoint) => r,
                    _ = cancel.cancelled() => (Document::Null, error_metadata("cancelled")),
                };
                let end_time = chrono::Utc::now();

                let status = if is_error(&metadata) {
                    metadata.get("reason").cloned()
                } else {
                    None
                };

                timings.lock().insert(
                    node_name.clone(),
                    NodeTiming {
                        start_time: Some(start_time),
                        end_time: Some(end_time),
                        status,
                    },
                );

                let _ = hanging; // hanging-ness affects *awaiting*, not execution
                (resp, metadata)
            }
            .boxed();

            let shared = work.shared();
            // Drive eagerly: fan-out starts immediately, not only when a
            // downstream consumer first polls it.
            tokio::spawn(shared.clone());
            futures_by_name.insert(name.clone(), shared);
        }

        // Terminals (non-hanging leaves) are awaited in topological order for
        // determinism; hanging leaves are left detached — they were already
        // spawned above and their errors are simply never observed here.
        let mut terminal_results = Vec::new();
        for name in &order {
            if self.graph.terminals.contains(name) {
                if let Some(fut) = futures_by_name.get(name) {
                    terminal_results.push(fut.clone().await);
                }
            }
        }

        let (merged, metadata) = merge_terminal_responses(terminal_results);
        let timings = timings.lock().clone();
        let routes = append_routes(&self.graph, &self.graph.origins, &timings);
        (merged, metadata, routes)
    }
}

/// Concatenate terminal responses into one client-visible document list,
/// propagating the first `is-error` metadata encountered verbatim.
fn merge_terminal_responses(results: Vec<(Document, Metadata)>) -> (Document, Metadata) {
    for (doc, meta) in &results {
        if is_error(meta) {
            return (doc.clone(), meta.clone());
        }
    }
    let mut merged = Vec::new();
    for (doc, _meta) in results {
        match doc {
            Document::Array(items) => merged.extend(items),
            Document::Null => {}
            other => merged.push(other),
        }
    }
    (Document::Array(merged), Metadata::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{AddOptions, FlowCompiler};
    use crate::config::FlowConfig;
    use crate::connection::{HeadHandler, InProcessPool};
    use crate::graph::GATEWAY;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A realistic head: flattens its batch of parent responses (each itself
    /// possibly a document list) into one concatenated document list, the
    /// way a real pod's head merges before returning.
    fn flatten(docs: Vec<Document>) -> Document {
        let mut flat = Vec::new();
        for d in docs {
            match d {
                Value::Array(items) => flat.extend(items),
                other => flat.push(other),
            }
        }
        Value::Array(flat)
    }

    fn echo_head() -> HeadHandler {
        Arc::new(|docs: Vec<Document>, _endpoint: String| {
            async move { (flatten(docs), HashMap::new()) }.boxed()
        })
    }

    fn counting_head(counter: Arc<AtomicUsize>) -> HeadHandler {
        Arc::new(move |docs: Vec<Document>, _endpoint: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (flatten(docs), HashMap::new())
            }
            .boxed()
        })
    }

    fn failing_head() -> HeadHandler {
        Arc::new(|_docs: Vec<Document>, _endpoint: String| {
            async move { (Value::Null, error_metadata("boom")) }.boxed()
        })
    }

    #[tokio::test]
    async fn diamond_scenario() {
        // A -> {B, C} -> D
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add("a", None).unwrap();
        c.add(
            "b",
            AddOptions { needs: Some(vec!["a".to_string()]), ..Default::default() },
        )
        .unwrap();
        c.add(
            "c",
            AddOptions { needs: Some(vec!["a".to_string()]), ..Default::default() },
        )
        .unwrap();
        c.add(
            "d",
            AddOptions { needs: Some(vec!["b".to_string(), "c".to_string()]), ..Default::default() },
        )
        .unwrap();
        let graph = Arc::new(c.compile().unwrap());
        assert_eq!(graph.node("d").unwrap().number_of_parts, 2);

        let pool = Arc::new(InProcessPool::new());
        let d_calls = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            pool.register_head(name, echo_head());
        }
        pool.register_head("d", counting_head(d_calls.clone()));

        let engine = DispatchEngine::new(graph, pool);
        let (response, _metadata, routes) = engine.dispatch(json!("doc"), "/search").await;

        let pods: std::collections::HashSet<_> = routes.iter().map(|r| r.pod.clone()).collect();
        assert_eq!(
            pods,
            std::collections::HashSet::from(["a", "b", "c", "d"].map(String::from))
        );
        assert_eq!(d_calls.load(Ordering::SeqCst), 1);
        // D's batch holds one response per parent edge (B's and C's), each
        // itself carrying the one input document — fan-in duplicates rather
        // than deduplicates, per the merge contract.
        assert_eq!(response, json!(["doc", "doc"]));
    }

    #[tokio::test]
    async fn diverge_at_gateway_and_join() {
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add(
            "r2",
            AddOptions { needs: Some(vec![GATEWAY.to_string()]), ..Default::default() },
        )
        .unwrap();
        c.add(
            "r3",
            AddOptions { needs: Some(vec![GATEWAY.to_string()]), ..Default::default() },
        )
        .unwrap();
        c.add("merge", None).unwrap();
        c.needs_all("merge").unwrap();
        let graph = Arc::new(c.compile().unwrap());
        assert_eq!(graph.node("merge").unwrap().number_of_parts, 2);

        let pool = Arc::new(InProcessPool::new());
        pool.register_head("r2", echo_head());
        pool.register_head("r3", echo_head());
        let merge_calls = Arc::new(AtomicUsize::new(0));
        pool.register_head("merge", counting_head(merge_calls.clone()));

        let engine = DispatchEngine::new(graph, pool);
        let (_response, _metadata, routes) = engine.dispatch(json!("doc"), "/search").await;
        assert_eq!(merge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(routes.len(), 3);
    }

    #[tokio::test]
    async fn error_short_circuit() {
        // A -> B -> C, B always errors; C must never be invoked.
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add("a", None).unwrap();
        c.add("b", None).unwrap();
        c.add("c", None).unwrap();
        let graph = Arc::new(c.compile().unwrap());

        let pool = Arc::new(InProcessPool::new().with_retry_policy(
            crate::retry::RetryPolicy::new(1).with_initial_interval(0.0).with_jitter(false),
        ));
        pool.register_head("a", echo_head());
        pool.register_head("b", failing_head());
        let c_calls = Arc::new(AtomicUsize::new(0));
        pool.register_head("c", counting_head(c_calls.clone()));

        let engine = DispatchEngine::new(graph, pool);
        let (_response, metadata, routes) = engine.dispatch(json!("doc"), "/index").await;

        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        let pods: std::collections::HashSet<_> = routes.iter().map(|r| r.pod.clone()).collect();
        assert_eq!(pods, std::collections::HashSet::from(["a", "b"].map(String::from)));
        assert!(is_error(&metadata));
    }

    #[tokio::test]
    async fn hanging_node_errors_never_surface() {
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add("a", None).unwrap();
        c.inspect("inspector", crate::compiler::InspectMode::Hang).unwrap();
        let graph = Arc::new(c.compile().unwrap());
        assert!(graph.node("a-inspect").unwrap().hanging);

        let pool = Arc::new(InProcessPool::new().with_retry_policy(
            crate::retry::RetryPolicy::new(1).with_initial_interval(0.0).with_jitter(false),
        ));
        pool.register_head("a", echo_head());
        pool.register_head("a-inspect", failing_head());

        let engine = DispatchEngine::new(graph, pool);
        let (response, _metadata, routes) = engine.dispatch(json!("doc"), "/index").await;

        // The client-visible response only reflects the non-hanging terminal "a".
        assert_eq!(response, json!(["doc"]));
        let pods: std::collections::HashSet<_> = routes.iter().map(|r| r.pod.clone()).collect();
        assert!(pods.contains("a"));
    }
}
