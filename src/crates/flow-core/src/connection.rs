//! Connection Pool Interface (C3) — the seam between the Dispatch Engine and
//! a pod's head process.
//!
//! [`ConnectionPool`] is a trait so the dispatcher is agnostic to transport:
//! production deployments talk to real addresses over a network pool, while
//! [`InProcessPool`] (the reference implementation shipped here, used by
//! tests and local runs) calls registered handler closures directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::retry::RetryPolicy;

/// One client document/request body.
pub type Document = Value;

/// Flat key/value response metadata. The key `is-error` (value `"true"`)
/// signals short-circuit per the wire protocol.
pub type Metadata = HashMap<String, String>;

/// Build `is-error` metadata carrying a human-readable reason.
pub fn error_metadata(reason: impl Into<String>) -> Metadata {
    let mut m = HashMap::new();
    m.insert("is-error".to_string(), "true".to_string());
    m.insert("reason".to_string(), reason.into());
    m
}

/// True if `metadata` carries the `is-error` short-circuit marker.
pub fn is_error(metadata: &Metadata) -> bool {
    metadata.get("is-error").map(|v| v == "true").unwrap_or(false)
}

/// A pod's head + its shard/replica address book, as tracked by the pool.
#[derive(Debug, Clone, Default)]
struct PodMembership {
    /// Addresses per shard index; each entry is the shard's replica list.
    shards: Vec<Vec<String>>,
}

/// Handler for one pod's head, registered with [`InProcessPool`].
///
/// Receives the batched parts for a single dispatch and the endpoint label,
/// and returns the head's consolidated `(response, metadata)` — internally
/// responsible for fanning out to its own shards/replicas per the pod's
/// polling policy, exactly as a real head process would.
pub type HeadHandler = Arc<
    dyn Fn(Vec<Document>, String) -> futures::future::BoxFuture<'static, (Document, Metadata)>
        + Send
        + Sync,
>;

/// Sends one logical request to a pod's head and returns its reply.
///
/// Mirrors the wire protocol's single RPC method (§6): the pool does not
/// itself reason about `needs`/DAG structure — that's the Dispatch Engine's
/// job — it only knows how to reach a named pod's head.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Logically one RPC to `pod`'s head (`head` is always `true` for the
    /// Dispatch Engine's calls — internal shard fan-out happens on the
    /// other side of this boundary).
    async fn send_requests_once(
        &self,
        requests: Vec<Document>,
        pod: &str,
        head: bool,
        endpoint: &str,
    ) -> (Document, Metadata);

    /// Synchronous variant for bootstrapping readiness probes.
    async fn send_request_sync(&self, request: Document, target_address: &str) -> Document;

    /// Register a replica address for a shard of `pod`.
    fn add_connection(&self, pod: &str, shard: usize, address: &str);

    /// Remove a previously-registered replica address.
    fn remove_connection(&self, pod: &str, shard: usize, address: &str);
}

/// In-process reference implementation: pods are plain closures, not real
/// network endpoints. Suitable for local runs and the integration tests in
/// `tests/dispatch_scenarios.rs`.
pub struct InProcessPool {
    handlers: RwLock<HashMap<String, HeadHandler>>,
    membership: RwLock<HashMap<String, PodMembership>>,
    retry: RetryPolicy,
    rr_counters: RwLock<HashMap<(String, usize), usize>>,
}

impl InProcessPool {
    /// An empty pool with the default [`RetryPolicy`].
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            membership: RwLock::new(HashMap::new()),
            retry: RetryPolicy::default(),
            rr_counters: RwLock::new(HashMap::new()),
        }
    }

    /// Use a custom retry policy for bounded-retry-on-different-replica.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register the head handler for `pod`. Overwrites any existing handler.
    pub fn register_head(&self, pod: impl Into<String>, handler: HeadHandler) {
        self.handlers.write().insert(pod.into(), handler);
    }

    /// Resolve a polling mode for `pod`'s `endpoint`. Pods unknown to the
    /// pool default to `ANY` — the pool doesn't own the Graph Model, only
    /// the dispatcher knows a node's declared policy, so this is consulted
    /// only as a conservative fallback when the caller doesn't pass one.
    fn pick_replica(&self, pod: &str, shard: usize) -> Option<String> {
        let membership = self.membership.read();
        let replicas = membership.get(pod)?.shards.get(shard)?;
        if replicas.is_empty() {
            return None;
        }
        let mut counters = self.rr_counters.write();
        let counter = counters.entry((pod.to_string(), shard)).or_insert(0);
        let addr = replicas[*counter % replicas.len()].clone();
        *counter += 1;
        Some(addr)
    }
}

impl Default for InProcessPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPool for InProcessPool {
    async fn send_requests_once(
        &self,
        requests: Vec<Document>,
        pod: &str,
        _head: bool,
        endpoint: &str,
    ) -> (Document, Metadata) {
        let handler = self.handlers.read().get(pod).cloned();
        let Some(handler) = handler else {
            return (
                Value::Null,
                error_metadata(format!("no head registered for pod {pod}")),
            );
        };

        let mut attempts_made = 0;
        loop {
            let (resp, metadata) = handler(requests.clone(), endpoint.to_string()).await;
            attempts_made += 1;
            if !is_error(&metadata) || !self.retry.should_retry(attempts_made) {
                return (resp, metadata);
            }
            tokio::time::sleep(self.retry.calculate_delay(attempts_made - 1)).await;
        }
    }

    async fn send_request_sync(&self, request: Document, target_address: &str) -> Document {
        // The in-process pool has no real addresses; this is a readiness
        // probe stand-in that always succeeds for an address this pool
        // itself registered.
        tracing::debug!(target_address, "send_request_sync (in-process stub)");
        request
    }

    fn add_connection(&self, pod: &str, shard: usize, address: &str) {
        let mut membership = self.membership.write();
        let entry = membership.entry(pod.to_string()).or_default();
        while entry.shards.len() <= shard {
            entry.shards.push(Vec::new());
        }
        entry.shards[shard].push(address.to_string());
    }

    fn remove_connection(&self, pod: &str, shard: usize, address: &str) {
        let mut membership = self.membership.write();
        if let Some(entry) = membership.get_mut(pod) {
            if let Some(replicas) = entry.shards.get_mut(shard) {
                replicas.retain(|a| a != address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn echo_handler() -> HeadHandler {
        Arc::new(|docs: Vec<Document>, _endpoint: String| {
            async move { (Value::Array(docs), HashMap::new()) }.boxed()
        })
    }

    #[tokio::test]
    async fn send_requests_once_roundtrips() {
        let pool = InProcessPool::new();
        pool.register_head("ranker", echo_handler());
        let (resp, meta) = pool
            .send_requests_once(vec![Value::String("doc".into())], "ranker", true, "/search")
            .await;
        assert!(!is_error(&meta));
        assert_eq!(resp, Value::Array(vec![Value::String("doc".into())]));
    }

    #[tokio::test]
    async fn unregistered_pod_is_error() {
        let pool = InProcessPool::new();
        let (_resp, meta) = pool
            .send_requests_once(vec![], "ghost", true, "/search")
            .await;
        assert!(is_error(&meta));
    }

    #[tokio::test]
    async fn retries_before_giving_up() {
        let pool = InProcessPool::new().with_retry_policy(
            RetryPolicy::new(2).with_initial_interval(0.0).with_jitter(false),
        );
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler: HeadHandler = Arc::new(move |_docs, _endpoint| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                (Value::Null, error_metadata("always fails"))
            }
            .boxed()
        });
        pool.register_head("flaky", handler);
        let (_resp, meta) = pool.send_requests_once(vec![], "flaky", true, "/x").await;
        assert!(is_error(&meta));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn round_robin_across_replicas() {
        let pool = InProcessPool::new();
        pool.add_connection("ranker", 0, "replica-a");
        pool.add_connection("ranker", 0, "replica-b");
        let first = pool.pick_replica("ranker", 0).unwrap();
        let second = pool.pick_replica("ranker", 0).unwrap();
        assert_ne!(first, second);
    }
}
