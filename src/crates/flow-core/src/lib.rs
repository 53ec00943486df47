//! # flow-core — the request-routing core of a DAG executor-orchestration framework
//!
//! Given a user-declared topology of processing units ("pods") and a stream
//! of client requests, this crate (a) compiles the topology into an
//! executable DAG, (b) dispatches requests through it honoring fan-out
//! (shards), replication, and merge points, and (c) records a per-node route
//! trace alongside the consolidated response.
//!
//! ## Module map
//!
//! - [`graph`] — the immutable, compiled [`graph::Graph`] model (Node, edges, invariants).
//! - [`compiler`] — [`compiler::FlowCompiler`], the incremental builder that produces a `Graph`.
//! - [`config`] — [`config::FlowConfig`], flow-wide defaults threaded explicitly rather than read from globals.
//! - [`connection`] — the [`connection::ConnectionPool`] trait and its in-process reference implementation.
//! - [`dispatch`] — [`dispatch::DispatchEngine`], the async fan-out/fan-in walker.
//! - [`trace`] — route-trace entries attached to each response.
//! - [`retry`] — exponential backoff used by the Connection Pool's bounded retry.
//! - [`error`] — the crate-wide error taxonomy.
//!
//! ## Quick start
//!
//! ```rust
//! use flow_core::compiler::FlowCompiler;
//! use flow_core::config::FlowConfig;
//! use flow_core::connection::InProcessPool;
//! use flow_core::dispatch::DispatchEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> flow_core::error::Result<()> {
//! let mut flow = FlowCompiler::new(FlowConfig::default());
//! flow.add("encoder", None)?;
//! flow.add("ranker", None)?;
//! let graph = Arc::new(flow.compile()?);
//!
//! let pool = Arc::new(InProcessPool::new());
//! // pool.register_head("encoder", ...); pool.register_head("ranker", ...);
//!
//! let engine = DispatchEngine::new(graph, pool);
//! let (_response, _metadata, _routes) = engine.dispatch(json!({"text": "hello"}), "/search").await;
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod retry;
pub mod trace;

pub use compiler::FlowCompiler;
pub use config::FlowConfig;
pub use connection::{ConnectionPool, InProcessPool};
pub use dispatch::DispatchEngine;
pub use error::{GraphError, Result};
pub use graph::Graph;
