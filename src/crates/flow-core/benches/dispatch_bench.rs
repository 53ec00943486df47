use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flow_core::compiler::{AddOptions, FlowCompiler};
use flow_core::config::FlowConfig;
use flow_core::connection::{Document, HeadHandler, InProcessPool};
use flow_core::dispatch::DispatchEngine;
use futures::future::FutureExt;
use serde_json::{json, Value};

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

/// A -> {B, C} -> D, the same diamond shape exercised in `dispatch::tests`.
fn diamond_dispatch_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("dispatch diamond graph", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut compiler = FlowCompiler::new(FlowConfig::default());
            compiler.add("a", None).unwrap();
            compiler
                .add("b", AddOptions { needs: Some(vec!["a".to_string()]), ..Default::default() })
                .unwrap();
            compiler
                .add("c", AddOptions { needs: Some(vec!["a".to_string()]), ..Default::default() })
                .unwrap();
            compiler
                .add(
                    "d",
                    AddOptions { needs: Some(vec!["b".to_string(), "c".to_string()]), ..Default::default() },
                )
                .unwrap();
            let graph = Arc::new(compiler.compile().unwrap());

            let pool = Arc::new(InProcessPool::new());
            for name in ["a", "b", "c", "d"] {
                pool.register_head(name, echo_head());
            }

            let engine = DispatchEngine::new(graph, pool);
            black_box(engine.dispatch(json!("doc"), "/search").await);
        });
    });
}

criterion_group!(benches, diamond_dispatch_benchmark);
criterion_main!(benches);
