//! Test executors and helpers shared by the integration tests

#![allow(dead_code)]

use dagway::{ExecutionContext, Node, NodeExecutor};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Install the same fmt subscriber the server binary used; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_test_writer()
        .try_init();
}

/// Counts invocations; emits 1 + the first input (or 1 without inputs)
#[derive(Clone, Default)]
pub struct Counter {
    pub calls: Arc<AtomicUsize>,
}

impl Counter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NodeExecutor for Counter {
    fn type_tag(&self) -> &str {
        "counter"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        _node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let inputs = ctx.node_inputs().await?;
            let base = inputs.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(base + 1))
        })
    }
}

/// Execution window of a node
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub start: Instant,
    pub end: Instant,
}

impl Window {
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Sleeps `config.ms` milliseconds, records its window and peak concurrency,
/// then emits its own node ID
#[derive(Clone, Default)]
pub struct Sleeper {
    pub windows: Arc<Mutex<HashMap<String, Window>>>,
    in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl Sleeper {
    pub fn window(&self, node_id: &str) -> Window {
        self.windows.lock().unwrap()[node_id]
    }

    pub fn ran(&self, node_id: &str) -> bool {
        self.windows.lock().unwrap().contains_key(node_id)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl NodeExecutor for Sleeper {
    fn type_tag(&self) -> &str {
        "sleep"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        node.config_u64("ms")
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("missing 'ms'"))
    }

    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(node.config_u64("ms").unwrap_or(0))).await;
            let end = Instant::now();

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.windows
                .lock()
                .unwrap()
                .insert(node.id.clone(), Window { start, end });
            Ok(json!(node.id))
        })
    }
}

/// Always fails
pub struct Fail;

impl NodeExecutor for Fail {
    fn type_tag(&self) -> &str {
        "fail"
    }

    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { Err(anyhow::anyhow!("node {} is broken", node.id)) })
    }
}

/// Panics inside the executor
pub struct Panic;

impl NodeExecutor for Panic {
    fn type_tag(&self) -> &str {
        "panic"
    }

    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> anyhow::Result<Value> {
    panic!("executor bug")
}

/// Panics while validating its node
pub struct Fragile;

impl NodeExecutor for Fragile {
    fn type_tag(&self) -> &str {
        "fragile"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        panic!("validator bug on {}", node.id)
    }

    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        _node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { Ok(Value::Null) })
    }
}
