//! Node executor registry
//!
//! Maps node type tags to executor implementations. Reads are lock-free via
//! ArcSwap: registering a new executor swaps the whole map atomically, so runs
//! resolving executors never block on registration.
//!
//! Graph-control-flow types (branching, looping, merging) are reserved. Only
//! the built-in implementations may answer to them.

use crate::error::{Error, Result};
use crate::runtime::context::ExecutionContext;
use crate::runtime::nodes;
use crate::workflow::{Graph, Node};
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Node type tags that callers may never register
pub const CONTROL_FLOW_TYPES: &[&str] = &["condition", "loop", "merge"];

/// Capability implemented by every node type, built-in or caller-supplied
pub trait NodeExecutor: Send + Sync + 'static {
    /// The type tag this executor answers to
    fn type_tag(&self) -> &str;

    /// Structural check of `node.config`, run for every node before execution starts
    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        let _ = node;
        Ok(())
    }

    /// Check that depends on the node's place in the graph, run after `validate`
    fn validate_in_graph(&self, graph: &Graph, node: &Node) -> anyhow::Result<()> {
        let _ = (graph, node);
        Ok(())
    }

    /// The node's computation
    ///
    /// Executors that iterate internally must call
    /// `ctx.increment_node_execution()` once per iteration, and executors that
    /// perform network calls must pass `ctx.admit_url()` and
    /// `ctx.increment_http_call()` before each call.
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>>;
}

type ExecutorMap = HashMap<String, Arc<dyn NodeExecutor>>;

/// Mapping from type tag to executor
///
/// An explicit value handed to each run, never process-wide state.
pub struct NodeRegistry {
    executors: ArcSwap<ExecutorMap>,
}

impl NodeRegistry {
    /// Empty registry with no node types
    pub fn new() -> Self {
        Self {
            executors: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Registry pre-populated with every built-in node type
    pub fn with_defaults() -> Self {
        let executors: ExecutorMap = nodes::builtin_executors()
            .into_iter()
            .map(|executor| (executor.type_tag().to_string(), executor))
            .collect();

        tracing::debug!("📦 Default registry with {} built-in node types", executors.len());

        Self {
            executors: ArcSwap::from_pointee(executors),
        }
    }

    /// Register a caller-supplied executor
    ///
    /// Refuses to overwrite an existing tag (`DuplicateType`) and refuses
    /// control-flow tags (`ReservedType`). Use a fresh registry to override a
    /// data-transformation type.
    pub fn register<E: NodeExecutor>(&self, executor: E) -> Result<()> {
        self.register_arc(Arc::new(executor))
    }

    /// Same as [`register`](Self::register) for an already shared executor
    pub fn register_arc(&self, executor: Arc<dyn NodeExecutor>) -> Result<()> {
        let tag = executor.type_tag().to_string();
        if CONTROL_FLOW_TYPES.contains(&tag.as_str()) {
            return Err(Error::ReservedType(tag));
        }

        let mut outcome = Ok(());
        self.executors.rcu(|current| {
            let mut next = HashMap::clone(current);
            outcome = match next.entry(tag.clone()) {
                Entry::Occupied(_) => Err(Error::DuplicateType(tag.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&executor));
                    Ok(())
                }
            };
            next
        });

        if outcome.is_ok() {
            tracing::info!("➕ Registered node executor '{}'", tag);
        }
        outcome
    }

    /// Register, treating failure as a fatal configuration error
    ///
    /// # Panics
    ///
    /// Panics when [`register`](Self::register) would return an error.
    pub fn must_register<E: NodeExecutor>(&self, executor: E) {
        if let Err(e) = self.register(executor) {
            panic!("node registry misconfigured: {}", e);
        }
    }

    /// Look up the executor for a type tag
    pub fn resolve(&self, type_tag: &str) -> Result<Arc<dyn NodeExecutor>> {
        self.executors
            .load()
            .get(type_tag)
            .cloned()
            .ok_or_else(|| Error::UnknownType {
                node_type: type_tag.to_string(),
                node_id: None,
            })
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.executors.load().contains_key(type_tag)
    }

    /// Registered type tags, sorted
    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.executors.load().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.executors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.load().is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.type_tags())
            .finish()
    }
}
