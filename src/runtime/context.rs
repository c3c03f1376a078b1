//! Execution context and resource governor
//!
//! The per-run state shared by every node task: the result map, run
//! variables and the governed counters. Executors never touch this state
//! directly; they receive an `ExecutionContext` bound to their node and go
//! through it for inputs, counters, output checks and network admission.

use crate::config::ExecutionConfig;
use crate::error::{GovernorError, Resource};
use crate::runtime::admission::{AdmittedUrl, UrlAdmission};
use crate::runtime::result::NodeResult;
use crate::workflow::Graph;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Mutable state of one run, discarded once the run returns
#[derive(Debug)]
pub(crate) struct RunState {
    run_id: Uuid,
    graph: Graph,
    config: Arc<ExecutionConfig>,
    admission: UrlAdmission,
    /// Insert-only: each node is written once, by the task that ran it
    results: RwLock<HashMap<String, NodeResult>>,
    /// Write-once run variables
    variables: RwLock<HashMap<String, Value>>,
    node_executions: AtomicUsize,
    http_calls: AtomicUsize,
    cancel: CancellationToken,
}

impl RunState {
    pub(crate) fn new(
        run_id: Uuid,
        graph: Graph,
        config: Arc<ExecutionConfig>,
        admission: UrlAdmission,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            graph,
            config,
            admission,
            results: RwLock::new(HashMap::new()),
            variables: RwLock::new(HashMap::new()),
            node_executions: AtomicUsize::new(0),
            http_calls: AtomicUsize::new(0),
            cancel,
        }
    }

    pub(crate) fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn node_executions(&self) -> usize {
        self.node_executions.load(Ordering::SeqCst)
    }

    pub(crate) fn http_calls(&self) -> usize {
        self.http_calls.load(Ordering::SeqCst)
    }

    /// Copy of every recorded node result, ordered by node ID
    pub(crate) async fn results(&self) -> BTreeMap<String, NodeResult> {
        self.results
            .read()
            .await
            .iter()
            .map(|(id, result)| (id.clone(), result.clone()))
            .collect()
    }
}

/// A node's only channel to shared run state
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run: Arc<RunState>,
    node_id: String,
}

impl ExecutionContext {
    pub(crate) fn new(run: Arc<RunState>, node_id: impl Into<String>) -> Self {
        Self {
            run,
            node_id: node_id.into(),
        }
    }

    /// ID of the node this context is bound to
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    pub fn graph(&self) -> &Graph {
        &self.run.graph
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.run.config
    }

    /// Outputs of this node's predecessors, in edge order
    pub async fn node_inputs(&self) -> Result<Vec<Value>, GovernorError> {
        self.inputs_for(&self.node_id).await
    }

    /// Outputs of `node_id`'s predecessors, in edge order
    ///
    /// `MissingDependency` means a predecessor has no recorded value, which
    /// only happens if scheduling went wrong.
    pub async fn inputs_for(&self, node_id: &str) -> Result<Vec<Value>, GovernorError> {
        let named = self.named_inputs_for(node_id).await?;
        Ok(named.into_iter().map(|(_, value)| value).collect())
    }

    /// Predecessor outputs paired with the predecessor's ID
    pub async fn named_inputs(&self) -> Result<Vec<(String, Value)>, GovernorError> {
        self.named_inputs_for(&self.node_id).await
    }

    async fn named_inputs_for(&self, node_id: &str) -> Result<Vec<(String, Value)>, GovernorError> {
        let results = self.run.results.read().await;
        self.run
            .graph
            .predecessors(node_id)
            .iter()
            .map(|dependency| {
                results
                    .get(dependency)
                    .and_then(|result| result.value.clone())
                    .map(|value| (dependency.clone(), value))
                    .ok_or_else(|| GovernorError::MissingDependency {
                        dependency: dependency.clone(),
                    })
            })
            .collect()
    }

    /// Count one executor invocation or internal iteration
    ///
    /// Fails once the run would exceed `max_node_executions`. Returns the new count.
    pub fn increment_node_execution(&self) -> Result<usize, GovernorError> {
        bump(
            &self.run.node_executions,
            self.run.config.max_node_executions,
            Resource::NodeExecutions,
        )
    }

    /// Count one outbound network call; call before each request
    pub fn increment_http_call(&self) -> Result<usize, GovernorError> {
        bump(
            &self.run.http_calls,
            self.run.config.max_http_calls_per_exec,
            Resource::HttpCalls,
        )
    }

    pub fn node_executions(&self) -> usize {
        self.run.node_executions()
    }

    pub fn http_calls(&self) -> usize {
        self.run.http_calls()
    }

    /// Reject values exceeding the string, array or nesting ceilings
    pub fn check_output(&self, value: &Value) -> Result<(), GovernorError> {
        check_shape(value, 0, &self.run.config)
    }

    /// Define a run variable
    ///
    /// Variables are write-once per run and count against `max_variables`.
    /// Readers should depend on the writing node through an edge.
    pub async fn set_variable(&self, name: &str, value: Value) -> Result<(), GovernorError> {
        self.check_output(&value)?;

        let mut variables = self.run.variables.write().await;
        if variables.contains_key(name) {
            return Err(GovernorError::VariableRedefined(name.to_string()));
        }
        let limit = self.run.config.max_variables;
        if variables.len() >= limit {
            return Err(GovernorError::ResourceLimitExceeded {
                resource: Resource::Variables,
                limit,
            });
        }
        variables.insert(name.to_string(), value);
        tracing::debug!("📝 Node '{}' defined variable '{}'", self.node_id, name);
        Ok(())
    }

    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.run.variables.read().await.get(name).cloned()
    }

    /// Network admission check for a target URL
    ///
    /// Connect only to `AdmittedUrl::addrs` when they are present; resolving
    /// the host again would skip the check.
    pub async fn admit_url(&self, url: &str) -> Result<AdmittedUrl, GovernorError> {
        self.run.admission.check(url).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }

    /// Resolves once the run is cancelled (failure elsewhere, timeout or caller)
    pub async fn cancelled(&self) {
        self.run.cancel.cancelled().await
    }

    /// Fail with `Cancelled` if the run has been cancelled
    pub fn ensure_active(&self) -> Result<(), GovernorError> {
        if self.is_cancelled() {
            Err(GovernorError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn cancel_run(&self) {
        self.run.cancel();
    }

    /// Record this node's outcome. The first write wins.
    pub(crate) async fn record(&self, result: NodeResult) {
        let mut results = self.run.results.write().await;
        match results.entry(self.node_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
            Entry::Occupied(_) => {
                tracing::error!("❌ Node '{}' result recorded twice; keeping the first", self.node_id);
            }
        }
    }
}

fn bump(counter: &AtomicUsize, limit: usize, resource: Resource) -> Result<usize, GovernorError> {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            (current < limit).then_some(current + 1)
        })
        .map(|previous| previous + 1)
        .map_err(|_| {
            tracing::warn!("🛑 {} limit of {} reached", resource, limit);
            GovernorError::ResourceLimitExceeded { resource, limit }
        })
}

fn check_shape(value: &Value, depth: usize, config: &ExecutionConfig) -> Result<(), GovernorError> {
    let exceeded = |resource, limit| GovernorError::ResourceLimitExceeded { resource, limit };

    match value {
        Value::String(s) => {
            if s.chars().count() > config.max_string_length {
                return Err(exceeded(Resource::StringLength, config.max_string_length));
            }
            Ok(())
        }
        Value::Array(items) => {
            if depth >= config.max_context_depth {
                return Err(exceeded(Resource::ContextDepth, config.max_context_depth));
            }
            if items.len() > config.max_array_length {
                return Err(exceeded(Resource::ArrayLength, config.max_array_length));
            }
            items
                .iter()
                .try_for_each(|item| check_shape(item, depth + 1, config))
        }
        Value::Object(map) => {
            if depth >= config.max_context_depth {
                return Err(exceeded(Resource::ContextDepth, config.max_context_depth));
            }
            for (key, item) in map {
                if key.chars().count() > config.max_string_length {
                    return Err(exceeded(Resource::StringLength, config.max_string_length));
                }
                check_shape(item, depth + 1, config)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Edge, GraphDefinition, Node};
    use serde_json::json;
    use std::time::Duration;

    fn run_state(config: ExecutionConfig) -> Arc<RunState> {
        let graph = Graph::new(GraphDefinition {
            id: "ctx".into(),
            nodes: vec![
                Node::new("a", "value"),
                Node::new("b", "value"),
                Node::new("c", "math"),
            ],
            edges: vec![Edge::new("b", "c"), Edge::new("a", "c")],
            terminal: None,
        })
        .unwrap();
        let admission = UrlAdmission::from_config(&config).unwrap();
        Arc::new(RunState::new(
            Uuid::new_v4(),
            graph,
            Arc::new(config),
            admission,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn inputs_follow_edge_order() {
        let run = run_state(ExecutionConfig::default());
        let a = ExecutionContext::new(Arc::clone(&run), "a");
        let b = ExecutionContext::new(Arc::clone(&run), "b");
        let c = ExecutionContext::new(Arc::clone(&run), "c");

        a.record(NodeResult::success(json!(1), Duration::ZERO)).await;
        assert!(matches!(
            c.node_inputs().await,
            Err(GovernorError::MissingDependency { ref dependency }) if dependency == "b"
        ));

        b.record(NodeResult::success(json!(2), Duration::ZERO)).await;
        assert_eq!(c.node_inputs().await.unwrap(), vec![json!(2), json!(1)]);
        let named = c.named_inputs().await.unwrap();
        assert_eq!(named[0].0, "b");
        assert!(a.node_inputs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_recorded_result_wins() {
        let run = run_state(ExecutionConfig::default());
        let a = ExecutionContext::new(Arc::clone(&run), "a");
        a.record(NodeResult::success(json!("first"), Duration::ZERO)).await;
        a.record(NodeResult::success(json!("second"), Duration::ZERO)).await;
        assert_eq!(run.results().await["a"].value, Some(json!("first")));
    }

    #[test]
    fn counters_fail_once_ceiling_would_be_exceeded() {
        let run = run_state(ExecutionConfig {
            max_node_executions: 3,
            max_http_calls_per_exec: 1,
            ..Default::default()
        });
        let ctx = ExecutionContext::new(run, "a");

        assert_eq!(ctx.increment_node_execution().unwrap(), 1);
        assert_eq!(ctx.increment_node_execution().unwrap(), 2);
        assert_eq!(ctx.increment_node_execution().unwrap(), 3);
        assert_eq!(
            ctx.increment_node_execution().unwrap_err(),
            GovernorError::ResourceLimitExceeded {
                resource: Resource::NodeExecutions,
                limit: 3
            }
        );
        assert_eq!(ctx.node_executions(), 3);

        assert!(ctx.increment_http_call().is_ok());
        assert!(ctx.increment_http_call().is_err());
        assert_eq!(ctx.http_calls(), 1);
    }

    #[test]
    fn output_shape_is_bounded() {
        let run = run_state(ExecutionConfig {
            max_string_length: 5,
            max_array_length: 3,
            max_context_depth: 2,
            ..Default::default()
        });
        let ctx = ExecutionContext::new(run, "a");
        let limit_of = |value: Value| match ctx.check_output(&value) {
            Err(GovernorError::ResourceLimitExceeded { resource, .. }) => Some(resource),
            _ => None,
        };

        assert_eq!(limit_of(json!("short")), None);
        assert_eq!(limit_of(json!("too long")), Some(Resource::StringLength));
        assert_eq!(limit_of(json!([1, 2, 3])), None);
        assert_eq!(limit_of(json!([1, 2, 3, 4])), Some(Resource::ArrayLength));
        assert_eq!(limit_of(json!({"a": [1]})), None);
        assert_eq!(limit_of(json!({"a": {"b": 1}})), None);
        assert_eq!(limit_of(json!({"a": {"b": [1]}})), Some(Resource::ContextDepth));
        assert_eq!(limit_of(json!({"longkey": 1})), Some(Resource::StringLength));
        assert_eq!(limit_of(json!(12345678)), None);
    }

    #[tokio::test]
    async fn variables_are_write_once_and_bounded() {
        let run = run_state(ExecutionConfig {
            max_variables: 2,
            ..Default::default()
        });
        let ctx = ExecutionContext::new(run, "a");

        ctx.set_variable("x", json!(1)).await.unwrap();
        assert_eq!(
            ctx.set_variable("x", json!(2)).await,
            Err(GovernorError::VariableRedefined("x".into()))
        );
        ctx.set_variable("y", json!(2)).await.unwrap();
        assert!(matches!(
            ctx.set_variable("z", json!(3)).await,
            Err(GovernorError::ResourceLimitExceeded {
                resource: Resource::Variables,
                limit: 2
            })
        ));
        assert_eq!(ctx.variable("x").await, Some(json!(1)));
        assert_eq!(ctx.variable("z").await, None);
    }

    #[tokio::test]
    async fn cancellation_is_shared_across_contexts() {
        let run = run_state(ExecutionConfig::default());
        let a = ExecutionContext::new(Arc::clone(&run), "a");
        let b = ExecutionContext::new(Arc::clone(&run), "b");

        assert!(b.ensure_active().is_ok());
        a.cancel_run();
        b.cancelled().await;
        assert_eq!(b.ensure_active(), Err(GovernorError::Cancelled));
    }
}
