//! Level-parallel DAG execution engine
//!
//! Runs a validated graph level by level. Nodes of one level are launched as
//! concurrent tasks (bounded by `max_concurrency`) and joined at a barrier
//! before the next level starts. The first failure cancels the run: siblings
//! still in flight observe the shared cancellation token and later levels are
//! never started. The whole run sits under `max_execution_time`.

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::runtime::admission::UrlAdmission;
use crate::runtime::context::{ExecutionContext, RunState};
use crate::runtime::registry::{NodeExecutor, NodeRegistry};
use crate::runtime::result::{self, ExecutionResult, NodeResult};
use crate::runtime::scheduler::{compute_levels, select_terminal, ExecutionLevel};
use crate::workflow::{Graph, Node};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A node with the executor resolved for it
struct PlannedNode {
    node: Node,
    executor: Arc<dyn NodeExecutor>,
}

/// Every node of the run, resolved and validated before it starts
type ExecutionPlan = HashMap<String, Arc<PlannedNode>>;

/// DAG execution engine
///
/// Holds the registry and config shared by every run it performs.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<NodeRegistry>,
    config: Arc<ExecutionConfig>,
}

/// Run a graph once: `Execute(graph, config, registry)`
pub async fn execute(
    graph: &Graph,
    config: &ExecutionConfig,
    registry: &NodeRegistry,
) -> Result<ExecutionResult> {
    run_workflow(
        graph,
        Arc::new(config.clone()),
        registry,
        CancellationToken::new(),
    )
    .await
}

impl ExecutionEngine {
    pub fn new(registry: Arc<NodeRegistry>, config: ExecutionConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    /// Engine over the built-in node types
    pub fn with_defaults(config: ExecutionConfig) -> Self {
        Self::new(Arc::new(NodeRegistry::with_defaults()), config)
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Execute a workflow
    ///
    /// Pre-execution failures (unknown node type, invalid node config, bad
    /// admission patterns) are returned as `Err` with nothing executed.
    /// Failures during the run are reported in `ExecutionResult::error`
    /// alongside whatever was recorded before them.
    pub async fn execute(&self, graph: &Graph) -> Result<ExecutionResult> {
        self.execute_with_cancel(graph, CancellationToken::new())
            .await
    }

    /// Execute a workflow that the caller can cancel through `cancel`
    pub async fn execute_with_cancel(
        &self,
        graph: &Graph,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        run_workflow(graph, Arc::clone(&self.config), &self.registry, cancel).await
    }
}

async fn run_workflow(
    graph: &Graph,
    config: Arc<ExecutionConfig>,
    registry: &NodeRegistry,
    cancel: CancellationToken,
) -> Result<ExecutionResult> {
    let run_id = Uuid::new_v4();
    let started_at = chrono::Utc::now();
    let started = Instant::now();

    tracing::info!(
        "🚀 Starting workflow '{}' (run {}) with {} nodes",
        graph.id(),
        run_id,
        graph.len()
    );

    let plan = prepare(graph, registry)?;
    let admission = UrlAdmission::from_config(&config)?;
    let levels = compute_levels(graph);
    let terminal = select_terminal(graph, &levels);

    let semaphore = (config.enable_parallel && config.max_concurrency > 0)
        .then(|| Arc::new(Semaphore::new(config.max_concurrency)));
    let run = Arc::new(RunState::new(
        run_id,
        graph.clone(),
        Arc::clone(&config),
        admission,
        cancel,
    ));

    let driver = LevelDriver {
        run: Arc::clone(&run),
        plan: &plan,
        semaphore,
        parallel: config.enable_parallel,
    };

    let error = match tokio::time::timeout(config.max_execution_time, driver.run(&levels)).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => {
            run.cancel();
            Some(Error::Timeout {
                node_id: None,
                limit: config.max_execution_time,
            })
        }
    };

    let duration = started.elapsed();
    match &error {
        None => tracing::info!(
            "🎉 Workflow '{}' (run {}) completed in {:?}",
            graph.id(),
            run_id,
            duration
        ),
        Some(e) => tracing::error!(
            "❌ Workflow '{}' (run {}) failed after {:?}: {}",
            graph.id(),
            run_id,
            duration,
            e
        ),
    }

    Ok(result::aggregate(&run, graph.id(), terminal, error, started_at, duration).await)
}

/// Resolve and validate every node's executor before anything runs
fn prepare(graph: &Graph, registry: &NodeRegistry) -> Result<ExecutionPlan> {
    let mut plan = HashMap::with_capacity(graph.len());

    for node in graph.nodes() {
        let executor = registry
            .resolve(&node.node_type)
            .map_err(|_| Error::UnknownType {
                node_type: node.node_type.clone(),
                node_id: Some(node.id.clone()),
            })?;

        guarded_validation(node, || executor.validate(node))?;
        guarded_validation(node, || executor.validate_in_graph(graph, node))?;

        plan.insert(
            node.id.clone(),
            Arc::new(PlannedNode {
                node: node.clone(),
                executor,
            }),
        );
    }

    tracing::debug!("🔍 Resolved and validated {} nodes", plan.len());
    Ok(plan)
}

/// Run a validation hook, reporting errors and panics as `Validation`
fn guarded_validation<F>(node: &Node, check: F) -> Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{:#}", e),
        Err(_panic) => {
            tracing::error!("❌ Validator for node '{}' panicked", node.id);
            format!("validator for type '{}' panicked", node.node_type)
        }
    };
    Err(Error::Validation {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        message,
    })
}

/// Look up a planned node. Missing entries mean the plan and the levels disagree.
fn planned(plan: &ExecutionPlan, node_id: &str) -> Result<Arc<PlannedNode>> {
    plan.get(node_id).cloned().ok_or_else(|| {
        Error::Internal(format!("node '{}' is missing from the execution plan", node_id))
    })
}

/// Drives one run through its levels
struct LevelDriver<'p> {
    run: Arc<RunState>,
    plan: &'p ExecutionPlan,
    /// Shared worker pool bound, `None` when unbounded
    semaphore: Option<Arc<Semaphore>>,
    parallel: bool,
}

impl LevelDriver<'_> {
    async fn run(&self, levels: &[ExecutionLevel]) -> Result<()> {
        for level in levels {
            if self.run.is_cancelled() {
                tracing::warn!("⏹️ Run cancelled before level {}", level.index);
                return Err(Error::Cancelled);
            }

            tracing::info!(
                "📍 Level {}/{}: {:?}",
                level.index + 1,
                levels.len(),
                level.nodes
            );
            let level_start = Instant::now();

            if level.len() == 1 || !self.parallel {
                self.run_sequential(level).await?;
            } else {
                self.run_parallel(level).await?;
            }

            tracing::debug!(
                "✅ Level {} completed in {:?}",
                level.index + 1,
                level_start.elapsed()
            );
        }
        Ok(())
    }

    /// Execute each node of the level on the current task, in ID order
    async fn run_sequential(&self, level: &ExecutionLevel) -> Result<()> {
        for node_id in &level.nodes {
            if self.run.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let planned = planned(self.plan, node_id)?;
            let ctx = ExecutionContext::new(Arc::clone(&self.run), node_id.clone());
            dispatch(ctx, planned).await?;
        }
        Ok(())
    }

    /// Launch one task per node, then wait for all of them
    async fn run_parallel(&self, level: &ExecutionLevel) -> Result<()> {
        let mut join_set = JoinSet::new();

        for node_id in &level.nodes {
            let planned = planned(self.plan, node_id)?;
            let ctx = ExecutionContext::new(Arc::clone(&self.run), node_id.clone());
            let semaphore = self.semaphore.clone();

            join_set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        permit = semaphore.acquire_owned() => {
                            Some(permit.map_err(|_| Error::Cancelled)?)
                        }
                    },
                    None => None,
                };
                dispatch(ctx, planned).await
            });
        }

        // Level barrier: nothing from the next level starts until every task
        // here has succeeded, failed or been cancelled.
        let mut first_error: Option<Error> = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.unwrap_or_else(|join_err| {
                tracing::error!("❌ Node task aborted: {}", join_err);
                Err(Error::Cancelled)
            });

            if let Err(err) = outcome {
                self.run.cancel();
                first_error = match first_error {
                    None => Some(err),
                    // A sibling's cancellation can be joined before the failure that caused it.
                    Some(Error::Cancelled) if !matches!(err, Error::Cancelled) => Some(err),
                    kept => kept,
                };
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run one node and record its outcome
async fn dispatch(ctx: ExecutionContext, planned: Arc<PlannedNode>) -> Result<()> {
    let node_id = ctx.node_id().to_string();

    let started = Instant::now();
    let outcome = invoke(&ctx, planned.executor.as_ref(), &planned.node).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(value) => {
            tracing::info!("✅ Node '{}' completed in {:?}", node_id, elapsed);
            ctx.record(NodeResult::success(value, elapsed)).await;
            Ok(())
        }
        Err(Error::Cancelled) => {
            tracing::debug!("⏹️ Node '{}' cancelled", node_id);
            Err(Error::Cancelled)
        }
        Err(err) => {
            tracing::error!("❌ Node '{}' failed in {:?}: {}", node_id, elapsed, err);
            ctx.record(NodeResult::failure(&err, elapsed)).await;
            ctx.cancel_run();
            Err(err)
        }
    }
}

/// Count, execute under the per-node deadline, and check the output shape
async fn invoke(ctx: &ExecutionContext, executor: &dyn NodeExecutor, node: &Node) -> Result<Value> {
    let node_id = ctx.node_id();
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    ctx.increment_node_execution()
        .map_err(|e| Error::from_governor(node_id, e))?;

    tracing::debug!("⚙️ Dispatching node '{}' (type: {})", node_id, node.node_type);

    let limit = ctx.config().max_node_execution_time;
    let guarded = tokio::time::timeout(
        limit,
        AssertUnwindSafe(executor.execute(ctx, node)).catch_unwind(),
    );

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        outcome = guarded => outcome,
    };

    let value = match outcome {
        Err(_) => {
            return Err(Error::Timeout {
                node_id: Some(node_id.to_string()),
                limit,
            })
        }
        Ok(Err(_panic)) => {
            return Err(Error::Executor {
                node_id: node_id.to_string(),
                source: anyhow::anyhow!("executor for type '{}' panicked", node.node_type),
            })
        }
        Ok(Ok(Err(e))) => return Err(Error::from_node_failure(node_id, e)),
        Ok(Ok(Ok(value))) => value,
    };

    ctx.check_output(&value)
        .map_err(|e| Error::from_governor(node_id, e))?;
    Ok(value)
}
