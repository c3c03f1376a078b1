//! Graph control-flow nodes: branching, looping and merging
//!
//! These tags are reserved in the registry. Callers can never replace them.

use super::first_input;
use super::math::{binary, unary, MathOp, Number};
use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use anyhow::{anyhow, bail};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

const CONDITION_OPERATORS: &[&str] = &["eq", "ne", "gt", "gte", "lt", "lte", "truthy"];

/// `condition` node
///
/// Compares the first input against `config.value` and emits
/// `{"passed": bool, "value": input}` so downstream nodes can branch on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn type_tag(&self) -> &str {
        "condition"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        let operator = node.require_str("operator")?;
        if !CONDITION_OPERATORS.contains(&operator) {
            bail!("unsupported operator '{}'", operator);
        }
        if operator != "truthy" && node.config_value("value").is_none() {
            bail!("operator '{}' needs a 'value' to compare against", operator);
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let input = first_input(ctx).await?;
            let operator = node.require_str("operator")?;
            let expected = node.config_value("value").unwrap_or(&Value::Null);

            let passed = match operator {
                "truthy" => is_truthy(&input),
                "eq" => loosely_equal(&input, expected),
                "ne" => !loosely_equal(&input, expected),
                ordering_op => {
                    let ordering = compare(&input, expected)?;
                    match ordering_op {
                        "gt" => ordering == Ordering::Greater,
                        "gte" => ordering != Ordering::Less,
                        "lt" => ordering == Ordering::Less,
                        "lte" => ordering != Ordering::Greater,
                        other => bail!("unsupported operator '{}'", other),
                    }
                }
            };

            tracing::debug!("🔀 Condition '{}' {} -> {}", node.id, operator, passed);
            Ok(json!({ "passed": passed, "value": input }))
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality where `1` and `1.0` are the same number
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => l == r,
        },
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> anyhow::Result<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            let (l, r) = (l.as_f64(), r.as_f64());
            l.zip(r)
                .and_then(|(l, r)| l.partial_cmp(&r))
                .ok_or_else(|| anyhow!("numbers are not comparable"))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => bail!("cannot order {} against {}", left, right),
    }
}

/// `loop` node
///
/// Maps a math op over the elements of the first input. Each iteration counts
/// as a node execution and observes cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopExecutor;

impl NodeExecutor for LoopExecutor {
    fn type_tag(&self) -> &str {
        "loop"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        match MathOp::parse(node.require_str("op")?)? {
            MathOp::Aggregate(op) => bail!("aggregate op {:?} cannot be looped", op),
            MathOp::Binary(op) => {
                let operand = node
                    .config_value("operand")
                    .ok_or_else(|| anyhow!("op {:?} needs an 'operand'", op))?;
                Number::from_value(operand)?;
            }
            MathOp::Unary(_) => {}
        }
        if let Some(limit) = node.config_value("max_iterations") {
            if limit.as_u64().is_none() {
                bail!("'max_iterations' must be a non-negative integer");
            }
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let op = MathOp::parse(node.require_str("op")?)?;
            let input = first_input(ctx).await?;
            let items = input
                .as_array()
                .ok_or_else(|| anyhow!("loop input must be an array, got {}", input))?;

            if let Some(limit) = node.config_u64("max_iterations") {
                if items.len() as u64 > limit {
                    bail!("{} items exceed max_iterations of {}", items.len(), limit);
                }
            }

            let operand = node
                .config_value("operand")
                .map(Number::from_value)
                .transpose()?;

            let mut output = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                ctx.ensure_active()?;
                ctx.increment_node_execution()?;

                let n = Number::from_value(item)
                    .map_err(|e| anyhow!("item {}: {}", index, e))?;
                let mapped = match (op, operand) {
                    (MathOp::Unary(op), _) => unary(op, n)?,
                    (MathOp::Binary(op), Some(operand)) => binary(op, n, operand)?,
                    _ => bail!("op {:?} cannot be looped", op),
                };
                output.push(mapped.into_value()?);

                // Let siblings and the cancellation signal make progress on long inputs
                tokio::task::yield_now().await;
            }

            tracing::debug!("🔁 Loop '{}' ran {} iterations", node.id, output.len());
            Ok(Value::Array(output))
        })
    }
}

/// `merge` node
///
/// Modes: `array` (inputs in edge order), `object` (keyed by predecessor ID),
/// `concat` (array inputs flattened one level).
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeExecutor;

impl NodeExecutor for MergeExecutor {
    fn type_tag(&self) -> &str {
        "merge"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        match node.config_str("mode").unwrap_or("array") {
            "array" | "object" | "concat" => Ok(()),
            other => bail!("unsupported merge mode '{}'", other),
        }
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let merged = match node.config_str("mode").unwrap_or("array") {
                "array" => Value::Array(ctx.node_inputs().await?),
                "object" => {
                    let map: Map<String, Value> = ctx.named_inputs().await?.into_iter().collect();
                    Value::Object(map)
                }
                "concat" => {
                    let mut items = Vec::new();
                    for input in ctx.node_inputs().await? {
                        match input {
                            Value::Array(inner) => items.extend(inner),
                            other => items.push(other),
                        }
                    }
                    Value::Array(items)
                }
                other => bail!("unsupported merge mode '{}'", other),
            };
            Ok(merged)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::error::{GovernorError, Resource};
    use crate::runtime::nodes::testing;

    async fn run(executor: &dyn NodeExecutor, node: Node, inputs: Vec<Value>) -> anyhow::Result<Value> {
        executor.validate(&node)?;
        let ctx = testing::context(&node, inputs).await;
        executor.execute(&ctx, &node).await
    }

    fn condition(operator: &str, value: Value) -> Node {
        Node::new("c", "condition")
            .with("operator", operator)
            .with("value", value)
    }

    #[tokio::test]
    async fn condition_compares_first_input() {
        let passed = |v: Value| v["passed"].as_bool().unwrap();

        assert!(passed(run(&ConditionExecutor, condition("gt", json!(3)), vec![json!(5)]).await.unwrap()));
        assert!(!passed(run(&ConditionExecutor, condition("lt", json!(3)), vec![json!(5)]).await.unwrap()));
        assert!(passed(run(&ConditionExecutor, condition("gte", json!(5.0)), vec![json!(5)]).await.unwrap()));
        assert!(passed(run(&ConditionExecutor, condition("eq", json!(1.0)), vec![json!(1)]).await.unwrap()));
        assert!(passed(run(&ConditionExecutor, condition("ne", json!("a")), vec![json!("b")]).await.unwrap()));
        assert!(passed(run(&ConditionExecutor, condition("lte", json!("b")), vec![json!("a")]).await.unwrap()));

        let out = run(&ConditionExecutor, Node::new("c", "condition").with("operator", "truthy"), vec![json!([])])
            .await
            .unwrap();
        assert_eq!(out, json!({"passed": false, "value": []}));
    }

    #[tokio::test]
    async fn condition_refuses_to_order_mixed_types() {
        assert!(run(&ConditionExecutor, condition("gt", json!("x")), vec![json!(1)]).await.is_err());
        assert!(ConditionExecutor.validate(&Node::new("c", "condition").with("operator", "gt")).is_err());
        assert!(ConditionExecutor.validate(&condition("like", json!(1))).is_err());
    }

    #[tokio::test]
    async fn loop_maps_op_and_counts_iterations() {
        let node = Node::new("l", "loop").with("op", "multiply").with("operand", 10);
        let ctx = testing::context(&node, vec![json!([1, 2, 3])]).await;
        assert_eq!(LoopExecutor.execute(&ctx, &node).await.unwrap(), json!([10, 20, 30]));
        assert_eq!(ctx.node_executions(), 3);
    }

    #[tokio::test]
    async fn loop_iterations_hit_the_execution_ceiling() {
        let node = Node::new("l", "loop").with("op", "double");
        let config = ExecutionConfig {
            max_node_executions: 2,
            ..Default::default()
        };
        let ctx = testing::context_with(&node, vec![json!([1, 2, 3])], config).await;
        let err = LoopExecutor.execute(&ctx, &node).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<GovernorError>(),
            Some(&GovernorError::ResourceLimitExceeded {
                resource: Resource::NodeExecutions,
                limit: 2
            })
        );
    }

    #[tokio::test]
    async fn loop_respects_max_iterations_and_cancellation() {
        let node = Node::new("l", "loop").with("op", "negate").with("max_iterations", 2);
        assert!(run(&LoopExecutor, node, vec![json!([1, 2, 3])]).await.is_err());

        let node = Node::new("l", "loop").with("op", "negate");
        let ctx = testing::context(&node, vec![json!([1, 2])]).await;
        ctx.cancel_run();
        let err = LoopExecutor.execute(&ctx, &node).await.unwrap_err();
        assert_eq!(err.downcast_ref::<GovernorError>(), Some(&GovernorError::Cancelled));
        assert_eq!(ctx.node_executions(), 0);
    }

    #[test]
    fn loop_validation() {
        assert!(LoopExecutor.validate(&Node::new("l", "loop").with("op", "sum")).is_err());
        assert!(LoopExecutor.validate(&Node::new("l", "loop").with("op", "add")).is_err());
        assert!(LoopExecutor
            .validate(&Node::new("l", "loop").with("op", "double").with("max_iterations", -1))
            .is_err());
    }

    #[tokio::test]
    async fn merge_modes() {
        let inputs = vec![json!([1, 2]), json!(3)];
        let array = run(&MergeExecutor, Node::new("m", "merge"), inputs.clone()).await.unwrap();
        assert_eq!(array, json!([[1, 2], 3]));

        let concat = run(&MergeExecutor, Node::new("m", "merge").with("mode", "concat"), inputs.clone())
            .await
            .unwrap();
        assert_eq!(concat, json!([1, 2, 3]));

        let object = run(&MergeExecutor, Node::new("m", "merge").with("mode", "object"), inputs)
            .await
            .unwrap();
        assert_eq!(object, json!({"in0": [1, 2], "in1": 3}));

        assert!(MergeExecutor.validate(&Node::new("m", "merge").with("mode", "zip")).is_err());
    }
}
