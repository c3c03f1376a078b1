use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::{Graph, Node};
use anyhow::{anyhow, bail};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// Defines or reads a run variable
///
/// `set` (default) stores `config.value`, or the first input when no value is
/// configured, and emits it. `get` emits a variable defined by an upstream node;
/// a `get` with no ancestor setting the name is rejected before the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableExecutor;

impl NodeExecutor for VariableExecutor {
    fn type_tag(&self) -> &str {
        "variable"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        if node.require_str("name")?.is_empty() {
            bail!("variable name must not be empty");
        }
        match node.config_str("op").unwrap_or("set") {
            "set" | "get" => Ok(()),
            other => bail!("unsupported variable op '{}'", other),
        }
    }

    fn validate_in_graph(&self, graph: &Graph, node: &Node) -> anyhow::Result<()> {
        if node.config_str("op") != Some("get") {
            return Ok(());
        }
        let name = node.require_str("name")?;
        if ancestor_sets(graph, &node.id, name) {
            Ok(())
        } else {
            bail!("no upstream node sets variable '{}'", name)
        }
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let name = node.require_str("name")?;

            match node.config_str("op").unwrap_or("set") {
                "get" => ctx
                    .variable(name)
                    .await
                    .ok_or_else(|| anyhow!("variable '{}' is not defined", name)),
                _ => {
                    let value = match node.config_value("value") {
                        Some(value) => value.clone(),
                        None => ctx
                            .node_inputs()
                            .await?
                            .into_iter()
                            .next()
                            .ok_or_else(|| anyhow!("variable '{}' has no value and no input", name))?,
                    };
                    ctx.set_variable(name, value.clone()).await?;
                    Ok(value)
                }
            }
        })
    }
}

/// Breadth-first walk over `id`'s ancestors looking for a `set` of `name`
fn ancestor_sets(graph: &Graph, id: &str, name: &str) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = graph.predecessors(id).iter().map(String::as_str).collect();

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(node) = graph.node(current) {
            let sets = node.node_type == "variable"
                && node.config_str("op").unwrap_or("set") == "set"
                && node.config_str("name") == Some(name);
            if sets {
                return true;
            }
        }
        queue.extend(graph.predecessors(current).iter().map(String::as_str));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernorError;
    use crate::runtime::nodes::testing;
    use crate::workflow::{Edge, GraphDefinition};
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_within_a_run() {
        let set = Node::new("s", "variable").with("name", "threshold").with("value", 70);
        let ctx = testing::context(&set, vec![]).await;
        assert_eq!(VariableExecutor.execute(&ctx, &set).await.unwrap(), json!(70));

        let get = Node::new("s", "variable").with("name", "threshold").with("op", "get");
        assert_eq!(VariableExecutor.execute(&ctx, &get).await.unwrap(), json!(70));

        let err = VariableExecutor.execute(&ctx, &set).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<GovernorError>(),
            Some(&GovernorError::VariableRedefined("threshold".into()))
        );
    }

    #[tokio::test]
    async fn set_falls_back_to_first_input() {
        let node = Node::new("s", "variable").with("name", "score");
        let ctx = testing::context(&node, vec![json!(88)]).await;
        assert_eq!(VariableExecutor.execute(&ctx, &node).await.unwrap(), json!(88));
        assert_eq!(ctx.variable("score").await, Some(json!(88)));
    }

    #[tokio::test]
    async fn get_of_undefined_variable_fails() {
        let node = Node::new("g", "variable").with("name", "nope").with("op", "get");
        let ctx = testing::context(&node, vec![]).await;
        assert!(VariableExecutor.execute(&ctx, &node).await.is_err());
        assert!(VariableExecutor.validate(&Node::new("g", "variable").with("name", "x").with("op", "del")).is_err());
    }

    fn graph(nodes: Vec<Node>, edges: Vec<(&str, &str)>) -> Graph {
        Graph::new(GraphDefinition {
            id: "vars".into(),
            nodes,
            edges: edges.into_iter().map(|(a, b)| Edge::new(a, b)).collect(),
            terminal: None,
        })
        .unwrap()
    }

    #[test]
    fn get_requires_an_upstream_set() {
        let set = Node::new("set", "variable").with("name", "limit").with("value", 3);
        let mid = Node::new("mid", "value").with("value", 1);
        let get = Node::new("get", "variable").with("name", "limit").with("op", "get");

        let chained = graph(
            vec![set.clone(), mid.clone(), get.clone()],
            vec![("set", "mid"), ("mid", "get")],
        );
        assert!(VariableExecutor.validate_in_graph(&chained, &get).is_ok());
        assert!(VariableExecutor.validate_in_graph(&chained, &set).is_ok());

        let siblings = graph(vec![mid, set, get.clone()], vec![("mid", "set"), ("mid", "get")]);
        let err = VariableExecutor.validate_in_graph(&siblings, &get).unwrap_err();
        assert!(err.to_string().contains("limit"));

        let other_name = Node::new("set", "variable").with("name", "other").with("value", 1);
        let unrelated = graph(vec![other_name, get.clone()], vec![("set", "get")]);
        assert!(VariableExecutor.validate_in_graph(&unrelated, &get).is_err());
    }
}
