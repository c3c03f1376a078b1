use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use futures::future::BoxFuture;
use serde_json::Value;

/// Emits the constant in `config.value`
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueExecutor;

impl NodeExecutor for ValueExecutor {
    fn type_tag(&self) -> &str {
        "value"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        if node.config_value("value").is_none() {
            anyhow::bail!("missing parameter 'value'");
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            Ok(node.config_value("value").cloned().unwrap_or(Value::Null))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::testing;
    use serde_json::json;

    #[tokio::test]
    async fn emits_configured_constant() {
        let node = Node::new("a", "value").with("value", json!({"score": 5}));
        let ctx = testing::context(&node, vec![]).await;
        assert_eq!(ValueExecutor.execute(&ctx, &node).await.unwrap(), json!({"score": 5}));
        assert!(ValueExecutor.validate(&Node::new("b", "value")).is_err());
    }
}
