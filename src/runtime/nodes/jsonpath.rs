use super::first_input;
use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use futures::future::BoxFuture;
use serde_json::Value;

/// Selects values out of the first input with a JSONPath expression
///
/// Emits the array of matches, or the first match (null when none) when
/// `single` is true.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathExecutor;

impl NodeExecutor for JsonPathExecutor {
    fn type_tag(&self) -> &str {
        "jsonpath"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        let path = node.require_str("path")?;
        jsonpath_lib::select(&Value::Null, path)
            .map_err(|e| anyhow::anyhow!("invalid JSONPath '{}': {:?}", path, e))?;
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let path = node.require_str("path")?;
            let input = first_input(ctx).await?;

            let matches: Vec<Value> = jsonpath_lib::select(&input, path)
                .map_err(|e| anyhow::anyhow!("JSONPath '{}' failed: {:?}", path, e))?
                .into_iter()
                .cloned()
                .collect();

            tracing::debug!("🔎 JSONPath '{}' on node '{}' matched {} values", path, node.id, matches.len());

            if node.config_bool("single").unwrap_or(false) {
                Ok(matches.into_iter().next().unwrap_or(Value::Null))
            } else {
                Ok(Value::Array(matches))
            }
        })
    }
}
