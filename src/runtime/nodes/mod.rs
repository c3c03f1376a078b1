//! Built-in node executors
//!
//! Data-transformation types (`value`, `math`, `http`, `lua`, `jsonpath`,
//! `variable`) can be replaced on a fresh registry. Control-flow types
//! (`condition`, `loop`, `merge`) are reserved.

mod control;
mod http;
mod jsonpath;
mod lua;
mod math;
mod value;
mod variable;

pub use control::{ConditionExecutor, LoopExecutor, MergeExecutor};
pub use http::HttpExecutor;
pub use jsonpath::JsonPathExecutor;
pub use lua::LuaExecutor;
pub use math::MathExecutor;
pub use value::ValueExecutor;
pub use variable::VariableExecutor;

use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use serde_json::Value;
use std::sync::Arc;

/// One instance of every built-in executor
pub(crate) fn builtin_executors() -> Vec<Arc<dyn NodeExecutor>> {
    vec![
        Arc::new(ValueExecutor),
        Arc::new(MathExecutor),
        Arc::new(HttpExecutor::new()),
        Arc::new(LuaExecutor),
        Arc::new(JsonPathExecutor),
        Arc::new(VariableExecutor),
        Arc::new(ConditionExecutor),
        Arc::new(LoopExecutor),
        Arc::new(MergeExecutor),
    ]
}

/// Output of the first predecessor, for nodes that operate on a single input
async fn first_input(ctx: &ExecutionContext) -> anyhow::Result<Value> {
    ctx.node_inputs()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("node '{}' has no input", ctx.node_id()))
}
