//! Sandboxed Lua script node
//!
//! Each execution gets a fresh Lua 5.4 state on a blocking thread. Inputs are
//! exposed as the `inputs` array and `input` (the first one); the script's
//! return value becomes the node output. The state is interrupted once the
//! node deadline passes or the run is cancelled, and its heap is capped by
//! `max_lua_memory`.

use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use anyhow::anyhow;
use futures::future::BoxFuture;
use mlua::{HookTriggers, Lua, VmState};
use serde_json::Value;
use std::time::Instant;

/// Globals removed before any user code runs
const BLOCKED_GLOBALS: &[&str] = &["os", "io", "debug", "package", "require", "dofile", "loadfile"];

/// Instructions between deadline checks
const HOOK_INTERVAL: u32 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct LuaExecutor;

impl NodeExecutor for LuaExecutor {
    fn type_tag(&self) -> &str {
        "lua"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        let script = node.require_str("script")?;
        if script.trim().is_empty() {
            anyhow::bail!("script must not be empty");
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let script = node.require_str("script")?.to_string();
            let inputs = ctx.node_inputs().await?;
            let deadline = Instant::now() + ctx.config().max_node_execution_time;
            let limits = ScriptLimits {
                max_depth: ctx.config().max_context_depth,
                max_memory: ctx.config().max_lua_memory,
            };
            let cancel = ctx.clone();

            tracing::debug!("🧠 Running Lua script for node '{}'", node.id);

            tokio::task::spawn_blocking(move || {
                run_script(&script, &inputs, limits, move || {
                    Instant::now() >= deadline || cancel.is_cancelled()
                })
            })
            .await
            .map_err(|e| anyhow!("Lua task failed: {}", e))?
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ScriptLimits {
    max_depth: usize,
    max_memory: usize,
}

fn run_script<F>(
    script: &str,
    inputs: &[Value],
    limits: ScriptLimits,
    interrupted: F,
) -> anyhow::Result<Value>
where
    F: Fn() -> bool + Send + 'static,
{
    let lua = Lua::new();
    lua.set_memory_limit(limits.max_memory)
        .map_err(|e| anyhow!("Failed to set Lua memory limit: {}", e))?;

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals
            .set(*name, mlua::Nil)
            .map_err(|e| anyhow!("Failed to sandbox Lua global '{}': {}", name, e))?;
    }

    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if interrupted() {
                Err(mlua::Error::runtime("script interrupted: deadline passed or run cancelled"))
            } else {
                Ok(VmState::Continue)
            }
        },
    )
    .map_err(|e| anyhow!("Failed to install Lua interrupt hook: {}", e))?;

    let lua_inputs = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create Lua table: {}", e))?;
    for (i, input) in inputs.iter().enumerate() {
        lua_inputs
            .raw_set(i + 1, json_to_lua(&lua, input)?)
            .map_err(|e| anyhow!("Failed to set Lua input: {}", e))?;
    }
    let first = match inputs.first() {
        Some(input) => json_to_lua(&lua, input)?,
        None => mlua::Nil,
    };
    globals
        .set("inputs", lua_inputs)
        .map_err(|e| anyhow!("Failed to set Lua inputs: {}", e))?;
    globals
        .set("input", first)
        .map_err(|e| anyhow!("Failed to set Lua input: {}", e))?;

    let result: mlua::Value = lua
        .load(script)
        .eval()
        .map_err(|e| anyhow!("Lua script execution failed: {}", e))?;

    lua_to_json(result, 0, limits.max_depth)
}

/// Convert a JSON value into a Lua value (arrays become 1-based sequences)
fn json_to_lua(lua: &Lua, value: &Value) -> anyhow::Result<mlua::Value> {
    let converted = match value {
        Value::Null => mlua::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => mlua::Value::Integer(i),
            None => mlua::Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => mlua::Value::String(
            lua.create_string(s)
                .map_err(|e| anyhow!("Failed to create Lua string: {}", e))?,
        ),
        Value::Array(items) => {
            let table = lua
                .create_table()
                .map_err(|e| anyhow!("Failed to create Lua table: {}", e))?;
            for (i, item) in items.iter().enumerate() {
                table
                    .raw_set(i + 1, json_to_lua(lua, item)?)
                    .map_err(|e| anyhow!("Failed to fill Lua table: {}", e))?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(map) => {
            let table = lua
                .create_table()
                .map_err(|e| anyhow!("Failed to create Lua table: {}", e))?;
            for (key, item) in map {
                table
                    .raw_set(key.as_str(), json_to_lua(lua, item)?)
                    .map_err(|e| anyhow!("Failed to fill Lua table: {}", e))?;
            }
            mlua::Value::Table(table)
        }
    };
    Ok(converted)
}

/// Convert a Lua value back to JSON
///
/// A table whose keys are exactly `1..=n` becomes an array, any other table an
/// object. Functions and userdata become null.
fn lua_to_json(value: mlua::Value, depth: usize, max_depth: usize) -> anyhow::Result<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::from(i)),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => {
            let s = s
                .to_str()
                .map_err(|e| anyhow!("Invalid UTF-8 in Lua string: {}", e))?;
            Ok(Value::String(s.to_string()))
        }
        mlua::Value::Table(table) => {
            if depth >= max_depth {
                anyhow::bail!("Lua result nests deeper than {} levels", max_depth);
            }

            let mut is_array = true;
            let mut max_index = 0usize;
            let mut count = 0usize;
            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair.map_err(|e| anyhow!("Failed to iterate Lua table: {}", e))?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => {
                        max_index = max_index.max(usize::try_from(i).unwrap_or(usize::MAX));
                    }
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut items = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let item: mlua::Value = table
                        .raw_get(i)
                        .map_err(|e| anyhow!("Failed to get Lua table value: {}", e))?;
                    items.push(lua_to_json(item, depth + 1, max_depth)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut object = serde_json::Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, item) = pair.map_err(|e| anyhow!("Failed to iterate Lua table: {}", e))?;
                    let key = match key {
                        mlua::Value::String(s) => s
                            .to_str()
                            .map_err(|e| anyhow!("Invalid UTF-8 in Lua key: {}", e))?
                            .to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    object.insert(key, lua_to_json(item, depth + 1, max_depth)?);
                }
                Ok(Value::Object(object))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::runtime::nodes::testing;
    use serde_json::json;
    use std::time::Duration;

    async fn run(script: &str, inputs: Vec<Value>) -> anyhow::Result<Value> {
        let node = Node::new("l", "lua").with("script", script);
        LuaExecutor.validate(&node)?;
        let ctx = testing::context(&node, inputs).await;
        LuaExecutor.execute(&ctx, &node).await
    }

    #[tokio::test]
    async fn script_sees_inputs_and_returns_json() {
        let out = run(
            "return { total = inputs[1].score + inputs[2], passed = input.score >= 70 }",
            vec![json!({"score": 90}), json!(5)],
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"total": 95, "passed": true}));
    }

    #[tokio::test]
    async fn sequences_round_trip_as_arrays() {
        let out = run("local t = {} for i, v in ipairs(input) do t[i] = v * 2 end return t", vec![json!([1, 2, 3])])
            .await
            .unwrap();
        assert_eq!(out, json!([2, 4, 6]));
    }

    #[tokio::test]
    async fn dangerous_globals_are_removed() {
        let out = run("return { os = os == nil, io = io == nil, package = package == nil }", vec![])
            .await
            .unwrap();
        assert_eq!(out, json!({"os": true, "io": true, "package": true}));
        assert!(run("return os.execute('true')", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn runtime_errors_surface() {
        let err = run("error('bad grade')", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("bad grade"));
        assert!(LuaExecutor.validate(&Node::new("l", "lua").with("script", "  ")).is_err());
    }

    #[tokio::test]
    async fn runaway_script_is_interrupted() {
        let node = Node::new("l", "lua").with("script", "while true do end");
        let config = ExecutionConfig {
            max_node_execution_time: Duration::from_millis(50),
            ..Default::default()
        };
        let ctx = testing::context_with(&node, vec![], config).await;
        let err = LuaExecutor.execute(&ctx, &node).await.unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn allocations_past_the_memory_cap_fail() {
        let node = Node::new("l", "lua").with("script", "return #string.rep('x', 64 * 1024 * 1024)");
        let config = ExecutionConfig {
            max_lua_memory: 8 * 1024 * 1024,
            ..Default::default()
        };
        let ctx = testing::context_with(&node, vec![], config).await;
        let err = LuaExecutor.execute(&ctx, &node).await.unwrap_err();
        assert!(err.to_string().contains("memory"), "{}", err);

        // Small scripts still run under the same cap
        let node = Node::new("l", "lua").with("script", "return #string.rep('x', 1024)");
        let config = ExecutionConfig {
            max_lua_memory: 8 * 1024 * 1024,
            ..Default::default()
        };
        let ctx = testing::context_with(&node, vec![], config).await;
        assert_eq!(LuaExecutor.execute(&ctx, &node).await.unwrap(), json!(1024));
    }
}
