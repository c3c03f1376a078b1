//! Execution configuration for the dagway engine
//!
//! Resource ceilings and behavioral flags for a single run. The config is
//! built before execution and shared read-only by every concurrent node task.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource ceilings and behavioral flags applied to every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Overall run deadline
    pub max_execution_time: Duration,
    /// Deadline for a single node dispatch
    pub max_node_execution_time: Duration,
    /// Total dispatch ceiling across the run, including executor-internal iterations
    pub max_node_executions: usize,
    /// Outbound network call ceiling per run
    pub max_http_calls_per_exec: usize,
    /// Concurrent task cap per level (0 = unbounded)
    pub max_concurrency: usize,
    /// Run independent nodes of a level concurrently
    pub enable_parallel: bool,
    /// Longest string (in characters) allowed anywhere in a node output
    pub max_string_length: usize,
    /// Longest array allowed anywhere in a node output
    pub max_array_length: usize,
    /// Deepest array/object nesting allowed in a node output
    pub max_context_depth: usize,
    /// Maximum number of run variables
    pub max_variables: usize,
    /// Heap ceiling in bytes for each Lua state
    pub max_lua_memory: usize,
    /// Refuse loopback, link-local and private network targets
    pub block_internal_ips: bool,
    /// Regular expressions over full URLs. Empty admits every external target;
    /// otherwise only matching URLs are admitted, internal ones included.
    pub allowed_url_patterns: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_execution_time: Duration::from_secs(300),
            max_node_execution_time: Duration::from_secs(30),
            max_node_executions: 1000,
            max_http_calls_per_exec: 100,
            max_concurrency: 0,
            enable_parallel: true,
            max_string_length: 1024 * 1024,
            max_array_length: 10_000,
            max_context_depth: 32,
            max_variables: 1000,
            max_lua_memory: 64 * 1024 * 1024,
            block_internal_ips: true,
            allowed_url_patterns: Vec::new(),
        }
    }
}

impl ExecutionConfig {
    /// Defaults overlaid with `DAGWAY_*` environment variables for container deployment.
    ///
    /// Unset or unparsable variables keep their default value.
    /// `DAGWAY_ALLOWED_URL_PATTERNS` is a comma separated list.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_execution_time: env_secs("DAGWAY_MAX_EXECUTION_TIME_SECS")
                .unwrap_or(defaults.max_execution_time),
            max_node_execution_time: env_secs("DAGWAY_MAX_NODE_EXECUTION_TIME_SECS")
                .unwrap_or(defaults.max_node_execution_time),
            max_node_executions: env_parse("DAGWAY_MAX_NODE_EXECUTIONS")
                .unwrap_or(defaults.max_node_executions),
            max_http_calls_per_exec: env_parse("DAGWAY_MAX_HTTP_CALLS_PER_EXEC")
                .unwrap_or(defaults.max_http_calls_per_exec),
            max_concurrency: env_parse("DAGWAY_MAX_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency),
            enable_parallel: env_parse("DAGWAY_ENABLE_PARALLEL")
                .unwrap_or(defaults.enable_parallel),
            max_string_length: env_parse("DAGWAY_MAX_STRING_LENGTH")
                .unwrap_or(defaults.max_string_length),
            max_array_length: env_parse("DAGWAY_MAX_ARRAY_LENGTH")
                .unwrap_or(defaults.max_array_length),
            max_context_depth: env_parse("DAGWAY_MAX_CONTEXT_DEPTH")
                .unwrap_or(defaults.max_context_depth),
            max_variables: env_parse("DAGWAY_MAX_VARIABLES").unwrap_or(defaults.max_variables),
            max_lua_memory: env_parse("DAGWAY_MAX_LUA_MEMORY").unwrap_or(defaults.max_lua_memory),
            block_internal_ips: env_parse("DAGWAY_BLOCK_INTERNAL_IPS")
                .unwrap_or(defaults.block_internal_ips),
            allowed_url_patterns: std::env::var("DAGWAY_ALLOWED_URL_PATTERNS")
                .map(|raw| split_patterns(&raw))
                .unwrap_or(defaults.allowed_url_patterns),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
