//! Core workflow type definitions
//!
//! The input shape handed over by an external deserializer: a list of typed
//! nodes with opaque config plus a list of directed edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete workflow definition as received from the outside world
///
/// Definitions are unchecked. `Graph::new` validates and freezes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Workflow identifier used in logs (e.g., "wf-grading")
    #[serde(default = "default_workflow_id")]
    pub id: String,
    /// Nodes of the workflow
    pub nodes: Vec<Node>,
    /// Directed data dependencies between nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Node whose output becomes the workflow result. When absent the last
    /// sink in level order is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

fn default_workflow_id() -> String {
    "workflow".to_string()
}

/// A single node in the workflow DAG
///
/// The type tag selects an executor from the registry. Config is an ordered
/// key/value mapping interpreted only by that executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "fetch-user")
    pub id: String,
    /// Executor type tag (e.g., "math", "http")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Executor-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Map::new(),
        }
    }

    /// Builder-style config entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    /// String config entry that must be present, for executor validation
    pub fn require_str(&self, key: &str) -> anyhow::Result<&str> {
        self.config_str(key)
            .ok_or_else(|| anyhow::anyhow!("missing string parameter '{}'", key))
    }
}

/// Connection between two nodes in the workflow DAG
///
/// Target consumes source's output as an input. `from`/`to` are accepted as
/// aliases for older definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Producing node ID
    #[serde(alias = "from")]
    pub source: String,
    /// Consuming node ID
    #[serde(alias = "to")]
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}
