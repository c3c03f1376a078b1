//! Result aggregation
//!
//! Collects every recorded node result and picks the terminal node's value
//! as the workflow's final output.

use crate::error::{Error, Result};
use crate::runtime::context::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a single dispatched node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Output value, present on success
    pub value: Option<Value>,
    /// Failure message, present on failure
    pub error: Option<String>,
    /// Wall time spent in the node
    pub elapsed_ms: u64,
}

impl NodeResult {
    pub(crate) fn success(value: Value, elapsed: Duration) -> Self {
        Self {
            value: Some(value),
            error: None,
            elapsed_ms: millis(elapsed),
        }
    }

    pub(crate) fn failure(error: &Error, elapsed: Duration) -> Self {
        Self {
            value: None,
            error: Some(error.to_string()),
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Result of executing an entire workflow
///
/// When `error` is set, `final_output` is empty but `node_results` still
/// holds everything recorded before the failure.
#[derive(Debug)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    /// Node whose value is the final output
    pub terminal: String,
    pub final_output: Option<Value>,
    /// Per-node results for every node that was dispatched, ordered by ID
    pub node_results: BTreeMap<String, NodeResult>,
    /// First error of the run
    pub error: Option<Error>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Final value of the node execution counter
    pub node_executions: usize,
    /// Final value of the outbound call counter
    pub http_calls: usize,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Recorded value of a node, if it succeeded
    pub fn value_of(&self, node_id: &str) -> Option<&Value> {
        self.node_results.get(node_id).and_then(|r| r.value.as_ref())
    }

    /// The final output, or the run's error
    pub fn into_output(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.final_output.unwrap_or(Value::Null)),
        }
    }
}

pub(crate) async fn aggregate(
    run: &RunState,
    workflow_id: &str,
    terminal: String,
    error: Option<Error>,
    started_at: DateTime<Utc>,
    duration: Duration,
) -> ExecutionResult {
    let node_results = run.results().await;
    let final_output = match error {
        None => node_results
            .get(&terminal)
            .and_then(|result| result.value.clone()),
        Some(_) => None,
    };

    ExecutionResult {
        run_id: run.run_id(),
        workflow_id: workflow_id.to_string(),
        terminal,
        final_output,
        node_results,
        error,
        started_at,
        duration,
        node_executions: run.node_executions(),
        http_calls: run.http_calls(),
    }
}
