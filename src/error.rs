//! Error taxonomy for graph validation, registry management and execution.
//!
//! Structural and per-node validation errors are raised before any node runs.
//! Runtime variants always carry the ID of the node that failed so callers can
//! tell "a node is broken" apart from "the workflow is too slow".

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a workflow can be rejected or fail.
#[derive(Debug, Error)]
pub enum Error {
    // Structural errors
    #[error("workflow definition is malformed: {0}")]
    Definition(String),

    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("graph contains a cycle through [{}]", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("designated terminal node '{0}' does not exist")]
    UnknownTerminal(String),

    // Per-node validation
    #[error("node '{node_id}' ({node_type}) has invalid config: {message}")]
    Validation {
        node_id: String,
        node_type: String,
        message: String,
    },

    // Registry errors
    #[error("an executor for node type '{0}' is already registered")]
    DuplicateType(String),

    #[error("node type '{0}' is reserved for graph control flow and cannot be registered")]
    ReservedType(String),

    #[error("unknown node type '{node_type}'{}", node_suffix(node_id))]
    UnknownType {
        node_type: String,
        node_id: Option<String>,
    },

    // Runtime errors
    #[error("node '{node_id}' exceeded {resource} limit of {limit}")]
    ResourceLimitExceeded {
        node_id: String,
        resource: Resource,
        limit: usize,
    },

    #[error("node '{node_id}' was refused network access to {url}: {reason}")]
    NetworkAdmission {
        node_id: String,
        url: String,
        reason: String,
    },

    #[error("node '{node_id}' has no recorded result for dependency '{dependency}'")]
    MissingDependency { node_id: String, dependency: String },

    #[error("{} timed out after {limit:?}", timeout_subject(node_id))]
    Timeout {
        node_id: Option<String>,
        limit: Duration,
    },

    #[error("node '{node_id}' failed: {source:#}")]
    Executor {
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal engine error: {0}")]
    Internal(String),
}

fn node_suffix(node_id: &Option<String>) -> String {
    match node_id {
        Some(id) => format!(" on node '{id}'"),
        None => String::new(),
    }
}

fn timeout_subject(node_id: &Option<String>) -> String {
    match node_id {
        Some(id) => format!("node '{id}'"),
        None => "workflow".to_string(),
    }
}

impl Error {
    /// ID of the node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Error::Validation { node_id, .. }
            | Error::ResourceLimitExceeded { node_id, .. }
            | Error::NetworkAdmission { node_id, .. }
            | Error::MissingDependency { node_id, .. }
            | Error::Executor { node_id, .. } => Some(node_id),
            Error::UnknownType { node_id, .. } | Error::Timeout { node_id, .. } => {
                node_id.as_deref()
            }
            _ => None,
        }
    }

    /// True for both the run deadline and the per-node deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Attribute a governor failure to the node whose dispatch raised it.
    pub(crate) fn from_governor(node_id: &str, err: GovernorError) -> Self {
        let node_id = node_id.to_string();
        match err {
            GovernorError::ResourceLimitExceeded { resource, limit } => {
                Error::ResourceLimitExceeded {
                    node_id,
                    resource,
                    limit,
                }
            }
            GovernorError::NetworkAdmission { url, reason } => Error::NetworkAdmission {
                node_id,
                url,
                reason,
            },
            GovernorError::MissingDependency { dependency } => Error::MissingDependency {
                node_id,
                dependency,
            },
            GovernorError::Cancelled => Error::Cancelled,
            err @ GovernorError::VariableRedefined(_) => Error::Executor {
                node_id,
                source: err.into(),
            },
        }
    }

    /// Map an executor's error back onto the taxonomy.
    ///
    /// Governor errors propagated with `?` keep their own kind even when
    /// wrapped in `anyhow` context.
    pub(crate) fn from_node_failure(node_id: &str, err: anyhow::Error) -> Self {
        if let Some(governor) = err.downcast_ref::<GovernorError>() {
            if !matches!(governor, GovernorError::VariableRedefined(_)) {
                return Error::from_governor(node_id, governor.clone());
            }
        }
        Error::Executor {
            node_id: node_id.to_string(),
            source: err,
        }
    }
}

/// Failure raised by the execution context on behalf of a single node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernorError {
    #[error("{resource} limit of {limit} exceeded")]
    ResourceLimitExceeded { resource: Resource, limit: usize },

    #[error("network target {url} refused: {reason}")]
    NetworkAdmission { url: String, reason: String },

    #[error("dependency '{dependency}' has no recorded result")]
    MissingDependency { dependency: String },

    #[error("variable '{0}' is already defined in this run")]
    VariableRedefined(String),

    #[error("execution cancelled")]
    Cancelled,
}

/// Governed resources with a per-run ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    NodeExecutions,
    HttpCalls,
    StringLength,
    ArrayLength,
    ContextDepth,
    Variables,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::NodeExecutions => "node execution",
            Resource::HttpCalls => "HTTP call",
            Resource::StringLength => "string length",
            Resource::ArrayLength => "array length",
            Resource::ContextDepth => "context depth",
            Resource::Variables => "variable count",
        };
        f.write_str(name)
    }
}
