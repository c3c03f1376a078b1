/// Dagway: level-parallel DAG workflow execution engine
///
/// This library validates workflow graphs, groups their nodes into dependency
/// levels and runs each level concurrently under per-run resource ceilings,
/// with an extensible registry of node executors.

// Execution configuration and environment overlay
pub mod config;

// Error taxonomy
pub mod error;

// Workflow definitions and graph validation
pub mod workflow;

// Runtime execution engine - scheduling, dispatch, governor and node types
pub mod runtime;

// Re-export commonly used types for external consumers
pub use config::ExecutionConfig;
pub use error::{Error, GovernorError, Resource, Result};
pub use runtime::{
    execute, ExecutionContext, ExecutionEngine, ExecutionResult, NodeExecutor, NodeRegistry,
    NodeResult,
};
pub use workflow::{validate, Edge, Graph, GraphDefinition, Node};
