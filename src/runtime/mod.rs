/// Runtime Execution Engine
///
/// This module runs validated workflow graphs level by level:
/// - Level scheduling over the DAG
/// - Concurrent dispatch of each level with a barrier between levels
/// - The execution context and resource governor shared by node tasks
/// - The node executor registry and the built-in node types

// Network admission (SSRF guard) shared by every network-capable executor
pub mod admission;

// Per-run shared state, exposed to executors through ExecutionContext
pub mod context;

// Level-parallel execution engine
pub mod engine;

// Built-in node executors
pub mod nodes;

// Type tag -> executor mapping
pub mod registry;

// Per-node and per-run results
pub mod result;

// Execution level computation and terminal selection
pub mod scheduler;

// Re-export main types
pub use admission::{AdmittedUrl, UrlAdmission};
pub use context::ExecutionContext;
pub use engine::{execute, ExecutionEngine};
pub use registry::{NodeExecutor, NodeRegistry, CONTROL_FLOW_TYPES};
pub use result::{ExecutionResult, NodeResult};
pub use scheduler::{compute_levels, select_terminal, ExecutionLevel};
