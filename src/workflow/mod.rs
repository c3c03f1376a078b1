/// Workflow Definition Layer
///
/// This module handles workflow definitions and their validation:
/// - Type definitions (GraphDefinition, Node, Edge) as received from a deserializer
/// - The validated, immutable Graph built from them

// Core workflow type definitions
pub mod types;

// Validated DAG with structural and cycle checks
pub mod graph;

// Re-export commonly used types
pub use graph::{validate, Graph};
pub use types::{Edge, GraphDefinition, Node};
