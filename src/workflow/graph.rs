//! Validated, immutable workflow graph
//!
//! Definitions are loaded into a petgraph DAG to check structural
//! well-formedness (every edge endpoint exists, no cycles) before anything is
//! scheduled. The resulting `Graph` is frozen and cheap to clone, so every
//! concurrent node task can hold it for the lifetime of a run.

use crate::error::{Error, Result};
use crate::workflow::types::{Edge, GraphDefinition, Node};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A workflow DAG that passed validation
#[derive(Debug, Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

#[derive(Debug)]
struct GraphInner {
    id: String,
    /// Nodes keyed (and therefore iterated) by ID
    nodes: BTreeMap<String, Node>,
    /// Edges with duplicates collapsed, in definition order
    edges: Vec<Edge>,
    /// Per node, the producing nodes in edge order
    predecessors: HashMap<String, Vec<String>>,
    /// Per node, the consuming nodes in edge order
    successors: HashMap<String, Vec<String>>,
    terminal: Option<String>,
}

/// Check a definition without keeping the result
///
/// Fails with `Cycle`, `DanglingEdge`, `DuplicateNode`, `EmptyGraph` or
/// `UnknownTerminal`.
pub fn validate(definition: &GraphDefinition) -> Result<()> {
    build(definition).map(|_| ())
}

impl Graph {
    /// Validate a definition and freeze it
    pub fn new(definition: GraphDefinition) -> Result<Self> {
        let inner = build(&definition)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Parse a JSON definition, then validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: GraphDefinition =
            serde_json::from_str(json).map_err(|e| Error::Definition(e.to_string()))?;
        Self::new(definition)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.inner.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.nodes.contains_key(id)
    }

    /// All nodes, ordered by ID
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.inner.edges
    }

    /// Nodes whose outputs feed `id`, in edge order
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.inner
            .predecessors
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes consuming `id`'s output, in edge order
    pub fn successors(&self, id: &str) -> &[String] {
        self.inner
            .successors
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes without outgoing edges, ordered by ID
    pub fn sinks(&self) -> Vec<&str> {
        self.inner
            .nodes
            .keys()
            .filter(|id| self.successors(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Terminal node named explicitly by the definition
    pub fn designated_terminal(&self) -> Option<&str> {
        self.inner.terminal.as_deref()
    }
}

impl TryFrom<GraphDefinition> for Graph {
    type Error = Error;

    fn try_from(definition: GraphDefinition) -> Result<Self> {
        Graph::new(definition)
    }
}

fn build(definition: &GraphDefinition) -> Result<GraphInner> {
    tracing::debug!(
        "🏗️ Building workflow graph '{}' with {} nodes and {} edges",
        definition.id,
        definition.nodes.len(),
        definition.edges.len()
    );

    if definition.nodes.is_empty() {
        return Err(Error::EmptyGraph);
    }

    let mut dag = DiGraph::<String, ()>::new();
    let mut node_id_to_index = HashMap::new();
    let mut nodes = BTreeMap::new();
    let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();

    for node in &definition.nodes {
        if nodes.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id.clone()));
        }
        let index = dag.add_node(node.id.clone());
        node_id_to_index.insert(node.id.clone(), index);
        nodes.insert(node.id.clone(), node.clone());
        predecessors.insert(node.id.clone(), Vec::new());
        successors.insert(node.id.clone(), Vec::new());
    }

    let mut edges = Vec::with_capacity(definition.edges.len());
    for edge in &definition.edges {
        let dangling = |missing: &String| Error::DanglingEdge {
            from: edge.source.clone(),
            to: edge.target.clone(),
            missing: missing.clone(),
        };
        let from = *node_id_to_index
            .get(&edge.source)
            .ok_or_else(|| dangling(&edge.source))?;
        let to = *node_id_to_index
            .get(&edge.target)
            .ok_or_else(|| dangling(&edge.target))?;

        if dag.contains_edge(from, to) {
            tracing::warn!(
                "⚠️ Collapsing duplicate edge '{}' → '{}'",
                edge.source,
                edge.target
            );
            continue;
        }

        dag.add_edge(from, to, ());
        successors
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
        predecessors
            .entry(edge.target.clone())
            .or_default()
            .push(edge.source.clone());
        edges.push(edge.clone());
    }

    // Any strongly connected component with more than one member, or a
    // self-loop, is a cycle.
    let mut cyclic: Vec<String> = tarjan_scc(&dag)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || dag.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|index| dag[index].clone())
        .collect();
    if !cyclic.is_empty() {
        cyclic.sort();
        tracing::error!("❌ Workflow '{}' contains a cycle: {:?}", definition.id, cyclic);
        return Err(Error::Cycle { nodes: cyclic });
    }

    if let Some(terminal) = &definition.terminal {
        if !nodes.contains_key(terminal) {
            return Err(Error::UnknownTerminal(terminal.clone()));
        }
    }

    tracing::debug!("✅ DAG validation successful for '{}'", definition.id);

    Ok(GraphInner {
        id: definition.id.clone(),
        nodes,
        edges,
        predecessors,
        successors,
        terminal: definition.terminal.clone(),
    })
}
