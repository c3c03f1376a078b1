//! Level scheduler
//!
//! Partitions a validated graph into execution levels: level 0 holds every
//! node without incoming edges, level k every node whose predecessors all sit
//! in levels below k. Nodes in one level are mutually independent and may run
//! concurrently. Levels are computed once per run, before any node executes.

use crate::workflow::Graph;
use serde::Serialize;
use std::collections::HashMap;

/// A set of mutually independent nodes, sorted by ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionLevel {
    /// Position of this level in the run (0-based)
    pub index: usize,
    /// Node IDs in ascending order
    pub nodes: Vec<String>,
}

impl ExecutionLevel {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Compute the ordered execution levels of a graph
///
/// Iterative layering by incoming-degree reduction: every round takes the
/// nodes whose predecessors have all been leveled. A node therefore lands at
/// `1 + max(level of its predecessors)`.
pub fn compute_levels(graph: &Graph) -> Vec<ExecutionLevel> {
    let mut remaining: HashMap<&str, usize> = graph
        .nodes()
        .map(|node| (node.id.as_str(), graph.predecessors(&node.id).len()))
        .collect();

    // Graph::nodes iterates by ID, so the first layer is already sorted.
    let mut current: Vec<String> = graph
        .nodes()
        .filter(|node| graph.predecessors(&node.id).is_empty())
        .map(|node| node.id.clone())
        .collect();

    let mut levels = Vec::new();
    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            for successor in graph.successors(id) {
                if let Some(count) = remaining.get_mut(successor.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(successor.clone());
                    }
                }
            }
        }
        next.sort();

        levels.push(ExecutionLevel {
            index: levels.len(),
            nodes: current,
        });
        current = next;
    }

    tracing::debug!(
        "📋 Computed {} execution levels for '{}': {:?}",
        levels.len(),
        graph.id(),
        levels.iter().map(|l| &l.nodes).collect::<Vec<_>>()
    );

    levels
}

/// Pick the node whose output becomes the workflow result
///
/// An explicitly designated terminal wins. Otherwise the last node without
/// outgoing edges in level order (levels ascending, IDs ascending within a
/// level) is chosen.
pub fn select_terminal(graph: &Graph, levels: &[ExecutionLevel]) -> String {
    if let Some(terminal) = graph.designated_terminal() {
        return terminal.to_string();
    }

    levels
        .iter()
        .flat_map(|level| level.nodes.iter())
        .filter(|id| graph.successors(id).is_empty())
        .last()
        .cloned()
        // A non-empty DAG always has a sink; this only guards an empty level list.
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Edge, GraphDefinition, Node};

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph {
        Graph::new(GraphDefinition {
            id: "levels".into(),
            nodes: nodes.iter().map(|id| Node::new(*id, "value")).collect(),
            edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
            terminal: None,
        })
        .unwrap()
    }

    fn level_ids(levels: &[ExecutionLevel]) -> Vec<Vec<&str>> {
        levels
            .iter()
            .map(|l| l.nodes.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn linear_chain_has_one_node_per_level() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let levels = compute_levels(&g);
        assert_eq!(level_ids(&levels), vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(levels[2].index, 2);
    }

    #[test]
    fn diamond_groups_independent_branches() {
        let g = graph(
            &["d", "c", "b", "a"],
            &[("a", "c"), ("a", "b"), ("b", "d"), ("c", "d")],
        );
        let levels = compute_levels(&g);
        assert_eq!(level_ids(&levels), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn level_is_one_plus_deepest_predecessor() {
        // e depends on a (level 0) and on d (level 2) → level 3
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "e"), ("b", "c"), ("c", "d"), ("d", "e")],
        );
        let levels = compute_levels(&g);
        assert_eq!(
            level_ids(&levels),
            vec![vec!["a", "b"], vec!["c"], vec!["d"], vec!["e"]]
        );
    }

    #[test]
    fn every_predecessor_lies_in_an_earlier_level() {
        let g = graph(
            &["a", "b", "c", "d", "e", "f", "g"],
            &[
                ("a", "c"),
                ("b", "c"),
                ("c", "e"),
                ("d", "e"),
                ("a", "f"),
                ("e", "g"),
                ("f", "g"),
                ("b", "g"),
            ],
        );
        let levels = compute_levels(&g);
        let level_of: HashMap<&str, usize> = levels
            .iter()
            .flat_map(|l| l.nodes.iter().map(move |id| (id.as_str(), l.index)))
            .collect();

        assert_eq!(level_of.len(), g.len());
        for edge in g.edges() {
            assert!(
                level_of[edge.source.as_str()] < level_of[edge.target.as_str()],
                "{} must precede {}",
                edge.source,
                edge.target
            );
        }
        for level in &levels {
            let mut sorted = level.nodes.clone();
            sorted.sort();
            assert_eq!(sorted, level.nodes);
        }
    }

    #[test]
    fn terminal_defaults_to_last_sink_in_level_order() {
        let g = graph(&["a", "x", "b", "y"], &[("a", "b"), ("a", "x"), ("x", "y")]);
        let levels = compute_levels(&g);
        // sinks: b (level 1), y (level 2)
        assert_eq!(select_terminal(&g, &levels), "y");

        let g = graph(&["a", "b", "c"], &[("a", "b"), ("a", "c")]);
        assert_eq!(select_terminal(&g, &compute_levels(&g)), "c");
    }

    #[test]
    fn designated_terminal_wins() {
        let g = Graph::new(GraphDefinition {
            id: "t".into(),
            nodes: vec![Node::new("a", "value"), Node::new("b", "value")],
            edges: vec![Edge::new("a", "b")],
            terminal: Some("a".into()),
        })
        .unwrap();
        assert_eq!(select_terminal(&g, &compute_levels(&g)), "a");
    }
}
