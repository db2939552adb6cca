//! Backward traversal from a target node
//!
//! Collects every node reachable by following edges from target to source,
//! the target included. Cycles are legal (feedback loops through an output
//! node), so the traversal is an explicit-stack DFS over a visited set.

use std::collections::{HashMap, HashSet};

use crate::types::{GraphEdge, GraphNode};

/// Resolve the ancestor set of `target`.
///
/// Nodes come back in DFS discovery order starting with the target, which is
/// stable for a given node/edge ordering. An unknown target yields an empty
/// list. Edges pointing at nodes missing from `nodes` are ignored.
pub fn resolve_upstream(target: &str, nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<GraphNode> {
    let by_id: HashMap<&str, &GraphNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    if !by_id.contains_key(target) {
        return Vec::new();
    }

    let mut sources_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        sources_of
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![target];
    let mut ancestors = Vec::new();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = by_id.get(id) else {
            continue;
        };
        ancestors.push((*node).clone());

        if let Some(sources) = sources_of.get(id) {
            // Reverse so the first incoming edge is explored first
            for source in sources.iter().rev() {
                if !visited.contains(source) {
                    stack.push(source);
                }
            }
        }
    }

    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(nodes: &[GraphNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn node(id: &str) -> GraphNode {
        GraphNode::new(id, "pass")
    }

    #[test]
    fn test_linear_chain() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![GraphEdge::new("e1", "a", "b"), GraphEdge::new("e2", "b", "c")];

        let result = resolve_upstream("c", &nodes, &edges);
        assert_eq!(ids(&result), vec!["c", "b", "a"]);

        let result = resolve_upstream("b", &nodes, &edges);
        assert_eq!(ids(&result), vec!["b", "a"]);
    }

    #[test]
    fn test_excludes_downstream_and_unrelated_nodes() {
        let nodes = vec![node("a"), node("b"), node("c"), node("island")];
        let edges = vec![GraphEdge::new("e1", "a", "b"), GraphEdge::new("e2", "b", "c")];

        let result = resolve_upstream("b", &nodes, &edges);
        let found = ids(&result);
        assert!(!found.contains(&"c"));
        assert!(!found.contains(&"island"));
    }

    #[test]
    fn test_cycle_terminates() {
        let nodes = vec![node("a"), node("b"), node("out")];
        let edges = vec![
            GraphEdge::new("e1", "a", "b"),
            GraphEdge::new("e2", "b", "out"),
            GraphEdge::new("e3", "out", "a"),
        ];

        let result = resolve_upstream("out", &nodes, &edges);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].id, "out");
    }

    #[test]
    fn test_self_loop_and_diamond_have_no_duplicates() {
        let nodes = vec![node("root"), node("left"), node("right"), node("sink")];
        let edges = vec![
            GraphEdge::new("e1", "root", "left"),
            GraphEdge::new("e2", "root", "right"),
            GraphEdge::new("e3", "left", "sink"),
            GraphEdge::new("e4", "right", "sink"),
            GraphEdge::new("e5", "sink", "sink"),
        ];

        let result = resolve_upstream("sink", &nodes, &edges);
        assert_eq!(ids(&result), vec!["sink", "left", "root", "right"]);
    }

    #[test]
    fn test_unknown_target_and_dangling_edges() {
        let nodes = vec![node("a")];
        let edges = vec![GraphEdge::new("e1", "ghost", "a")];

        assert!(resolve_upstream("missing", &nodes, &edges).is_empty());
        assert_eq!(ids(&resolve_upstream("a", &nodes, &edges)), vec!["a"]);
    }
}
