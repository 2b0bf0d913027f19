use std::collections::HashSet;

use swarmgraph_core::types::{Edge, EdgeKind};

/// Check whether adding `source -> target` of `kind` would close a cycle.
///
/// Walks forward from `target` over existing edges of the same kind; the new
/// edge closes a loop iff `source` is reachable. A self loop is always a cycle.
pub fn would_cycle(edges: &[Edge], kind: EdgeKind, source: &str, target: &str) -> bool {
    if source == target {
        return true;
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![target];

    while let Some(current) = stack.pop() {
        if current == source {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        stack.extend(
            edges
                .iter()
                .filter(|e| e.kind == kind && e.source.as_str() == current)
                .map(|e| e.target.as_str())
                .filter(|next| !visited.contains(next)),
        );
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ids: &[&str]) -> Vec<Edge> {
        ids.windows(2)
            .map(|w| Edge::agent_link(w[0], w[1]))
            .collect()
    }

    #[test]
    fn self_loop_is_cycle() {
        assert!(would_cycle(&[], EdgeKind::AgentLink, "a", "a"));
    }

    #[test]
    fn back_edge_to_any_ancestor_is_cycle() {
        let edges = chain(&["a", "b", "c", "d"]);
        for ancestor in ["a", "b", "c"] {
            assert!(
                would_cycle(&edges, EdgeKind::AgentLink, "d", ancestor),
                "d -> {ancestor} should be rejected"
            );
        }
    }

    #[test]
    fn forward_and_sibling_edges_are_fine() {
        let edges = chain(&["a", "b", "c"]);
        assert!(!would_cycle(&edges, EdgeKind::AgentLink, "a", "c"));
        assert!(!would_cycle(&edges, EdgeKind::AgentLink, "x", "a"));
        assert!(!would_cycle(&edges, EdgeKind::AgentLink, "c", "x"));
    }

    #[test]
    fn other_kind_edges_are_ignored() {
        let edges = vec![Edge::team_link("t1", "t2")];
        assert!(!would_cycle(&edges, EdgeKind::AgentLink, "t2", "t1"));
        assert!(would_cycle(&edges, EdgeKind::TeamLink, "t2", "t1"));
    }

    #[test]
    fn diamond_reachability() {
        let edges = vec![
            Edge::agent_link("a", "b"),
            Edge::agent_link("a", "c"),
            Edge::agent_link("b", "d"),
            Edge::agent_link("c", "d"),
        ];
        assert!(would_cycle(&edges, EdgeKind::AgentLink, "d", "a"));
        assert!(!would_cycle(&edges, EdgeKind::AgentLink, "b", "c"));
    }
}
