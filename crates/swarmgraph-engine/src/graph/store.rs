use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use swarmgraph_core::error::{Result, SwarmError};
use swarmgraph_core::types::{Agent, Edge, Node, NodeId, NodeKind, Team};

use super::cycle::would_cycle;

/// Serializable form of a graph, handed to and from the persistence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Agents, teams, and the typed edges between them.
///
/// Every mutation is validated before anything is touched, so a rejected call
/// leaves the graph exactly as it was. Team members live inside their team and
/// are not graph nodes in their own right: they cannot hold edges.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a snapshot, re-validating every invariant.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.add_node(node)?;
        }
        for edge in snapshot.edges {
            let expected = graph.kind_for_edge(edge.source.as_str())?.edge_kind();
            if edge.kind != expected {
                return Err(SwarmError::InvalidEdgeKind {
                    source_id: edge.source.to_string(),
                    target_id: edge.target.to_string(),
                    reason: format!("declared {:?} but endpoints require {:?}", edge.kind, expected),
                });
            }
            graph.add_edge(edge.source.as_str(), edge.target.as_str())?;
        }
        Ok(graph)
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges.clone(),
        }
    }

    /// Parse and validate a JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Graph nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.get(id).and_then(Node::as_agent)
    }

    pub fn team(&self, id: &str) -> Option<&Team> {
        self.get(id).and_then(Node::as_team)
    }

    /// The team an agent belongs to, if it is a member.
    pub fn team_of(&self, agent_id: &str) -> Option<&Team> {
        self.nodes()
            .filter_map(Node::as_team)
            .find(|t| t.member(agent_id).is_some())
    }

    /// Add a standalone agent or a team.
    pub fn add_node(&mut self, node: impl Into<Node>) -> Result<()> {
        let mut node = node.into();
        self.check_id_free(node.id().as_str())?;

        match &mut node {
            Node::Agent(agent) => {
                if let Some(team_id) = &agent.team_id {
                    return Err(SwarmError::InvalidMembership(format!(
                        "agent {} carries team_id {} but was added as a standalone node",
                        agent.id, team_id
                    )));
                }
            }
            Node::Team(team) => {
                let mut seen = HashSet::new();
                for member in &team.members {
                    if member.id == team.id || !seen.insert(member.id.as_str()) {
                        return Err(SwarmError::DuplicateNode(member.id.to_string()));
                    }
                    self.check_id_free(member.id.as_str())?;
                    if let Some(other) = &member.team_id {
                        if other != &team.id {
                            return Err(SwarmError::InvalidMembership(format!(
                                "agent {} belongs to team {}, not {}",
                                member.id, other, team.id
                            )));
                        }
                    }
                }
                check_boss_clusters(team)?;
                let team_id = team.id.clone();
                for member in &mut team.members {
                    member.team_id = Some(team_id.clone());
                }
            }
        }

        debug!(node_id = %node.id(), kind = ?node.kind(), "Node added");
        let id = node.id().clone();
        self.order.push(id.clone());
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    ///
    /// Removing a team turns its members back into standalone agents, placed
    /// where the team used to be. The returned team has no members left.
    pub fn remove_node(&mut self, id: &str) -> Result<Node> {
        if !self.contains(id) {
            if let Some(team) = self.team_of(id) {
                return Err(SwarmError::InvalidMembership(format!(
                    "agent {} is a member of team {}; remove it from the team instead",
                    id, team.id
                )));
            }
            return Err(SwarmError::NodeNotFound(id.to_string()));
        }

        let Some(mut node) = self.nodes.remove(id) else {
            return Err(SwarmError::NodeNotFound(id.to_string()));
        };
        let index = self.order.iter().position(|n| n.as_str() == id).unwrap_or(self.order.len());
        self.order.retain(|n| n.as_str() != id);
        self.edges
            .retain(|e| e.source.as_str() != id && e.target.as_str() != id);

        if let Node::Team(team) = &mut node {
            let released: Vec<Agent> = team
                .members
                .drain(..)
                .map(|mut member| {
                    member.team_id = None;
                    member
                })
                .collect();
            for (offset, member) in released.into_iter().enumerate() {
                let member_id = member.id.clone();
                self.order.insert((index + offset).min(self.order.len()), member_id.clone());
                self.nodes.insert(member_id, Node::Agent(member));
            }
        }

        debug!(node_id = %id, "Node removed");
        Ok(node)
    }

    /// Add a directed edge between two nodes of the same kind.
    pub fn add_edge(&mut self, source: &str, target: &str) -> Result<()> {
        let source_kind = self.kind_for_edge(source)?;
        let target_kind = self.kind_for_edge(target)?;

        if source_kind != target_kind {
            return Err(SwarmError::InvalidEdgeKind {
                source_id: source.to_string(),
                target_id: target.to_string(),
                reason: format!("cannot link {:?} to {:?}", source_kind, target_kind),
            });
        }

        if self.has_edge(source, target) {
            return Err(SwarmError::DuplicateEdge {
                source_id: source.to_string(),
                target_id: target.to_string(),
            });
        }

        let kind = source_kind.edge_kind();
        if would_cycle(&self.edges, kind, source, target) {
            return Err(SwarmError::CycleDetected {
                source_id: source.to_string(),
                target_id: target.to_string(),
            });
        }

        debug!(source, target, ?kind, "Edge added");
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            kind,
        });
        Ok(())
    }

    pub fn remove_edge(&mut self, source: &str, target: &str) -> Result<Edge> {
        let index = self
            .edges
            .iter()
            .position(|e| e.source.as_str() == source && e.target.as_str() == target)
            .ok_or_else(|| SwarmError::EdgeNotFound {
                source_id: source.to_string(),
                target_id: target.to_string(),
            })?;
        Ok(self.edges.remove(index))
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source.as_str() == source && e.target.as_str() == target)
    }

    /// Nodes of `kind` with no incoming edge of that kind, in insertion order.
    pub fn roots(&self, kind: NodeKind) -> Vec<&Node> {
        let edge_kind = kind.edge_kind();
        self.nodes()
            .filter(|n| n.kind() == kind)
            .filter(|n| {
                !self
                    .edges
                    .iter()
                    .any(|e| e.kind == edge_kind && e.target == *n.id())
            })
            .collect()
    }

    /// Targets of edges leaving `id`.
    pub fn outgoing(&self, id: &str) -> Vec<&NodeId> {
        self.edges
            .iter()
            .filter(|e| e.source.as_str() == id)
            .map(|e| &e.target)
            .collect()
    }

    /// Sources of edges entering `id`.
    pub fn incoming(&self, id: &str) -> Vec<&NodeId> {
        self.edges
            .iter()
            .filter(|e| e.target.as_str() == id)
            .map(|e| &e.source)
            .collect()
    }

    /// Move a standalone, edge-less agent into a team.
    pub fn add_member(&mut self, team_id: &str, agent_id: &str) -> Result<()> {
        let Some(Node::Team(team)) = self.nodes.get(team_id) else {
            return Err(SwarmError::NodeNotFound(team_id.to_string()));
        };
        let Some(Node::Agent(agent)) = self.nodes.get(agent_id) else {
            return match self.team_of(agent_id) {
                Some(other) => Err(SwarmError::InvalidMembership(format!(
                    "agent {} already belongs to team {}",
                    agent_id, other.id
                ))),
                None => Err(SwarmError::NodeNotFound(agent_id.to_string())),
            };
        };
        if self
            .edges
            .iter()
            .any(|e| e.source.as_str() == agent_id || e.target.as_str() == agent_id)
        {
            return Err(SwarmError::InvalidMembership(format!(
                "agent {} still has edges; team members cannot hold edges",
                agent_id
            )));
        }
        if agent.is_boss() {
            if let Some(cluster) = &agent.cluster_id {
                if team.bosses().any(|b| b.cluster_id.as_ref() == Some(cluster)) {
                    return Err(SwarmError::InvalidMembership(format!(
                        "team {} already has a boss for cluster {}",
                        team_id, cluster
                    )));
                }
            }
        }

        let Some(Node::Agent(mut agent)) = self.nodes.remove(agent_id) else {
            return Err(SwarmError::NodeNotFound(agent_id.to_string()));
        };
        self.order.retain(|n| n.as_str() != agent_id);
        agent.team_id = Some(team_id.into());
        if let Some(Node::Team(team)) = self.nodes.get_mut(team_id) {
            team.members.push(agent);
        }
        debug!(team_id, agent_id, "Member added");
        Ok(())
    }

    /// Take an agent out of its team, making it a standalone node again.
    pub fn remove_member(&mut self, team_id: &str, agent_id: &str) -> Result<Agent> {
        let Some(Node::Team(team)) = self.nodes.get_mut(team_id) else {
            return Err(SwarmError::NodeNotFound(team_id.to_string()));
        };
        let index = team
            .members
            .iter()
            .position(|m| m.id.as_str() == agent_id)
            .ok_or_else(|| {
                SwarmError::InvalidMembership(format!(
                    "agent {} is not a member of team {}",
                    agent_id, team_id
                ))
            })?;
        let mut agent = team.members.remove(index);
        agent.team_id = None;

        self.order.push(agent.id.clone());
        self.nodes.insert(agent.id.clone(), Node::Agent(agent.clone()));
        debug!(team_id, agent_id, "Member removed");
        Ok(agent)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Kind of a node that may carry an edge; members and unknown ids are rejected.
    fn kind_for_edge(&self, id: &str) -> Result<NodeKind> {
        if let Some(node) = self.get(id) {
            return Ok(node.kind());
        }
        if let Some(team) = self.team_of(id) {
            return Err(SwarmError::InvalidEdgeKind {
                source_id: id.to_string(),
                target_id: team.id.to_string(),
                reason: format!("agent {} is a member of team {} and cannot hold edges", id, team.id),
            });
        }
        Err(SwarmError::NodeNotFound(id.to_string()))
    }

    fn check_id_free(&self, id: &str) -> Result<()> {
        if self.contains(id) || self.team_of(id).is_some() {
            return Err(SwarmError::DuplicateNode(id.to_string()));
        }
        Ok(())
    }
}

/// No two bosses in one team may share a cluster id.
fn check_boss_clusters(team: &Team) -> Result<()> {
    let mut clusters = HashSet::new();
    for boss in team.bosses() {
        if let Some(cluster) = &boss.cluster_id {
            if !clusters.insert(cluster.as_str()) {
                return Err(SwarmError::InvalidMembership(format!(
                    "team {} has more than one boss for cluster {}",
                    team.id, cluster
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgraph_core::types::{AgentRole, Architecture, EdgeKind};

    fn agent(id: &str) -> Agent {
        Agent::new(id, id.to_uppercase(), "gpt-4")
    }

    fn sample() -> Graph {
        let mut graph = Graph::new();
        for id in ["a", "b", "c"] {
            graph.add_node(agent(id)).unwrap();
        }
        graph
            .add_node(
                Team::new("t1", "Team One", Architecture::Sequential)
                    .with_member(agent("m1"))
                    .with_member(agent("m2")),
            )
            .unwrap();
        graph
            .add_node(Team::new("t2", "Team Two", Architecture::Concurrent))
            .unwrap();
        graph
    }

    #[test]
    fn add_and_query_edges() {
        let mut graph = sample();
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("a", "c").unwrap();
        graph.add_edge("t1", "t2").unwrap();

        assert_eq!(graph.outgoing("a").len(), 2);
        assert_eq!(graph.incoming("b"), vec![&NodeId::from("a")]);
        assert_eq!(graph.edges()[2].kind, EdgeKind::TeamLink);

        let agent_roots: Vec<&str> = graph
            .roots(NodeKind::Agent)
            .iter()
            .map(|n| n.id().as_str())
            .collect();
        assert_eq!(agent_roots, vec!["a"]);
        let team_roots: Vec<&str> = graph
            .roots(NodeKind::Team)
            .iter()
            .map(|n| n.id().as_str())
            .collect();
        assert_eq!(team_roots, vec!["t1"]);
    }

    #[test]
    fn rejects_mixed_kinds_and_member_edges() {
        let mut graph = sample();
        assert!(matches!(
            graph.add_edge("a", "t1"),
            Err(SwarmError::InvalidEdgeKind { .. })
        ));
        assert!(matches!(
            graph.add_edge("a", "m1"),
            Err(SwarmError::InvalidEdgeKind { .. })
        ));
        assert!(matches!(
            graph.add_edge("m2", "b"),
            Err(SwarmError::InvalidEdgeKind { .. })
        ));
        assert!(matches!(
            graph.add_edge("a", "zzz"),
            Err(SwarmError::NodeNotFound(_))
        ));
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn rejects_duplicates() {
        let mut graph = sample();
        assert!(matches!(graph.add_node(agent("a")), Err(SwarmError::DuplicateNode(_))));
        assert!(matches!(graph.add_node(agent("m1")), Err(SwarmError::DuplicateNode(_))));
        graph.add_edge("a", "b").unwrap();
        assert!(matches!(
            graph.add_edge("a", "b"),
            Err(SwarmError::DuplicateEdge { .. })
        ));
    }

    #[test]
    fn cycle_rejection_leaves_graph_unchanged() {
        let mut graph = sample();
        graph.add_node(agent("d")).unwrap();
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.add_edge("c", "d").unwrap();
        let before = graph.edges().to_vec();

        for ancestor in ["a", "b", "c", "d"] {
            assert!(matches!(
                graph.add_edge("d", ancestor),
                Err(SwarmError::CycleDetected { .. })
            ));
        }
        assert_eq!(graph.edges(), before.as_slice());
    }

    #[test]
    fn standalone_agent_with_team_id_is_rejected() {
        let mut graph = Graph::new();
        let mut stray = agent("x");
        stray.team_id = Some("t9".into());
        assert!(matches!(
            graph.add_node(stray),
            Err(SwarmError::InvalidMembership(_))
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn duplicate_boss_cluster_is_rejected() {
        let mut graph = Graph::new();
        let team = Team::new("t", "T", Architecture::Hierarchical)
            .with_member(agent("b1").with_role(AgentRole::Boss).with_cluster("c1"))
            .with_member(agent("b2").with_role(AgentRole::Boss).with_cluster("c1"));
        assert!(matches!(
            graph.add_node(team),
            Err(SwarmError::InvalidMembership(_))
        ));
    }

    #[test]
    fn removing_node_cascades_edges() {
        let mut graph = sample();
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.remove_node("b").unwrap();
        assert!(graph.edges().is_empty());
        assert!(!graph.contains("b"));
    }

    #[test]
    fn removing_team_releases_members() {
        let mut graph = sample();
        graph.add_edge("t1", "t2").unwrap();

        let removed = graph.remove_node("t1").unwrap();
        assert!(removed.as_team().unwrap().members.is_empty());
        assert!(graph.edges().is_empty());

        let m1 = graph.agent("m1").expect("m1 is standalone now");
        assert!(m1.team_id.is_none());
        assert!(graph.team_of("m1").is_none());

        let order: Vec<&str> = graph.nodes().map(|n| n.id().as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "m1", "m2", "t2"]);

        // Released members can now hold edges.
        graph.add_edge("m1", "m2").unwrap();
    }

    #[test]
    fn removing_member_via_remove_node_is_rejected() {
        let mut graph = sample();
        assert!(matches!(
            graph.remove_node("m1"),
            Err(SwarmError::InvalidMembership(_))
        ));
        assert!(matches!(graph.remove_node("nope"), Err(SwarmError::NodeNotFound(_))));
    }

    #[test]
    fn membership_moves() {
        let mut graph = sample();
        graph.add_edge("a", "b").unwrap();
        assert!(matches!(
            graph.add_member("t2", "a"),
            Err(SwarmError::InvalidMembership(_))
        ));

        graph.add_member("t2", "c").unwrap();
        assert!(!graph.contains("c"));
        assert_eq!(graph.team_of("c").unwrap().id.as_str(), "t2");
        assert!(matches!(
            graph.add_member("t1", "c"),
            Err(SwarmError::InvalidMembership(_))
        ));

        let released = graph.remove_member("t2", "c").unwrap();
        assert!(released.team_id.is_none());
        assert!(graph.agent("c").is_some());
    }

    #[test]
    fn snapshot_round_trip_revalidates() {
        let mut graph = sample();
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("t1", "t2").unwrap();

        let restored = Graph::from_json(&graph.to_json_pretty().unwrap()).unwrap();
        assert_eq!(restored.len(), graph.len());
        assert_eq!(restored.edges(), graph.edges());
        assert_eq!(restored.team("t1").unwrap().members.len(), 2);

        let mut cyclic = graph.to_snapshot();
        cyclic.edges.push(Edge::agent_link("b", "a"));
        assert!(matches!(
            Graph::from_snapshot(cyclic),
            Err(SwarmError::CycleDetected { .. })
        ));

        let mut mislabeled = graph.to_snapshot();
        mislabeled.edges.push(Edge::team_link("b", "c"));
        assert!(matches!(
            Graph::from_snapshot(mislabeled),
            Err(SwarmError::InvalidEdgeKind { .. })
        ));
    }
}
