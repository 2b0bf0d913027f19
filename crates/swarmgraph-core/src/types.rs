use std::borrow::Borrow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique node identifier, shared by agents and teams.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Role of an agent within a cluster.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentRole {
    #[default]
    Worker,
    Boss,
}

/// Concurrency discipline governing how a team's members run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Architecture {
    #[default]
    Concurrent,
    Sequential,
    Hierarchical,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Concurrent => "Concurrent",
            Self::Sequential => "Sequential",
            Self::Hierarchical => "Hierarchical",
        };
        f.write_str(name)
    }
}

/// Processing state of a node within one run.
///
/// For teams `Done` reads as Completed and `Errored` as Failed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeState {
    #[default]
    Idle,
    Running,
    Done,
    Errored,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    /// Whether moving from `self` to `next` respects `Idle -> Running -> {Done, Errored}`.
    ///
    /// `Idle -> Errored` is allowed for nodes that are failed without being
    /// invoked (all upstream sources failed).
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Errored)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Errored)
        )
    }
}

/// Canvas coordinates, only used by the cluster auto-attach policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn manhattan(&self, other: &Position) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// An atomic task executor bound to one model and one system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    pub model_id: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Links a Boss to its Workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    /// Set iff the agent is a team member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<NodeId>,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Agent {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: AgentRole::Worker,
            model_id: model_id.into(),
            system_prompt: String::new(),
            cluster_id: None,
            team_id: None,
            state: NodeState::Idle,
            last_result: None,
            position: None,
        }
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn is_boss(&self) -> bool {
        self.role == AgentRole::Boss
    }

    pub fn is_member(&self) -> bool {
        self.team_id.is_some()
    }
}

/// A bounded group of agents sharing one architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub architecture: Architecture,
    /// Ordered; order only matters for `Sequential`.
    #[serde(default)]
    pub members: Vec<Agent>,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Team {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            architecture,
            members: vec![],
            state: NodeState::Idle,
            aggregate_result: None,
            error: None,
        }
    }

    /// Append a member, stamping its `team_id`.
    pub fn with_member(mut self, mut agent: Agent) -> Self {
        agent.team_id = Some(self.id.clone());
        self.members.push(agent);
        self
    }

    pub fn member(&self, id: &str) -> Option<&Agent> {
        self.members.iter().find(|m| m.id.as_str() == id)
    }

    pub fn bosses(&self) -> impl Iterator<Item = &Agent> {
        self.members.iter().filter(|m| m.is_boss())
    }

    pub fn workers(&self) -> impl Iterator<Item = &Agent> {
        self.members.iter().filter(|m| !m.is_boss())
    }
}

/// Discriminant for `Node`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Agent,
    Team,
}

impl NodeKind {
    /// The edge kind that connects two nodes of this kind.
    pub fn edge_kind(&self) -> EdgeKind {
        match self {
            Self::Agent => EdgeKind::AgentLink,
            Self::Team => EdgeKind::TeamLink,
        }
    }
}

/// A graph node: either a standalone agent or a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Agent(Agent),
    Team(Team),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Agent(a) => &a.id,
            Self::Team(t) => &t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Agent(a) => &a.name,
            Self::Team(t) => &t.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Agent(_) => NodeKind::Agent,
            Self::Team(_) => NodeKind::Team,
        }
    }

    pub fn as_agent(&self) -> Option<&Agent> {
        match self {
            Self::Agent(a) => Some(a),
            Self::Team(_) => None,
        }
    }

    pub fn as_team(&self) -> Option<&Team> {
        match self {
            Self::Team(t) => Some(t),
            Self::Agent(_) => None,
        }
    }
}

impl From<Agent> for Node {
    fn from(agent: Agent) -> Self {
        Self::Agent(agent)
    }
}

impl From<Team> for Node {
    fn from(team: Team) -> Self {
        Self::Team(team)
    }
}

/// Type of a directed edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    AgentLink,
    TeamLink,
}

/// A directed edge; context flows from `source` to `target`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn agent_link(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::AgentLink,
        }
    }

    pub fn team_link(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::TeamLink,
        }
    }
}

/// Event broadcast to all subscribers during execution.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A run started.
    RunStarted { run_id: String, task: String },
    /// A node (agent, team, or team member) changed state.
    StateChanged {
        run_id: String,
        node_id: NodeId,
        state: NodeState,
        at: DateTime<Utc>,
    },
    /// A hierarchical worker had no boss and was skipped.
    OrphanWorker { run_id: String, team_id: NodeId, worker_id: NodeId },
    /// A run finished.
    RunComplete {
        run_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_transitions() {
        assert!(NodeState::Idle.can_transition_to(NodeState::Running));
        assert!(NodeState::Running.can_transition_to(NodeState::Done));
        assert!(NodeState::Running.can_transition_to(NodeState::Errored));
        assert!(!NodeState::Done.can_transition_to(NodeState::Running));
        assert!(!NodeState::Errored.can_transition_to(NodeState::Done));
        assert!(!NodeState::Idle.can_transition_to(NodeState::Done));
    }

    #[test]
    fn team_builder_stamps_membership() {
        let team = Team::new("t1", "Research", Architecture::Hierarchical)
            .with_member(Agent::new("boss", "Lead", "gpt-4").with_role(AgentRole::Boss))
            .with_member(Agent::new("w1", "Reader", "gpt-4"));

        assert_eq!(team.members.len(), 2);
        assert!(team.members.iter().all(|m| m.team_id.as_ref() == Some(&team.id)));
        assert_eq!(team.bosses().count(), 1);
        assert_eq!(team.workers().count(), 1);
        assert!(team.member("w1").is_some());
    }

    #[test]
    fn node_serde_is_tagged() {
        let node: Node = Agent::new("a1", "Writer", "gpt-4").into();
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "agent");
        assert_eq!(json["id"], "a1");

        let parsed: Node = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind(), NodeKind::Agent);
        assert_eq!(parsed.id().as_str(), "a1");
    }

    #[test]
    fn manhattan_distance() {
        let a = Position { x: 0.0, y: 0.0 };
        let b = Position { x: 3.0, y: -4.0 };
        assert_eq!(a.manhattan(&b), 7.0);
    }
}
