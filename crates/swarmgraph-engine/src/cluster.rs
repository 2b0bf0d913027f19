//! Cluster auto-attach policy, applied by the authoring layer when agents are
//! created. The executors only ever see resolved `cluster_id`s.

use tracing::debug;

use swarmgraph_core::config::ClusterConfig;
use swarmgraph_core::types::{Agent, Team};

/// Assigns Bosses a cluster of their own and Workers to the nearest Boss
/// that still has room.
#[derive(Debug, Clone)]
pub struct ClusterPolicy {
    max_workers_per_boss: usize,
}

impl ClusterPolicy {
    pub fn new(max_workers_per_boss: usize) -> Self {
        Self {
            max_workers_per_boss: max_workers_per_boss.max(1),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.max_workers_per_boss)
    }

    /// Resolve `agent.cluster_id` against its `peers`.
    ///
    /// A Boss without a cluster gets `cluster-<id>`. A Worker without a
    /// cluster joins the Boss with spare capacity closest to it (Manhattan
    /// distance); without positions the earliest such Boss wins. Agents that
    /// already carry a cluster id are left alone. Returns the resulting id.
    pub fn attach<'a>(
        &self,
        peers: impl IntoIterator<Item = &'a Agent>,
        agent: &mut Agent,
    ) -> Option<String> {
        if agent.cluster_id.is_some() {
            return agent.cluster_id.clone();
        }

        if agent.is_boss() {
            let cluster = format!("cluster-{}", agent.id);
            debug!(agent_id = %agent.id, cluster = %cluster, "Boss opened cluster");
            agent.cluster_id = Some(cluster.clone());
            return Some(cluster);
        }

        let peers: Vec<&Agent> = peers.into_iter().collect();
        let workers_in = |cluster: &str| {
            peers
                .iter()
                .filter(|p| !p.is_boss() && p.cluster_id.as_deref() == Some(cluster))
                .count()
        };

        let mut chosen: Option<(&Agent, f64)> = None;
        for boss in peers.iter().filter(|p| p.is_boss()) {
            let Some(cluster) = boss.cluster_id.as_deref() else {
                continue;
            };
            if workers_in(cluster) >= self.max_workers_per_boss {
                continue;
            }
            let distance = match (&boss.position, &agent.position) {
                (Some(b), Some(a)) => b.manhattan(a),
                _ => 0.0,
            };
            match chosen {
                Some((_, best)) if distance >= best => {}
                _ => chosen = Some((*boss, distance)),
            }
        }

        let cluster = chosen.and_then(|(boss, _)| boss.cluster_id.clone());
        match &cluster {
            Some(c) => debug!(agent_id = %agent.id, cluster = %c, "Worker attached to cluster"),
            None => debug!(agent_id = %agent.id, "No boss with spare capacity, worker left unattached"),
        }
        agent.cluster_id = cluster.clone();
        cluster
    }

    /// Attach `agent` against the team's current members and append it.
    pub fn add_to_team(&self, team: &mut Team, mut agent: Agent) {
        self.attach(team.members.iter(), &mut agent);
        agent.team_id = Some(team.id.clone());
        team.members.push(agent);
    }
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}
