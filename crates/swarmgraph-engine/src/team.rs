use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use swarmgraph_core::config::{EngineConfig, TeamFailurePolicy};
use swarmgraph_core::error::{Result, SwarmError};
use swarmgraph_core::types::{Agent, Architecture, NodeId, NodeState, SwarmEvent, Team};

use crate::agent::AgentExecutor;
use crate::prompt::{
    boss_delegation, boss_subtask, context_entry, failed_member_entry, upstream_failed_entry,
    PromptBuilder,
};
use crate::run_context::RunContext;

/// Result of running one team.
#[derive(Debug)]
pub struct TeamOutcome {
    pub team_id: NodeId,
    /// `Done` (completed), `Errored` (failed), or `Idle` when the run was
    /// cancelled before the team started.
    pub state: NodeState,
    /// `"<name>: <result>"` lines, one per member that ran.
    pub aggregate: String,
    pub member_results: HashMap<NodeId, String>,
    pub member_errors: HashMap<NodeId, SwarmError>,
    /// Non-fatal findings, e.g. orphan workers.
    pub warnings: Vec<SwarmError>,
    /// Why the team failed, when it did. Never set by cancellation.
    pub failure: Option<String>,
    /// The run was cancelled before every member was dispatched.
    pub cancelled: bool,
}

impl TeamOutcome {
    fn new(team_id: NodeId) -> Self {
        Self {
            team_id,
            state: NodeState::Running,
            aggregate: String::new(),
            member_results: HashMap::new(),
            member_errors: HashMap::new(),
            warnings: Vec::new(),
            failure: None,
            cancelled: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == NodeState::Done
    }

    /// Cancelled before the team started; it belongs in neither result map.
    pub fn skipped(&self) -> bool {
        self.state == NodeState::Idle
    }

    /// Record a member's result and return its aggregate line, or `None` if
    /// the member was never dispatched.
    fn absorb(&mut self, member: &Agent, result: Result<String>) -> Option<String> {
        match result {
            Ok(text) => {
                let line = context_entry(&member.name, &text);
                self.member_results.insert(member.id.clone(), text);
                Some(line)
            }
            Err(SwarmError::Cancelled) => {
                self.cancelled = true;
                None
            }
            Err(e) => {
                let line = failed_member_entry(&member.name, &e.to_string());
                self.member_errors.insert(member.id.clone(), e);
                Some(line)
            }
        }
    }
}

/// Runs a team's members according to its architecture and aggregates them.
#[derive(Clone)]
pub struct TeamExecutor {
    agents: AgentExecutor,
    policy: TeamFailurePolicy,
    delegation: bool,
}

impl TeamExecutor {
    pub fn new(agents: AgentExecutor) -> Self {
        Self {
            agents,
            policy: TeamFailurePolicy::default(),
            delegation: false,
        }
    }

    pub fn from_config(agents: AgentExecutor, config: &EngineConfig) -> Self {
        Self::new(agents)
            .with_policy(config.team_failure_policy)
            .with_delegation(config.hierarchical_delegation)
    }

    pub fn with_policy(mut self, policy: TeamFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Have each Boss write a worker-specific task before its Workers run.
    pub fn with_delegation(mut self, enabled: bool) -> Self {
        self.delegation = enabled;
        self
    }

    /// Run `team` on `task` with the upstream `context`.
    pub async fn run(
        &self,
        team: &Team,
        task: &str,
        context: &[String],
        ctx: &RunContext,
    ) -> TeamOutcome {
        let start = Instant::now();
        let mut outcome = TeamOutcome::new(team.id.clone());
        if ctx.is_cancelled() {
            debug!(team_id = %team.id, "Run cancelled, team not dispatched");
            outcome.state = NodeState::Idle;
            outcome.cancelled = true;
            return outcome;
        }
        ctx.set_state(&team.id, NodeState::Running);
        info!(
            team_id = %team.id,
            name = %team.name,
            architecture = %team.architecture,
            members = team.members.len(),
            "Running team"
        );

        let lines = if team.members.is_empty() {
            outcome.failure = Some("team has no members".into());
            Vec::new()
        } else {
            match team.architecture {
                Architecture::Concurrent => self.run_concurrent(team, task, context, ctx, &mut outcome).await,
                Architecture::Sequential => self.run_sequential(team, task, context, ctx, &mut outcome).await,
                Architecture::Hierarchical => {
                    self.run_hierarchical(team, task, context, ctx, &mut outcome).await
                }
            }
        };
        outcome.aggregate = lines.join("\n");

        if outcome.failure.is_none() {
            let succeeded = outcome.member_results.len();
            let failed = outcome.member_errors.len();
            if succeeded + failed == 0 {
                if !outcome.cancelled {
                    outcome.failure = Some("no member ran".into());
                }
            } else if !self.policy.team_succeeded(succeeded, failed) {
                outcome.failure = Some(format!("{} of {} members failed", failed, succeeded + failed));
            }
        }

        outcome.state = if outcome.failure.is_none() {
            NodeState::Done
        } else {
            NodeState::Errored
        };
        ctx.set_state(&team.id, outcome.state);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome.failure {
            None if outcome.cancelled => {
                let members_ran = outcome.member_results.len() + outcome.member_errors.len();
                info!(team_id = %team.id, elapsed_ms, members_ran, "Team stopped by cancellation")
            }
            None => info!(team_id = %team.id, elapsed_ms, "Team completed"),
            Some(reason) => warn!(team_id = %team.id, elapsed_ms, reason = %reason, "Team failed"),
        }
        outcome
    }

    /// Every member in parallel with the same context; fan-in barrier.
    async fn run_concurrent(
        &self,
        team: &Team,
        task: &str,
        context: &[String],
        ctx: &RunContext,
        outcome: &mut TeamOutcome,
    ) -> Vec<String> {
        let futs = team.members.iter().map(|member| async move {
            let result = self.agents.run(member, task, context, ctx).await;
            (member, result)
        });
        let results = join_all(futs).await;

        results
            .into_iter()
            .filter_map(|(member, result)| outcome.absorb(member, result))
            .collect()
    }

    /// Members in stored order, each seeing every earlier member's result.
    /// The first failure aborts the rest of the sequence; cancellation stops
    /// it without failing the team.
    async fn run_sequential(
        &self,
        team: &Team,
        task: &str,
        context: &[String],
        ctx: &RunContext,
        outcome: &mut TeamOutcome,
    ) -> Vec<String> {
        let mut running: Vec<String> = context.to_vec();
        let mut lines = Vec::new();

        for (index, member) in team.members.iter().enumerate() {
            let result = self.agents.run(member, task, &running, ctx).await;
            let failed = match &result {
                Ok(_) | Err(SwarmError::Cancelled) => None,
                Err(e) => Some(format!("member {} failed: {}", member.name, e)),
            };
            if let Some(line) = outcome.absorb(member, result) {
                if failed.is_none() {
                    running.push(line.clone());
                }
                lines.push(line);
            }
            if outcome.cancelled {
                debug!(team_id = %team.id, remaining = team.members.len() - index, "Run cancelled, sequence stopped");
                break;
            }
            if let Some(reason) = failed {
                let skipped = team.members.len() - index - 1;
                if skipped > 0 {
                    debug!(team_id = %team.id, skipped, "Sequence aborted, remaining members not run");
                }
                outcome.failure = Some(reason);
                break;
            }
        }
        lines
    }

    /// Two phases separated by a hard barrier: every Boss produces a subtask,
    /// then every Worker runs on its Boss's subtask.
    async fn run_hierarchical(
        &self,
        team: &Team,
        task: &str,
        context: &[String],
        ctx: &RunContext,
        outcome: &mut TeamOutcome,
    ) -> Vec<String> {
        // Phase 1: bosses
        let boss_task = boss_subtask(task);
        let boss_futs = team.bosses().map(|boss| {
            let boss_task = boss_task.as_str();
            async move {
                let result = self.agents.run(boss, boss_task, context, ctx).await;
                (boss, result)
            }
        });
        let boss_results = join_all(boss_futs).await;

        let mut subtasks: HashMap<&str, std::result::Result<String, String>> = HashMap::new();
        let mut lines = Vec::new();
        for (boss, result) in boss_results {
            let summary = match &result {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(e.to_string()),
            };
            if let Some(cluster) = boss.cluster_id.as_deref() {
                subtasks.insert(cluster, summary);
            }
            if let Some(line) = outcome.absorb(boss, result) {
                lines.push(line);
            }
        }
        debug!(team_id = %team.id, bosses = subtasks.len(), "Boss phase complete");

        // Phase 2: workers, only after every boss has resolved
        let mut assignments = Vec::new();
        for worker in team.workers() {
            let cluster = worker.cluster_id.as_deref().unwrap_or("<none>");
            let boss = team
                .bosses()
                .find(|b| b.cluster_id.as_deref() == Some(cluster));
            match (boss, subtasks.get(cluster)) {
                (Some(boss), Some(subtask)) => assignments.push((worker, boss, subtask.clone())),
                _ => {
                    warn!(team_id = %team.id, worker_id = %worker.id, cluster, "Worker has no boss, skipping");
                    ctx.publish(SwarmEvent::OrphanWorker {
                        run_id: ctx.run_id().to_string(),
                        team_id: team.id.clone(),
                        worker_id: worker.id.clone(),
                    });
                    outcome.warnings.push(SwarmError::OrphanWorker {
                        team: team.id.to_string(),
                        worker: worker.id.to_string(),
                        cluster: cluster.to_string(),
                    });
                }
            }
        }

        let worker_futs = assignments.into_iter().map(|(worker, boss, subtask)| async move {
            let mut worker_context = context.to_vec();
            let worker_task = match subtask {
                Ok(subtask) => self.delegate(boss, worker, subtask, ctx).await,
                Err(error) => {
                    worker_context.push(upstream_failed_entry(&boss.name, &error));
                    task.to_string()
                }
            };
            let result = self.agents.run(worker, &worker_task, &worker_context, ctx).await;
            (worker, result)
        });
        let worker_results = join_all(worker_futs).await;

        for (worker, result) in worker_results {
            if let Some(line) = outcome.absorb(worker, result) {
                lines.push(line);
            }
        }
        lines
    }

    /// The task a Worker receives from its Boss.
    ///
    /// Without delegation this is the Boss's subtask verbatim. With it, the
    /// Boss model writes a worker-specific task; if that call fails the
    /// subtask is used instead.
    async fn delegate(&self, boss: &Agent, worker: &Agent, subtask: String, ctx: &RunContext) -> String {
        if !self.delegation || ctx.is_cancelled() {
            return subtask;
        }
        let prompt = PromptBuilder::new()
            .with_system(&boss.system_prompt)
            .with_task(&boss_delegation(&worker.name, &subtask))
            .build();
        match self.agents.invoke(&boss.model_id, &prompt).await {
            Ok(specific) => {
                debug!(boss_id = %boss.id, worker_id = %worker.id, "Boss delegated task");
                specific
            }
            Err(e) => {
                warn!(boss_id = %boss.id, worker_id = %worker.id, error = %e, "Delegation failed, using subtask");
                subtask
            }
        }
    }
}
