use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, info, warn};

use swarmgraph_core::config::EngineConfig;
use swarmgraph_core::error::SwarmError;
use swarmgraph_core::event::EventBus;
use swarmgraph_core::traits::ModelInvoker;
use swarmgraph_core::types::{Agent, Node, NodeId, NodeKind, NodeState, SwarmEvent};

use crate::agent::AgentExecutor;
use crate::graph::Graph;
use crate::prompt::{context_entry, upstream_failed_entry};
use crate::run_context::{NodeOutcome, RunContext, StateObserver};
use crate::team::TeamExecutor;

/// Everything one `execute` call produced.
#[derive(Debug)]
pub struct ExecutionReport {
    pub run_id: String,
    /// Output per succeeded node, team members included.
    pub results: HashMap<NodeId, String>,
    /// Error per failed node, team members included.
    pub errors: HashMap<NodeId, SwarmError>,
    /// Non-fatal findings such as orphan workers.
    pub warnings: Vec<SwarmError>,
    /// Final state of every node in the graph.
    pub states: HashMap<NodeId, NodeState>,
    /// The run was cancelled; undispatched nodes appear in neither map.
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    /// No node errored and the run was not cancelled.
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    /// Write states and results back onto the graph's nodes.
    pub fn apply(&self, graph: &mut Graph) {
        let ids: Vec<NodeId> = graph.nodes().map(|n| n.id().clone()).collect();
        for id in ids {
            let Some(node) = graph.node_mut(id.as_str()) else {
                continue;
            };
            match node {
                Node::Agent(agent) => self.apply_agent(agent),
                Node::Team(team) => {
                    team.state = self.state_of(&team.id);
                    team.aggregate_result = self.results.get(&team.id).cloned();
                    team.error = self.errors.get(&team.id).map(|e| e.to_string());
                    for member in &mut team.members {
                        self.apply_agent(member);
                    }
                }
            }
        }
    }

    fn apply_agent(&self, agent: &mut Agent) {
        agent.state = self.state_of(&agent.id);
        agent.last_result = self.results.get(&agent.id).cloned();
    }

    fn state_of(&self, id: &NodeId) -> NodeState {
        self.states.get(id).copied().unwrap_or_default()
    }
}

/// Entry point for running a swarm graph.
///
/// Agent chains run first, all root chains concurrently; team chains follow
/// once every agent chain has settled. Each node runs at most once per call,
/// however many paths reach it.
pub struct Orchestrator {
    agents: AgentExecutor,
    teams: TeamExecutor,
    events: Arc<EventBus>,
    observers: Vec<StateObserver>,
}

impl Orchestrator {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self::from_config(invoker, &EngineConfig::default())
    }

    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &EngineConfig) -> Self {
        let agents = AgentExecutor::from_config(invoker, config);
        let teams = TeamExecutor::from_config(agents.clone(), config);
        Self {
            agents,
            teams,
            events: Arc::new(EventBus::new(config.event_capacity)),
            observers: Vec::new(),
        }
    }

    /// Replace the team executor, e.g. to change the failure policy.
    pub fn with_team_executor(mut self, teams: TeamExecutor) -> Self {
        self.teams = teams;
        self
    }

    /// Register a synchronous callback for every accepted state change.
    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(&NodeId, NodeState) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(callback));
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// A fresh run context wired to this orchestrator's event bus and observers.
    pub fn new_context(&self) -> RunContext {
        self.observers
            .iter()
            .cloned()
            .fold(RunContext::new().with_events(self.events.clone()), |ctx, o| {
                ctx.with_observer(o)
            })
    }

    pub async fn execute(&self, graph: &Graph, task: &str) -> ExecutionReport {
        let ctx = self.new_context();
        self.execute_with(graph, task, &ctx).await
    }

    /// Execute against a caller-owned context, for live snapshots or
    /// cancellation through `ctx.cancel_token()`.
    ///
    /// Whatever an earlier run left in `ctx` is cleared first, so a context
    /// can be reused.
    pub async fn execute_with(&self, graph: &Graph, task: &str, ctx: &RunContext) -> ExecutionReport {
        let start = Instant::now();
        ctx.reset();
        info!(run_id = %ctx.run_id(), nodes = graph.len(), edges = graph.edges().len(), "Starting execution");
        ctx.publish(SwarmEvent::RunStarted {
            run_id: ctx.run_id().to_string(),
            task: task.to_string(),
        });

        let agent_roots = graph.roots(NodeKind::Agent);
        debug!(roots = agent_roots.len(), "Dispatching agent chains");
        join_all(
            agent_roots
                .iter()
                .map(|root| self.process_chain(graph, root.id(), task, ctx)),
        )
        .await;

        let team_roots = graph.roots(NodeKind::Team);
        debug!(roots = team_roots.len(), "Dispatching team chains");
        join_all(
            team_roots
                .iter()
                .map(|root| self.process_chain(graph, root.id(), task, ctx)),
        )
        .await;

        let report = self.finish(graph, ctx, start);
        ctx.publish(SwarmEvent::RunComplete {
            run_id: report.run_id.clone(),
            succeeded: report.results.len(),
            failed: report.errors.len(),
            cancelled: report.cancelled,
        });
        info!(
            run_id = %report.run_id,
            succeeded = report.results.len(),
            failed = report.errors.len(),
            warnings = report.warnings.len(),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "Execution finished"
        );
        report
    }

    fn finish(&self, graph: &Graph, ctx: &RunContext, start: Instant) -> ExecutionReport {
        let touched = ctx.snapshot();
        let mut states = HashMap::new();
        for node in graph.nodes() {
            states.insert(node.id().clone(), touched.get(node.id()).copied().unwrap_or_default());
            if let Node::Team(team) = node {
                for member in &team.members {
                    states.insert(member.id.clone(), touched.get(&member.id).copied().unwrap_or_default());
                }
            }
        }

        ExecutionReport {
            run_id: ctx.run_id().to_string(),
            results: ctx.take_results(),
            errors: ctx.take_errors(),
            warnings: ctx.take_warnings(),
            states,
            cancelled: ctx.is_cancelled(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Resolve `id`, then, the first time it is reached, dispatch its
    /// dependents concurrently.
    fn process_chain<'a>(
        &'a self,
        graph: &'a Graph,
        id: &'a NodeId,
        task: &'a str,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.resolve(graph, id, task, ctx).await == NodeOutcome::Skipped {
                return;
            }
            if !ctx.mark_expanded(id) {
                debug!(node_id = %id, "Already expanded");
                return;
            }
            let children = graph.outgoing(id.as_str());
            join_all(
                children
                    .into_iter()
                    .map(|child| self.process_chain(graph, child, task, ctx)),
            )
            .await;
        })
    }

    /// Outcome of `id`, running it on first request.
    ///
    /// Sources are resolved before the node runs; concurrent requests for the
    /// same node wait on the first one.
    fn resolve<'a>(
        &'a self,
        graph: &'a Graph,
        id: &'a NodeId,
        task: &'a str,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, NodeOutcome> {
        Box::pin(async move {
            let slot = ctx.slot(id);
            if let Some(done) = slot.get() {
                debug!(node_id = %id, "Memo hit");
                return done.clone();
            }
            slot.get_or_init(|| self.run_node(graph, id, task, ctx))
                .await
                .clone()
        })
    }

    fn run_node<'a>(
        &'a self,
        graph: &'a Graph,
        id: &'a NodeId,
        task: &'a str,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, NodeOutcome> {
        Box::pin(async move {
            let sources = graph.incoming(id.as_str());
            let upstream = join_all(
                sources
                    .iter()
                    .map(|source| self.resolve(graph, source, task, ctx)),
            )
            .await;

            let mut context = Vec::with_capacity(sources.len());
            let mut failed = Vec::new();
            for (source, outcome) in sources.iter().zip(upstream) {
                let name = graph.get(source.as_str()).map_or(source.as_str(), |n| n.name());
                match outcome {
                    NodeOutcome::Succeeded(text) => context.push(context_entry(name, &text)),
                    NodeOutcome::Failed(message) => {
                        context.push(upstream_failed_entry(name, &message));
                        failed.push(source.to_string());
                    }
                    NodeOutcome::Skipped => return NodeOutcome::Skipped,
                }
            }

            if ctx.is_cancelled() {
                debug!(node_id = %id, "Run cancelled, node not dispatched");
                return NodeOutcome::Skipped;
            }

            if !sources.is_empty() && failed.len() == sources.len() {
                let error = SwarmError::UpstreamFailed { sources: failed };
                warn!(node_id = %id, error = %error, "Every source failed, node not run");
                return self.fail(id, error, ctx);
            }

            match graph.get(id.as_str()) {
                Some(Node::Agent(agent)) => match self.agents.run(agent, task, &context, ctx).await {
                    Ok(text) => {
                        ctx.record_result(id, text.clone());
                        NodeOutcome::Succeeded(text)
                    }
                    Err(SwarmError::Cancelled) => NodeOutcome::Skipped,
                    Err(e) => {
                        let message = e.to_string();
                        ctx.record_error(id, e);
                        NodeOutcome::Failed(message)
                    }
                },
                Some(Node::Team(team)) => {
                    let outcome = self.teams.run(team, task, &context, ctx).await;
                    if outcome.skipped() {
                        return NodeOutcome::Skipped;
                    }
                    for (member, text) in outcome.member_results {
                        ctx.record_result(&member, text);
                    }
                    for (member, error) in outcome.member_errors {
                        ctx.record_error(&member, error);
                    }
                    for warning in outcome.warnings {
                        ctx.record_warning(warning);
                    }
                    match outcome.failure {
                        None => {
                            ctx.record_result(id, outcome.aggregate.clone());
                            NodeOutcome::Succeeded(outcome.aggregate)
                        }
                        Some(reason) => {
                            let error = SwarmError::TeamFailed {
                                team: id.to_string(),
                                message: reason,
                            };
                            let message = error.to_string();
                            ctx.record_error(id, error);
                            NodeOutcome::Failed(message)
                        }
                    }
                }
                None => self.fail(id, SwarmError::NodeNotFound(id.to_string()), ctx),
            }
        })
    }

    /// Mark a node failed without running it.
    fn fail(&self, id: &NodeId, error: SwarmError, ctx: &RunContext) -> NodeOutcome {
        ctx.set_state(id, NodeState::Errored);
        let message = error.to_string();
        ctx.record_error(id, error);
        NodeOutcome::Failed(message)
    }
}
