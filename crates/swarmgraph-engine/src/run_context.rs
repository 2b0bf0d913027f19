use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use swarmgraph_core::error::SwarmError;
use swarmgraph_core::event::EventBus;
use swarmgraph_core::types::{NodeId, NodeState, SwarmEvent};

/// Synchronous state-change callback.
pub type StateObserver = Arc<dyn Fn(&NodeId, NodeState) + Send + Sync>;

/// How a node ended within a run, as seen by its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Succeeded(String),
    /// Error message; the error itself lives in the run's error map.
    Failed(String),
    /// Never dispatched because the run was cancelled.
    Skipped,
}

/// Per-run mutable state, shared by every branch of one `execute` call.
///
/// Holds the memo that guarantees exactly-once execution, node states, the
/// result/error maps, and the state-change emitter. Nothing here outlives the
/// run unless the caller keeps the context around for snapshots.
pub struct RunContext {
    run_id: String,
    cancel: CancellationToken,
    memo: Mutex<HashMap<NodeId, Arc<OnceCell<NodeOutcome>>>>,
    expanded: Mutex<HashSet<NodeId>>,
    states: Mutex<HashMap<NodeId, NodeState>>,
    results: Mutex<HashMap<NodeId, String>>,
    errors: Mutex<HashMap<NodeId, SwarmError>>,
    warnings: Mutex<Vec<SwarmError>>,
    events: Option<Arc<EventBus>>,
    observers: Vec<StateObserver>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            memo: Mutex::new(HashMap::new()),
            expanded: Mutex::new(HashSet::new()),
            states: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
            events: None,
            observers: Vec::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn publish(&self, event: SwarmEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Move a node to `state`, notifying observers and the event bus.
    ///
    /// Transitions that would break `Idle -> Running -> {Done, Errored}` are
    /// dropped.
    pub fn set_state(&self, node_id: &NodeId, state: NodeState) {
        {
            let mut states = lock(&self.states);
            let current = states.get(node_id).copied().unwrap_or_default();
            if !current.can_transition_to(state) {
                warn!(node_id = %node_id, from = ?current, to = ?state, "Ignoring illegal state transition");
                return;
            }
            states.insert(node_id.clone(), state);
        }

        debug!(node_id = %node_id, ?state, "Node state changed");
        for observer in &self.observers {
            observer(node_id, state);
        }
        self.publish(SwarmEvent::StateChanged {
            run_id: self.run_id.clone(),
            node_id: node_id.clone(),
            state,
            at: Utc::now(),
        });
    }

    pub fn state(&self, node_id: &str) -> NodeState {
        lock(&self.states).get(node_id).copied().unwrap_or_default()
    }

    /// Point-in-time copy of every node state touched so far.
    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        lock(&self.states).clone()
    }

    pub fn record_result(&self, node_id: &NodeId, result: impl Into<String>) {
        lock(&self.results).insert(node_id.clone(), result.into());
    }

    pub fn record_error(&self, node_id: &NodeId, error: SwarmError) {
        lock(&self.errors).insert(node_id.clone(), error);
    }

    pub fn record_warning(&self, warning: SwarmError) {
        lock(&self.warnings).push(warning);
    }

    /// Memo slot for a node; the first caller to initialize it runs the node.
    pub(crate) fn slot(&self, node_id: &NodeId) -> Arc<OnceCell<NodeOutcome>> {
        lock(&self.memo)
            .entry(node_id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Returns true the first time a node's outgoing edges are claimed.
    pub(crate) fn mark_expanded(&self, node_id: &NodeId) -> bool {
        lock(&self.expanded).insert(node_id.clone())
    }

    /// Forget everything a previous run left behind so the context can drive
    /// another one. The run id and cancellation token are kept.
    pub(crate) fn reset(&self) {
        lock(&self.memo).clear();
        lock(&self.expanded).clear();
        lock(&self.states).clear();
        lock(&self.results).clear();
        lock(&self.errors).clear();
        lock(&self.warnings).clear();
    }

    pub(crate) fn take_results(&self) -> HashMap<NodeId, String> {
        std::mem::take(&mut *lock(&self.results))
    }

    pub(crate) fn take_errors(&self) -> HashMap<NodeId, SwarmError> {
        std::mem::take(&mut *lock(&self.errors))
    }

    pub(crate) fn take_warnings(&self) -> Vec<SwarmError> {
        std::mem::take(&mut *lock(&self.warnings))
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
