use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use swarmgraph_core::config::EngineConfig;
use swarmgraph_core::error::{Result, SwarmError};
use swarmgraph_core::traits::ModelInvoker;
use swarmgraph_core::types::{Agent, NodeState};

use crate::prompt::PromptBuilder;
use crate::run_context::RunContext;

/// Runs a single agent against the injected model invoker.
///
/// The executor owns the agent's state transitions (`Running` before the
/// call, `Done`/`Errored` after) but leaves recording results and errors to
/// its caller. There is no retry at this layer; wrap the invoker instead.
#[derive(Clone)]
pub struct AgentExecutor {
    invoker: Arc<dyn ModelInvoker>,
    timeout: Option<Duration>,
    limiter: Option<Arc<Semaphore>>,
}

impl AgentExecutor {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            invoker,
            timeout: None,
            limiter: None,
        }
    }

    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &EngineConfig) -> Self {
        let mut executor = Self::new(invoker);
        if config.invoke_timeout_secs > 0 {
            executor = executor.with_timeout(Duration::from_secs(config.invoke_timeout_secs));
        }
        if config.max_concurrent_invocations > 0 {
            executor = executor.with_concurrency_limit(config.max_concurrent_invocations);
        }
        executor
    }

    /// Fail invocations that take longer than `timeout` with `ModelTimeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the number of model calls in flight across the whole run.
    pub fn with_concurrency_limit(mut self, permits: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(permits.max(1))));
        self
    }

    /// Run `agent` on `task` with the accumulated upstream `context`.
    ///
    /// Returns `Cancelled` without touching the agent's state when the run
    /// was cancelled before dispatch.
    pub async fn run(
        &self,
        agent: &Agent,
        task: &str,
        context: &[String],
        ctx: &RunContext,
    ) -> Result<String> {
        if ctx.is_cancelled() {
            debug!(agent_id = %agent.id, "Run cancelled, agent not dispatched");
            return Err(SwarmError::Cancelled);
        }

        let prompt = PromptBuilder::new()
            .with_system(&agent.system_prompt)
            .with_context(context)
            .with_task(task)
            .build();

        ctx.set_state(&agent.id, NodeState::Running);
        info!(
            agent_id = %agent.id,
            name = %agent.name,
            model = %agent.model_id,
            context_entries = context.len(),
            "Running agent"
        );

        let start = Instant::now();
        let result = self.invoke(&agent.model_id, &prompt).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(text) => {
                ctx.set_state(&agent.id, NodeState::Done);
                info!(agent_id = %agent.id, elapsed_ms, output_len = text.len(), "Agent completed");
            }
            Err(e) => {
                ctx.set_state(&agent.id, NodeState::Errored);
                warn!(agent_id = %agent.id, elapsed_ms, error = %e, "Agent failed");
            }
        }
        result
    }

    /// Call the model directly, without prompt assembly or state changes.
    pub async fn invoke(&self, model_id: &str, prompt: &str) -> Result<String> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await.map_err(|_| {
                SwarmError::ModelUnavailable {
                    model: model_id.to_string(),
                    message: "invocation limiter closed".into(),
                }
            })?),
            None => None,
        };

        debug!(model = %model_id, prompt_len = prompt.len(), "Invoking model");
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.invoker.invoke(model_id, prompt))
                .await
                .map_err(|_| SwarmError::ModelTimeout {
                    model: model_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })?,
            None => self.invoker.invoke(model_id, prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgraph_test_utils::MockInvoker;

    #[tokio::test]
    async fn success_sets_done_and_builds_prompt() {
        let mock = Arc::new(MockInvoker::new());
        let executor = AgentExecutor::new(mock.clone());
        let ctx = RunContext::new();
        let agent = Agent::new("a", "Analyst", "m-a").with_prompt("You analyze.");

        let out = executor
            .run(&agent, "Find trends", &["Scout: raw data".into()], &ctx)
            .await
            .unwrap();

        assert_eq!(out, "m-a-out");
        assert_eq!(ctx.state("a"), NodeState::Done);
        let call = &mock.calls()[0];
        assert!(call.prompt.starts_with("You analyze."));
        assert!(call.prompt.contains("Previous context:\nScout: raw data"));
        assert!(call.prompt.contains("Task: Find trends"));
    }

    #[tokio::test]
    async fn failure_sets_errored_without_retry() {
        let mock = Arc::new(MockInvoker::new().fail_model("m-a"));
        let executor = AgentExecutor::new(mock.clone());
        let ctx = RunContext::new();
        let agent = Agent::new("a", "Analyst", "m-a");

        let err = executor.run(&agent, "task", &[], &ctx).await.unwrap_err();
        assert!(matches!(err, SwarmError::ModelUnavailable { .. }));
        assert_eq!(ctx.state("a"), NodeState::Errored);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_model_timeout() {
        let mock = Arc::new(MockInvoker::new().with_delay("m-slow", Duration::from_millis(500)));
        let executor = AgentExecutor::new(mock).with_timeout(Duration::from_millis(20));
        let ctx = RunContext::new();
        let agent = Agent::new("s", "Slow", "m-slow");

        let err = executor.run(&agent, "task", &[], &ctx).await.unwrap_err();
        assert!(matches!(err, SwarmError::ModelTimeout { timeout_ms: 20, .. }));
        assert_eq!(err.to_string(), "Model timeout after 20ms: m-slow");
        assert_eq!(ctx.state("s"), NodeState::Errored);
    }

    #[tokio::test]
    async fn cancelled_run_is_not_dispatched() {
        let mock = Arc::new(MockInvoker::new());
        let executor = AgentExecutor::new(mock.clone());
        let ctx = RunContext::new();
        ctx.cancel_token().cancel();

        let err = executor
            .run(&Agent::new("a", "A", "m-a"), "task", &[], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Cancelled));
        assert_eq!(ctx.state("a"), NodeState::Idle);
        assert_eq!(mock.call_count(), 0);
    }
}
