use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use swarmgraph_core::error::Result;
use swarmgraph_core::traits::ModelInvoker;

/// Offline invoker for dry runs: answers `[<model>] <task>` without calling
/// any model, so a graph's wiring can be exercised end to end.
#[derive(Debug, Clone, Default)]
pub struct EchoInvoker {
    latency: Option<Duration>,
}

impl EchoInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend each call takes `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// First line of the `Task:` section, or the whole prompt if there is none.
///
/// The task follows the context block, so the last `Task: ` line wins over
/// any that upstream results carried into the context.
fn task_line(prompt: &str) -> &str {
    prompt
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("Task: "))
        .unwrap_or(prompt)
        .trim()
}

impl ModelInvoker for EchoInvoker {
    fn invoke(&self, model_id: &str, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let reply = format!("[{}] {}", model_id, task_line(prompt));
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            debug!(reply_len = reply.len(), "Echo reply");
            Ok(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_task_line() {
        let invoker = EchoInvoker::new();
        let out = invoker
            .invoke("gpt-4", "You write.\n\nTask: Draft intro\n\nResponse:")
            .await
            .unwrap();
        assert_eq!(out, "[gpt-4] Draft intro");
    }

    #[tokio::test]
    async fn ignores_task_lines_inside_context() {
        let prompt = "Previous context:\nPlanner: plan ready\nTask: the planner's own task\n\nTask: Write chapter two\n\nResponse:";
        let out = EchoInvoker::new().invoke("m", prompt).await.unwrap();
        assert_eq!(out, "[m] Write chapter two");
    }

    #[tokio::test]
    async fn falls_back_to_whole_prompt() {
        let out = EchoInvoker::new().invoke("m", "  plain  ").await.unwrap();
        assert_eq!(out, "[m] plain");
    }
}
