//! Scripted model invoker and node fixtures shared by the swarmgraph test suites.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;

use swarmgraph_core::error::{Result, SwarmError};
use swarmgraph_core::traits::ModelInvoker;
use swarmgraph_core::types::{Agent, AgentRole};

/// One recorded invocation.
///
/// `started_at` and `finished_at` are ticks of a shared logical clock, so
/// `a.finished_at < b.started_at` means `a` completed before `b` began.
#[derive(Debug, Clone)]
pub struct Call {
    pub model_id: String,
    pub prompt: String,
    pub started_at: usize,
    pub finished_at: usize,
}

/// A `ModelInvoker` driven by a script instead of a model.
///
/// Unscripted calls answer `"<model_id>-out"`.
#[derive(Default)]
pub struct MockInvoker {
    prompt_responses: Vec<(String, String)>,
    model_responses: HashMap<String, String>,
    failing_models: HashSet<String>,
    failing_prompts: Vec<String>,
    timeout_models: HashSet<String>,
    flaky: Mutex<HashMap<String, usize>>,
    delays: HashMap<String, Duration>,
    clock: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `text` for every call to `model_id`.
    pub fn respond(mut self, model_id: &str, text: &str) -> Self {
        self.model_responses.insert(model_id.into(), text.into());
        self
    }

    /// Answer `text` when the prompt contains `needle`. Checked before
    /// per-model responses.
    pub fn respond_when(mut self, needle: &str, text: &str) -> Self {
        self.prompt_responses.push((needle.into(), text.into()));
        self
    }

    /// Every call to `model_id` fails with `ModelUnavailable`.
    pub fn fail_model(mut self, model_id: &str) -> Self {
        self.failing_models.insert(model_id.into());
        self
    }

    /// Calls whose prompt contains `needle` fail with `ModelUnavailable`.
    pub fn fail_when(mut self, needle: &str) -> Self {
        self.failing_prompts.push(needle.into());
        self
    }

    /// Every call to `model_id` fails with `ModelTimeout`.
    pub fn timeout_model(mut self, model_id: &str) -> Self {
        self.timeout_models.insert(model_id.into());
        self
    }

    /// The first `times` calls to `model_id` fail, later ones succeed.
    pub fn fail_times(self, model_id: &str, times: usize) -> Self {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.insert(model_id.into(), times);
        }
        self
    }

    /// Sleep for `delay` before answering calls to `model_id`.
    pub fn with_delay(mut self, model_id: &str, delay: Duration) -> Self {
        self.delays.insert(model_id.into(), delay);
        self
    }

    /// Completed calls, ordered by start.
    pub fn calls(&self) -> Vec<Call> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by_key(|c| c.started_at);
        calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Prompts sent to `model_id`, ordered by start.
    pub fn prompts_for(&self, model_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.model_id == model_id)
            .map(|c| c.prompt)
            .collect()
    }

    fn answer(&self, model_id: &str, prompt: &str) -> Result<String> {
        let unavailable = |message: &str| SwarmError::ModelUnavailable {
            model: model_id.to_string(),
            message: message.to_string(),
        };

        if self.timeout_models.contains(model_id) {
            return Err(SwarmError::ModelTimeout {
                model: model_id.to_string(),
                timeout_ms: 30_000,
            });
        }
        if self.failing_models.contains(model_id) {
            return Err(unavailable("scripted failure"));
        }
        if self.failing_prompts.iter().any(|n| prompt.contains(n.as_str())) {
            return Err(unavailable("scripted prompt failure"));
        }
        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(model_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(unavailable("503 service unavailable"));
            }
        }

        let scripted = self
            .prompt_responses
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, text)| text.clone())
            .or_else(|| self.model_responses.get(model_id).cloned());
        Ok(scripted.unwrap_or_else(|| format!("{model_id}-out")))
    }
}

impl ModelInvoker for MockInvoker {
    fn invoke(&self, model_id: &str, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let model_id = model_id.to_string();
        let prompt = prompt.to_string();
        Box::pin(async move {
            let started_at = self.clock.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&model_id) {
                tokio::time::sleep(*delay).await;
            }
            let result = self.answer(&model_id, &prompt);
            let finished_at = self.clock.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(Call {
                model_id,
                prompt,
                started_at,
                finished_at,
            });
            result
        })
    }
}

/// Worker agent whose model id is its own id and whose name is the id
/// upper-cased, so `agent("a")` answers `"a-out"` and appears in context as
/// `"A: a-out"`.
pub fn agent(id: &str) -> Agent {
    Agent::new(id, id.to_uppercase(), id)
}

pub fn boss(id: &str, cluster: &str) -> Agent {
    agent(id).with_role(AgentRole::Boss).with_cluster(cluster)
}

pub fn worker(id: &str, cluster: &str) -> Agent {
    agent(id).with_cluster(cluster)
}

/// Write `contents` to a temporary `.toml` file.
pub fn temp_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}
