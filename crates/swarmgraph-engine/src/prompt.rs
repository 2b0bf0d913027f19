/// Prefix of the marker threaded into context when a dependency errored.
pub const UPSTREAM_FAILED_MARKER: &str = "[upstream failed";

/// Assemble an agent prompt: system prompt, previous context, task.
pub struct PromptBuilder {
    parts: Vec<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Add the agent's system prompt (skipped when blank).
    pub fn with_system(mut self, prompt: &str) -> Self {
        if !prompt.trim().is_empty() {
            self.parts.push(prompt.trim().to_string());
        }
        self
    }

    /// Add a "Previous context" block from upstream results.
    pub fn with_context(mut self, context: &[String]) -> Self {
        let entries: Vec<&str> = context
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if !entries.is_empty() {
            self.parts
                .push(format!("Previous context:\n{}", entries.join("\n\n")));
        }
        self
    }

    pub fn with_task(mut self, task: &str) -> Self {
        self.parts.push(format!("Task: {}", task.trim()));
        self
    }

    /// Build the final prompt.
    pub fn build(mut self) -> String {
        self.parts.push("Response:".to_string());
        self.parts.join("\n\n")
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One upstream result as it appears in a downstream context.
pub fn context_entry(name: &str, result: &str) -> String {
    format!("{}: {}", name, result.trim())
}

/// Context entry standing in for a dependency that errored.
pub fn upstream_failed_entry(name: &str, error: &str) -> String {
    format!("{}: {}: {}]", name, UPSTREAM_FAILED_MARKER, error)
}

/// Aggregate line for a team member that errored.
pub fn failed_member_entry(name: &str, error: &str) -> String {
    format!("{}: [failed: {}]", name, error)
}

/// Task handed to a Boss in the first hierarchical phase.
pub fn boss_subtask(task: &str) -> String {
    format!(
        "You are a Boss agent. Create a subtask for your team based on the following main task:\n{}\n\nSubtask for your team:",
        task.trim()
    )
}

/// Task handed to a Boss when it delegates work to one Worker.
pub fn boss_delegation(worker_name: &str, subtask: &str) -> String {
    format!(
        "You are a Boss agent. Delegate a specific task to the Worker agent named {} based on the following subtask:\n{}\n\nSpecific task for {}:",
        worker_name,
        subtask.trim(),
        worker_name
    )
}
