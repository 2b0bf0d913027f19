use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SwarmError};

/// Top-level swarmgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fallback_models: Vec<FallbackModelConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// When a Concurrent (or Hierarchical) team counts as completed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeamFailurePolicy {
    /// Completed if at least one member succeeded.
    #[default]
    AnySuccess,
    /// Failed as soon as any member errored.
    AllSuccess,
}

impl TeamFailurePolicy {
    /// Decide the team verdict from member success/failure counts.
    pub fn team_succeeded(&self, succeeded: usize, failed: usize) -> bool {
        match self {
            Self::AnySuccess => succeeded > 0,
            Self::AllSuccess => failed == 0 && succeeded > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub team_failure_policy: TeamFailurePolicy,
    /// Let each Boss write a worker-specific task before its Workers run.
    #[serde(default)]
    pub hierarchical_delegation: bool,
    /// Cap on in-flight model calls (0 = unlimited).
    #[serde(default)]
    pub max_concurrent_invocations: usize,
    /// Per-invocation timeout in seconds (0 = none).
    #[serde(default)]
    pub invoke_timeout_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            team_failure_policy: TeamFailurePolicy::default(),
            hierarchical_delegation: false,
            max_concurrent_invocations: 0,
            invoke_timeout_secs: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize { 256 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_max_workers_per_boss")]
    pub max_workers_per_boss: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_workers_per_boss: default_max_workers_per_boss(),
        }
    }
}

fn default_max_workers_per_boss() -> usize { 3 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Model to try when `model_id` keeps failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackModelConfig {
    pub model_id: String,
    pub fallback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "swarmgraph=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SwarmError::ConfigNotFound(path.display().to_string()))?;

        debug!(path = %path.display(), "Loading config");
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SwarmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.max_workers_per_boss == 0 {
            return Err(SwarmError::Config(
                "cluster.max_workers_per_boss must be at least 1".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SwarmError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SWARMGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SWARMGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SWARMGRAPH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SWARMGRAPH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SWARMGRAPH_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.engine.team_failure_policy, TeamFailurePolicy::AnySuccess);
        assert!(!config.engine.hierarchical_delegation);
        assert_eq!(config.engine.max_concurrent_invocations, 0);
        assert_eq!(config.engine.event_capacity, 256);
        assert_eq!(config.cluster.max_workers_per_boss, 3);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.log.filter, "swarmgraph=info,warn");
    }

    #[test]
    fn test_policy_and_fallbacks() {
        let config = AppConfig::from_toml(
            r#"
[engine]
team_failure_policy = "all_success"

[[fallback_models]]
model_id = "gpt-4"
fallback = "gpt-3.5-turbo"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.team_failure_policy, TeamFailurePolicy::AllSuccess);
        assert_eq!(config.fallback_models.len(), 1);
        assert_eq!(config.fallback_models[0].model_id, "gpt-4");
        assert_eq!(config.fallback_models[0].fallback, "gpt-3.5-turbo");
    }

    #[test]
    fn test_rejects_zero_cluster_cap() {
        let err = AppConfig::from_toml("[cluster]\nmax_workers_per_boss = 0\n").unwrap_err();
        assert!(matches!(err, SwarmError::Config(_)));
    }

    #[test]
    fn test_failure_policy_verdicts() {
        assert!(TeamFailurePolicy::AnySuccess.team_succeeded(1, 2));
        assert!(!TeamFailurePolicy::AnySuccess.team_succeeded(0, 2));
        assert!(!TeamFailurePolicy::AllSuccess.team_succeeded(2, 1));
        assert!(TeamFailurePolicy::AllSuccess.team_succeeded(3, 0));
    }
}
