use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use swarmgraph_core::config::{AppConfig, RetryConfig};
use swarmgraph_core::error::{Result, SwarmError};
use swarmgraph_core::traits::ModelInvoker;

/// An invoker that retries failed model calls and falls back to alternative models.
pub struct RetryingInvoker {
    inner: Arc<dyn ModelInvoker>,
    retry_config: RetryConfig,
    fallbacks: HashMap<String, String>,
}

impl RetryingInvoker {
    pub fn new(inner: Arc<dyn ModelInvoker>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
            fallbacks: HashMap::new(),
        }
    }

    pub fn from_config(inner: Arc<dyn ModelInvoker>, config: &AppConfig) -> Self {
        config
            .fallback_models
            .iter()
            .fold(Self::new(inner, config.retry.clone()), |invoker, f| {
                invoker.with_fallback(&f.model_id, &f.fallback)
            })
    }

    /// Try `fallback` once `model_id` has exhausted its retries.
    pub fn with_fallback(mut self, model_id: &str, fallback: &str) -> Self {
        self.fallbacks.insert(model_id.to_string(), fallback.to_string());
        self
    }

    async fn with_retries(&self, model_id: &str, prompt: &str) -> Result<String> {
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            match self.inner.invoke(model_id, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if is_retryable(&e) && attempt < max_retries => {
                    let backoff = calculate_backoff(attempt, &self.retry_config);
                    warn!(
                        model = %model_id,
                        attempt = attempt + 1,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying model call"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Only runtime model failures are worth another attempt.
fn is_retryable(e: &SwarmError) -> bool {
    e.is_model_error()
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelInvoker for RetryingInvoker {
    fn invoke(&self, model_id: &str, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let model_id = model_id.to_string();
        let prompt = prompt.to_string();

        Box::pin(async move {
            let err = match self.with_retries(&model_id, &prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            let Some(fallback) = self.fallbacks.get(&model_id).filter(|_| is_retryable(&err)) else {
                return Err(err);
            };
            info!(model = %model_id, fallback = %fallback, "Model exhausted, trying fallback");
            match self.with_retries(fallback, &prompt).await {
                Ok(text) => {
                    info!(model = %fallback, "Fell back to alternative model");
                    Ok(text)
                }
                Err(e) => {
                    warn!(model = %fallback, error = %e, "Fallback model also failed");
                    Err(err)
                }
            }
        })
    }
}
