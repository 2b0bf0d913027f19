pub mod echo;
pub mod retry;

use std::sync::Arc;

use swarmgraph_core::config::AppConfig;
use swarmgraph_core::traits::ModelInvoker;

pub use echo::EchoInvoker;
pub use retry::RetryingInvoker;

/// Wrap `inner` with the retry and fallback behaviour described by `config`.
///
/// Returns `inner` untouched when neither retries nor fallbacks are configured.
pub fn with_resilience(inner: Arc<dyn ModelInvoker>, config: &AppConfig) -> Arc<dyn ModelInvoker> {
    if config.retry.max_retries == 0 && config.fallback_models.is_empty() {
        return inner;
    }
    Arc::new(RetryingInvoker::from_config(inner, config))
}
