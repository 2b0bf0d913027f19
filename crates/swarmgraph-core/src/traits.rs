use futures::future::BoxFuture;

use crate::error::Result;

/// Language-model capability consumed by the engine.
///
/// Implementations report failures as `SwarmError::ModelUnavailable` or
/// `SwarmError::ModelTimeout`; the engine never retries on its own.
pub trait ModelInvoker: Send + Sync + 'static {
    /// Run `prompt` against `model_id` and return the generated text.
    fn invoke(&self, model_id: &str, prompt: &str) -> BoxFuture<'_, Result<String>>;
}
