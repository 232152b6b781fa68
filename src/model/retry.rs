//! Bounded retry for embedding calls

use super::{ModelError, TextModel};
use std::time::Duration;

/// Default number of embedding attempts
pub const EMBED_ATTEMPTS: usize = 3;

const BASE_DELAY: Duration = Duration::from_millis(500);

/// Embed `text`, retrying with linearly increasing backoff.
///
/// Returns the last error once `attempts` are exhausted.
pub async fn embed_with_retry(
    model: &dyn TextModel,
    text: &str,
    attempts: usize,
) -> Result<Vec<f32>, ModelError> {
    embed_with_backoff(model, text, attempts, BASE_DELAY).await
}

pub(crate) async fn embed_with_backoff(
    model: &dyn TextModel,
    text: &str,
    attempts: usize,
    base_delay: Duration,
) -> Result<Vec<f32>, ModelError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match model.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if attempt < attempts => {
                let delay = base_delay * attempt as u32;
                tracing::warn!(attempt, error = %e, ?delay, "embedding failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(attempts, error = %e, "embedding failed");
                return Err(e);
            }
        }
    }
}
