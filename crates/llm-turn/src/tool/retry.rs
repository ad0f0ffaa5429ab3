//! Retrying tool invocations with exponential backoff.

use std::time::Duration;

use rand::Rng;

use super::{ToolError, ToolHandler};
use crate::context::TurnContext;
use crate::provider::ToolRetryConfig;

/// Invokes `handler` once, or repeatedly under `config`.
///
/// Only [`ToolError::Failed`] is retried, and only when
/// [`ToolRetryConfig::retry_if`] accepts the message. Cancellation during
/// a backoff sleep ends the loop with [`ToolError::Cancelled`].
pub(crate) async fn call_with_retry(
    handler: &dyn ToolHandler,
    arguments: &str,
    ctx: &TurnContext,
    config: Option<&ToolRetryConfig>,
) -> Result<String, ToolError> {
    let Some(config) = config else {
        return handler.call(arguments, ctx).await;
    };

    let mut attempt = 0u32;
    loop {
        let err = match handler.call(arguments, ctx).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        let should_retry = err.is_retryable()
            && config
                .retry_if
                .as_ref()
                .is_none_or(|predicate| predicate(&err.to_string()));
        if !should_retry || attempt >= config.max_retries {
            return Err(err);
        }

        let backoff = compute_backoff(config, attempt);
        tracing::debug!(
            tool = %handler.definition().name,
            attempt = attempt + 1,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying tool call"
        );
        tokio::select! {
            () = ctx.cancellation_token().cancelled() => return Err(ToolError::Cancelled),
            () = tokio::time::sleep(backoff) => {}
        }
        attempt += 1;
    }
}

/// Computes backoff duration with exponential growth and jitter.
///
/// Formula: `min(initial * multiplier^attempt, max) * random(1-jitter, 1)`
pub(crate) fn compute_backoff(config: &ToolRetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_backoff.as_secs_f64());

    let jitter_factor = if config.jitter > 0.0 {
        let min_factor = 1.0 - config.jitter.min(1.0);
        rand::rng().random_range(min_factor..=1.0)
    } else {
        1.0
    };

    Duration::from_secs_f64(capped * jitter_factor)
}
