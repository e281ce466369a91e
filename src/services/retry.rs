//! Retry decisions for aborted turns.
//!
//! The engine never retries on its own. The task layer hands the failed
//! [`TurnOutcome`] to [`RetryPolicy::decide`] and acts on the decision:
//! give up, condense the context first, or wait out an exponential backoff
//! with [`RetryCoordinator::backoff`].

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::core::cancel::StreamCancelHandle;
use crate::core::config::RetryConfig;
use crate::core::error::{EngineError, Result};
use crate::stream::engine::TurnOutcome;

/// Provider messages that mean the prompt no longer fits the context window.
static CONTEXT_WINDOW_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)context[_ ](length|window)|maximum context|prompt is too long|input is too long|too many (input )?tokens|exceeds? the (model's )?(context|token limit)",
    )
    .expect("context window regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry
    Abort { reason: String },
    /// Shrink the context to `reduce_percent` of its size, then retry immediately
    CondenseThenRetry { reduce_percent: u8 },
    /// Retry the same request after `delay`
    RetryAfter { delay: Duration },
}

/// Whether `message` reports a context-window overflow.
pub fn is_context_window_error(message: &str) -> bool {
    CONTEXT_WINDOW_ERROR.is_match(message)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before retry number `attempt` (0-based): `min(max, base * 2^attempt)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let secs = self
            .config
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.config.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Decide what to do after `error` ended attempt number `attempt`.
    pub fn decide_error(&self, error: &EngineError, attempt: u32) -> RetryDecision {
        let decision = match error {
            EngineError::Cancelled => RetryDecision::Abort {
                reason: "cancelled by user".to_string(),
            },
            EngineError::DeadLoop { kind, .. } => RetryDecision::Abort {
                reason: format!("dead loop ({})", kind),
            },
            EngineError::Config(_)
            | EngineError::Serialization(_)
            | EngineError::Tokenizer(_)
            | EngineError::Internal(_) => RetryDecision::Abort {
                reason: error.to_string(),
            },
            _ if attempt >= self.config.max_attempts => RetryDecision::Abort {
                reason: format!("gave up after {} attempts", attempt),
            },
            EngineError::StreamFailed(message) | EngineError::Provider(message)
                if is_context_window_error(message) =>
            {
                RetryDecision::CondenseThenRetry {
                    reduce_percent: self.config.context_reduction_percent,
                }
            }
            _ => RetryDecision::RetryAfter {
                delay: self.backoff_delay(attempt),
            },
        };
        debug!(attempt, error = %error, decision = ?decision, "Retry decision");
        decision
    }

    /// Decide for a finished turn. `None` when the turn was not aborted.
    pub fn decide(&self, outcome: &TurnOutcome, attempt: u32) -> Option<RetryDecision> {
        outcome
            .error
            .as_ref()
            .map(|error| self.decide_error(error, attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Waits out backoff delays while honouring cancellation.
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator;

impl RetryCoordinator {
    /// Sleep `delay` in one-second ticks, reporting the seconds left before
    /// each tick. Returns `Err(Cancelled)` as soon as `cancel` fires.
    pub async fn backoff<F>(
        &self,
        delay: Duration,
        cancel: &StreamCancelHandle,
        mut on_tick: F,
    ) -> Result<()>
    where
        F: FnMut(u64),
    {
        let mut remaining = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
        info!(delay_secs = remaining, "Waiting before retry");
        while remaining > 0 {
            on_tick(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            remaining -= 1;
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}
