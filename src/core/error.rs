//! Error types and handling for the streaming engine.
//!
//! This module provides a unified error type [`EngineError`] covering the fatal
//! turn conditions (cancellation, provider failure, dead loop) as well as the
//! ambient failures of configuration, serialization and tokenizer setup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::loop_guard::LoopKind;

/// Prefix for user-visible messages caused by the provider ending the stream.
pub const PROVIDER_TERMINATION_PREFIX: &str = "Provider stream terminated:";

/// Why a turn was aborted. Recorded in the turn's persisted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserCancelled,
    StreamingFailed,
}

impl CancelReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserCancelled => "user_cancelled",
            Self::StreamingFailed => "streaming_failed",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// User-initiated cancellation. Not an error condition for the user.
    #[error("Stream cancelled")]
    Cancelled,

    /// The provider stream was malformed or terminated early
    #[error("Streaming failed: {0}")]
    StreamFailed(String),

    /// Content analysis found a non-terminating repetition
    #[error("Dead loop detected ({kind}): {details}")]
    DeadLoop { kind: LoopKind, details: String },

    /// Error reported by the provider transport layer
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The cancel reason `abort_stream` records for this error, if it is fatal.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            EngineError::Cancelled => Some(CancelReason::UserCancelled),
            EngineError::StreamFailed(_)
            | EngineError::DeadLoop { .. }
            | EngineError::Provider(_) => Some(CancelReason::StreamingFailed),
            _ => None,
        }
    }

    /// Text shown to the user. Cancellation produces none.
    pub fn user_message(&self) -> Option<String> {
        match self {
            EngineError::Cancelled => None,
            EngineError::StreamFailed(msg) | EngineError::Provider(msg) => {
                Some(format!("{} {}", PROVIDER_TERMINATION_PREFIX, msg))
            }
            EngineError::DeadLoop { kind, details } => Some(dead_loop_notice(*kind, details)),
            other => Some(other.to_string()),
        }
    }

    /// Whether the error originated from content analysis rather than transport.
    pub fn is_dead_loop(&self) -> bool {
        matches!(self, EngineError::DeadLoop { .. })
    }
}

/// Render the dedicated notice shown when the loop guard aborts a turn.
pub fn dead_loop_notice(kind: LoopKind, details: &str) -> String {
    format!(
        "The model appears to be stuck in a loop ({}). Generation was stopped to avoid wasting tokens. {}",
        kind.description(),
        details
    )
}

/// Convenience type alias for Results using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
