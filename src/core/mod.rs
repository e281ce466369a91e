//! Core functionality shared by the streaming engine.
//!
//! This module contains fundamental components used throughout the crate:
//! - Configuration management
//! - Error handling and cancellation
//! - Logging and metrics
//! - Tokenizer handle and the incremental token counter

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod stream_metrics;
pub mod token_counter;
pub mod tokenizer;

// Re-export commonly used types
pub use cancel::StreamCancelHandle;
pub use config::AppConfig;
pub use error::{CancelReason, EngineError, Result};
pub use logging::{get_task_id, get_turn_attempt, init_tracing, TASK_ID, TURN_ATTEMPT};
pub use metrics::{get_metrics, init_metrics, render_metrics, Metrics};
pub use token_counter::{TokenBreakdown, TokenCounter};
pub use tokenizer::{Encoding, Tokenizer};
