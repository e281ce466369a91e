//! Turn Stream - live response streaming for an AI coding agent
//!
//! This library turns a language-model provider's chunked response into
//! structured assistant output while the model is still talking:
//!
//! - **Streaming engine**: cancelable chunk consumption with typed lifecycle events
//! - **Tool-call assembly**: tool invocations rebuilt from partial JSON fragments
//! - **Token ledger**: exact incremental token counts and history consolidation
//! - **Loop guard**: checkpoint-driven detection of repetitive generations
//! - **Usage drain & retry**: trailing usage capture and retry decisions
//!
//! # Architecture
//!
//! The codebase is organized into three layers:
//!
//! - [`core`]: Core functionality (config, errors, logging, metrics, tokenizer)
//! - [`stream`]: The engine and its per-chunk collaborators
//! - [`services`]: Loop guard, usage drain, retry, usage ledger, message queue
//!
//! # Configuration
//!
//! Configuration is read from an optional YAML file with `${VAR}` expansion
//! and overridden by `TURN_STREAM__SECTION__KEY` environment variables, e.g.
//! `TURN_STREAM__STREAMING__USAGE_DRAIN_TIMEOUT_MS=2000`.

pub mod core;
pub mod services;
pub mod stream;

// Re-export commonly used types for convenience
pub use core::{AppConfig, CancelReason, EngineError, Result, StreamCancelHandle, Tokenizer};
pub use services::{LoopGuard, MessageQueue, RetryPolicy};
pub use stream::{Chunk, ChunkStream, StreamEngine, TaskHost, TurnOutcome};
