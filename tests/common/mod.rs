//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use turn_stream::core::{AppConfig, CancelReason, Encoding, Tokenizer};
use turn_stream::stream::{
    AssistantContentBlock, StreamEngine, StreamingUsage, TaskHost, TurnUsageUpdate,
};

/// Host that records every callback and exposes switchable flags.
#[derive(Default)]
pub struct RecordingHost {
    pub aborted: AtomicBool,
    pub abandoned: AtomicBool,
    pub rejected_tool: AtomicBool,
    pub used_tool: AtomicBool,
    pub content_updates: AtomicUsize,
    pub reverts: AtomicUsize,
    pub last_blocks: Mutex<Vec<AssistantContentBlock>>,
    pub usage_updates: Mutex<Vec<TurnUsageUpdate>>,
    pub aborts: Mutex<Vec<CancelReason>>,
    pub errors: Mutex<Vec<String>>,
    /// Cost per output token returned by `calculate_cost`
    pub cost_per_output_token: Option<f64>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn usage_updates(&self) -> Vec<TurnUsageUpdate> {
        self.usage_updates.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> Vec<CancelReason> {
        self.aborts.lock().unwrap().clone()
    }
}

impl TaskHost for RecordingHost {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn did_reject_tool(&self) -> bool {
        self.rejected_tool.load(Ordering::SeqCst)
    }

    fn did_already_use_tool(&self) -> bool {
        self.used_tool.load(Ordering::SeqCst)
    }

    fn on_content_updated(&self, blocks: &[AssistantContentBlock]) {
        self.content_updates.fetch_add(1, Ordering::SeqCst);
        *self.last_blocks.lock().unwrap() = blocks.to_vec();
    }

    fn revert_pending_edit(&self) {
        self.reverts.fetch_add(1, Ordering::SeqCst);
    }

    fn calculate_cost(&self, usage: &StreamingUsage) -> Option<f64> {
        self.cost_per_output_token
            .map(|price| usage.output_tokens as f64 * price)
    }

    fn persist_turn_usage(&self, update: &TurnUsageUpdate) {
        self.usage_updates.lock().unwrap().push(update.clone());
    }

    fn abort_completed(&self, reason: CancelReason) {
        self.aborts.lock().unwrap().push(reason);
    }

    fn say_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

static CL100K: Lazy<Tokenizer> =
    Lazy::new(|| Tokenizer::new(Encoding::Cl100kBase).expect("cl100k_base loads"));

static O200K: Lazy<Tokenizer> =
    Lazy::new(|| Tokenizer::new(Encoding::O200kBase).expect("o200k_base loads"));

/// Shared cl100k handle; loading the ranks once keeps the suites fast.
pub fn tokenizer() -> Tokenizer {
    CL100K.clone()
}

pub fn o200k_tokenizer() -> Tokenizer {
    O200K.clone()
}

pub fn engine(host: Arc<RecordingHost>) -> StreamEngine {
    engine_with_config(&AppConfig::default(), host)
}

pub fn engine_with_config(config: &AppConfig, host: Arc<RecordingHost>) -> StreamEngine {
    StreamEngine::new(config, tokenizer(), host)
}
