//! Per-call streaming state.
//!
//! [`TurnState`] is the synchronous half of the engine: it applies one chunk at
//! a time to the assistant text, reasoning, content blocks, tool-call
//! assembler, token counter, reasoning loop guard and usage totals. It never suspends,
//! so the async engine only decides *when* chunks are applied.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::core::config::LoopGuardConfig;
use crate::core::error::{CancelReason, EngineError, Result};
use crate::core::metrics::get_metrics;
use crate::core::token_counter::{TokenBreakdown, TokenCounter};
use crate::core::tokenizer::Tokenizer;
use crate::services::loop_guard::{LoopDetection, LoopGuard};
use crate::stream::chunk::{Chunk, GroundingSource, UsageChunk};
use crate::stream::content::{AssistantContentBlock, ContentBlocks};
use crate::stream::host::TaskHost;
use crate::stream::tool_call::{RawToolCallTracker, ToolCallAssembler, ToolCallEvent};

/// Running usage totals for one provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost: Option<f64>,
    /// An authoritative record (output tokens > 0) was seen
    pub has_api_usage_data: bool,
}

impl StreamingUsage {
    /// Merge one usage record: token counters add up, cost always takes the
    /// latest record's value, even when that record carries none.
    pub fn apply(&mut self, usage: &UsageChunk) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_write_tokens += usage.cache_write_tokens.unwrap_or(0);
        self.cache_read_tokens += usage.cache_read_tokens.unwrap_or(0);
        self.total_cost = usage.total_cost;
        self.has_api_usage_data |= usage.output_tokens > 0;
    }

    /// Build the record persisted into the turn's request metadata.
    ///
    /// Without authoritative usage, output tokens fall back to the local
    /// count. Cost comes from the provider when it sent one, from the host
    /// otherwise.
    pub fn to_update(&self, counted_output: usize, host: &dyn TaskHost) -> TurnUsageUpdate {
        let mut usage = self.clone();
        let estimated = !usage.has_api_usage_data && counted_output as u64 > usage.output_tokens;
        if estimated {
            usage.output_tokens = counted_output as u64;
        }
        let total_cost = usage.total_cost.or_else(|| host.calculate_cost(&usage));
        TurnUsageUpdate {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            total_cost,
            estimated,
            cancel_reason: None,
            streaming_failed_message: None,
        }
    }
}

/// Usage snapshot handed to [`TaskHost::persist_turn_usage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnUsageUpdate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost: Option<f64>,
    /// Output tokens come from the local counter
    pub estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_failed_message: Option<String>,
}

/// What a chunk changed, so the engine knows which host callbacks to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkEffect {
    pub content_changed: bool,
    pub reasoning_changed: bool,
}

/// Mutable state of one API call attempt.
#[derive(Debug)]
pub struct TurnState {
    assistant_text: String,
    reasoning: String,
    grounding: Vec<GroundingSource>,
    blocks: ContentBlocks,
    tracker: RawToolCallTracker,
    assembler: ToolCallAssembler,
    /// Open tool call id -> block position
    tool_positions: HashMap<String, usize>,
    counter: TokenCounter,
    /// Watches the cumulative reasoning; assistant text is never guarded
    reasoning_guard: Option<LoopGuard>,
    usage: StreamingUsage,
}

impl TurnState {
    /// `loop_guard` is `None` when dead-loop detection is disabled.
    pub fn new(tokenizer: Tokenizer, loop_guard: Option<&LoopGuardConfig>) -> Self {
        Self {
            assistant_text: String::new(),
            reasoning: String::new(),
            grounding: Vec::new(),
            blocks: ContentBlocks::new(),
            tracker: RawToolCallTracker::new(),
            assembler: ToolCallAssembler::new(),
            tool_positions: HashMap::new(),
            counter: TokenCounter::new(tokenizer),
            reasoning_guard: loop_guard.cloned().map(LoopGuard::new),
            usage: StreamingUsage::default(),
        }
    }

    /// Apply one chunk. An `Err` is fatal for the attempt.
    pub fn apply(&mut self, chunk: Chunk) -> Result<ChunkEffect> {
        let mut effect = ChunkEffect::default();
        match chunk {
            Chunk::Text { text } => {
                self.finalize_tool_calls();
                self.assistant_text.push_str(&text);
                self.blocks.append_text(&text);
                self.counter.add_text(&text);
                effect.content_changed = true;
            }
            Chunk::Reasoning { text } => {
                self.reasoning.push_str(&text);
                self.counter.add_reasoning(&text);
                effect.reasoning_changed = true;
                if let Some(guard) = self.reasoning_guard.as_mut() {
                    check_loop(guard.detect(&self.reasoning))?;
                }
            }
            Chunk::Usage(usage) => {
                trace!(
                    input = usage.input_tokens,
                    output = usage.output_tokens,
                    "Usage record"
                );
                self.usage.apply(&usage);
            }
            Chunk::Grounding { sources } => {
                self.grounding.extend(sources);
            }
            Chunk::ToolCallPartial {
                index,
                id,
                name,
                arguments,
            } => {
                let events =
                    self.tracker
                        .process(index, id.as_deref(), name.as_deref(), arguments.as_deref());
                for event in events {
                    effect.content_changed |= self.apply_tool_event(event);
                }
            }
            Chunk::ToolCall {
                id,
                name,
                arguments,
            } => {
                self.finalize_tool_calls();
                self.counter.add_tool_call(&id, &name, &arguments);
                let block = self.assembler.complete(&id, &name, &arguments);
                self.blocks.push_tool_use(block);
                effect.content_changed = true;
            }
            Chunk::ToolCallEnd { id } => {
                if let Some(event) = self.tracker.end(&id) {
                    effect.content_changed |= self.apply_tool_event(event);
                } else {
                    effect.content_changed |= self.finish_tool_call(&id);
                }
            }
            Chunk::Error { error, message } => {
                return Err(EngineError::Provider(format!("{}: {}", error, message)));
            }
        }
        Ok(effect)
    }

    fn apply_tool_event(&mut self, event: ToolCallEvent) -> bool {
        match event {
            ToolCallEvent::Start { id, name } => {
                let others: Vec<String> = self
                    .assembler
                    .open_ids()
                    .into_iter()
                    .filter(|open| *open != id)
                    .collect();
                for other in others {
                    self.finish_tool_call(&other);
                }
                let Some(block) = self.assembler.start(&id, &name) else {
                    return false;
                };
                self.counter.add_tool_call(&id, &name, "");
                let position = self.blocks.push_tool_use(block);
                self.tool_positions.insert(id, position);
                true
            }
            ToolCallEvent::Delta { id, fragment } => {
                let params = self.assembler.delta(&id, &fragment);
                if let (Some(name), Some(arguments)) =
                    (self.assembler.name(&id), self.assembler.arguments(&id))
                {
                    self.counter.add_tool_call(&id, name, arguments);
                }
                let Some(params) = params else {
                    return false;
                };
                let Some(block) = self
                    .tool_positions
                    .get(&id)
                    .and_then(|&position| self.blocks.tool_use_mut(position))
                else {
                    return false;
                };
                block.params = params;
                true
            }
            ToolCallEvent::End { id } => self.finish_tool_call(&id),
        }
    }

    /// Strictly parse and seal one open call.
    fn finish_tool_call(&mut self, id: &str) -> bool {
        let Some(done) = self.assembler.end(id) else {
            return false;
        };
        let Some(position) = self.tool_positions.remove(id) else {
            return false;
        };
        let Some(block) = self.blocks.tool_use_mut(position) else {
            return false;
        };
        match done.params {
            Ok(params) => block.params = params,
            Err(e) => block.parse_error = Some(e),
        }
        block.partial = false;
        debug!(id, name = %done.name, "Tool call finalized");
        true
    }

    /// Close every open tool call.
    pub fn finalize_tool_calls(&mut self) {
        if self.tracker.has_open_calls() {
            for event in self.tracker.finalize_all() {
                self.apply_tool_event(event);
            }
        }
        for id in self.assembler.open_ids() {
            self.finish_tool_call(&id);
        }
    }

    /// Finalize open tool calls and seal the trailing block.
    pub fn finish(&mut self) {
        self.finalize_tool_calls();
        self.blocks.seal_last();
    }

    /// Append an interruption marker to the assistant text.
    pub fn push_interruption(&mut self, marker: &str) {
        self.assistant_text.push_str(marker);
    }

    pub fn assistant_text(&self) -> &str {
        &self.assistant_text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn grounding(&self) -> &[GroundingSource] {
        &self.grounding
    }

    pub fn blocks(&self) -> &[AssistantContentBlock] {
        self.blocks.as_slice()
    }

    pub fn has_tool_uses(&self) -> bool {
        self.blocks.has_tool_uses()
    }

    pub fn usage(&self) -> &StreamingUsage {
        &self.usage
    }

    pub fn breakdown(&self) -> TokenBreakdown {
        self.counter.breakdown()
    }

    pub fn into_parts(self) -> (Vec<AssistantContentBlock>, Vec<GroundingSource>, String, String) {
        (
            self.blocks.into_vec(),
            self.grounding,
            self.assistant_text,
            self.reasoning,
        )
    }
}

fn check_loop(detection: Option<LoopDetection>) -> Result<()> {
    match detection {
        Some(LoopDetection { kind, details }) => {
            warn!(kind = %kind, details = %details, "Dead loop detected");
            get_metrics()
                .dead_loops_total
                .with_label_values(&[kind.as_str()])
                .inc();
            Err(EngineError::DeadLoop { kind, details })
        }
        None => Ok(()),
    }
}
