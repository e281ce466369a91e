//! Stream ingestion engine.
//!
//! [`StreamEngine::run`] consumes one provider call's chunk stream. Every chunk
//! retrieval is raced against the cancel signal, so a cancelled turn never
//! processes another chunk. After each handled chunk the engine re-checks, in
//! order: cancellation (or host abort), tool rejection, and whether a tool was
//! already used this turn. Fatal conditions all go through one abort routine
//! that rolls back the edit preview, seals the last block and persists the
//! usage snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use crate::core::cancel::StreamCancelHandle;
use crate::core::config::{AppConfig, LoopGuardConfig, StreamingConfig};
use crate::core::error::{CancelReason, EngineError};
use crate::core::metrics::get_metrics;
use crate::core::stream_metrics::{record_stream_metrics, StreamStats};
use crate::core::tokenizer::Tokenizer;
use crate::services::usage_drain::{UsageDrain, UsageDrainHandle};
use crate::stream::chunk::ChunkStream;
use crate::stream::events::{EventBus, StreamCompletion, StreamEvent};
use crate::stream::host::TaskHost;
use crate::stream::state::TurnState;

/// Appended to the assistant text when the user rejected a tool result.
pub const USER_FEEDBACK_INTERRUPTION: &str = "\n\n[Response interrupted by user feedback]";

/// Appended to the assistant text when a tool was already used this turn.
pub const TOOL_USE_INTERRUPTION: &str = "\n\n[Response interrupted by a tool use result. Only one tool may be used at a time and should be placed at the end of the message.]";

/// How the primary consumption loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The stream was exhausted
    Completed,
    /// Stopped after the user rejected a tool result
    ToolRejected,
    /// Stopped because a tool was already used this turn
    ToolAlreadyUsed,
    Cancelled,
    /// The owning task went away mid-stream
    Abandoned,
    /// Provider error chunk or transport failure
    Failed,
    DeadLoop,
}

impl Termination {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ToolRejected => "tool_rejected",
            Self::ToolAlreadyUsed => "tool_already_used",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
            Self::DeadLoop => "dead_loop",
        }
    }

    /// Whether the stream may still hold trailing chunks worth draining.
    pub const fn stopped_early(self) -> bool {
        matches!(self, Self::ToolRejected | Self::ToolAlreadyUsed)
    }

    fn for_error(error: &EngineError, abandoned: bool) -> Self {
        match error {
            EngineError::Cancelled if abandoned => Self::Abandoned,
            EngineError::Cancelled => Self::Cancelled,
            EngineError::DeadLoop { .. } => Self::DeadLoop,
            _ => Self::Failed,
        }
    }
}

/// Result of one streamed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub termination: Termination,
    pub completion: Arc<StreamCompletion>,
    /// The fatal error, when the turn was aborted
    pub error: Option<EngineError>,
    /// Background drain still collecting trailing usage
    pub drain: Option<UsageDrainHandle>,
}

impl TurnOutcome {
    pub fn was_aborted(&self) -> bool {
        self.completion.was_aborted
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.completion.cancel_reason
    }

    pub fn has_tool_uses(&self) -> bool {
        self.completion.has_tool_uses
    }

    /// Whether any authoritative usage arrived during the primary loop.
    pub fn saw_usage(&self) -> bool {
        self.completion.usage.has_api_usage_data
    }
}

/// Drives one provider call at a time.
pub struct StreamEngine {
    config: StreamingConfig,
    loop_guard: LoopGuardConfig,
    tokenizer: Tokenizer,
    host: Arc<dyn TaskHost>,
    events: EventBus,
}

impl StreamEngine {
    pub fn new(config: &AppConfig, tokenizer: Tokenizer, host: Arc<dyn TaskHost>) -> Self {
        Self {
            config: config.streaming.clone(),
            loop_guard: config.loop_guard.clone(),
            tokenizer,
            host,
            events: EventBus::default(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Consume `stream` until it ends, the turn is interrupted, or a fatal
    /// condition aborts it.
    pub async fn run(&self, stream: ChunkStream, cancel: StreamCancelHandle) -> TurnOutcome {
        let span = crate::turn_span!("stream_turn");
        self.run_turn(stream, cancel).instrument(span).await
    }

    async fn run_turn(&self, mut stream: ChunkStream, cancel: StreamCancelHandle) -> TurnOutcome {
        let mut stats = StreamStats::new(Instant::now());
        let guard_config = self.config.dead_loop_detection.then_some(&self.loop_guard);
        let mut state = TurnState::new(self.tokenizer.clone(), guard_config);
        let metrics = get_metrics();

        self.events.emit(StreamEvent::StreamStart);
        debug!("Stream started");

        let mut termination = Termination::Completed;
        let mut failure: Option<EngineError> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    failure = Some(EngineError::Cancelled);
                    break;
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
            };

            let chunk_type = chunk.kind();
            stats.observe_chunk(chunk_type);
            metrics.chunks_total.with_label_values(&[chunk_type]).inc();
            self.events.emit(StreamEvent::ChunkReceived { chunk_type });

            match state.apply(chunk) {
                Ok(effect) => {
                    self.events.emit(StreamEvent::ChunkProcessed {
                        chunk_type,
                        success: true,
                    });
                    if effect.content_changed {
                        self.host.on_content_updated(state.blocks());
                    }
                    if effect.reasoning_changed {
                        self.host.on_reasoning(state.reasoning());
                    }
                }
                Err(e) => {
                    self.events.emit(StreamEvent::ChunkProcessed {
                        chunk_type,
                        success: false,
                    });
                    failure = Some(e);
                    break;
                }
            }

            if cancel.is_cancelled() || self.host.is_aborted() || self.host.is_abandoned() {
                failure = Some(EngineError::Cancelled);
                break;
            }
            if self.host.did_reject_tool() {
                state.push_interruption(USER_FEEDBACK_INTERRUPTION);
                termination = Termination::ToolRejected;
                break;
            }
            if self.host.did_already_use_tool() {
                state.push_interruption(TOOL_USE_INTERRUPTION);
                termination = Termination::ToolAlreadyUsed;
                break;
            }
        }
        cancel.mark_completed();

        let abandoned = self.host.is_abandoned();
        let counted_output = state.breakdown().total;
        let mut cancel_reason = None;
        let mut drain = None;

        match &failure {
            Some(error) => {
                termination = Termination::for_error(error, abandoned);
                cancel_reason = error.cancel_reason();
                self.abort_stream(&mut state, error, counted_output);
                drop(stream);
            }
            None => {
                state.finish();
                self.host.on_content_updated(state.blocks());
                let update = state.usage().to_update(counted_output, self.host.as_ref());
                self.host.persist_turn_usage(&update);

                if termination.stopped_early() && self.config.background_usage_drain {
                    debug!(termination = termination.as_str(), "Draining stream for trailing usage");
                    drain = Some(
                        UsageDrain {
                            timeout: Duration::from_millis(self.config.usage_drain_timeout_ms),
                            base: state.usage().clone(),
                            counted_output,
                            host: Arc::clone(&self.host),
                        }
                        .spawn(stream),
                    );
                } else {
                    drop(stream);
                }
            }
        }

        stats.input_tokens = state.usage().input_tokens;
        stats.output_tokens = if state.usage().has_api_usage_data {
            state.usage().output_tokens
        } else {
            counted_output as u64
        };
        stats.estimated = !state.usage().has_api_usage_data;
        record_stream_metrics(&stats, termination.as_str());

        let completion = Arc::new(self.build_completion(state, failure.is_some(), abandoned, cancel_reason));
        self.events
            .emit(StreamEvent::StreamComplete(Arc::clone(&completion)));

        info!(
            termination = termination.as_str(),
            chunks = stats.chunks,
            blocks = completion.blocks.len(),
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Stream finished"
        );

        TurnOutcome {
            termination,
            completion,
            error: failure,
            drain,
        }
    }

    /// Shared abort path for cancellation, provider failure and dead loops.
    fn abort_stream(&self, state: &mut TurnState, error: &EngineError, counted_output: usize) {
        let reason = error.cancel_reason().unwrap_or(CancelReason::StreamingFailed);
        match reason {
            CancelReason::UserCancelled => info!("Stream cancelled"),
            CancelReason::StreamingFailed => warn!(error = %error, "Stream aborted"),
        }

        self.host.revert_pending_edit();
        state.finish();
        self.host.on_content_updated(state.blocks());

        let message = error.user_message();
        let mut update = state.usage().to_update(counted_output, self.host.as_ref());
        update.cancel_reason = Some(reason);
        update.streaming_failed_message = message.clone();
        self.host.persist_turn_usage(&update);
        self.host.abort_completed(reason);

        if let Some(message) = &message {
            self.host.say_error(message);
        }

        self.events.emit(StreamEvent::StreamError {
            error: error.to_string(),
            cancel_reason: Some(reason),
        });
    }

    fn build_completion(
        &self,
        state: TurnState,
        was_aborted: bool,
        was_abandoned: bool,
        cancel_reason: Option<CancelReason>,
    ) -> StreamCompletion {
        let usage = state.usage().clone();
        let breakdown = state.breakdown();
        let has_tool_uses = state.has_tool_uses();
        let (blocks, grounding, assistant_text, reasoning) = state.into_parts();
        StreamCompletion {
            usage,
            breakdown,
            blocks,
            grounding,
            assistant_text,
            reasoning,
            has_tool_uses,
            was_aborted,
            was_abandoned,
            cancel_reason,
        }
    }
}
