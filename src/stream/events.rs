//! Typed lifecycle events of a streamed turn.
//!
//! Events fan out over a `tokio::sync::broadcast` channel. Subscribers only see
//! events sent after they subscribed, so a listener attached once
//! `StreamComplete` has fired never receives it.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::error::CancelReason;
use crate::core::token_counter::TokenBreakdown;
use crate::stream::chunk::GroundingSource;
use crate::stream::content::AssistantContentBlock;
use crate::stream::state::StreamingUsage;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Payload of [`StreamEvent::StreamComplete`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCompletion {
    pub usage: StreamingUsage,
    pub breakdown: TokenBreakdown,
    pub blocks: Vec<AssistantContentBlock>,
    pub grounding: Vec<GroundingSource>,
    pub assistant_text: String,
    pub reasoning: String,
    pub has_tool_uses: bool,
    pub was_aborted: bool,
    pub was_abandoned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart,
    ChunkReceived {
        chunk_type: &'static str,
    },
    ChunkProcessed {
        chunk_type: &'static str,
        success: bool,
    },
    StreamError {
        error: String,
        cancel_reason: Option<CancelReason>,
    },
    StreamComplete(Arc<StreamCompletion>),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::StreamStart => "stream_start",
            StreamEvent::ChunkReceived { .. } => "chunk_received",
            StreamEvent::ChunkProcessed { .. } => "chunk_processed",
            StreamEvent::StreamError { .. } => "stream_error",
            StreamEvent::StreamComplete(_) => "stream_complete",
        }
    }
}

/// Broadcast bus for [`StreamEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers. Having none is not an error.
    pub fn emit(&self, event: StreamEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            tracing::trace!(event = name, "No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
