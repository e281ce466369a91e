//! Provider chunk model.
//!
//! A provider response is an ordered sequence of [`Chunk`]s. The transport layer
//! that produces them is outside this crate; recorded transcripts deserialize
//! straight into this type (one JSON object per line).

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::core::error::EngineError;

/// One unit of a provider's streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    Usage(UsageChunk),
    Grounding {
        #[serde(default)]
        sources: Vec<GroundingSource>,
    },
    /// Fragment of a streamed tool call, addressed by `index`
    ToolCallPartial {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    /// Complete, non-streamed tool call
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    /// Provider signalled that a streamed tool call is complete
    ToolCallEnd {
        id: String,
    },
    Error {
        error: String,
        message: String,
    },
}

impl Chunk {
    /// Tag name, used for events, logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Text { .. } => "text",
            Chunk::Reasoning { .. } => "reasoning",
            Chunk::Usage(_) => "usage",
            Chunk::Grounding { .. } => "grounding",
            Chunk::ToolCallPartial { .. } => "tool_call_partial",
            Chunk::ToolCall { .. } => "tool_call",
            Chunk::ToolCallEnd { .. } => "tool_call_end",
            Chunk::Error { .. } => "error",
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Chunk::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Chunk::Reasoning { text: text.into() }
    }

    pub fn usage(input_tokens: u64, output_tokens: u64) -> Self {
        Chunk::Usage(UsageChunk {
            input_tokens,
            output_tokens,
            ..Default::default()
        })
    }
}

/// Token usage record. Providers may send several per call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageChunk {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

/// Citation attached to a grounded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
}

/// The cancelable chunk sequence handed to the engine.
///
/// Transport failures arrive as `Err` items.
pub type ChunkStream = BoxStream<'static, Result<Chunk, EngineError>>;
