//! Live response streaming.
//!
//! The [`engine`] consumes a provider's chunk stream and delegates each chunk
//! to the synchronous [`state`]: content blocks, tool-call assembly, token
//! counting and dead-loop checks.

pub mod chunk;
pub mod content;
pub mod engine;
pub mod events;
pub mod host;
pub mod partial_json;
pub mod state;
pub mod tool_call;

pub use chunk::{Chunk, ChunkStream, GroundingSource, UsageChunk};
pub use content::{AssistantContentBlock, ContentBlocks, ToolUseBlock};
pub use engine::{StreamEngine, Termination, TurnOutcome};
pub use events::{EventBus, StreamCompletion, StreamEvent};
pub use host::TaskHost;
pub use state::{StreamingUsage, TurnState, TurnUsageUpdate};
