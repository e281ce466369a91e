//! Callbacks the engine invokes on the owning task.
//!
//! The task layer (history, UI, persistence) lives outside this crate. The
//! engine only reads its abort/tool flags and pushes snapshots and usage to it.

use crate::core::error::CancelReason;
use crate::stream::content::AssistantContentBlock;
use crate::stream::state::{StreamingUsage, TurnUsageUpdate};

/// Task-side collaborator of [`StreamEngine`](crate::stream::engine::StreamEngine).
///
/// Implementations must be cheap to call: every method runs synchronously on
/// the engine's task between two chunk retrievals. The usage drain may call
/// [`persist_turn_usage`](TaskHost::persist_turn_usage) after the turn result
/// was already delivered.
pub trait TaskHost: Send + Sync {
    /// Task-level abort flag, checked after each chunk.
    fn is_aborted(&self) -> bool {
        false
    }

    /// The task was torn down while streaming.
    fn is_abandoned(&self) -> bool {
        false
    }

    /// The user rejected a tool result during this turn.
    fn did_reject_tool(&self) -> bool {
        false
    }

    /// A tool was already executed during this turn.
    fn did_already_use_tool(&self) -> bool {
        false
    }

    /// Content blocks changed; re-render from the snapshot.
    fn on_content_updated(&self, _blocks: &[AssistantContentBlock]) {}

    /// Cumulative reasoning text grew.
    fn on_reasoning(&self, _reasoning: &str) {}

    /// Undo an in-flight file edit preview.
    fn revert_pending_edit(&self) {}

    /// Provider-specific cost for the given token counts.
    fn calculate_cost(&self, _usage: &StreamingUsage) -> Option<f64> {
        None
    }

    /// Store the turn's usage snapshot in its persisted request metadata.
    fn persist_turn_usage(&self, update: &TurnUsageUpdate);

    /// The abort routine finished for this turn.
    fn abort_completed(&self, _reason: CancelReason) {}

    /// Show an error notice to the user.
    fn say_error(&self, _message: &str) {}
}
