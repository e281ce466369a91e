//! Services around the streaming engine.
//!
//! Loop detection, background usage draining, retry decisions, history usage
//! consolidation, pricing and the pending-message queue.

pub mod loop_guard;
pub mod message_queue;
pub mod pricing;
pub mod retry;
pub mod usage_drain;
pub mod usage_ledger;

// Re-export commonly used types
pub use loop_guard::{LoopDetection, LoopGuard, LoopKind};
pub use message_queue::{MessageQueue, QueuedMessage};
pub use pricing::{CostFormula, ModelPricing};
pub use retry::{RetryCoordinator, RetryDecision, RetryPolicy};
pub use usage_drain::{DrainOutcome, DrainReport, UsageDrain, UsageDrainHandle};
pub use usage_ledger::{consolidate_usage, ApiRequestRecord, ConsolidatedUsage, HistoryRecord};
