//! Background draining of a provider stream for trailing usage records.
//!
//! Some providers deliver the final `usage` chunk after the last content chunk.
//! Once the engine has stopped consuming (completion was cut short by a tool
//! rejection or a tool-use interruption), the stream is handed to a detached
//! task that keeps reading until the stream ends or the timeout fires. Drained
//! usage is merged into the turn's snapshot and persisted through the host.
//! Nothing here ever propagates an error to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::core::cancel::StreamCancelHandle;
use crate::core::metrics::get_metrics;
use crate::stream::chunk::{Chunk, ChunkStream};
use crate::stream::host::TaskHost;
use crate::stream::state::StreamingUsage;

/// How a drain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The stream ended on its own
    Exhausted,
    TimedOut,
    /// Stopped through [`UsageDrainHandle::cancel`]
    Cancelled,
    /// The stream yielded an error
    Failed(String),
}

impl DrainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainOutcome::Exhausted => "exhausted",
            DrainOutcome::TimedOut => "timed_out",
            DrainOutcome::Cancelled => "cancelled",
            DrainOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of a finished drain.
#[derive(Debug, Clone)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    /// Usage records captured after the primary consumer stopped
    pub usage_records: usize,
    /// Turn usage with the drained records merged in
    pub usage: StreamingUsage,
    /// Whether the merged usage was persisted through the host
    pub persisted: bool,
    pub elapsed: Duration,
}

/// Handle to a running drain. Dropping it detaches the task.
#[derive(Debug)]
pub struct UsageDrainHandle {
    cancel: StreamCancelHandle,
    join: JoinHandle<DrainReport>,
}

impl UsageDrainHandle {
    /// Stop the drain early. Usage captured so far is still persisted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the drain. Returns `None` if the task panicked or was aborted.
    pub async fn join(self) -> Option<DrainReport> {
        match self.join.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Usage drain task failed");
                None
            }
        }
    }
}

/// Parameters of one drain.
pub struct UsageDrain {
    pub timeout: Duration,
    /// Usage already accumulated by the primary consumer
    pub base: StreamingUsage,
    /// Local output token count, used when no authoritative usage arrives
    pub counted_output: usize,
    pub host: Arc<dyn TaskHost>,
}

impl UsageDrain {
    /// Spawn the drain on the current runtime.
    pub fn spawn(self, stream: ChunkStream) -> UsageDrainHandle {
        let cancel = StreamCancelHandle::new();
        let task_cancel = cancel.clone();
        let span = tracing::debug_span!("usage_drain", timeout_ms = self.timeout.as_millis() as u64);
        let join = tokio::spawn(self.run(stream, task_cancel).instrument(span));
        UsageDrainHandle { cancel, join }
    }

    async fn run(self, mut stream: ChunkStream, cancel: StreamCancelHandle) -> DrainReport {
        let start = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut usage = self.base.clone();
        let mut usage_records = 0usize;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break DrainOutcome::Cancelled,
                _ = &mut deadline => break DrainOutcome::TimedOut,
                next = stream.next() => match next {
                    None => break DrainOutcome::Exhausted,
                    Some(Err(e)) => break DrainOutcome::Failed(e.to_string()),
                    Some(Ok(Chunk::Usage(record))) => {
                        debug!(
                            input = record.input_tokens,
                            output = record.output_tokens,
                            "Drained usage record"
                        );
                        usage.apply(&record);
                        usage_records += 1;
                    }
                    Some(Ok(other)) => {
                        tracing::trace!(chunk_type = other.kind(), "Ignoring chunk while draining");
                    }
                },
            }
        };
        // Release the provider iterator before touching the host.
        drop(stream);
        cancel.mark_completed();

        match &outcome {
            DrainOutcome::Exhausted => {
                debug!(usage_records, "Usage drain finished");
            }
            DrainOutcome::TimedOut => {
                warn!(
                    usage_records,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Usage drain timed out"
                );
            }
            DrainOutcome::Cancelled => {
                info!(usage_records, "Usage drain cancelled");
            }
            DrainOutcome::Failed(e) => {
                error!(usage_records, error = %e, "Usage drain failed");
            }
        }

        let persisted = usage_records > 0;
        if persisted {
            let update = usage.to_update(self.counted_output, self.host.as_ref());
            self.host.persist_turn_usage(&update);
        }

        get_metrics()
            .drain_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .inc();

        DrainReport {
            outcome,
            usage_records,
            usage,
            persisted,
            elapsed: start.elapsed(),
        }
    }
}
