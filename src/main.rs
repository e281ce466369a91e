//! Stream Replay - run a recorded provider transcript through the engine
//!
//! Usage: `stream-replay <chunks.jsonl> [config.yaml]`
//!
//! Each line of the transcript is one JSON chunk, e.g.
//! `{"type":"text","text":"Hello"}`. The completion summary is printed to
//! stdout as JSON; logs go to stderr.
//!
//! The runtime is built by hand on a single thread: the engine is cooperative
//! and replays one turn at a time.

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use turn_stream::{
    core::config::str_to_bool,
    core::{init_metrics, init_tracing, render_metrics, AppConfig, EngineError, Tokenizer},
    services::{CostFormula, ModelPricing},
    stream::{Chunk, ChunkStream, StreamingUsage, TurnUsageUpdate},
    with_turn_context, StreamCancelHandle, StreamEngine, TaskHost,
};

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Host that logs every callback and prices usage with a fixed table.
struct LoggingHost {
    pricing: ModelPricing,
    formula: CostFormula,
}

impl TaskHost for LoggingHost {
    fn on_content_updated(&self, blocks: &[turn_stream::stream::AssistantContentBlock]) {
        tracing::trace!(blocks = blocks.len(), "Content updated");
    }

    fn calculate_cost(&self, usage: &StreamingUsage) -> Option<f64> {
        Some(self.formula.cost(&self.pricing, usage))
    }

    fn persist_turn_usage(&self, update: &TurnUsageUpdate) {
        tracing::info!(
            input_tokens = update.input_tokens,
            output_tokens = update.output_tokens,
            total_cost = ?update.total_cost,
            estimated = update.estimated,
            cancel_reason = ?update.cancel_reason,
            "Turn usage persisted"
        );
    }

    fn say_error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

async fn async_main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let transcript = args
        .next()
        .context("usage: stream-replay <chunks.jsonl> [config.yaml]")?;

    let config = match args.next() {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::from_env()?,
    };

    init_tracing(&config.logging)?;
    init_metrics();

    let tokenizer = Tokenizer::new(config.tokenizer.encoding)?;
    let host = Arc::new(LoggingHost {
        pricing: ModelPricing {
            input_price: 3.0,
            output_price: 15.0,
            cache_writes_price: 3.75,
            cache_reads_price: 0.3,
        },
        formula: CostFormula::Anthropic,
    });
    let engine = StreamEngine::new(&config, tokenizer, host);

    let file = tokio::fs::File::open(&transcript)
        .await
        .with_context(|| format!("Failed to open transcript: {}", transcript))?;
    let stream = transcript_stream(file);

    // Ctrl-C cancels the turn.
    let cancel = StreamCancelHandle::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling turn");
            ctrl_c.cancel();
        }
    });

    let outcome = with_turn_context!(transcript.clone(), 1u32, engine.run(stream, cancel.clone()));

    let drain = match outcome.drain {
        Some(handle) => handle.join().await.map(|report| {
            json!({
                "outcome": report.outcome.as_str(),
                "usageRecords": report.usage_records,
                "usage": report.usage,
            })
        }),
        None => None,
    };

    let summary = json!({
        "termination": outcome.termination,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
        "completion": outcome.completion.as_ref(),
        "drain": drain,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let dump_metrics = std::env::var("STREAM_REPLAY_METRICS")
        .map(|value| str_to_bool(&value))
        .unwrap_or(false);
    if dump_metrics {
        eprintln!("{}", render_metrics()?);
    }

    Ok(())
}

/// Stream chunks from a JSON-lines transcript. Blank lines are skipped.
fn transcript_stream(file: tokio::fs::File) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut lines = BufReader::new(file).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    yield serde_json::from_str::<Chunk>(&line).map_err(EngineError::from);
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(EngineError::StreamFailed(e.to_string()));
                    break;
                }
            }
        }
    };
    stream.boxed()
}
