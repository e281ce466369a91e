//! Integration tests for the stream ingestion engine.
//!
//! Chunk sources are in-memory iterators or `futures` channels so tests
//! control exactly when each chunk becomes available.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;
use common::{engine, engine_with_config, RecordingHost};
use futures::channel::mpsc;
use futures::{stream, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use turn_stream::core::error::PROVIDER_TERMINATION_PREFIX;
use turn_stream::core::{AppConfig, CancelReason, EngineError, StreamCancelHandle};
use turn_stream::services::DrainOutcome;
use turn_stream::stream::engine::{TOOL_USE_INTERRUPTION, USER_FEEDBACK_INTERRUPTION};
use turn_stream::stream::{
    AssistantContentBlock, Chunk, ChunkStream, StreamEvent, Termination, UsageChunk,
};

fn chunks(items: Vec<Chunk>) -> ChunkStream {
    stream::iter(items.into_iter().map(Ok)).boxed()
}

fn partial(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> Chunk {
    Chunk::ToolCallPartial {
        index,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: args.map(String::from),
    }
}

#[tokio::test]
async fn test_hello_with_usage() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let mut events = engine.subscribe();

    let outcome = engine
        .run(
            chunks(vec![Chunk::text("Hello"), Chunk::usage(100, 50)]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert!(outcome.error.is_none());
    assert!(outcome.drain.is_none());

    let completion = &outcome.completion;
    assert!(completion.usage.has_api_usage_data);
    assert_eq!(completion.usage.input_tokens, 100);
    assert_eq!(completion.usage.output_tokens, 50);
    assert_eq!(
        completion.blocks,
        vec![AssistantContentBlock::Text {
            content: "Hello".to_string(),
            partial: false
        }]
    );
    assert!(!completion.was_aborted);
    assert!(!completion.has_tool_uses);

    let updates = host.usage_updates();
    assert_eq!(updates.len(), 1);
    assert!(!updates[0].estimated);
    assert_eq!(updates[0].cancel_reason, None);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "stream_start",
            "chunk_received",
            "chunk_processed",
            "chunk_received",
            "chunk_processed",
            "stream_complete",
        ]
    );
}

#[tokio::test]
async fn test_usage_records_sum_tokens_and_replace_cost() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let outcome = engine
        .run(
            chunks(vec![
                Chunk::Usage(UsageChunk {
                    input_tokens: 100,
                    output_tokens: 0,
                    cache_read_tokens: Some(20),
                    total_cost: Some(0.01),
                    ..Default::default()
                }),
                Chunk::text("Hi"),
                Chunk::Usage(UsageChunk {
                    input_tokens: 0,
                    output_tokens: 30,
                    total_cost: Some(0.02),
                    ..Default::default()
                }),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    let usage = &outcome.completion.usage;
    assert_eq!(usage.input_tokens, 100);
    assert_eq!(usage.output_tokens, 30);
    assert_eq!(usage.cache_read_tokens, 20);
    assert_eq!(usage.total_cost, Some(0.02));
    assert!(usage.has_api_usage_data);
}

#[tokio::test]
async fn test_latest_usage_without_cost_is_priced_by_host() {
    let host = Arc::new(RecordingHost {
        cost_per_output_token: Some(0.5),
        ..Default::default()
    });
    let engine = engine(host.clone());
    let outcome = engine
        .run(
            chunks(vec![
                Chunk::Usage(UsageChunk {
                    input_tokens: 100,
                    output_tokens: 0,
                    total_cost: Some(0.01),
                    ..Default::default()
                }),
                Chunk::text("Hi"),
                Chunk::usage(0, 40),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.completion.usage.total_cost, None);
    let updates = host.usage_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].output_tokens, 40);
    assert_eq!(updates[0].total_cost, Some(20.0));
}

#[tokio::test]
async fn test_missing_usage_is_estimated() {
    let host = Arc::new(RecordingHost {
        cost_per_output_token: Some(0.5),
        ..Default::default()
    });
    let engine = engine(host.clone());
    let outcome = engine
        .run(
            chunks(vec![Chunk::text("Hello there, how are you today?")]),
            StreamCancelHandle::new(),
        )
        .await;

    assert!(!outcome.saw_usage());
    let updates = host.usage_updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].estimated);
    assert_eq!(
        updates[0].output_tokens,
        outcome.completion.breakdown.total as u64
    );
    assert_eq!(
        updates[0].total_cost,
        Some(updates[0].output_tokens as f64 * 0.5)
    );
}

#[tokio::test]
async fn test_cancellation_between_chunks() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let mut events = engine.subscribe();

    let (tx, rx) = mpsc::unbounded::<Chunk>();
    let stream: ChunkStream = rx.map(Ok).boxed();
    let cancel = StreamCancelHandle::new();
    tx.unbounded_send(Chunk::text("first")).unwrap();

    let driver = async {
        loop {
            match events.recv().await {
                Ok(StreamEvent::ChunkProcessed { .. }) => break,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
        cancel.cancel();
        tx.unbounded_send(Chunk::text(" second")).unwrap();
    };

    let (outcome, ()) = tokio::join!(engine.run(stream, cancel.clone()), driver);

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert!(outcome.was_aborted());
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::UserCancelled));
    assert_matches!(outcome.error, Some(EngineError::Cancelled));
    assert_eq!(outcome.completion.assistant_text, "first");
    assert!(outcome.completion.blocks.iter().all(|b| !b.is_partial()));
    assert!(outcome.drain.is_none());

    // Cancellation is not an error for the user.
    assert!(host.errors().is_empty());
    assert_eq!(host.aborts(), vec![CancelReason::UserCancelled]);
    assert_eq!(host.reverts.load(Ordering::SeqCst), 1);
    let updates = host.usage_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].cancel_reason, Some(CancelReason::UserCancelled));
}

#[tokio::test]
async fn test_cancelled_before_first_chunk() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let cancel = StreamCancelHandle::new();
    cancel.cancel();

    let outcome = engine.run(chunks(vec![Chunk::text("never")]), cancel).await;

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert!(outcome.completion.blocks.is_empty());
    assert_eq!(outcome.completion.assistant_text, "");
}

#[tokio::test]
async fn test_host_abort_flag_stops_after_chunk() {
    let host = RecordingHost::new();
    host.aborted.store(true, Ordering::SeqCst);
    let engine = engine(host.clone());

    let outcome = engine
        .run(
            chunks(vec![Chunk::text("one"), Chunk::text("two")]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert_eq!(outcome.completion.assistant_text, "one");
}

#[tokio::test]
async fn test_abandoned_task() {
    let host = RecordingHost::new();
    host.abandoned.store(true, Ordering::SeqCst);
    let engine = engine(host.clone());

    let outcome = engine
        .run(chunks(vec![Chunk::text("one")]), StreamCancelHandle::new())
        .await;

    assert_eq!(outcome.termination, Termination::Abandoned);
    assert!(outcome.completion.was_abandoned);
    assert!(outcome.completion.was_aborted);
    assert!(outcome.drain.is_none());
}

#[tokio::test]
async fn test_error_chunk_aborts_with_streaming_failed() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let mut events = engine.subscribe();

    let outcome = engine
        .run(
            chunks(vec![
                Chunk::text("partial answer"),
                Chunk::Error {
                    error: "overloaded_error".into(),
                    message: "Overloaded".into(),
                },
                Chunk::text("never seen"),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::Failed);
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::StreamingFailed));
    assert_eq!(outcome.completion.assistant_text, "partial answer");
    assert!(!outcome.completion.blocks[0].is_partial());

    let errors = host.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with(PROVIDER_TERMINATION_PREFIX));
    assert_eq!(host.aborts(), vec![CancelReason::StreamingFailed]);

    let mut saw_failed_chunk = false;
    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        match event {
            StreamEvent::ChunkProcessed { success: false, .. } => saw_failed_chunk = true,
            StreamEvent::StreamError { cancel_reason, .. } => {
                assert_eq!(cancel_reason, Some(CancelReason::StreamingFailed));
                saw_error = true;
            }
            _ => {}
        }
    }
    assert!(saw_failed_chunk);
    assert!(saw_error);
}

#[tokio::test]
async fn test_transport_failure() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let stream: ChunkStream = stream::iter(vec![
        Ok(Chunk::text("abc")),
        Err(EngineError::StreamFailed("connection reset".into())),
    ])
    .boxed();

    let outcome = engine.run(stream, StreamCancelHandle::new()).await;

    assert_eq!(outcome.termination, Termination::Failed);
    let updates = host.usage_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].cancel_reason, Some(CancelReason::StreamingFailed));
    assert!(updates[0]
        .streaming_failed_message
        .as_deref()
        .unwrap()
        .ends_with("connection reset"));
}

#[tokio::test]
async fn test_reasoning_dead_loop_aborts() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let looping = format!("{}{}", "x".repeat(1990), "ab".repeat(10));

    let outcome = engine
        .run(
            chunks(vec![Chunk::reasoning(looping), Chunk::text("never")]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::DeadLoop);
    assert!(outcome.error.as_ref().unwrap().is_dead_loop());
    assert_eq!(outcome.cancel_reason(), Some(CancelReason::StreamingFailed));
    let errors = host.errors();
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].starts_with(PROVIDER_TERMINATION_PREFIX));
}

#[tokio::test]
async fn test_long_text_ending_in_markdown_table_completes() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let prose = "The config loader reads the file and applies overrides. ".repeat(36);
    let table = "\n\n| Name | Type | Default | Notes |\n|---|---|---|---|";

    let outcome = engine
        .run(
            chunks(vec![Chunk::text(prose), Chunk::text(table), Chunk::usage(10, 500)]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert!(outcome.error.is_none());
    assert!(outcome.completion.assistant_text.chars().count() > 2000);
    assert!(outcome.completion.assistant_text.ends_with("|---|---|---|---|"));
    assert!(host.errors().is_empty());
}

#[tokio::test]
async fn test_dead_loop_detection_disabled() {
    let host = RecordingHost::new();
    let mut config = AppConfig::default();
    config.streaming.dead_loop_detection = false;
    let engine = engine_with_config(&config, host.clone());
    let looping = format!("{}{}", "x".repeat(1990), "ab".repeat(10));

    let outcome = engine
        .run(chunks(vec![Chunk::reasoning(looping)]), StreamCancelHandle::new())
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
}

#[tokio::test]
async fn test_tool_rejection_interrupts_and_drains_usage() {
    let host = RecordingHost::new();
    host.rejected_tool.store(true, Ordering::SeqCst);
    let engine = engine(host.clone());

    let outcome = engine
        .run(
            chunks(vec![
                Chunk::text("Done."),
                Chunk::text(" More text"),
                Chunk::usage(120, 40),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::ToolRejected);
    assert!(!outcome.was_aborted());
    assert_eq!(
        outcome.completion.assistant_text,
        format!("Done.{}", USER_FEEDBACK_INTERRUPTION)
    );
    assert_matches!(
        &outcome.completion.blocks[0],
        AssistantContentBlock::Text { content, partial: false } if content == "Done."
    );

    let report = outcome.drain.expect("drain spawned").join().await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::Exhausted);
    assert_eq!(report.usage_records, 1);

    let updates = host.usage_updates();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].estimated);
    assert_eq!(updates[1].input_tokens, 120);
    assert_eq!(updates[1].output_tokens, 40);
    assert!(!updates[1].estimated);
}

#[tokio::test]
async fn test_tool_already_used_without_drain() {
    let host = RecordingHost::new();
    host.used_tool.store(true, Ordering::SeqCst);
    let mut config = AppConfig::default();
    config.streaming.background_usage_drain = false;
    let engine = engine_with_config(&config, host.clone());

    let outcome = engine
        .run(
            chunks(vec![Chunk::text("Using it"), Chunk::usage(1, 1)]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::ToolAlreadyUsed);
    assert!(outcome
        .completion
        .assistant_text
        .ends_with(TOOL_USE_INTERRUPTION));
    assert!(outcome.drain.is_none());
}

#[tokio::test]
async fn test_streamed_tool_call() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());

    let outcome = engine
        .run(
            chunks(vec![
                Chunk::text("I'll read it."),
                partial(0, Some("toolu_1"), Some("read_file"), Some("")),
                partial(0, None, None, Some("{\"path\": \"src/")),
                partial(0, None, None, Some("lib.rs\"}")),
                Chunk::ToolCallEnd {
                    id: "toolu_1".into(),
                },
                Chunk::usage(10, 20),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    let completion = &outcome.completion;
    assert!(completion.has_tool_uses);
    assert_eq!(completion.blocks.len(), 2);
    assert_matches!(
        &completion.blocks[1],
        AssistantContentBlock::ToolUse(tool)
            if tool.name == "read_file" && !tool.partial && tool.params == json!({"path": "src/lib.rs"})
    );
    assert!(completion.breakdown.tool_calls > 0);
    assert_eq!(
        completion.breakdown.total,
        completion.breakdown.text + completion.breakdown.reasoning + completion.breakdown.tool_calls
    );
}

#[tokio::test]
async fn test_duplicate_tool_start_through_engine() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());

    let outcome = engine
        .run(
            chunks(vec![
                partial(0, Some("c1"), Some("list_files"), None),
                partial(0, Some("c1"), Some("list_files"), Some("{}")),
            ]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.completion.blocks.len(), 1);
    assert!(!outcome.completion.blocks[0].is_partial());
}

#[tokio::test]
async fn test_malformed_tool_arguments_still_complete() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());

    let outcome = engine
        .run(
            chunks(vec![partial(0, Some("c1"), Some("write_file"), Some("{\"path\": \"a.rs\", \"content\": "))]),
            StreamCancelHandle::new(),
        )
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_matches!(
        &outcome.completion.blocks[0],
        AssistantContentBlock::ToolUse(tool)
            if !tool.partial && tool.parse_error.is_some() && tool.params == json!({"path": "a.rs"})
    );
}

#[tokio::test]
async fn test_grounding_sources_are_reported() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    let grounding: Chunk = serde_json::from_value(json!({
        "type": "grounding",
        "sources": [{"title": "Docs", "url": "https://docs.rs"}]
    }))
    .unwrap();

    let outcome = engine
        .run(chunks(vec![Chunk::text("See docs"), grounding]), StreamCancelHandle::new())
        .await;

    assert_eq!(outcome.completion.grounding.len(), 1);
    assert_eq!(outcome.completion.blocks.len(), 1);
}

#[tokio::test]
async fn test_late_subscriber_misses_completion() {
    let host = RecordingHost::new();
    let engine = engine(host);
    engine
        .run(chunks(vec![Chunk::text("x")]), StreamCancelHandle::new())
        .await;

    let mut late = engine.subscribe();
    assert!(late.try_recv().is_err());
}

#[tokio::test]
async fn test_content_updates_reach_host() {
    let host = RecordingHost::new();
    let engine = engine(host.clone());
    engine
        .run(
            chunks(vec![Chunk::text("a"), Chunk::text("b"), Chunk::reasoning("r")]),
            StreamCancelHandle::new(),
        )
        .await;

    // Two text chunks plus the final sealed snapshot.
    assert_eq!(host.content_updates.load(Ordering::SeqCst), 3);
    let blocks = host.last_blocks.lock().unwrap().clone();
    assert_eq!(
        blocks,
        vec![AssistantContentBlock::Text {
            content: "ab".into(),
            partial: false
        }]
    );
}
