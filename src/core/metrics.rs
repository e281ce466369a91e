//! Prometheus metrics for monitoring streamed turns.
//!
//! This module provides a centralized metrics registry tracking chunk traffic,
//! turn terminations, dead-loop detections, drain outcomes and token usage.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::core::error::{EngineError, Result};

/// Container for all engine metrics.
pub struct Metrics {
    /// Chunks received by chunk type
    pub chunks_total: IntCounterVec,

    /// Finished turns by termination kind
    pub terminations_total: IntCounterVec,

    /// Dead loops detected by pattern kind
    pub dead_loops_total: IntCounterVec,

    /// Background usage drain outcomes
    pub drain_outcomes_total: IntCounterVec,

    /// Tokens by source (provider/estimated) and token type
    pub token_usage: IntCounterVec,

    /// Time from turn start to first chunk
    pub time_to_first_chunk: HistogramVec,

    /// Chunk throughput per turn
    pub chunks_per_second: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Subsequent calls return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let chunks_total = register_int_counter_vec!(
            "turn_stream_chunks_total",
            "Total number of provider chunks received",
            &["chunk_type"]
        )
        .expect("Failed to register chunks_total metric");

        let terminations_total = register_int_counter_vec!(
            "turn_stream_terminations_total",
            "Finished turns by termination kind",
            &["termination"]
        )
        .expect("Failed to register terminations_total metric");

        let dead_loops_total = register_int_counter_vec!(
            "turn_stream_dead_loops_total",
            "Dead loops detected by pattern kind",
            &["kind"]
        )
        .expect("Failed to register dead_loops_total metric");

        let drain_outcomes_total = register_int_counter_vec!(
            "turn_stream_drain_outcomes_total",
            "Background usage drain outcomes",
            &["outcome"]
        )
        .expect("Failed to register drain_outcomes_total metric");

        let token_usage = register_int_counter_vec!(
            "turn_stream_tokens_total",
            "Total number of tokens accounted",
            &["source", "token_type"]
        )
        .expect("Failed to register token_usage metric");

        let time_to_first_chunk = register_histogram_vec!(
            "turn_stream_time_to_first_chunk_seconds",
            "Time from turn start to the first provider chunk",
            &["first_chunk_type"],
            vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register time_to_first_chunk metric");

        let chunks_per_second = register_histogram_vec!(
            "turn_stream_chunks_per_second",
            "Chunks processed per second over a turn",
            &["termination"],
            vec![1.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0]
        )
        .expect("Failed to register chunks_per_second metric");

        Metrics {
            chunks_total,
            terminations_total,
            dead_loops_total,
            drain_outcomes_total,
            token_usage,
            time_to_first_chunk,
            chunks_per_second,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Render every registered metric in the Prometheus text format.
pub fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    String::from_utf8(buffer).map_err(|e| EngineError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = init_metrics();
        let metrics2 = get_metrics();
        assert!(std::ptr::eq(metrics, metrics2));
    }

    #[test]
    fn test_chunk_counter() {
        let metrics = init_metrics();
        let initial = metrics
            .chunks_total
            .with_label_values(&["unit_test_chunk"])
            .get();
        metrics
            .chunks_total
            .with_label_values(&["unit_test_chunk"])
            .inc();
        let after = metrics
            .chunks_total
            .with_label_values(&["unit_test_chunk"])
            .get();
        assert_eq!(after, initial + 1);
    }

    #[test]
    fn test_render_metrics_contains_registered_names() {
        let metrics = init_metrics();
        metrics.terminations_total.with_label_values(&["completed"]).inc();
        let text = render_metrics().unwrap();
        assert!(text.contains("turn_stream_terminations_total"));
    }
}
