//! Per-turn stream statistics.
//!
//! Single responsibility: collect timing and token figures while a turn streams,
//! then convert them to Prometheus metrics once the turn ends.

use std::time::Instant;

use crate::core::metrics::get_metrics;

/// Stream statistics - pure data structure.
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub start_time: Instant,
    pub first_chunk_time: Option<Instant>,
    pub first_chunk_type: Option<&'static str>,
    pub chunks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Output tokens came from the local counter, not the provider
    pub estimated: bool,
}

impl StreamStats {
    pub fn new(start_time: Instant) -> Self {
        Self {
            start_time,
            first_chunk_time: None,
            first_chunk_type: None,
            chunks: 0,
            input_tokens: 0,
            output_tokens: 0,
            estimated: false,
        }
    }

    /// Note one received chunk.
    pub fn observe_chunk(&mut self, chunk_type: &'static str) {
        if self.first_chunk_time.is_none() {
            self.first_chunk_time = Some(Instant::now());
            self.first_chunk_type = Some(chunk_type);
        }
        self.chunks += 1;
    }
}

/// Record all stream metrics in one place.
pub fn record_stream_metrics(stats: &StreamStats, termination: &str) {
    let metrics = get_metrics();

    metrics
        .terminations_total
        .with_label_values(&[termination])
        .inc();

    if let Some(first_chunk) = stats.first_chunk_time {
        if let Some(ttfc) = first_chunk.checked_duration_since(stats.start_time) {
            metrics
                .time_to_first_chunk
                .with_label_values(&[stats.first_chunk_type.unwrap_or("unknown")])
                .observe(ttfc.as_secs_f64());
        }

        let duration = first_chunk.elapsed().as_secs_f64();
        if stats.chunks > 0 && duration > 0.0 {
            let cps = stats.chunks as f64 / duration;
            metrics
                .chunks_per_second
                .with_label_values(&[termination])
                .observe(cps);
            tracing::debug!(
                chunks = stats.chunks,
                duration_secs = format!("{:.3}", duration),
                cps = format!("{:.2}", cps),
                "Stream throughput"
            );
        }
    }

    if stats.input_tokens > 0 || stats.output_tokens > 0 {
        let source = if stats.estimated { "estimated" } else { "provider" };
        metrics
            .token_usage
            .with_label_values(&[source, "input"])
            .inc_by(stats.input_tokens);
        metrics
            .token_usage
            .with_label_values(&[source, "output"])
            .inc_by(stats.output_tokens);

        tracing::debug!(
            source,
            input_tokens = stats.input_tokens,
            output_tokens = stats.output_tokens,
            "Stream tokens"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stream_stats_new() {
        let stats = StreamStats::new(Instant::now());
        assert_eq!(stats.chunks, 0);
        assert!(stats.first_chunk_time.is_none());
        assert!(!stats.estimated);
    }

    #[test]
    fn test_observe_chunk_keeps_first_type() {
        let mut stats = StreamStats::new(Instant::now());
        stats.observe_chunk("reasoning");
        stats.observe_chunk("text");
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.first_chunk_type, Some("reasoning"));
    }

    #[test]
    fn test_record_stream_metrics_with_valid_stats() {
        let mut stats = StreamStats::new(Instant::now() - Duration::from_secs(2));
        stats.first_chunk_time = Some(Instant::now() - Duration::from_secs(1));
        stats.first_chunk_type = Some("text");
        stats.chunks = 10;
        stats.input_tokens = 50;
        stats.output_tokens = 100;

        // Should not panic
        record_stream_metrics(&stats, "completed");
    }

    #[test]
    fn test_record_stream_metrics_with_no_chunks() {
        let stats = StreamStats::new(Instant::now());
        record_stream_metrics(&stats, "cancelled");
    }
}
