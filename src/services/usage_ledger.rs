//! Usage consolidation over a task's full message history.
//!
//! Token totals only include request records carrying real token data;
//! placeholder records (no input and no output tokens yet) still contribute
//! their cost. The current context size is not a sum: each request's input
//! already contains the whole prior conversation.

use serde::{Deserialize, Serialize};

/// One API request entry of the persisted history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestRecord {
    #[serde(default)]
    pub tokens_in: Option<u64>,
    #[serde(default)]
    pub tokens_out: Option<u64>,
    #[serde(default)]
    pub cache_writes: Option<u64>,
    #[serde(default)]
    pub cache_reads: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
}

impl ApiRequestRecord {
    pub fn new(tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            tokens_in: Some(tokens_in),
            tokens_out: Some(tokens_out),
            ..Default::default()
        }
    }

    /// No real token data yet (request started, response not received).
    pub fn is_placeholder(&self) -> bool {
        self.tokens_in.unwrap_or(0) == 0 && self.tokens_out.unwrap_or(0) == 0
    }
}

/// History entries relevant to usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    ApiRequest(ApiRequestRecord),
    /// Prior context was summarized
    CondenseContext {
        #[serde(default, rename = "newContextTokens")]
        new_context_tokens: Option<u64>,
        #[serde(default)]
        cost: Option<f64>,
    },
    /// Anything else in the history
    #[serde(other)]
    Other,
}

/// Aggregate usage derived from a history. Recomputed on demand, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedUsage {
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cache_writes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cache_reads: Option<u64>,
    pub total_cost: f64,
    pub context_tokens: u64,
}

fn add_optional(total: &mut Option<u64>, value: Option<u64>) {
    if let Some(value) = value {
        *total = Some(total.unwrap_or(0) + value);
    }
}

/// Consolidate usage over `records`, in history order.
pub fn consolidate_usage(records: &[HistoryRecord]) -> ConsolidatedUsage {
    let mut usage = ConsolidatedUsage::default();

    for record in records {
        match record {
            HistoryRecord::ApiRequest(request) => {
                usage.total_cost += request.cost.unwrap_or(0.0);
                if request.is_placeholder() {
                    continue;
                }
                usage.total_tokens_in += request.tokens_in.unwrap_or(0);
                usage.total_tokens_out += request.tokens_out.unwrap_or(0);
                add_optional(&mut usage.total_cache_writes, request.cache_writes);
                add_optional(&mut usage.total_cache_reads, request.cache_reads);
            }
            HistoryRecord::CondenseContext { cost, .. } => {
                usage.total_cost += cost.unwrap_or(0.0);
            }
            HistoryRecord::Other => {}
        }
    }

    usage.context_tokens = context_tokens(records);
    usage
}

/// Current context size.
///
/// The last condense record with a positive count wins, plus the output of
/// every real request after it. Without one, the last real request's input
/// plus output.
pub fn context_tokens(records: &[HistoryRecord]) -> u64 {
    let condense = records.iter().enumerate().rev().find_map(|(i, record)| match record {
        HistoryRecord::CondenseContext {
            new_context_tokens: Some(tokens),
            ..
        } if *tokens > 0 => Some((i, *tokens)),
        _ => None,
    });

    if let Some((position, tokens)) = condense {
        let trailing_output: u64 = records[position + 1..]
            .iter()
            .filter_map(|record| match record {
                HistoryRecord::ApiRequest(request) if !request.is_placeholder() => {
                    Some(request.tokens_out.unwrap_or(0))
                }
                _ => None,
            })
            .sum();
        return tokens + trailing_output;
    }

    records
        .iter()
        .rev()
        .find_map(|record| match record {
            HistoryRecord::ApiRequest(request) if !request.is_placeholder() => {
                Some(request.tokens_in.unwrap_or(0) + request.tokens_out.unwrap_or(0))
            }
            _ => None,
        })
        .unwrap_or(0)
}
