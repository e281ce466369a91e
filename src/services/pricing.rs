//! Per-model token pricing.
//!
//! Prices are in dollars per million tokens. Providers disagree on whether the
//! reported input count includes cached tokens, hence two formulas.

use serde::{Deserialize, Serialize};

use crate::stream::state::StreamingUsage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPricing {
    pub input_price: f64,
    pub output_price: f64,
    pub cache_writes_price: f64,
    pub cache_reads_price: f64,
}

impl ModelPricing {
    fn price(&self, input: u64, output: u64, cache_writes: u64, cache_reads: u64) -> f64 {
        (self.input_price * input as f64
            + self.output_price * output as f64
            + self.cache_writes_price * cache_writes as f64
            + self.cache_reads_price * cache_reads as f64)
            / 1_000_000.0
    }

    /// Input tokens exclude cache reads and writes.
    pub fn anthropic_cost(&self, input: u64, output: u64, cache_writes: u64, cache_reads: u64) -> f64 {
        self.price(input, output, cache_writes, cache_reads)
    }

    /// Input tokens already include cache reads and writes.
    pub fn openai_cost(&self, input: u64, output: u64, cache_writes: u64, cache_reads: u64) -> f64 {
        let uncached = input.saturating_sub(cache_writes).saturating_sub(cache_reads);
        self.price(uncached, output, cache_writes, cache_reads)
    }
}

/// Which cost formula a provider needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostFormula {
    #[default]
    Anthropic,
    OpenAi,
}

impl CostFormula {
    pub fn cost(self, pricing: &ModelPricing, usage: &StreamingUsage) -> f64 {
        let (input, output) = (usage.input_tokens, usage.output_tokens);
        let (writes, reads) = (usage.cache_write_tokens, usage.cache_read_tokens);
        match self {
            CostFormula::Anthropic => pricing.anthropic_cost(input, output, writes, reads),
            CostFormula::OpenAi => pricing.openai_cost(input, output, writes, reads),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelPricing {
        ModelPricing {
            input_price: 3.0,
            output_price: 15.0,
            cache_writes_price: 3.75,
            cache_reads_price: 0.3,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_anthropic_cost() {
        let cost = sonnet().anthropic_cost(1_000_000, 1_000_000, 0, 0);
        assert!(close(cost, 18.0));
        let cost = sonnet().anthropic_cost(1000, 500, 2000, 4000);
        assert!(close(cost, (3000.0 + 7500.0 + 7500.0 + 1200.0) / 1_000_000.0));
    }

    #[test]
    fn test_openai_cost_subtracts_cache() {
        let pricing = sonnet();
        let cost = pricing.openai_cost(7000, 500, 2000, 4000);
        assert!(close(cost, pricing.anthropic_cost(1000, 500, 2000, 4000)));
        // Cache larger than reported input never goes negative.
        let cost = pricing.openai_cost(100, 0, 0, 400);
        assert!(close(cost, 400.0 * 0.3 / 1_000_000.0));
    }

    #[test]
    fn test_formula_on_usage() {
        let usage = StreamingUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            ..Default::default()
        };
        assert!(close(CostFormula::Anthropic.cost(&sonnet(), &usage), 3.0));
        assert!(close(CostFormula::OpenAi.cost(&sonnet(), &usage), 3.0));
    }
}
