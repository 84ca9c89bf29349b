//! Static per-model price table (USD per million tokens).

use serde::Serialize;

/// Prices for one model tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
}

impl ModelPricing {
    const fn new(input: f64, output: f64, cache_read: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cache_read_per_million: cache_read,
        }
    }
}

/// Tier used for any model missing from the table (Claude Sonnet 4.5).
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0, 0.30);

/// Prices by model prefix. Longest prefix wins.
const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    ("claude-opus-4", ModelPricing::new(15.0, 75.0, 1.50)),
    ("claude-sonnet-4-5", ModelPricing::new(3.0, 15.0, 0.30)),
    ("claude-sonnet-3-5", ModelPricing::new(3.0, 15.0, 0.30)),
    ("claude-haiku-4-5", ModelPricing::new(1.0, 5.0, 0.10)),
    ("gemini-2.5-pro", ModelPricing::new(1.25, 10.0, 0.31)),
    ("gemini-2.5-flash", ModelPricing::new(0.30, 2.50, 0.075)),
    ("gemini-2.5-flash-lite", ModelPricing::new(0.10, 0.40, 0.025)),
    ("gemini-2.5-flash-image", ModelPricing::new(0.30, 30.0, 0.075)),
    ("gemini-2.0-flash", ModelPricing::new(0.10, 0.40, 0.025)),
];

/// Look up pricing for a model, falling back to [`DEFAULT_PRICING`].
pub fn pricing_for(model: &str) -> ModelPricing {
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Whether `model` has its own entry in the price table.
pub fn is_priced(model: &str) -> bool {
    PRICE_TABLE.iter().any(|(prefix, _)| model.starts_with(prefix))
}

fn per_million(tokens: u64, price: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * price
}

/// Cost of a token count billed as input or as output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub as_input_usd: f64,
    pub as_output_usd: f64,
}

/// Estimate the cost of `tokens` for `model`.
pub fn estimate_cost(tokens: usize, model: &str) -> CostEstimate {
    let pricing = pricing_for(model);
    let tokens = tokens as u64;
    CostEstimate {
        as_input_usd: per_million(tokens, pricing.input_per_million),
        as_output_usd: per_million(tokens, pricing.output_per_million),
    }
}

/// Cost of accumulated usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_usd: f64,
    pub output_usd: f64,
    pub cache_read_usd: f64,
    pub total_usd: f64,
    /// What the cache-read tokens would have cost as plain input, minus what they did cost
    pub cache_savings_usd: f64,
}

impl CostBreakdown {
    pub fn compute(input: u64, output: u64, cache_read: u64, model: &str) -> Self {
        let pricing = pricing_for(model);
        let input_usd = per_million(input, pricing.input_per_million);
        let output_usd = per_million(output, pricing.output_per_million);
        let cache_read_usd = per_million(cache_read, pricing.cache_read_per_million);
        Self {
            input_usd,
            output_usd,
            cache_read_usd,
            total_usd: input_usd + output_usd + cache_read_usd,
            cache_savings_usd: per_million(
                cache_read,
                pricing.input_per_million - pricing.cache_read_per_million,
            ),
        }
    }
}
