//! Token estimation and context windows.
//!
//! Uses a simple heuristic: ~4 characters per token (Claude/Gemini average).
//! Exact counts come from provider responses or counting endpoints.

use tracing::debug;

use super::pricing::{estimate_cost, CostEstimate};

/// Characters per token estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Flat token charge for one attached image.
pub const IMAGE_TOKENS: usize = 1600;

/// Context window used for models missing from the table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Context windows by model prefix. Longest prefix wins.
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("claude-", 200_000),
    ("gemini-2.5-flash-image", 32_768),
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-2.5", 1_048_576),
];

/// Estimate token count for a string.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    // Rounds up so any non-empty text costs at least one token
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a prompt with attached images.
pub fn estimate_with_images(text: &str, image_count: usize) -> usize {
    estimate_tokens(text) + image_count * IMAGE_TOKENS
}

/// Count tokens for `text` as sent to `model`, without a provider call.
pub fn count_tokens(text: &str, model: &str) -> usize {
    let tokens = estimate_tokens(text);
    debug!(model, tokens, chars = text.len(), "Estimated token count");
    tokens
}

/// Context window size for a model.
pub fn context_window(model: &str) -> usize {
    CONTEXT_WINDOWS
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// How a token count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMethod {
    Estimated,
    Provider,
}

/// Token count plus context and cost figures for a piece of text.
#[derive(Debug, Clone)]
pub struct TokenReport {
    pub model: String,
    pub characters: usize,
    pub tokens: usize,
    pub method: CountMethod,
    pub context_window: usize,
    pub cost: CostEstimate,
}

impl TokenReport {
    pub fn new(text: &str, model: &str, tokens: usize, method: CountMethod) -> Self {
        Self {
            model: model.to_string(),
            characters: text.chars().count(),
            tokens,
            method,
            context_window: context_window(model),
            cost: estimate_cost(tokens, model),
        }
    }

    /// Report for an estimated count.
    pub fn estimate(text: &str, model: &str) -> Self {
        Self::new(text, model, count_tokens(text, model), CountMethod::Estimated)
    }

    /// Share of the context window used, in percent.
    pub fn context_usage(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.tokens as f64 / self.context_window as f64 * 100.0
    }

    /// Warning for reports close to the window limit.
    pub fn warning(&self) -> Option<&'static str> {
        let usage = self.context_usage();
        if usage > 90.0 {
            Some("WARNING: Using >90% of context window!")
        } else if usage > 75.0 {
            Some("CAUTION: Using >75% of context window")
        } else {
            None
        }
    }

    /// Format as a multi-line summary.
    pub fn summary(&self) -> String {
        let method = match self.method {
            CountMethod::Estimated => "Estimation (~4 chars/token)",
            CountMethod::Provider => "Provider API (exact)",
        };

        let mut out = format!(
            "Token Count Analysis:\n\
             Text Length:      {} characters\n\
             Token Count:      {} tokens\n\
             Counting Method:  {}\n\
             \n\
             Model:            {}\n\
             Context Window:   {} tokens\n\
             Context Usage:    {:.1}%\n\
             \n\
             Cost Estimates (USD):\n\
             \x20 As Input:    ${:.6}\n\
             \x20 As Output:   ${:.6}",
            self.characters,
            self.tokens,
            method,
            self.model,
            self.context_window,
            self.context_usage(),
            self.cost.as_input_usd,
            self.cost.as_output_usd,
        );

        if let Some(warning) = self.warning() {
            out.push_str("\n\n");
            out.push_str(warning);
        }
        out
    }
}
