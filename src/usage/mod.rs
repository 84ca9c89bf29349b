//! Token and usage accounting.
//!
//! - [`tokens`]: estimation, context windows, token reports
//! - [`pricing`]: static per-model price table
//! - [`UsageAccountant`]: cumulative per-client counters

mod accountant;
pub mod pricing;
pub mod tokens;

pub use accountant::{Usage, UsageAccountant, UsageStats};
pub use pricing::{estimate_cost, pricing_for, CostBreakdown, CostEstimate, ModelPricing};
pub use tokens::{context_window, count_tokens, estimate_tokens, CountMethod, TokenReport};
