//! Cumulative per-client usage counters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pricing::CostBreakdown;

/// Token usage reported for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Running totals since creation or the last reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub request_count: u64,
    pub since: DateTime<Utc>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            request_count: 0,
            since: Utc::now(),
        }
    }
}

impl UsageStats {
    fn add(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.request_count += 1;
    }

    /// Price the totals with `model`'s tier.
    pub fn cost(&self, model: &str) -> CostBreakdown {
        CostBreakdown::compute(
            self.input_tokens,
            self.output_tokens,
            self.cache_read_tokens,
            model,
        )
    }

    /// Format as a compact summary string.
    pub fn summary(&self) -> String {
        format!(
            "{} requests, {}↓ {}↑ (cache read {}, cache write {})",
            self.request_count,
            self.input_tokens,
            self.output_tokens,
            self.cache_read_tokens,
            self.cache_creation_tokens
        )
    }
}

/// Accumulates usage for one client lineage.
///
/// Shared by every clone and derived copy of a client, so increments are
/// serialised behind a mutex.
#[derive(Debug, Default)]
pub struct UsageAccountant {
    stats: Mutex<UsageStats>,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call's usage to the running totals.
    pub fn record(&self, usage: &Usage) {
        let mut stats = self.stats.lock();
        stats.add(usage);
        debug!(
            input = usage.input_tokens,
            output = usage.output_tokens,
            cache_read = usage.cache_read_tokens,
            requests = stats.request_count,
            "Recorded usage"
        );
    }

    pub fn snapshot(&self) -> UsageStats {
        self.stats.lock().clone()
    }

    /// Read the totals, zeroing them in the same critical section when `reset` is set.
    pub fn take(&self, reset: bool) -> UsageStats {
        let mut stats = self.stats.lock();
        if reset {
            std::mem::take(&mut *stats)
        } else {
            stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequential_sums() {
        let accountant = UsageAccountant::new();
        let deltas = [(10, 5), (20, 7), (3, 1)];
        for (i, o) in deltas {
            accountant.record(&Usage::new(i, o));
        }

        let stats = accountant.snapshot();
        assert_eq!(stats.input_tokens, 33);
        assert_eq!(stats.output_tokens, 13);
        assert_eq!(stats.request_count, 3);
    }

    #[test]
    fn test_take_with_reset() {
        let accountant = UsageAccountant::new();
        accountant.record(&Usage {
            input_tokens: 100,
            output_tokens: 50,
            cache_read_tokens: 40,
            cache_creation_tokens: 10,
        });

        let read = accountant.take(true);
        assert_eq!(read.input_tokens, 100);
        assert_eq!(read.cache_read_tokens, 40);
        assert_eq!(read.cache_creation_tokens, 10);

        let after = accountant.take(false);
        assert_eq!(after.input_tokens, 0);
        assert_eq!(after.request_count, 0);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let accountant = Arc::new(UsageAccountant::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let accountant = accountant.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        accountant.record(&Usage::new(1, 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = accountant.snapshot();
        assert_eq!(stats.input_tokens, 8000);
        assert_eq!(stats.output_tokens, 16_000);
        assert_eq!(stats.request_count, 8000);
    }

    #[test]
    fn test_summary() {
        let accountant = UsageAccountant::new();
        accountant.record(&Usage::new(1000, 500));
        let summary = accountant.snapshot().summary();
        assert!(summary.contains("1000↓"));
        assert!(summary.contains("500↑"));
    }
}
