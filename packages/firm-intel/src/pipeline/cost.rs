//! Per-firm cost tracking and dry-run estimation.

use std::collections::HashMap;
use std::sync::Mutex;

use llm_client::TokenUsage;

use crate::types::question::{QuestionCatalog, Tier};

/// USD prices per million tokens for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

impl ModelPricing {
    /// Cost of a usage record at these prices.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok
            + usage.cache_creation_input_tokens as f64 * self.cache_write_per_mtok
            + usage.cache_read_input_tokens as f64 * self.cache_read_per_mtok)
            / 1_000_000.0
    }
}

/// Prices indexed by tier.
#[derive(Debug, Clone, Copy)]
pub struct PriceTable {
    pub tier1: ModelPricing,
    pub tier2: ModelPricing,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            // Small-model pricing for the broad tier
            tier1: ModelPricing {
                input_per_mtok: 0.80,
                output_per_mtok: 4.00,
                cache_write_per_mtok: 1.00,
                cache_read_per_mtok: 0.08,
            },
            // Frontier-model pricing for synthesis
            tier2: ModelPricing {
                input_per_mtok: 3.00,
                output_per_mtok: 15.00,
                cache_write_per_mtok: 3.75,
                cache_read_per_mtok: 0.30,
            },
        }
    }
}

impl PriceTable {
    pub fn for_tier(&self, tier: Tier) -> &ModelPricing {
        match tier {
            Tier::One => &self.tier1,
            Tier::Two => &self.tier2,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FirmSpend {
    usage: TokenUsage,
    cost_usd: f64,
}

/// Thread-safe per-firm spend accounting.
pub struct CostTracker {
    max_cost_per_firm: f64,
    prices: PriceTable,
    spend: Mutex<HashMap<i64, FirmSpend>>,
}

impl CostTracker {
    /// Create a tracker; `max_cost_per_firm = 0` disables the budget check.
    pub fn new(max_cost_per_firm: f64, prices: PriceTable) -> Self {
        Self {
            max_cost_per_firm,
            prices,
            spend: Mutex::new(HashMap::new()),
        }
    }

    /// Record usage for a firm at a tier's prices; returns the new total.
    pub fn record(&self, firm_id: i64, tier: Tier, usage: &TokenUsage) -> f64 {
        let cost = self.prices.for_tier(tier).cost(usage);
        let mut spend = self.spend.lock().unwrap();
        let entry = spend.entry(firm_id).or_default();
        entry.usage.add(usage);
        entry.cost_usd += cost;
        entry.cost_usd
    }

    /// Accumulated cost for a firm.
    pub fn cost(&self, firm_id: i64) -> f64 {
        self.spend
            .lock()
            .unwrap()
            .get(&firm_id)
            .map(|s| s.cost_usd)
            .unwrap_or(0.0)
    }

    /// Accumulated usage for a firm.
    pub fn usage(&self, firm_id: i64) -> TokenUsage {
        self.spend
            .lock()
            .unwrap()
            .get(&firm_id)
            .map(|s| s.usage)
            .unwrap_or_default()
    }

    /// Whether the firm has reached its budget. A budget exactly equal to
    /// the accumulated cost counts as exhausted; 0 disables the check.
    pub fn budget_exhausted(&self, firm_id: i64) -> bool {
        self.max_cost_per_firm > 0.0 && self.cost(firm_id) >= self.max_cost_per_firm
    }
}

// Rough per-call token assumptions for dry-run estimates.
const EST_TIER1_INPUT_TOKENS: u64 = 4_500;
const EST_TIER1_OUTPUT_TOKENS: u64 = 300;
const EST_TIER2_INPUT_TOKENS: u64 = 8_000;
const EST_TIER2_OUTPUT_TOKENS: u64 = 600;

/// A dry-run cost estimate.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub firms: usize,
    pub tier1_calls: usize,
    pub tier2_calls: usize,
    pub estimated_cost_usd: f64,
}

impl std::fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} firms, {} tier-1 + {} tier-2 calls, ~${:.2}",
            self.firms, self.tier1_calls, self.tier2_calls, self.estimated_cost_usd
        )
    }
}

/// Estimate the cost of extracting a batch of firms.
pub fn estimate_batch_cost(
    firms: usize,
    catalog: &QuestionCatalog,
    prices: &PriceTable,
    max_tier: u8,
) -> CostEstimate {
    let tier1_calls = firms * catalog.tier(Tier::One).len();
    let tier2_calls = if max_tier >= 2 {
        firms * catalog.tier(Tier::Two).len()
    } else {
        0
    };

    let tier1_usage = TokenUsage {
        input_tokens: EST_TIER1_INPUT_TOKENS * tier1_calls as u64,
        output_tokens: EST_TIER1_OUTPUT_TOKENS * tier1_calls as u64,
        ..Default::default()
    };
    let tier2_usage = TokenUsage {
        input_tokens: EST_TIER2_INPUT_TOKENS * tier2_calls as u64,
        output_tokens: EST_TIER2_OUTPUT_TOKENS * tier2_calls as u64,
        ..Default::default()
    };

    CostEstimate {
        firms,
        tier1_calls,
        tier2_calls,
        estimated_cost_usd: prices.tier1.cost(&tier1_usage) + prices.tier2.cost(&tier2_usage),
    }
}
