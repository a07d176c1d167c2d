//! The extraction pipeline: orchestrator, prompts, and cost accounting.

pub mod cost;
pub mod extractor;
pub mod prompts;

pub use cost::{estimate_batch_cost, CostEstimate, CostTracker, ModelPricing, PriceTable};
pub use extractor::{Extractor, FirmRunReport, PROBE_PATHS, SKIP_REASON_NO_PAGES};
pub use prompts::{
    format_blog_system, format_question_message, format_tier1_recap, format_tier1_system,
    format_tier2_system, BLOG_INTELLIGENCE_SYSTEM_PROMPT, RECAP_CHAR_CAP, TIER1_SYSTEM_PROMPT,
    TIER2_SYSTEM_PROMPT,
};
