//! Answers and the tier/confidence merge rule.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::page::PageType;
use crate::types::question::Tier;

/// An extracted fact. Identity is `(firm_id, question_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub firm_id: i64,
    pub question_key: String,

    /// The extracted value (arbitrary JSON)
    pub value: serde_json::Value,

    /// Model-reported confidence in [0, 1]
    pub confidence: f64,

    /// Tier that produced this answer
    pub tier: Tier,

    /// Model's reasoning, when provided
    #[serde(default)]
    pub reasoning: Option<String>,

    /// Dominant page type of the routed context
    #[serde(default)]
    pub source_page_type: Option<PageType>,

    /// Model identifier
    pub model: String,

    /// Token counts attributed to this answer's request
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,

    /// Run that produced this answer
    pub run_id: i64,
}

impl Answer {
    /// Whether the value carries information (non-null, non-empty).
    pub fn has_value(&self) -> bool {
        match &self.value {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
            _ => true,
        }
    }
}

/// Keyed answer set for a single firm run.
pub type AnswerSet = IndexMap<String, Answer>;

/// Merge an incoming answer into the set.
///
/// The incoming answer replaces an existing one for the same key iff its
/// tier is strictly higher, or the tier ties and its confidence is strictly
/// higher. Ties keep the existing answer, which makes the merge idempotent.
pub fn merge_answer(answers: &mut AnswerSet, incoming: Answer) {
    match answers.get(&incoming.question_key) {
        Some(existing) => {
            let wins = incoming.tier > existing.tier
                || (incoming.tier == existing.tier && incoming.confidence > existing.confidence);
            if wins {
                answers.insert(incoming.question_key.clone(), incoming);
            }
        }
        None => {
            answers.insert(incoming.question_key.clone(), incoming);
        }
    }
}

/// Merge a batch of incoming answers.
pub fn merge_answers(answers: &mut AnswerSet, incoming: impl IntoIterator<Item = Answer>) {
    for answer in incoming {
        merge_answer(answers, answer);
    }
}
