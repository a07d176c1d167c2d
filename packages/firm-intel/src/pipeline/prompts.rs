//! Prompts for the two extraction tiers.

use crate::types::answer::AnswerSet;
use crate::types::question::{OutputFormat, Question};

/// Character cap on the tier-1 recap injected into tier-2 system prompts.
pub const RECAP_CHAR_CAP: usize = 4_000;

/// System prompt for tier-1 single-page fact extraction.
pub const TIER1_SYSTEM_PROMPT: &str = r#"You are a competitive-intelligence analyst researching the private equity firm "{firm_name}".

You will be asked one question at a time, each with excerpts from the firm's website. Answer from the provided excerpts only:
- Extract facts stated on the pages; do not synthesize across pages or use outside knowledge.
- If the excerpts do not contain the answer, return a null value with low confidence.
- Quote figures exactly as written (e.g. "$2.4 billion", not a rounded number).

Respond with a single JSON object and nothing else:
{"value": <answer>, "confidence": <0.0-1.0>, "reasoning": "<one sentence citing where the answer appears>"}"#;

/// System prompt for tier-2 cross-page synthesis.
pub const TIER2_SYSTEM_PROMPT: &str = r#"You are a senior competitive-intelligence analyst researching the private equity firm "{firm_name}".

You will be asked synthesis questions that require reasoning across multiple pages of the firm's website. Combine the excerpts with the established facts below; prefer page evidence over the fact table when they disagree.

Established tier-1 facts:
{tier1_facts}

Respond with a single JSON object and nothing else:
{"value": <answer>, "confidence": <0.0-1.0>, "reasoning": "<two or three sentences explaining the synthesis>"}"#;

/// System prompt for blog-intelligence questions.
pub const BLOG_INTELLIGENCE_SYSTEM_PROMPT: &str = r#"You are a competitive-intelligence analyst tracking the public output of the private equity firm "{firm_name}".

You will be asked about the firm's blog, insights, and news pages. When answering:
- Weight recent posts most heavily; note publication dates where visible.
- Quote post titles and key phrases verbatim.
- Keep firm announcements (deals, fundraises, hires) separate from thought-leadership commentary.

Established tier-1 facts for context:
{tier1_facts}

Respond with a single JSON object and nothing else:
{"value": <answer>, "confidence": <0.0-1.0>, "reasoning": "<one or two sentences>"}"#;

const JSON_VALUE_HINT: &str =
    "The value must be valid JSON. Cap any list at the 10 most important items.";

const RESPONSE_REMINDER: &str =
    r#"Respond with only the JSON object {"value": ..., "confidence": ..., "reasoning": ...}."#;

/// Format the tier-1 system prompt.
pub fn format_tier1_system(firm_name: &str) -> String {
    TIER1_SYSTEM_PROMPT.replace("{firm_name}", firm_name)
}

/// Format the tier-2 synthesis system prompt with the tier-1 recap.
pub fn format_tier2_system(firm_name: &str, tier1_recap: &str) -> String {
    TIER2_SYSTEM_PROMPT
        .replace("{firm_name}", firm_name)
        .replace("{tier1_facts}", tier1_recap)
}

/// Format the blog-intelligence system prompt with the tier-1 recap.
pub fn format_blog_system(firm_name: &str, tier1_recap: &str) -> String {
    BLOG_INTELLIGENCE_SYSTEM_PROMPT
        .replace("{firm_name}", firm_name)
        .replace("{tier1_facts}", tier1_recap)
}

/// Bulleted recap of non-null tier-1 answers with confidence, capped at
/// [`RECAP_CHAR_CAP`] (whole lines dropped past the cap).
pub fn format_tier1_recap(answers: &AnswerSet) -> String {
    let mut recap = String::new();
    for answer in answers.values() {
        if !answer.has_value() {
            continue;
        }
        let value = match &answer.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let line = format!(
            "- {}: {} (confidence {:.2})\n",
            answer.question_key, value, answer.confidence
        );
        if recap.len() + line.len() > RECAP_CHAR_CAP {
            break;
        }
        recap.push_str(&line);
    }

    if recap.is_empty() {
        recap.push_str("(none established)\n");
    }
    recap
}

/// Build the user message for a question: question text, format hint,
/// routed page context, and the strict response envelope.
pub fn format_question_message(question: &Question, context: &str) -> String {
    let mut message = String::with_capacity(context.len() + 512);
    message.push_str("Question: ");
    message.push_str(&question.text);
    message.push('\n');

    if question.output_format == OutputFormat::Json {
        message.push_str(JSON_VALUE_HINT);
        message.push('\n');
    }

    message.push_str("\nWebsite excerpts:\n\n");
    message.push_str(context);
    message.push_str("\n\n");
    message.push_str(RESPONSE_REMINDER);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::answer::{merge_answer, Answer};
    use crate::types::page::PageType;
    use crate::types::question::Tier;

    fn answer(key: &str, value: serde_json::Value, confidence: f64) -> Answer {
        Answer {
            firm_id: 1,
            question_key: key.into(),
            value,
            confidence,
            tier: Tier::One,
            reasoning: None,
            source_page_type: None,
            model: "m".into(),
            input_tokens: 0,
            output_tokens: 0,
            run_id: 1,
        }
    }

    #[test]
    fn test_system_prompts_carry_firm_name() {
        let prompt = format_tier1_system("Summit Ridge Capital");
        assert!(prompt.contains("Summit Ridge Capital"));
        assert!(prompt.contains("do not synthesize across pages"));

        let prompt = format_tier2_system("Summit Ridge Capital", "- pe_aum: $2B\n");
        assert!(prompt.contains("Summit Ridge Capital"));
        assert!(prompt.contains("- pe_aum: $2B"));
    }

    #[test]
    fn test_blog_prompt_emphasizes_recency() {
        let prompt = format_blog_system("Summit Ridge Capital", "(none established)\n");
        assert!(prompt.contains("recent posts"));
        assert!(prompt.contains("thought-leadership"));
    }

    #[test]
    fn test_recap_skips_null_answers() {
        let mut set = AnswerSet::new();
        merge_answer(&mut set, answer("pe_aum", serde_json::json!("$2.4B"), 0.9));
        merge_answer(&mut set, answer("pe_founded_year", serde_json::Value::Null, 0.1));

        let recap = format_tier1_recap(&set);
        assert!(recap.contains("pe_aum: $2.4B (confidence 0.90)"));
        assert!(!recap.contains("pe_founded_year"));
    }

    #[test]
    fn test_recap_is_capped() {
        let mut set = AnswerSet::new();
        for i in 0..500 {
            merge_answer(
                &mut set,
                answer(
                    &format!("pe_q{i}"),
                    serde_json::json!("x".repeat(100)),
                    0.9,
                ),
            );
        }
        let recap = format_tier1_recap(&set);
        assert!(recap.len() <= RECAP_CHAR_CAP);
        assert!(recap.ends_with('\n'));
    }

    #[test]
    fn test_empty_recap_placeholder() {
        assert_eq!(format_tier1_recap(&AnswerSet::new()), "(none established)\n");
    }

    #[test]
    fn test_question_message_json_hint() {
        let question = Question {
            key: "pe_target_sectors".into(),
            text: "Which sectors?".into(),
            tier: Tier::One,
            category: "strategy".into(),
            page_types: vec![PageType::Strategy],
            output_format: OutputFormat::Json,
        };
        let message = format_question_message(&question, "--- Page ---");
        assert!(message.contains("Which sectors?"));
        assert!(message.contains("valid JSON"));
        assert!(message.contains("--- Page ---"));
        assert!(message.contains(r#"{"value""#));

        let mut plain = question;
        plain.output_format = OutputFormat::String;
        let message = format_question_message(&plain, "ctx");
        assert!(!message.contains("valid JSON. Cap"));
    }
}
