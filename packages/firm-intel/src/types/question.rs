//! The question catalog - what the engine asks about each firm.
//!
//! Questions are configuration: loaded once per process, either from the
//! built-in catalog or from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{IntelError, Result};
use crate::types::page::PageType;

/// Extraction tier: cheap per-page facts vs expensive synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    One = 1,
    Two = 2,
}

impl Tier {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

// Tiers are persisted as the numbers 1 and 2.
impl Serialize for Tier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(Tier::One),
            2 => Ok(Tier::Two),
            other => Err(serde::de::Error::custom(format!("invalid tier: {other}"))),
        }
    }
}

/// Expected shape of the answer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    String,
    Integer,
}

/// Category name for questions answered from blog and news content with the
/// specialized recency-focused prompt.
pub const CATEGORY_BLOG_INTELLIGENCE: &str = "blog_intelligence";

/// A single catalog question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique key, always `pe_`-prefixed
    pub key: String,

    /// The question put to the model
    pub text: String,

    /// Extraction tier
    pub tier: Tier,

    /// Grouping category (free-form; "blog_intelligence" routes specially)
    pub category: String,

    /// Page types to assemble context from, in preference order
    pub page_types: Vec<PageType>,

    /// Expected value shape
    pub output_format: OutputFormat,
}

impl Question {
    /// Whether this question uses the blog-intelligence prompt.
    pub fn is_blog_intelligence(&self) -> bool {
        self.category == CATEGORY_BLOG_INTELLIGENCE
    }
}

/// The loaded question set, indexed by key.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    questions: Vec<Question>,
}

impl QuestionCatalog {
    /// Build a catalog, rejecting duplicate or unprefixed keys.
    pub fn new(questions: Vec<Question>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for q in &questions {
            if !q.key.starts_with("pe_") {
                return Err(IntelError::Config(format!(
                    "question key must be pe_-prefixed: {}",
                    q.key
                )));
            }
            if !seen.insert(q.key.clone()) {
                return Err(IntelError::Config(format!("duplicate question key: {}", q.key)));
            }
        }
        Ok(Self { questions })
    }

    /// Load a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let questions: Vec<Question> = serde_json::from_str(json)?;
        Self::new(questions)
    }

    /// All questions.
    pub fn all(&self) -> &[Question] {
        &self.questions
    }

    /// Questions of one tier, in catalog order.
    pub fn tier(&self, tier: Tier) -> Vec<&Question> {
        self.questions.iter().filter(|q| q.tier == tier).collect()
    }

    /// Look up a question by key.
    pub fn get(&self, key: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.key == key)
    }

    /// Whether a key exists in the catalog.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl Default for QuestionCatalog {
    fn default() -> Self {
        default_catalog()
    }
}

fn q(
    key: &str,
    text: &str,
    tier: Tier,
    category: &str,
    page_types: &[PageType],
    output_format: OutputFormat,
) -> Question {
    Question {
        key: key.to_string(),
        text: text.to_string(),
        tier,
        category: category.to_string(),
        page_types: page_types.to_vec(),
        output_format,
    }
}

/// The built-in PE intelligence question set.
pub fn default_catalog() -> QuestionCatalog {
    use OutputFormat::{Integer, Json, String as Text};
    use PageType::*;

    let questions = vec![
        // ---- Tier 1: single-page fact extraction ----
        q(
            "pe_firm_overview",
            "In two or three sentences, what kind of private equity firm is this and what does it do?",
            Tier::One,
            "firmographics",
            &[About, Homepage],
            Text,
        ),
        q(
            "pe_founded_year",
            "In what year was the firm founded?",
            Tier::One,
            "firmographics",
            &[About, Homepage],
            Integer,
        ),
        q(
            "pe_headquarters",
            "Where is the firm headquartered (city and state or country)?",
            Tier::One,
            "firmographics",
            &[Contact, About, Homepage],
            Text,
        ),
        q(
            "pe_aum",
            "What are the firm's stated assets under management, as reported on the site?",
            Tier::One,
            "firmographics",
            &[About, Homepage, Strategy],
            Text,
        ),
        q(
            "pe_team_size",
            "How many investment professionals does the firm list?",
            Tier::One,
            "team",
            &[Team],
            Integer,
        ),
        q(
            "pe_key_people",
            "List the firm's named partners and senior leaders with their titles.",
            Tier::One,
            "team",
            &[Team, About],
            Json,
        ),
        q(
            "pe_investment_strategy",
            "Summarize the firm's stated investment strategy and typical deal profile.",
            Tier::One,
            "strategy",
            &[Strategy, About, Homepage],
            Text,
        ),
        q(
            "pe_target_sectors",
            "Which industry sectors does the firm target for investment?",
            Tier::One,
            "strategy",
            &[Strategy, Portfolio, Homepage],
            Json,
        ),
        q(
            "pe_target_geographies",
            "Which geographies does the firm invest in?",
            Tier::One,
            "strategy",
            &[Strategy, About],
            Json,
        ),
        q(
            "pe_check_size",
            "What equity check size or enterprise value range does the firm state for its investments?",
            Tier::One,
            "strategy",
            &[Strategy],
            Text,
        ),
        q(
            "pe_portfolio_companies",
            "List the portfolio companies named on the site, with a one-line description of each where given.",
            Tier::One,
            "portfolio",
            &[Portfolio],
            Json,
        ),
        q(
            "pe_portfolio_count",
            "How many current portfolio companies does the firm show?",
            Tier::One,
            "portfolio",
            &[Portfolio],
            Integer,
        ),
        q(
            "pe_recent_news",
            "What are the most recent announcements or press items, with their dates?",
            Tier::One,
            "deals",
            &[News, Blog],
            Json,
        ),
        q(
            "pe_contact_email",
            "What contact email address does the firm publish?",
            Tier::One,
            "contact",
            &[Contact, Homepage],
            Text,
        ),
        q(
            "pe_open_roles",
            "What open roles is the firm hiring for, if any?",
            Tier::One,
            "team",
            &[Careers],
            Json,
        ),
        // ---- Tier 2: cross-page synthesis ----
        q(
            "pe_competitive_positioning",
            "How does the firm position itself against other private equity buyers, and what differentiators does it claim?",
            Tier::Two,
            "synthesis",
            &[Strategy, About, Portfolio],
            Text,
        ),
        q(
            "pe_thesis_summary",
            "Synthesize the firm's investment thesis: where it believes returns come from and what it avoids.",
            Tier::Two,
            "synthesis",
            &[Strategy, Blog, About],
            Text,
        ),
        q(
            "pe_deal_activity_analysis",
            "Characterize the firm's recent deal activity: pace, sectors, and whether it appears to be deploying or harvesting.",
            Tier::Two,
            "synthesis",
            &[News, Portfolio, Blog],
            Json,
        ),
        q(
            "pe_fund_lifecycle_stage",
            "Based on fundraising announcements and deal pace, what stage of its fund lifecycle does the firm appear to be in?",
            Tier::Two,
            "synthesis",
            &[News, About, Strategy],
            Text,
        ),
        q(
            "pe_blog_themes",
            "What themes dominate the firm's recent blog and insights output, and what do they signal about its priorities?",
            Tier::Two,
            CATEGORY_BLOG_INTELLIGENCE,
            &[Blog, News],
            Json,
        ),
        q(
            "pe_announcement_vs_thought_leadership",
            "Separate the firm's recent posts into company announcements versus thought leadership, summarizing each group.",
            Tier::Two,
            CATEGORY_BLOG_INTELLIGENCE,
            &[Blog, News],
            Json,
        ),
    ];

    QuestionCatalog::new(questions).expect("built-in catalog is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_shape() {
        let catalog = default_catalog();
        assert!(catalog.tier(Tier::One).len() >= 10);
        assert!(catalog.tier(Tier::Two).len() >= 4);
        assert!(catalog.all().iter().all(|q| q.key.starts_with("pe_")));
        assert!(catalog.contains("pe_aum"));
        assert!(!catalog.contains("pe_missing"));
    }

    #[test]
    fn test_blog_intelligence_routing() {
        let catalog = default_catalog();
        let blog = catalog.get("pe_blog_themes").unwrap();
        assert!(blog.is_blog_intelligence());
        let synth = catalog.get("pe_thesis_summary").unwrap();
        assert!(!synth.is_blog_intelligence());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let question = Question {
            key: "pe_dup".into(),
            text: "?".into(),
            tier: Tier::One,
            category: "x".into(),
            page_types: vec![PageType::Homepage],
            output_format: OutputFormat::String,
        };
        let result = QuestionCatalog::new(vec![question.clone(), question]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unprefixed_keys_rejected() {
        let question = Question {
            key: "aum".into(),
            text: "?".into(),
            tier: Tier::One,
            category: "x".into(),
            page_types: vec![PageType::Homepage],
            output_format: OutputFormat::String,
        };
        assert!(QuestionCatalog::new(vec![question]).is_err());
    }

    #[test]
    fn test_catalog_json_round_trip() {
        let catalog = default_catalog();
        let json = serde_json::to_string(catalog.all()).unwrap();
        let reloaded = QuestionCatalog::from_json(&json).unwrap();
        assert_eq!(reloaded.all().len(), catalog.all().len());
    }
}
