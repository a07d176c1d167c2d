//! Routed-context assembly: build the per-question document from the
//! question's preferred page types.

use crate::types::page::{ClassifiedPage, FirmDocs, PageType};
use crate::types::question::Question;

/// Character budget for a routed context.
pub const CONTEXT_CHAR_BUDGET: usize = 15_000;

/// Larger budget for blog-intelligence questions, which digest many posts.
pub const BLOG_CONTEXT_CHAR_BUDGET: usize = 20_000;

fn budget_for(question: &Question) -> usize {
    if question.is_blog_intelligence() {
        BLOG_CONTEXT_CHAR_BUDGET
    } else {
        CONTEXT_CHAR_BUDGET
    }
}

fn format_section(page: &ClassifiedPage) -> String {
    format!(
        "--- Page: {} [{}] ---\nURL: {}\n\n{}",
        page.title, page.page_type, page.url, page.markdown
    )
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Assemble the routed context for a question.
///
/// Page sections are concatenated in the question's preference order,
/// separated by a blank line, up to the character budget; the last included
/// section is truncated at the remaining budget. When none of the preferred
/// types have pages, falls back to the first homepage page. Returns an empty
/// string when there is nothing to route.
pub fn route_context(question: &Question, docs: &FirmDocs) -> String {
    let budget = budget_for(question);
    let mut sections: Vec<String> = Vec::new();
    let mut used = 0usize;

    'outer: for page_type in &question.page_types {
        for page in docs.get(*page_type) {
            if !page.has_content() {
                continue;
            }
            let section = format_section(page);
            let separator = if sections.is_empty() { 0 } else { 2 };
            let remaining = budget.saturating_sub(used + separator);
            if remaining == 0 {
                break 'outer;
            }

            let section_len = section.chars().count();
            if section_len <= remaining {
                used += separator + section_len;
                sections.push(section);
            } else {
                sections.push(truncate_chars(&section, remaining));
                break 'outer;
            }
        }
    }

    if sections.is_empty() {
        if let Some(homepage) = docs
            .get(PageType::Homepage)
            .iter()
            .find(|p| p.has_content())
        {
            return truncate_chars(&format_section(homepage), budget);
        }
        return String::new();
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::page::PageType;
    use crate::types::question::{OutputFormat, Tier, CATEGORY_BLOG_INTELLIGENCE};

    fn question(page_types: &[PageType]) -> Question {
        Question {
            key: "pe_test".into(),
            text: "?".into(),
            tier: Tier::One,
            category: "test".into(),
            page_types: page_types.to_vec(),
            output_format: OutputFormat::String,
        }
    }

    fn page(url: &str, page_type: PageType, markdown: &str) -> ClassifiedPage {
        ClassifiedPage {
            url: url.into(),
            title: "Title".into(),
            markdown: markdown.into(),
            status_code: 200,
            page_type,
        }
    }

    #[test]
    fn test_sections_in_preference_order() {
        let docs = FirmDocs::build(vec![
            page("https://x.com/about", PageType::About, "about text"),
            page("https://x.com/team", PageType::Team, "team text"),
        ]);
        let q = question(&[PageType::Team, PageType::About]);

        let context = route_context(&q, &docs);
        let team_pos = context.find("team text").unwrap();
        let about_pos = context.find("about text").unwrap();
        assert!(team_pos < about_pos);
        assert!(context.contains("--- Page: Title [team] ---"));
        assert!(context.contains("URL: https://x.com/team"));
    }

    #[test]
    fn test_empty_when_no_pages_match() {
        let docs = FirmDocs::build(vec![page(
            "https://x.com/careers",
            PageType::Careers,
            "jobs",
        )]);
        let q = question(&[PageType::Portfolio]);
        assert!(route_context(&q, &docs).is_empty());
    }

    #[test]
    fn test_homepage_fallback() {
        let docs = FirmDocs::build(vec![page(
            "https://x.com/",
            PageType::Homepage,
            "home text",
        )]);
        let q = question(&[PageType::Portfolio]);
        let context = route_context(&q, &docs);
        assert!(context.contains("home text"));
    }

    #[test]
    fn test_budget_truncates_last_section() {
        let long = "x".repeat(CONTEXT_CHAR_BUDGET);
        let docs = FirmDocs::build(vec![
            page("https://x.com/strategy", PageType::Strategy, &long),
            page("https://x.com/strategy/2", PageType::Strategy, "second page"),
        ]);
        let q = question(&[PageType::Strategy]);

        let context = route_context(&q, &docs);
        assert_eq!(context.chars().count(), CONTEXT_CHAR_BUDGET);
        assert!(!context.contains("second page"));
    }

    #[test]
    fn test_blog_questions_get_larger_budget() {
        let long = "y".repeat(BLOG_CONTEXT_CHAR_BUDGET * 2);
        let docs = FirmDocs::build(vec![page("https://x.com/blog/p", PageType::Blog, &long)]);

        let mut q = question(&[PageType::Blog]);
        q.category = CATEGORY_BLOG_INTELLIGENCE.into();

        let context = route_context(&q, &docs);
        assert_eq!(context.chars().count(), BLOG_CONTEXT_CHAR_BUDGET);
    }

    #[test]
    fn test_whitespace_pages_are_skipped() {
        let docs = FirmDocs::build(vec![
            page("https://x.com/team", PageType::Team, "   \n "),
            page("https://x.com/team/2", PageType::Team, "real team text"),
        ]);
        let q = question(&[PageType::Team]);

        let context = route_context(&q, &docs);
        assert!(context.contains("real team text"));
        assert!(!context.contains("https://x.com/team\n"));
    }
}
