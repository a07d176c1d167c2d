//! URL-path page classification and year extraction.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::page::{ClassifiedPage, CrawledPage, PageType};
use crate::types::page::sanitize_text;

/// Ordered rule table: the first substring match on the normalized path wins.
const RULES: [(PageType, &[&str]); 8] = [
    (
        PageType::Team,
        &[
            "/team",
            "/people",
            "/leadership",
            "/professionals",
            "/our-team",
            "/management",
            "/staff",
            "/partners",
        ],
    ),
    (
        PageType::Portfolio,
        &[
            "/portfolio",
            "/investments",
            "/companies",
            "/our-companies",
            "/portfolio-companies",
            "/current-investments",
        ],
    ),
    (
        PageType::Strategy,
        &[
            "/strategy",
            "/approach",
            "/investment-approach",
            "/thesis",
            "/what-we-do",
            "/investment-strategy",
            "/philosophy",
        ],
    ),
    (
        PageType::About,
        &["/about", "/who-we-are", "/our-story", "/history", "/overview", "/firm"],
    ),
    (
        PageType::Blog,
        &[
            "/blog",
            "/insights",
            "/perspectives",
            "/research",
            "/thought-leadership",
            "/publications",
        ],
    ),
    (
        PageType::News,
        &["/news", "/press", "/media", "/announcements", "/press-releases"],
    ),
    (
        PageType::Contact,
        &["/contact", "/connect", "/get-in-touch", "/reach-us"],
    ),
    (
        PageType::Careers,
        &["/careers", "/jobs", "/opportunities", "/join", "/hiring"],
    ),
];

/// Normalize a URL to its comparable path: lowercase, no query or fragment,
/// no trailing slash.
fn normalized_path(url: &str) -> String {
    let lowered = url.to_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or("");
    let without_query = without_fragment.split('?').next().unwrap_or("");

    let path = match url::Url::parse(without_query) {
        Ok(parsed) => parsed.path().to_string(),
        // Not an absolute URL; treat the remainder as a bare path.
        Err(_) => without_query.to_string(),
    };

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Classify a URL into a page type. Case-insensitive; root is the homepage.
pub fn classify_url(url: &str) -> PageType {
    let path = normalized_path(url);
    if path == "/" {
        return PageType::Homepage;
    }

    for (page_type, patterns) in RULES {
        if patterns.iter().any(|pattern| path.contains(pattern)) {
            return page_type;
        }
    }

    PageType::Other
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d{4})(?:/\d{2})?[/-]").expect("valid year pattern"))
}

/// Extract a publication year embedded in a URL path.
///
/// Matches `/YYYY/`, `/YYYY-`, and `/YYYY/MM/` forms; years outside
/// [2000, 2030] are ignored. Returns 0 when no year is recoverable.
pub fn url_year(url: &str) -> i32 {
    for capture in year_regex().captures_iter(url) {
        if let Ok(year) = capture[1].parse::<i32>() {
            if (2000..=2030).contains(&year) {
                return year;
            }
        }
    }
    0
}

/// Sanitize and classify a crawled page.
pub fn classify_page(page: CrawledPage) -> ClassifiedPage {
    let page_type = classify_url(&page.url);
    ClassifiedPage {
        title: sanitize_text(page.title.as_deref().unwrap_or_default()),
        markdown: sanitize_text(&page.markdown),
        url: page.url,
        status_code: page.status_code,
        page_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_homepage() {
        assert_eq!(classify_url("https://acme.example/"), PageType::Homepage);
        assert_eq!(classify_url("https://acme.example"), PageType::Homepage);
    }

    #[test]
    fn test_rule_table() {
        let cases = [
            ("https://acme.example/team", PageType::Team),
            ("https://acme.example/our-team/", PageType::Team),
            ("https://acme.example/people/jane-doe", PageType::Team),
            ("https://acme.example/portfolio", PageType::Portfolio),
            ("https://acme.example/current-investments", PageType::Portfolio),
            ("https://acme.example/investment-approach", PageType::Strategy),
            ("https://acme.example/what-we-do", PageType::Strategy),
            ("https://acme.example/about", PageType::About),
            ("https://acme.example/who-we-are", PageType::About),
            ("https://acme.example/insights/ai-in-buyouts", PageType::Blog),
            ("https://acme.example/perspectives", PageType::Blog),
            ("https://acme.example/press-releases", PageType::News),
            ("https://acme.example/media", PageType::News),
            ("https://acme.example/get-in-touch", PageType::Contact),
            ("https://acme.example/careers", PageType::Careers),
            ("https://acme.example/privacy-policy", PageType::Other),
        ];
        for (url, expected) in cases {
            assert_eq!(classify_url(url), expected, "{url}");
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify_url("https://acme.example/TEAM"), PageType::Team);
        assert_eq!(classify_url("https://acme.example/About-Us"), PageType::About);
    }

    #[test]
    fn test_query_and_fragment_stripped() {
        assert_eq!(
            classify_url("https://acme.example/portfolio?page=2#top"),
            PageType::Portfolio
        );
        assert_eq!(classify_url("https://acme.example/?utm=x"), PageType::Homepage);
    }

    #[test]
    fn test_first_match_wins() {
        // "/team" appears before "/about" in the rule table
        assert_eq!(
            classify_url("https://acme.example/about/team"),
            PageType::Team
        );
    }

    #[test]
    fn test_classification_is_idempotent() {
        for url in [
            "https://acme.example/team",
            "https://acme.example/blog/2024/outlook",
            "https://acme.example/x",
        ] {
            let first = classify_url(url);
            let second = classify_url(url);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_url_year() {
        assert_eq!(url_year("https://acme.example/blog/2025/outlook"), 2025);
        assert_eq!(url_year("https://acme.example/blog/2024/03/deal-note"), 2024);
        assert_eq!(url_year("https://acme.example/news/2019-annual-letter"), 2019);
        assert_eq!(url_year("https://acme.example/blog/evergreen-post"), 0);
        // Out of the accepted range
        assert_eq!(url_year("https://acme.example/blog/1999/history"), 0);
        assert_eq!(url_year("https://acme.example/blog/2031/future"), 0);
        // No delimiter after the year
        assert_eq!(url_year("https://acme.example/news/2024"), 0);
    }

    #[test]
    fn test_classify_page_sanitizes() {
        let crawled = CrawledPage::new("https://acme.example/about", "body\0text")
            .with_title("Ab\0out");
        let classified = classify_page(crawled);
        assert_eq!(classified.page_type, PageType::About);
        assert_eq!(classified.markdown, "bodytext");
        assert_eq!(classified.title, "About");
    }
}
