//! Page types - crawled pages, classified pages, and routed document sets.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Functional category of a firm website page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Homepage,
    About,
    Team,
    Portfolio,
    Strategy,
    News,
    Blog,
    Contact,
    Careers,
    Other,
}

impl PageType {
    /// Stable lowercase name, matching the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::About => "about",
            PageType::Team => "team",
            PageType::Portfolio => "portfolio",
            PageType::Strategy => "strategy",
            PageType::News => "news",
            PageType::Blog => "blog",
            PageType::Contact => "contact",
            PageType::Careers => "careers",
            PageType::Other => "other",
        }
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "homepage" => Ok(PageType::Homepage),
            "about" => Ok(PageType::About),
            "team" => Ok(PageType::Team),
            "portfolio" => Ok(PageType::Portfolio),
            "strategy" => Ok(PageType::Strategy),
            "news" => Ok(PageType::News),
            "blog" => Ok(PageType::Blog),
            "contact" => Ok(PageType::Contact),
            "careers" => Ok(PageType::Careers),
            "other" => Ok(PageType::Other),
            other => Err(format!("unknown page type: {other}")),
        }
    }
}

/// A page as returned by the crawler/scraper chain, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    /// URL that was fetched
    pub url: String,

    /// Page title if available
    pub title: Option<String>,

    /// Content converted to markdown
    pub markdown: String,

    /// HTTP status code
    pub status_code: u16,
}

impl CrawledPage {
    /// Create a new crawled page.
    pub fn new(url: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            markdown: markdown.into(),
            status_code: 200,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }
}

/// A sanitized, categorized page. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedPage {
    pub url: String,
    pub title: String,
    pub markdown: String,
    pub status_code: u16,
    pub page_type: PageType,
}

impl ClassifiedPage {
    /// Whether the page carries any non-whitespace text.
    pub fn has_content(&self) -> bool {
        !self.markdown.trim().is_empty()
    }
}

/// Strip NUL bytes from already-valid UTF-8 text. Idempotent.
pub fn sanitize_text(input: &str) -> String {
    input.replace('\0', "")
}

/// Decode raw bytes to text, replacing invalid UTF-8 and stripping NULs.
pub fn sanitize_bytes(input: &[u8]) -> String {
    sanitize_text(&String::from_utf8_lossy(input))
}

/// Routed document set: pages grouped by type, in classification order.
///
/// Blog and news groups are ordered newest-first using the URL-embedded year
/// when one is recoverable; undated entries keep their original order after
/// the dated ones.
#[derive(Debug, Clone, Default)]
pub struct FirmDocs {
    pages: IndexMap<PageType, Vec<ClassifiedPage>>,
}

impl FirmDocs {
    /// Group classified pages by type and order the dated groups.
    pub fn build(pages: Vec<ClassifiedPage>) -> Self {
        let mut grouped: IndexMap<PageType, Vec<ClassifiedPage>> = IndexMap::new();
        for page in pages {
            grouped.entry(page.page_type).or_default().push(page);
        }

        for page_type in [PageType::Blog, PageType::News] {
            if let Some(group) = grouped.get_mut(&page_type) {
                order_newest_first(group);
            }
        }

        Self { pages: grouped }
    }

    /// Pages of a given type, in routed order.
    pub fn get(&self, page_type: PageType) -> &[ClassifiedPage] {
        self.pages
            .get(&page_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any page has non-whitespace content.
    pub fn has_content(&self) -> bool {
        self.pages
            .values()
            .flatten()
            .any(ClassifiedPage::has_content)
    }

    /// Total page count across all types.
    pub fn page_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    /// Iterate all pages in grouped order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedPage> {
        self.pages.values().flatten()
    }
}

/// Stable sort: dated entries first (year descending), undated after, both
/// preserving original relative order.
fn order_newest_first(pages: &mut [ClassifiedPage]) {
    pages.sort_by_key(|p| {
        let year = crate::classify::url_year(&p.url);
        if year == 0 {
            (1, 0)
        } else {
            (0, -(year as i64))
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, page_type: PageType) -> ClassifiedPage {
        ClassifiedPage {
            url: url.to_string(),
            title: "t".to_string(),
            markdown: "content".to_string(),
            status_code: 200,
            page_type,
        }
    }

    #[test]
    fn test_sanitize_idempotent() {
        let dirty = "abc\0def\0";
        let clean = sanitize_text(dirty);
        assert_eq!(clean, "abcdef");
        assert_eq!(sanitize_text(&clean), clean);
    }

    #[test]
    fn test_sanitize_identity_on_clean_input() {
        let clean = "already fine ✓";
        assert_eq!(sanitize_text(clean), clean);
    }

    #[test]
    fn test_sanitize_bytes_replaces_invalid_utf8() {
        let bytes = b"ok \xFF\xFE bytes\x00";
        let text = sanitize_bytes(bytes);
        assert!(!text.contains('\0'));
        assert!(text.starts_with("ok "));
        assert!(text.ends_with(" bytes"));
    }

    #[test]
    fn test_blog_pages_sorted_newest_first() {
        let docs = FirmDocs::build(vec![
            page("https://x.com/blog/2021/old-post", PageType::Blog),
            page("https://x.com/blog/undated-post", PageType::Blog),
            page("https://x.com/blog/2025/outlook", PageType::Blog),
            page("https://x.com/blog/2023/mid-post", PageType::Blog),
        ]);

        let urls: Vec<_> = docs.get(PageType::Blog).iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://x.com/blog/2025/outlook",
                "https://x.com/blog/2023/mid-post",
                "https://x.com/blog/2021/old-post",
                "https://x.com/blog/undated-post",
            ]
        );
    }

    #[test]
    fn test_whitespace_only_page_has_no_content() {
        let mut blank = page("https://x.com/about", PageType::About);
        blank.markdown = "  \n\t ".to_string();
        let docs = FirmDocs::build(vec![blank]);
        assert!(!docs.has_content());
        assert_eq!(docs.page_count(), 1);
    }
}
