//! Citation list extraction from Wikipedia-style article HTML.
//!
//! Numbered references come from `ol.references > li`: every external link
//! inside the N-th list item is reported with ordinal N. Pages without a
//! reference list fall back to `a.external` links numbered in document
//! order. Same-site article links (`/wiki/Title`) are optionally reported
//! with ordinal 0.

use std::collections::HashSet;
use std::sync::LazyLock;

use refscout_shared::DiscoveredLink;
use regex::Regex;
use scraper::{Html, Selector};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Links listed by one origin document.
#[derive(Debug, Clone)]
pub struct ParsedCitations {
    /// Document `<title>`, if present.
    pub title: Option<String>,
    /// Citation links first (ordinal ≥ 1), then internal links (ordinal 0).
    pub links: Vec<DiscoveredLink>,
}

impl ParsedCitations {
    /// Number of numbered citation links.
    pub fn citation_count(&self) -> usize {
        self.links.iter().filter(|l| l.ordinal > 0).count()
    }
}

// ---------------------------------------------------------------------------
// Selectors and patterns (compiled once)
// ---------------------------------------------------------------------------

static REFERENCE_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ol.references > li").expect("reference selector"));

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));

static EXTERNAL_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.external[href]").expect("external selector"));

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));

/// Article paths only: no namespace prefix (`File:`, `Help:`), no query.
static ARTICLE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/wiki/[^:#?]+)(?:#.*)?$").expect("article path regex")
});

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Extract citation (and optionally internal) links from article HTML.
pub(crate) fn parse_citations(html: &str, include_internal: bool) -> ParsedCitations {
    let document = Html::parse_document(html);
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str, ordinal: u32, links: &mut Vec<DiscoveredLink>| {
        if seen.insert((href.to_string(), ordinal)) {
            links.push(DiscoveredLink {
                url: href.to_string(),
                ordinal,
            });
        }
    };

    let references: Vec<_> = document.select(&REFERENCE_ITEM).collect();
    if references.is_empty() {
        for (i, anchor) in document.select(&EXTERNAL_ANCHOR).enumerate() {
            if let Some(href) = anchor.value().attr("href").map(str::trim) {
                if is_external(href) {
                    push(href, i as u32 + 1, &mut links);
                }
            }
        }
    } else {
        for (i, item) in references.iter().enumerate() {
            for anchor in item.select(&ANCHOR) {
                if let Some(href) = anchor.value().attr("href").map(str::trim) {
                    if is_external(href) {
                        push(href, i as u32 + 1, &mut links);
                    }
                }
            }
        }
    }

    if include_internal {
        for anchor in document.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if let Some(caps) = ARTICLE_PATH_RE.captures(href.trim()) {
                push(&caps[1], 0, &mut links);
            }
        }
    }

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    ParsedCitations { title, links }
}

/// Absolute or protocol-relative http(s) link.
fn is_external(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("../../../fixtures/origin/citations.html").expect("read fixture")
    }

    #[test]
    fn parse_reference_list_fixture() {
        let parsed = parse_citations(&fixture(), false);

        assert_eq!(parsed.title.as_deref(), Some("Tide - Example Encyclopedia"));
        assert_eq!(parsed.links.len(), 3);
        assert_eq!(parsed.citation_count(), 3);

        assert_eq!(parsed.links[0].url, "https://www.noaa.gov/education/tides");
        assert_eq!(parsed.links[0].ordinal, 1);
        // Archive copy shares the citation number.
        assert_eq!(parsed.links[1].ordinal, 1);
        assert!(parsed.links[1].url.starts_with("https://web.archive.org/"));
        assert_eq!(parsed.links[2].url, "//oceanservice.noaa.gov/facts/tides.html?utm_source=wiki");
        assert_eq!(parsed.links[2].ordinal, 3);
    }

    #[test]
    fn navbox_links_ignored_when_references_exist() {
        let parsed = parse_citations(&fixture(), false);
        assert!(parsed.links.iter().all(|l| !l.url.contains("portal")));
    }

    #[test]
    fn internal_links_skip_namespaces_and_duplicates() {
        let parsed = parse_citations(&fixture(), true);
        let internal: Vec<_> = parsed
            .links
            .iter()
            .filter(|l| l.ordinal == 0)
            .map(|l| l.url.as_str())
            .collect();
        assert_eq!(internal, vec!["/wiki/Moon", "/wiki/Sun", "/wiki/Tidal_force"]);
    }

    #[test]
    fn fallback_to_external_class_without_reference_list() {
        let html = r#"<html><body>
            <a class="external" href="https://a.example.org/x">A</a>
            <a href="https://not-marked.example.org/">plain</a>
            <a class="external" href="https://b.example.org/y">B</a>
        </body></html>"#;
        let parsed = parse_citations(html, false);
        assert_eq!(parsed.links.len(), 2);
        assert_eq!(parsed.links[0].ordinal, 1);
        assert_eq!(parsed.links[1].ordinal, 2);
        assert_eq!(parsed.links[1].url, "https://b.example.org/y");
    }

    #[test]
    fn empty_document_yields_no_links() {
        let parsed = parse_citations("", true);
        assert!(parsed.links.is_empty());
        assert!(parsed.title.is_none());
    }
}
