//! Plain-text and structural-signal extraction from fetched HTML.
//!
//! Finds the main content area with readability-style selectors, then walks
//! its text nodes while skipping page chrome (navigation, headers, footers,
//! scripts). The structural counters feed the non-article heuristic.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};

/// Paragraphs shorter than this are layout fragments, not prose.
const MIN_PARAGRAPH_CHARS: usize = 40;

/// Main-content candidates, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    r#"[role="main"]"#,
    "#mw-content-text",
    "#content",
    ".content",
    "body",
];

/// Elements whose text never counts as content.
const CHROME_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "template", "svg",
];

/// Class names that mark navigation chrome.
const CHROME_CLASSES: &[&str] = &["sidebar", "nav", "navbox", "menu", "breadcrumb", "cookie-banner"];

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").expect("p selector"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").expect("a selector"));
static FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").expect("form selector"));
static INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input, select, textarea").expect("input selector"));
static TABLE_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("tr selector"));
static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").expect("li selector"));
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("h1 selector"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").expect("title selector"));

/// Text and structure of one page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    /// First `<h1>`, falling back to `<title>`.
    pub title: Option<String>,
    /// Whitespace-normalized content text.
    pub text: String,
    /// Length of `text` in characters.
    pub char_len: usize,
    /// `<p>` elements with at least a sentence of prose.
    pub paragraph_count: usize,
    pub link_count: usize,
    /// Characters of `text` that sit inside links.
    pub link_text_chars: usize,
    /// Forms anywhere on the page (search boxes live in headers too).
    pub form_count: usize,
    pub input_count: usize,
    pub table_rows: usize,
    pub list_items: usize,
}

impl ExtractedText {
    /// Fraction of content text that is link text.
    pub fn link_density(&self) -> f64 {
        if self.char_len == 0 {
            return 0.0;
        }
        self.link_text_chars as f64 / self.char_len as f64
    }
}

/// Extract content text and structural counters from an HTML document.
pub fn extract_text(html: &str) -> ExtractedText {
    let doc = Html::parse_document(html);

    let Some(root) = CONTENT
        .iter()
        .find_map(|sel| doc.select(sel).next())
    else {
        return ExtractedText::default();
    };

    let mut pieces: Vec<&str> = Vec::new();
    let mut link_text_chars = 0;
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if node.ancestors().filter_map(ElementRef::wrap).any(is_chrome) {
            continue;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| el.value().name() == "a")
        {
            link_text_chars += trimmed.split_whitespace().map(|w| w.chars().count() + 1).sum::<usize>();
        }
        pieces.push(trimmed);
    }
    let text = pieces.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    let char_len = text.chars().count();

    let content_elements = |sel: &Selector| root.select(sel).filter(|el| !in_chrome(el)).count();

    let paragraph_count = root
        .select(&PARAGRAPH)
        .filter(|p| !in_chrome(p))
        .filter(|p| p.text().collect::<String>().trim().chars().count() >= MIN_PARAGRAPH_CHARS)
        .count();

    ExtractedText {
        title: first_text(&doc, &H1).or_else(|| first_text(&doc, &TITLE)),
        char_len,
        link_text_chars: link_text_chars.min(char_len),
        paragraph_count,
        link_count: content_elements(&ANCHOR),
        form_count: doc.select(&FORM).count(),
        input_count: doc.select(&INPUT).count(),
        table_rows: content_elements(&TABLE_ROW),
        list_items: content_elements(&LIST_ITEM),
        text,
    }
}

/// SHA-256 of the extracted text, hex-encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Whether an element sits inside page chrome.
fn in_chrome(el: &ElementRef<'_>) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(is_chrome)
}

fn is_chrome(el: ElementRef<'_>) -> bool {
    let value = el.value();
    CHROME_TAGS.contains(&value.name())
        || value.classes().any(|c| CHROME_CLASSES.contains(&c))
        || value.attr("role") == Some("navigation")
}
