//! Deterministic non-article classification.
//!
//! Catalog, search-result and metadata pages are rejected before any
//! scoring cost is paid. URL patterns are checked first (no fetch needed),
//! then content type, then DOM shape.

use refscout_shared::{PipelineConfig, RefScoutError, Result};
use regex::Regex;

use crate::extract::ExtractedText;

/// Content types the extractor understands.
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Link-text share above which a page is a link list.
const MAX_LINK_DENSITY: f64 = 0.5;
/// Table rows that make a prose-free page a data table.
const MIN_TABLE_ROWS: usize = 20;
/// List items that make a prose-free page a catalog listing.
const MIN_LIST_ITEMS: usize = 25;
/// Form inputs that make a prose-free page a search form.
const MIN_FORM_INPUTS: usize = 3;

/// Classifier outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    Article,
    /// Not an article; carries the reason recorded on the denial.
    NonArticle(String),
}

impl PageVerdict {
    pub fn is_article(&self) -> bool {
        matches!(self, Self::Article)
    }
}

/// URL-pattern and DOM-shape heuristic for catalog/search/metadata pages.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    url_patterns: Vec<Regex>,
    min_paragraphs: usize,
}

impl PageClassifier {
    /// Compile the URL patterns. An invalid pattern is a config error.
    pub fn new(patterns: &[String], min_paragraphs: usize) -> Result<Self> {
        let url_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map_err(|e| RefScoutError::config(format!("invalid non-article pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            url_patterns,
            min_paragraphs,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(&config.non_article_url_patterns, config.min_paragraphs)
    }

    /// Check the URL alone.
    pub fn classify_url(&self, url: &str) -> PageVerdict {
        match self.url_patterns.iter().find(|re| re.is_match(url)) {
            Some(re) => PageVerdict::NonArticle(format!("url matches {}", re.as_str())),
            None => PageVerdict::Article,
        }
    }

    /// Check the response content type. A missing header is given the benefit of the doubt.
    pub fn classify_content_type(&self, content_type: Option<&str>) -> PageVerdict {
        let Some(ct) = content_type else {
            return PageVerdict::Article;
        };
        let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if HTML_CONTENT_TYPES.contains(&mime.as_str()) {
            PageVerdict::Article
        } else {
            PageVerdict::NonArticle(format!("content type {mime}"))
        }
    }

    /// Check the page structure. Pages with enough prose paragraphs always pass.
    pub fn classify_shape(&self, page: &ExtractedText) -> PageVerdict {
        if page.paragraph_count >= self.min_paragraphs {
            return PageVerdict::Article;
        }
        let reason = if page.link_density() > MAX_LINK_DENSITY {
            format!("link list (density {:.2})", page.link_density())
        } else if page.form_count > 0 && page.input_count >= MIN_FORM_INPUTS {
            format!("search form ({} inputs)", page.input_count)
        } else if page.table_rows >= MIN_TABLE_ROWS {
            format!("data table ({} rows)", page.table_rows)
        } else if page.list_items >= MIN_LIST_ITEMS {
            format!("catalog listing ({} items)", page.list_items)
        } else {
            return PageVerdict::Article;
        };
        PageVerdict::NonArticle(reason)
    }
}
