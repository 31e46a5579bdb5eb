//! URL normalization used as the Candidate Store's dedup key.
//!
//! Two hrefs that point at the same resource must normalize to the same
//! string regardless of which origin document they were found on.

use url::Url;

use crate::error::{RefScoutError, Result};

/// Query parameters that only carry click tracking.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref_src"];

/// A normalized, absolute http(s) URL with its derived host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    /// Canonical string form.
    pub url: String,
    /// Lowercase host with any leading `www.` removed.
    pub host: String,
}

/// Normalize a raw href, resolving it against `base` when it is relative.
///
/// Rules: lowercase scheme and host, drop default ports, strip `www.`,
/// resolve relative paths, drop tracking parameters, drop the trailing
/// slash of non-root paths, and strip the fragment unless it addresses
/// content (`#!…`, `#/…` client routes or `#page=N`).
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<NormalizedUrl> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RefScoutError::parse("empty URL"));
    }

    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(trimmed)
                .map_err(|e| RefScoutError::parse(format!("{trimmed}: {e}")))?,
            None => {
                return Err(RefScoutError::parse(format!(
                    "{trimmed}: relative URL without a base"
                )));
            }
        },
        Err(e) => return Err(RefScoutError::parse(format!("{trimmed}: {e}"))),
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(RefScoutError::parse(format!(
            "{trimmed}: unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| RefScoutError::parse(format!("{trimmed}: URL has no host")))?
        .to_ascii_lowercase();
    let host = strip_www(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| RefScoutError::parse(format!("{trimmed}: {e}")))?;

    if url.port().is_some() && url.port() == default_port(url.scheme()) {
        let _ = url.set_port(None);
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else if url.query_pairs().count() != kept.len() {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    if let Some(fragment) = url.fragment() {
        if !is_load_bearing_fragment(fragment) {
            url.set_fragment(None);
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(NormalizedUrl {
        url: url.to_string(),
        host,
    })
}

/// Diversity class of a candidate: links that stay on the origin document's
/// own site share one class, every external host is its own class.
pub fn class_key(host: &str, origin_host: &str) -> String {
    if host == origin_host {
        format!("origin:{origin_host}")
    } else {
        host.to_string()
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn is_load_bearing_fragment(fragment: &str) -> bool {
    fragment.starts_with('!') || fragment.starts_with('/') || fragment.starts_with("page=")
}
