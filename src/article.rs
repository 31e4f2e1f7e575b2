use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::{Category, FeedDescriptor};

/// Summaries longer than this many characters are cut at a word boundary.
pub const SUMMARY_MAX_CHARS: usize = 300;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One entry as parsed out of a feed, before categorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub guid: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub link: String,
    pub source: String,
    pub category: Category,
    pub published: DateTime<Utc>,
    pub fetched: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Article {
    /// Map a raw feed item onto an article owned by `feed`.
    ///
    /// Returns `None` when the item has no link. Feed parsers invent ids for
    /// entries that carry none, so an id alone never identifies an article.
    pub fn from_raw(raw: RawItem, feed: &FeedDescriptor, fetched: DateTime<Utc>) -> Option<Self> {
        let link = raw
            .link
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())?
            .to_string();
        let id = fingerprint(&format!("link:{}", normalize_link(&link)));

        let title = raw
            .title
            .map(|t| collapse_whitespace(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        Some(Self {
            id,
            title,
            link,
            source: feed.name.clone(),
            category: feed.category,
            published: raw.published.unwrap_or(fetched),
            fetched,
            last_seen: fetched,
            summary: raw.summary.as_deref().and_then(clean_summary),
        })
    }
}

/// Stable dedup key: first 16 hex chars of the SHA-256 of `key`.
pub fn fingerprint(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    let hex = format!("{:x}", hash);
    hex[..16].to_string()
}

/// Canonical form of an article link used for identity.
///
/// Scheme and host are lowercased and default ports dropped by the URL
/// parser; fragments, tracking parameters and trailing slashes are removed.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return trimmed.to_string(),
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn collapse_whitespace(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

/// Strip markup from a feed summary and bound its length.
///
/// Returns `None` when nothing readable is left.
pub fn clean_summary(summary: &str) -> Option<String> {
    let stripped = TAG_RE.replace_all(summary, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    let clean = collapse_whitespace(&decoded);
    if clean.is_empty() {
        return None;
    }

    if clean.chars().count() <= SUMMARY_MAX_CHARS {
        return Some(clean);
    }

    let cut: String = clean.chars().take(SUMMARY_MAX_CHARS).collect();
    let cut = match cut.rsplit_once(' ') {
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => cut,
    };
    Some(format!("{}...", cut.trim_end()))
}
