use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use futures::StreamExt;
use reqwest::{Client, Response};
use thiserror::Error;
use tracing::{debug, info};

use crate::article::RawItem;
use crate::config::FeedDescriptor;

/// Only the newest entries of each feed are considered per run.
pub const MAX_ITEMS_PER_FEED: usize = 30;
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Why a single feed could not be fetched.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("response too large ({0} bytes)")]
    TooLarge(usize),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFailure::Timeout
        } else {
            FetchFailure::Network(err)
        }
    }
}

/// A failed fetch, tagged with the feed it belongs to.
#[derive(Debug, Error)]
#[error("feed '{feed}': {cause}")]
pub struct FetchError {
    pub feed: String,
    #[source]
    pub cause: FetchFailure,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("AIUnfiltered/1.0 (RSS Aggregator)")
            .build()?;

        Ok(Self { client })
    }

    /// Retrieve and parse one feed. Never panics on bad input; every
    /// failure comes back as a [`FetchError`] naming the feed.
    pub async fn fetch(&self, feed: &FeedDescriptor) -> Result<Vec<RawItem>, FetchError> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let items = self.fetch_items(&feed.url).await.map_err(|cause| FetchError {
            feed: feed.name.clone(),
            cause,
        })?;

        debug!("Parsed {} items from '{}'", items.len(), feed.name);
        Ok(items)
    }

    async fn fetch_items(&self, url: &str) -> Result<Vec<RawItem>, FetchFailure> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus(status.as_u16()));
        }
        let bytes = read_limited(response, MAX_FEED_SIZE).await?;
        Self::parse_items(&bytes)
    }

    /// Parse RSS, Atom or JSON Feed bytes into raw items.
    pub fn parse_items(bytes: &[u8]) -> Result<Vec<RawItem>, FetchFailure> {
        let parsed = parser::parse(bytes).map_err(|e| FetchFailure::Parse(e.to_string()))?;

        let items = parsed
            .entries
            .into_iter()
            .take(MAX_ITEMS_PER_FEED)
            .map(|entry| {
                let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

                let link = entry
                    .links
                    .first()
                    .map(|l| l.href.trim().to_string())
                    .filter(|href| !href.is_empty())
                    .or_else(|| guid.clone().filter(|id| is_http_url(id)));

                let published: Option<DateTime<Utc>> = entry.published.or(entry.updated);

                let summary = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body));

                RawItem {
                    title: entry.title.map(|t| t.content),
                    link,
                    published,
                    guid,
                    summary,
                }
            })
            .collect();

        Ok(items)
    }
}

/// Buffer a response body, giving up as soon as it passes `limit` bytes.
async fn read_limited(response: Response, limit: usize) -> Result<Vec<u8>, FetchFailure> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchFailure::TooLarge(len as usize));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchFailure::TooLarge(bytes.len() + chunk.len()));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn is_http_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
