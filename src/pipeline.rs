use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::article::{Article, RawItem};
use crate::config::{Category, FeedDescriptor};
use crate::db::{Database, StorageError};
use crate::fetcher::{FetchError, Fetcher};

/// Outcome of one feed within an ingestion run.
#[derive(Debug)]
pub struct FeedReport {
    pub feed: String,
    pub category: Category,
    /// Items returned by the feed
    pub seen: usize,
    /// Items stored for the first time
    pub new: usize,
    /// Items already in the store
    pub duplicate: usize,
    /// New items dropped because the feed hit its daily quota, or had no link
    pub skipped: usize,
    pub error: Option<FetchError>,
}

impl FeedReport {
    fn new(feed: &FeedDescriptor) -> Self {
        Self {
            feed: feed.name.clone(),
            category: feed.category,
            seen: 0,
            new: 0,
            duplicate: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Per-feed summary of an ingestion run, in descriptor order.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub feeds: Vec<FeedReport>,
}

impl IngestionReport {
    pub fn total_seen(&self) -> usize {
        self.feeds.iter().map(|f| f.seen).sum()
    }

    pub fn total_new(&self) -> usize {
        self.feeds.iter().map(|f| f.new).sum()
    }

    pub fn total_duplicate(&self) -> usize {
        self.feeds.iter().map(|f| f.duplicate).sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &FetchError> {
        self.feeds.iter().filter_map(|f| f.error.as_ref())
    }

    pub fn failed(&self) -> usize {
        self.errors().count()
    }
}

pub struct Pipeline<'a> {
    db: &'a Database,
    fetcher: &'a Fetcher,
    concurrency: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(db: &'a Database, fetcher: &'a Fetcher) -> Self {
        Self {
            db,
            fetcher,
            concurrency: 4,
        }
    }

    /// Number of feeds fetched in parallel (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch every feed and persist unseen articles.
    ///
    /// Fetch failures are isolated into the report; storage failures abort
    /// the run.
    pub async fn run(&self, feeds: &[FeedDescriptor]) -> Result<IngestionReport, StorageError> {
        info!("Refreshing {} feeds", feeds.len());

        // Fetches overlap; `buffered` keeps results in descriptor order so
        // persistence stays sequential and deterministic.
        let fetched: Vec<(&FeedDescriptor, Result<Vec<RawItem>, FetchError>, DateTime<Utc>)> =
            stream::iter(feeds)
                .map(|feed| async move {
                    let result = self.fetcher.fetch(feed).await;
                    (feed, result, Utc::now())
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut report = IngestionReport::default();
        for (feed, result, fetched_at) in fetched {
            let feed_report = match result {
                Ok(items) => self.ingest_feed(feed, items, fetched_at).await?,
                Err(e) => {
                    warn!("Failed to refresh feed '{}': {}", feed.name, e.cause);
                    FeedReport {
                        error: Some(e),
                        ..FeedReport::new(feed)
                    }
                }
            };
            report.feeds.push(feed_report);
        }

        info!(
            "Feed refresh complete: {} new, {} duplicate, {} of {} feeds failed",
            report.total_new(),
            report.total_duplicate(),
            report.failed(),
            report.feeds.len()
        );
        Ok(report)
    }

    /// Persist the items of one successfully fetched feed.
    pub async fn ingest_feed(
        &self,
        feed: &FeedDescriptor,
        items: Vec<RawItem>,
        fetched_at: DateTime<Utc>,
    ) -> Result<FeedReport, StorageError> {
        let mut report = FeedReport::new(feed);
        report.seen = items.len();

        let day_start = start_of_day(fetched_at);
        let already_today = self
            .db
            .count_for_source_between(&feed.name, day_start, day_start + Duration::days(1))
            .await?;
        let mut remaining = (i64::from(feed.max_per_day) - already_today).max(0);

        for raw in items {
            let Some(article) = Article::from_raw(raw, feed, fetched_at) else {
                warn!("Skipping entry with no link in feed '{}'", feed.name);
                report.skipped += 1;
                continue;
            };

            if self.db.exists(&article.id).await? {
                self.db.touch(&article.id, fetched_at).await?;
                report.duplicate += 1;
                continue;
            }

            if remaining == 0 {
                report.skipped += 1;
                continue;
            }

            if self.db.store(&article).await? {
                report.new += 1;
                remaining -= 1;
            } else {
                report.duplicate += 1;
            }
        }

        info!(
            "Added {} new articles for feed '{}' ({} seen, {} duplicate, {} skipped)",
            report.new, feed.name, report.seen, report.duplicate, report.skipped
        );
        Ok(report)
    }
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}
