//! AI Unfiltered - a static AI news site built from RSS feeds
//!
//! The crate has two halves: an ingestion run that fetches the configured
//! feeds and stores unseen articles in SQLite, and a render pass that turns
//! the store into a directory of static HTML pages plus an RSS feed.

pub mod article;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod pipeline;
pub mod render;

pub use article::{Article, RawItem};
pub use config::{Category, Config, ConfigError, FeedDescriptor};
pub use db::{Database, ListQuery, StorageError};
pub use fetcher::{FetchError, FetchFailure, Fetcher};
pub use pipeline::{FeedReport, IngestionReport, Pipeline};
pub use render::{RenderError, RenderSummary, Renderer, View};
