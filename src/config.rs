use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Errors that make a configuration unusable for a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("feed entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("no valid feed entries in configuration")]
    NoValidFeeds,
}

/// Fixed set of article categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    ChineseAi,
    Research,
    Llm,
    Industry,
    Company,
    Community,
}

impl Category {
    /// Canonical order, used for navigation and rendering.
    pub const ALL: [Category; 6] = [
        Category::ChineseAi,
        Category::Research,
        Category::Llm,
        Category::Industry,
        Category::Company,
        Category::Community,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Category::ChineseAi => "chinese-ai",
            Category::Research => "research",
            Category::Llm => "llm",
            Category::Industry => "industry",
            Category::Company => "company",
            Category::Community => "community",
        }
    }

    /// Human label for navigation ("chinese ai").
    pub fn label(self) -> String {
        self.slug().replace('-', " ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == s.trim())
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// A validated feed entry, ready for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub name: String,
    pub url: String,
    pub category: Category,
    /// Maximum new articles per UTC day from this feed
    pub max_per_day: u32,
}

impl FeedDescriptor {
    pub fn new(name: &str, url: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            category,
            max_per_day: default_max_per_day(),
        }
    }
}

fn default_max_per_day() -> u32 {
    30
}

fn default_database() -> PathBuf {
    PathBuf::from("data/articles.db")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("docs")
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_site_name() -> String {
    "AI Unfiltered".to_string()
}

fn default_site_description() -> String {
    "Raw AI news. No fluff. Updated every 4 hours.".to_string()
}

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Number of feeds fetched in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            site: SiteConfig::default(),
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default = "default_site_description")]
    pub description: String,
    #[serde(default)]
    pub base_url: String,
    /// Articles per rendered page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Cap on articles rendered per view
    pub max_articles: Option<usize>,
    /// Only render articles published within this many days of the latest fetch
    pub max_age_days: Option<u32>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: default_site_name(),
            description: default_site_description(),
            base_url: String::new(),
            page_size: default_page_size(),
            max_articles: None,
            max_age_days: None,
        }
    }
}

/// A feed entry as written in the config file. Kept as a raw TOML value so
/// that one bad entry, including a wrongly typed field, can be rejected
/// without failing the whole file.
#[derive(Debug, Deserialize, Clone)]
#[serde(transparent)]
pub struct FeedEntry(toml::Value);

impl FeedEntry {
    fn validate(&self, index: usize) -> Result<FeedDescriptor, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEntry { index, reason };

        let table = self
            .0
            .as_table()
            .ok_or_else(|| invalid(format!("expected a table, found {}", self.0.type_str())))?;

        let name = match text_field(table, "name").map_err(&invalid)? {
            Some(name) if !name.is_empty() => name,
            _ => return Err(invalid("missing name".to_string())),
        };
        let field = |key: &str| {
            text_field(table, key).map_err(|reason| invalid(format!("feed '{}': {}", name, reason)))
        };

        let url = match field("url")? {
            Some(url) if !url.is_empty() => url,
            _ => return Err(invalid(format!("feed '{}' is missing url", name))),
        };
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(invalid(format!(
                    "feed '{}' has unsupported url scheme '{}'",
                    name,
                    parsed.scheme()
                )))
            }
            Err(e) => return Err(invalid(format!("feed '{}' has invalid url: {}", name, e))),
        }
        let category = match field("category")? {
            Some(raw) => raw
                .parse::<Category>()
                .map_err(|e| invalid(format!("feed '{}': {}", name, e)))?,
            None => return Err(invalid(format!("feed '{}' is missing category", name))),
        };
        let max_per_day = match table.get("max_per_day") {
            None => default_max_per_day(),
            Some(value) => value
                .as_integer()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    invalid(format!(
                        "feed '{}': max_per_day must be a non-negative integer, found {}",
                        name, value
                    ))
                })?,
        };

        Ok(FeedDescriptor {
            name: name.to_string(),
            url: url.to_string(),
            category,
            max_per_day,
        })
    }
}

/// A trimmed string field, `None` when absent, an error when not a string.
fn text_field<'t>(table: &'t toml::Table, key: &str) -> Result<Option<&'t str>, String> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(format!("{} must be a string, found {}", key, other.type_str())),
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate feed entries, logging and dropping the malformed ones.
    ///
    /// Fails only when no entry survives validation.
    pub fn feed_descriptors(&self) -> Result<Vec<FeedDescriptor>, ConfigError> {
        let (valid, rejected) = self.partition_feeds();
        for err in &rejected {
            warn!("Skipping feed entry: {}", err);
        }
        if valid.is_empty() {
            return Err(ConfigError::NoValidFeeds);
        }
        Ok(valid)
    }

    /// Split entries into valid descriptors and per-entry errors.
    pub fn partition_feeds(&self) -> (Vec<FeedDescriptor>, Vec<ConfigError>) {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for (index, entry) in self.feeds.iter().enumerate() {
            match entry.validate(index + 1) {
                Ok(descriptor) => valid.push(descriptor),
                Err(e) => rejected.push(e),
            }
        }
        (valid, rejected)
    }
}
