use std::path::{Path, PathBuf};

use askama::Template;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::article::Article;
use crate::config::{Category, SiteConfig};
use crate::db::{Database, ListQuery, StorageError};

/// Number of articles published in `rss.xml`.
pub const RSS_ITEMS: usize = 50;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template error: {0}")]
    Template(#[from] askama::Error),
    #[error("store unreadable: {0}")]
    Storage(#[from] StorageError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A listing rendered as its own set of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    All,
    Category(Category),
}

impl View {
    pub fn all() -> impl Iterator<Item = View> {
        std::iter::once(View::All).chain(Category::ALL.into_iter().map(View::Category))
    }

    pub fn category(self) -> Option<Category> {
        match self {
            View::All => None,
            View::Category(c) => Some(c),
        }
    }

    fn page_prefix(self) -> String {
        match self {
            View::All => "page-".to_string(),
            View::Category(c) => format!("{}-page-", c.slug()),
        }
    }

    /// Stable file name of page `page` (1-based) of this view.
    pub fn filename(self, page: usize) -> String {
        match (self, page) {
            (View::All, 0 | 1) => "index.html".to_string(),
            (View::Category(c), 0 | 1) => format!("{}.html", c.slug()),
            _ => format!("{}{}.html", self.page_prefix(), page),
        }
    }

    /// Inverse of [`View::filename`] for pages after the first.
    fn parse_page(self, file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(&self.page_prefix())?
            .strip_suffix(".html")?
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 2)
    }

    fn title(self, site: &SiteConfig) -> String {
        match self {
            View::All => site.name.clone(),
            View::Category(c) => format!("{} - {}", title_case(&c.label()), site.name),
        }
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub struct NavLink {
    pub href: String,
    pub label: String,
    pub count: i64,
    pub active: bool,
}

pub struct ArticleView {
    pub title: String,
    pub link: String,
    pub date: String,
    pub source: String,
    pub category: &'static str,
    pub category_href: String,
    pub summary: String,
}

impl From<&Article> for ArticleView {
    fn from(article: &Article) -> Self {
        Self {
            title: article.title.clone(),
            link: article.link.clone(),
            date: article.published.format("%b %d").to_string(),
            source: article.source.clone(),
            category: article.category.slug(),
            category_href: View::Category(article.category).filename(1),
            summary: article.summary.clone().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "page.html")]
pub struct PageTemplate<'a> {
    pub site: &'a SiteConfig,
    pub title: String,
    pub nav: Vec<NavLink>,
    pub articles: Vec<ArticleView>,
    pub page: usize,
    pub pages: usize,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub updated: String,
}

pub struct RssItem {
    pub id: String,
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub source: String,
    pub category: &'static str,
    pub summary: String,
}

#[derive(Template)]
#[template(path = "rss.xml")]
pub struct RssTemplate<'a> {
    pub site: &'a SiteConfig,
    pub build_date: String,
    pub items: Vec<RssItem>,
}

/// What a render pass wrote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// HTML pages written, across all views
    pub pages: usize,
    /// Articles in the aggregate view
    pub articles: usize,
    /// Stale page files removed
    pub removed: usize,
}

pub struct Renderer<'a> {
    db: &'a Database,
    site: SiteConfig,
}

impl<'a> Renderer<'a> {
    pub fn new(db: &'a Database, site: SiteConfig) -> Self {
        Self { db, site }
    }

    /// Regenerate every managed file under `output_dir`.
    ///
    /// Output depends only on the store contents, so rendering an unchanged
    /// store twice produces identical files.
    pub async fn render(&self, output_dir: &Path) -> Result<RenderSummary, RenderError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(io_error(output_dir))?;

        let latest = self.db.latest_fetched().await?;
        let since = match (self.site.max_age_days, latest) {
            (Some(days), Some(latest)) => age_window_start(latest, days),
            _ => None,
        };
        let updated = latest
            .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());

        let mut counts = Vec::new();
        for view in View::all() {
            let count = self.db.count(view.category(), since).await?;
            counts.push((view, self.visible(count)));
        }

        let existing = list_file_names(output_dir).await?;
        let mut summary = RenderSummary::default();

        for &(view, total) in &counts {
            let pages = self
                .render_view(output_dir, view, total, since, &counts, &updated)
                .await?;
            summary.pages += pages;
            if view == View::All {
                summary.articles = total;
            }

            for name in &existing {
                if view.parse_page(name).is_some_and(|n| n > pages) {
                    let path = output_dir.join(name);
                    tokio::fs::remove_file(&path).await.map_err(io_error(&path))?;
                    debug!("Removed stale page {}", path.display());
                    summary.removed += 1;
                }
            }
        }

        self.render_rss(output_dir, since, latest).await?;

        let marker = output_dir.join(".nojekyll");
        tokio::fs::write(&marker, b"").await.map_err(io_error(&marker))?;

        info!(
            "Built {} pages ({} articles) in {}",
            summary.pages,
            summary.articles,
            output_dir.display()
        );
        Ok(summary)
    }

    fn visible(&self, count: i64) -> usize {
        let count = usize::try_from(count).unwrap_or(0);
        match self.site.max_articles {
            Some(max) => count.min(max),
            None => count,
        }
    }

    fn page_size(&self) -> usize {
        self.site.page_size.max(1)
    }

    fn nav(&self, active: View, counts: &[(View, usize)]) -> Vec<NavLink> {
        counts
            .iter()
            .map(|&(view, count)| NavLink {
                href: view.filename(1),
                label: match view {
                    View::All => "all".to_string(),
                    View::Category(c) => c.label(),
                },
                count: count as i64,
                active: view == active,
            })
            .collect()
    }

    /// Write every page of one view, returning how many pages it has.
    async fn render_view(
        &self,
        output_dir: &Path,
        view: View,
        total: usize,
        since: Option<DateTime<Utc>>,
        counts: &[(View, usize)],
        updated: &str,
    ) -> Result<usize, RenderError> {
        let page_size = self.page_size();
        let pages = total.div_ceil(page_size).max(1);

        for page in 1..=pages {
            let offset = (page - 1) * page_size;
            let limit = page_size.min(total.saturating_sub(offset));
            let articles = if limit == 0 {
                Vec::new()
            } else {
                self.db
                    .list(&ListQuery {
                        category: view.category(),
                        published_since: since,
                        limit: Some(limit as i64),
                        offset: offset as i64,
                    })
                    .await?
            };

            let template = PageTemplate {
                site: &self.site,
                title: view.title(&self.site),
                nav: self.nav(view, counts),
                articles: articles.iter().map(ArticleView::from).collect(),
                page,
                pages,
                prev: (page > 1).then(|| view.filename(page - 1)),
                next: (page < pages).then(|| view.filename(page + 1)),
                updated: updated.to_string(),
            };

            let path = output_dir.join(view.filename(page));
            tokio::fs::write(&path, template.render()?)
                .await
                .map_err(io_error(&path))?;
            debug!("Built {} ({} articles)", path.display(), articles.len());
        }

        Ok(pages)
    }

    async fn render_rss(
        &self,
        output_dir: &Path,
        since: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<(), RenderError> {
        let limit = self.visible(RSS_ITEMS as i64);
        let articles = self
            .db
            .list(&ListQuery {
                published_since: since,
                limit: Some(limit as i64),
                ..Default::default()
            })
            .await?;

        let template = RssTemplate {
            site: &self.site,
            build_date: latest.map(|ts| ts.to_rfc2822()).unwrap_or_default(),
            items: articles
                .iter()
                .map(|a| RssItem {
                    id: a.id.clone(),
                    title: a.title.clone(),
                    link: a.link.clone(),
                    pub_date: a.published.to_rfc2822(),
                    source: a.source.clone(),
                    category: a.category.slug(),
                    summary: a.summary.clone().unwrap_or_default(),
                })
                .collect(),
        };

        let path = output_dir.join("rss.xml");
        tokio::fs::write(&path, template.render()?)
            .await
            .map_err(io_error(&path))?;
        Ok(())
    }
}

/// Oldest publish time kept by a `days` window ending at `latest`. A window
/// reaching past the representable calendar keeps everything.
fn age_window_start(latest: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|window| latest.checked_sub_signed(window))
}

async fn list_file_names(dir: &Path) -> Result<Vec<String>, RenderError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error(dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
