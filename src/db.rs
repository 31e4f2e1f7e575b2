use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use thiserror::Error;

use crate::article::Article;
use crate::config::Category;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt article row '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    link: String,
    source: String,
    category: String,
    published: String,
    fetched: String,
    last_seen: String,
    summary: Option<String>,
}

impl TryFrom<ArticleRow> for Article {
    type Error = StorageError;

    fn try_from(row: ArticleRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StorageError::Corrupt {
            id: row.id.clone(),
            reason,
        };
        let category = row
            .category
            .parse::<Category>()
            .map_err(|e| corrupt(e.to_string()))?;
        let published = parse_timestamp(&row.published).map_err(&corrupt)?;
        let fetched = parse_timestamp(&row.fetched).map_err(&corrupt)?;
        let last_seen = parse_timestamp(&row.last_seen).map_err(&corrupt)?;

        Ok(Article {
            id: row.id,
            title: row.title,
            link: row.link,
            source: row.source,
            category,
            published,
            fetched,
            last_seen,
            summary: row.summary,
        })
    }
}

/// Fixed-width UTC form, so lexical order in SQL matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

/// Filter and pagination for [`Database::list`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub category: Option<Category>,
    pub published_since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl ListQuery {
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Open (creating if needed) the SQLite file at `path` and its parent directory.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn initialize(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                published TEXT NOT NULL,
                fetched TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                summary TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_published
            ON articles(published DESC, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_category_published
            ON articles(category, published DESC, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Insert `article` unless its id is already stored.
    ///
    /// Returns `true` when a new row was written.
    pub async fn store(&self, article: &Article) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, link, source, category, published, fetched, last_seen, summary)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&article.id)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.source)
        .bind(article.category.slug())
        .bind(format_timestamp(article.published))
        .bind(format_timestamp(article.fetched))
        .bind(format_timestamp(article.last_seen))
        .bind(&article.summary)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record that an already stored article was seen again.
    pub async fn touch(&self, id: &str, seen_at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query("UPDATE articles SET last_seen = ? WHERE id = ?")
            .bind(format_timestamp(seen_at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Article>, StorageError> {
        let row = sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Article::try_from).transpose()
    }

    /// Articles newest first; equal timestamps are ordered by id.
    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Article>, StorageError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT * FROM articles
            WHERE (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR published >= ?2)
            ORDER BY published DESC, id ASC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(query.category.map(Category::slug))
        .bind(query.published_since.map(format_timestamp))
        .bind(query.limit.unwrap_or(-1))
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Article::try_from).collect()
    }

    pub async fn count(
        &self,
        category: Option<Category>,
        published_since: Option<DateTime<Utc>>,
    ) -> Result<i64, StorageError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM articles
            WHERE (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR published >= ?2)
            "#,
        )
        .bind(category.map(Category::slug))
        .bind(published_since.map(format_timestamp))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Articles from `source` published in `[from, until)`.
    pub async fn count_for_source_between(
        &self,
        source: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles WHERE source = ? AND published >= ? AND published < ?",
        )
        .bind(source)
        .bind(format_timestamp(from))
        .bind(format_timestamp(until))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Most recent fetch time across all articles.
    pub async fn latest_fetched(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let latest: (Option<String>,) = sqlx::query_as("SELECT MAX(fetched) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        latest
            .0
            .map(|raw| {
                parse_timestamp(&raw).map_err(|reason| StorageError::Corrupt {
                    id: "<max fetched>".to_string(),
                    reason,
                })
            })
            .transpose()
    }
}
