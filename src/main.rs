use std::path::{Path, PathBuf};
use std::time::Duration;

use ai_unfiltered::{Config, ConfigError, Database, Fetcher, Pipeline, Renderer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ai-unfiltered", about = "Fetch AI news feeds and build a static site")]
struct Cli {
    /// Feed list and site settings
    #[arg(long, short, global = true, default_value = "feeds.toml", env = "AI_UNFILTERED_CONFIG")]
    config: PathBuf,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true, env = "AI_UNFILTERED_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch all configured feeds and store new articles
    Fetch {
        /// Feeds fetched in parallel
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Render the static site from stored articles
    Render {
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Articles per page
        #[arg(long)]
        per_page: Option<usize>,
        /// Maximum articles rendered per view
        #[arg(long)]
        max_articles: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ai_unfiltered=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Fetch { concurrency } => {
            let config = Config::load(&cli.config)?;
            let feeds = config.feed_descriptors()?;
            info!("Loaded {} feeds from configuration", feeds.len());

            let db = open_database(cli.database.as_ref().unwrap_or(&config.database)).await?;
            let fetcher = Fetcher::new(Duration::from_secs(config.timeout_secs))
                .context("failed to create HTTP client")?;

            let report = Pipeline::new(&db, &fetcher)
                .with_concurrency(concurrency.unwrap_or(config.concurrency))
                .run(&feeds)
                .await
                .context("ingestion run aborted")?;
            db.close().await;

            info!(
                "Done! Added {} new articles total ({} feeds failed)",
                report.total_new(),
                report.failed()
            );
        }
        Command::Render {
            output,
            per_page,
            max_articles,
        } => {
            let mut config = match Config::load(&cli.config) {
                Ok(config) => config,
                Err(ConfigError::Read { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    info!("No config at {}, using defaults", cli.config.display());
                    Config::default()
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(per_page) = per_page {
                config.site.page_size = per_page;
            }
            if max_articles.is_some() {
                config.site.max_articles = max_articles;
            }
            let output = output.unwrap_or_else(|| config.output_dir.clone());

            let db = open_database(cli.database.as_ref().unwrap_or(&config.database)).await?;
            let summary = Renderer::new(&db, config.site)
                .render(&output)
                .await
                .with_context(|| format!("render into '{}' failed", output.display()))?;
            db.close().await;

            info!(
                "Done! Site built in {} ({} pages)",
                output.display(),
                summary.pages
            );
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> anyhow::Result<Database> {
    let db = Database::open(path)
        .await
        .with_context(|| format!("failed to open database '{}'", path.display()))?;
    db.initialize().await?;
    info!("Database initialized at {}", path.display());
    Ok(db)
}
