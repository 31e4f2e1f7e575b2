//! Integration tests for the ai-unfiltered pipeline
//!
//! These tests drive the full workflow from configuration loading through
//! fetching (against a local mock HTTP server), storage, and rendering.

mod common {
    use ai_unfiltered::{Database, Fetcher};
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Create a temporary directory for test databases and output
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    pub async fn create_db(temp_dir: &TempDir) -> Database {
        let db = Database::open(&temp_dir.path().join("data").join("articles.db"))
            .await
            .unwrap();
        db.initialize().await.unwrap();
        db
    }

    pub fn create_fetcher() -> Fetcher {
        Fetcher::new(Duration::from_secs(5)).unwrap()
    }

    pub fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link, pub_date)| {
                format!(
                    "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>",
                    title, link, pub_date
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0"><channel><title>Test</title>{}</channel></rss>"#,
            items
        )
    }

    pub async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
}

mod config_integration_tests {
    use ai_unfiltered::Config;

    #[test]
    fn test_load_actual_feeds_config() {
        let config = Config::load("feeds.toml");
        assert!(config.is_ok(), "Failed to load feeds.toml: {:?}", config.err());

        let config = config.unwrap();
        let (valid, rejected) = config.partition_feeds();
        assert!(!valid.is_empty(), "feeds.toml should have at least one feed");
        assert!(rejected.is_empty(), "feeds.toml has invalid entries: {:?}", rejected);
    }
}

mod fetcher_integration_tests {
    use super::common::*;
    use ai_unfiltered::fetcher::MAX_FEED_SIZE;
    use ai_unfiltered::{Category, FeedDescriptor, FetchFailure, Fetcher};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_parses_items() {
        let server = MockServer::start().await;
        let body = rss(&[
            ("One", "https://a.example.com/1", "Mon, 01 Jan 2024 00:00:00 GMT"),
            ("Two", "https://a.example.com/2", "Tue, 02 Jan 2024 00:00:00 GMT"),
        ]);
        mount_feed(&server, "/feed", body).await;

        let feed = FeedDescriptor::new(
            "Mock",
            &format!("{}/feed", server.uri()),
            Category::Llm,
        );
        let items = create_fetcher().fetch(&feed).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title.as_deref(), Some("Two"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let feed = FeedDescriptor::new("Gone", &format!("{}/gone", server.uri()), Category::Llm);
        let err = create_fetcher().fetch(&feed).await.unwrap_err();

        assert_eq!(err.feed, "Gone");
        assert!(matches!(err.cause, FetchFailure::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b' '; MAX_FEED_SIZE + 1]))
            .mount(&server)
            .await;

        let feed = FeedDescriptor::new("Huge", &format!("{}/huge", server.uri()), Category::Llm);
        let err = create_fetcher().fetch(&feed).await.unwrap_err();

        assert_eq!(err.feed, "Huge");
        assert!(matches!(err.cause, FetchFailure::TooLarge(n) if n > MAX_FEED_SIZE));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        mount_feed(&server, "/html", "<html>nope</html>".to_string()).await;

        let feed = FeedDescriptor::new("Html", &format!("{}/html", server.uri()), Category::Llm);
        let err = create_fetcher().fetch(&feed).await.unwrap_err();

        assert!(matches!(err.cause, FetchFailure::Parse(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&[]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(Duration::from_millis(300)).unwrap();
        let feed = FeedDescriptor::new("Slow", &format!("{}/slow", server.uri()), Category::Llm);
        let err = fetcher.fetch(&feed).await.unwrap_err();

        assert!(matches!(err.cause, FetchFailure::Timeout));
    }

    #[tokio::test]
    async fn test_empty_feed_is_ok() {
        let server = MockServer::start().await;
        mount_feed(&server, "/empty", rss(&[])).await;

        let feed = FeedDescriptor::new("Empty", &format!("{}/empty", server.uri()), Category::Llm);
        let items = create_fetcher().fetch(&feed).await.unwrap();
        assert!(items.is_empty());
    }
}

mod pipeline_integration_tests {
    use super::common::*;
    use ai_unfiltered::{Category, FeedDescriptor, FetchFailure, Pipeline};
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let fetcher = create_fetcher();

        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/one",
            rss(&[("First", "https://one.example.com/a", "Mon, 01 Jan 2024 00:00:00 GMT")]),
        )
        .await;
        mount_feed(
            &server,
            "/three",
            rss(&[
                ("Third A", "https://three.example.com/a", "Mon, 01 Jan 2024 01:00:00 GMT"),
                ("Third B", "https://three.example.com/b", "Mon, 01 Jan 2024 02:00:00 GMT"),
            ]),
        )
        .await;

        let feeds = vec![
            FeedDescriptor::new("One", &format!("{}/one", server.uri()), Category::Research),
            // Nothing listens on port 1, so this fails at the network level
            FeedDescriptor::new("Two", "http://127.0.0.1:1/feed", Category::Llm),
            FeedDescriptor::new("Three", &format!("{}/three", server.uri()), Category::Industry),
        ];

        let report = Pipeline::new(&db, &fetcher)
            .with_concurrency(2)
            .run(&feeds)
            .await
            .unwrap();

        assert_eq!(report.feeds.len(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total_new(), 3);

        let error = report.errors().next().unwrap();
        assert_eq!(error.feed, "Two");
        assert!(matches!(error.cause, FetchFailure::Network(_)));

        assert_eq!(report.feeds[0].new, 1);
        assert!(report.feeds[1].error.is_some());
        assert_eq!(report.feeds[2].new, 2);
        assert_eq!(db.count(Some(Category::Research), None).await.unwrap(), 1);
        assert_eq!(db.count(Some(Category::Industry), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_running_twice_is_idempotent() {
        let temp_dir = create_temp_dir();
        let db = create_db(&temp_dir).await;
        let fetcher = create_fetcher();

        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed",
            rss(&[
                ("A", "https://x.example.com/a", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("B", "https://x.example.com/b", "Mon, 01 Jan 2024 01:00:00 GMT"),
            ]),
        )
        .await;
        let feeds = vec![FeedDescriptor::new(
            "X",
            &format!("{}/feed", server.uri()),
            Category::Community,
        )];
        let pipeline = Pipeline::new(&db, &fetcher);

        let first = pipeline.run(&feeds).await.unwrap();
        let count_after_first = db.count(None, None).await.unwrap();
        let second = pipeline.run(&feeds).await.unwrap();

        assert_eq!(first.total_new(), 2);
        assert_eq!(second.total_new(), 0);
        assert_eq!(second.total_duplicate(), 2);
        assert_eq!(db.count(None, None).await.unwrap(), count_after_first);
    }

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed",
            rss(&[("Kept", "https://kept.example.com/a", "Mon, 01 Jan 2024 00:00:00 GMT")]),
        )
        .await;
        let feeds = vec![FeedDescriptor::new(
            "Kept",
            &format!("{}/feed", server.uri()),
            Category::Company,
        )];

        {
            let db = create_db(&temp_dir).await;
            let fetcher = create_fetcher();
            Pipeline::new(&db, &fetcher).run(&feeds).await.unwrap();
            db.close().await;
        }

        // A fresh process sees the earlier article and does not store it again
        {
            let db = create_db(&temp_dir).await;
            assert_eq!(db.count(None, None).await.unwrap(), 1);

            let fetcher = create_fetcher();
            let report = Pipeline::new(&db, &fetcher).run(&feeds).await.unwrap();
            assert_eq!(report.total_new(), 0);
            assert_eq!(report.total_duplicate(), 1);
        }
    }
}

mod end_to_end_tests {
    use super::common::*;
    use ai_unfiltered::{Category, Config, ListQuery, Pipeline, Renderer};
    use chrono::{TimeZone, Utc};
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_config_to_site_workflow() {
        let temp_dir = create_temp_dir();
        let server = MockServer::start().await;
        mount_feed(
            &server,
            "/feed",
            rss(&[("Paper A", "http://x/a", "Mon, 01 Jan 2024 00:00:00 GMT")]),
        )
        .await;

        let config = Config::from_str(&format!(
            r#"
            [[feeds]]
            name = "ArXiv"
            url = "{}/feed"
            category = "research"
            "#,
            server.uri()
        ))
        .unwrap();
        let feeds = config.feed_descriptors().unwrap();

        let db = create_db(&temp_dir).await;
        let fetcher = create_fetcher();
        let report = Pipeline::new(&db, &fetcher).run(&feeds).await.unwrap();
        assert_eq!(report.total_new(), 1);

        let stored = db.list(&ListQuery::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Paper A");
        assert_eq!(stored[0].category, Category::Research);
        assert_eq!(stored[0].source, "ArXiv");
        assert_eq!(
            stored[0].published,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let out = temp_dir.path().join("docs");
        Renderer::new(&db, config.site.clone())
            .render(&out)
            .await
            .unwrap();

        let research = std::fs::read_to_string(out.join("research.html")).unwrap();
        assert!(research.contains("Paper A"));
        let index = std::fs::read_to_string(out.join("index.html")).unwrap();
        assert!(index.contains("Paper A"));
        let llm = std::fs::read_to_string(out.join("llm.html")).unwrap();
        assert!(!llm.contains("Paper A"));
        let rss = std::fs::read_to_string(out.join("rss.xml")).unwrap();
        assert!(rss.contains("Paper A"));
    }

    #[tokio::test]
    async fn test_rerender_after_new_articles() {
        let temp_dir = create_temp_dir();
        let server = MockServer::start().await;
        let items: Vec<(String, String)> = (0..6)
            .map(|i| (format!("Story {}", i), format!("https://s.example.com/{}", i)))
            .collect();
        let items: Vec<(&str, &str, &str)> = items
            .iter()
            .map(|(t, l)| (t.as_str(), l.as_str(), "Mon, 01 Jan 2024 00:00:00 GMT"))
            .collect();
        mount_feed(&server, "/feed", rss(&items)).await;

        let config = Config::from_str(&format!(
            r#"
            [site]
            page_size = 4

            [[feeds]]
            name = "Stories"
            url = "{}/feed"
            category = "industry"
            "#,
            server.uri()
        ))
        .unwrap();

        let db = create_db(&temp_dir).await;
        let fetcher = create_fetcher();
        Pipeline::new(&db, &fetcher)
            .run(&config.feed_descriptors().unwrap())
            .await
            .unwrap();

        let out = temp_dir.path().join("docs");
        let summary = Renderer::new(&db, config.site.clone())
            .render(&out)
            .await
            .unwrap();
        assert_eq!(summary.articles, 6);
        assert!(out.join("industry-page-2.html").exists());

        // Identical timestamps fall back to id order, so both renders agree
        let before = std::fs::read(out.join("industry.html")).unwrap();
        Renderer::new(&db, config.site).render(&out).await.unwrap();
        let after = std::fs::read(out.join("industry.html")).unwrap();
        assert_eq!(before, after);
    }
}
