// tests/coordinator_cycle.rs
// Full cycles: routing, per-subscription isolation, totals, observer events.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::http::header;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use dayroll_ingest::content::SourceKind;
use dayroll_ingest::coordinator::Coordinator;
use dayroll_ingest::net::RetryPolicy;
use dayroll_ingest::pipelines::feed::{FeedIngestor, FeedOptions};
use dayroll_ingest::pipelines::spotify::{SpotifyIngestor, SpotifyOptions};
use dayroll_ingest::pipelines::youtube::{YoutubeIngestor, YoutubeOptions};
use dayroll_ingest::subscription::{RouteBucket, Subscription};
use dayroll_ingest::types::{MemorySink, SubscriptionSource};

const GOOD_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Cycle Feed</title>
    <item>
      <guid>cycle-1</guid>
      <title>One article</title>
      <link>https://cycle.example.test/1</link>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        factor: 1.0,
        jitter: false,
    }
}

/// Coordinator wired to a local server; neither platform API is credentialed,
/// so platform subscriptions fail deterministically without network calls.
fn build_coordinator(
    addr: SocketAddr,
    subscriptions: Arc<dyn SubscriptionSource>,
    sink: Arc<MemorySink>,
) -> Coordinator {
    let client = reqwest::Client::new();
    let feed_opts = FeedOptions {
        timeout: Duration::from_secs(5),
        retry: no_retry(),
    };
    let youtube_opts = YoutubeOptions {
        api_key: None,
        endpoint: format!("http://{addr}/playlistItems"),
        retry: no_retry(),
        ..YoutubeOptions::default()
    };
    let spotify_opts = SpotifyOptions {
        credentials: None,
        token_endpoint: format!("http://{addr}/api/token"),
        api_base: format!("http://{addr}/v1"),
        retry: no_retry(),
        ..SpotifyOptions::default()
    };
    Coordinator::new(
        subscriptions,
        sink,
        FeedIngestor::new(client.clone(), feed_opts),
        YoutubeIngestor::new(client.clone(), youtube_opts),
        SpotifyIngestor::new(client, spotify_opts),
    )
}

struct StaticSubscriptions {
    subscriptions: Vec<Subscription>,
}

#[async_trait::async_trait]
impl SubscriptionSource for StaticSubscriptions {
    async fn list_active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        Ok(self.subscriptions.clone())
    }
}

struct FailingSubscriptions;

#[async_trait::async_trait]
impl SubscriptionSource for FailingSubscriptions {
    async fn list_active_subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        Err(anyhow!("subscription store offline"))
    }
}

#[tokio::test]
async fn cycle_routes_buckets_and_isolates_failures() {
    let app = Router::new().route(
        "/feed.xml",
        get(|| async { ([(header::CONTENT_TYPE, "application/rss+xml")], GOOD_FEED) }),
    );
    let addr = common::spawn_server(app).await;

    let good_feed = common::subscription(SourceKind::News, &format!("http://{addr}/feed.xml"));
    // No route here serves a 404; the whole fetch fails for this one only.
    let dead_feed = common::subscription(SourceKind::News, &format!("http://{addr}/missing.xml"));
    // Valid channel id, but no API key is configured.
    let video = common::subscription(SourceKind::Youtube, "UCAbCdEfGhIjKlMnOpQrStUv");
    // Provider hint routes to the platform pipeline, which has no credentials.
    let mut platform_podcast =
        common::subscription(SourceKind::Podcast, "https://pod.example.test/feed.xml");
    platform_podcast.metadata = Some(json!({ "provider": "spotify" }));
    // Neither of these reaches any pipeline.
    let topic = common::subscription(SourceKind::Topic, "rust");
    let mut inactive = common::subscription(SourceKind::News, &format!("http://{addr}/feed.xml"));
    inactive.is_active = false;

    let subscriptions = Arc::new(StaticSubscriptions {
        subscriptions: vec![
            good_feed.clone(),
            dead_feed,
            video,
            platform_podcast,
            topic,
            inactive,
        ],
    });
    let sink = Arc::new(MemorySink::new());
    let observer = Arc::new(common::RecordingObserver::default());
    let coordinator = build_coordinator(addr, subscriptions, sink.clone())
        .with_observer(observer.clone());

    let summary = coordinator.run_cycle().await.unwrap();

    assert_eq!(summary.syndication.len(), 2);
    assert_eq!(summary.video_platform.len(), 1);
    assert_eq!(summary.podcast_platform.len(), 1);

    assert_eq!(summary.totals.attempted, 1);
    assert_eq!(summary.totals.ingested, 1);
    assert_eq!(summary.totals.errors, 3);
    assert_eq!(sink.len(), 1);

    // One good feed result among the syndication pair.
    let good = summary
        .syndication
        .iter()
        .find(|r| r.subscription_id == good_feed.id)
        .expect("good feed result present");
    assert_eq!(good.ingested, 1);
    assert_eq!(good.errors, 0);
    assert_eq!(good.feed_title.as_deref(), Some("Cycle Feed"));

    // One observer event per processed subscription, tagged with its bucket.
    let events = observer.results.lock().unwrap();
    assert_eq!(events.len(), 4);
    let bucket_count = |bucket: RouteBucket| events.iter().filter(|(b, _)| *b == bucket).count();
    assert_eq!(bucket_count(RouteBucket::Syndication), 2);
    assert_eq!(bucket_count(RouteBucket::VideoPlatform), 1);
    assert_eq!(bucket_count(RouteBucket::PodcastPlatform), 1);
}

#[tokio::test]
async fn empty_subscription_list_yields_empty_summary() {
    let addr = common::spawn_server(Router::new()).await;
    let subscriptions = Arc::new(StaticSubscriptions {
        subscriptions: vec![],
    });
    let sink = Arc::new(MemorySink::new());
    let observer = Arc::new(common::RecordingObserver::default());
    let coordinator = build_coordinator(addr, subscriptions, sink.clone())
        .with_observer(observer.clone());

    let summary = coordinator.run_cycle().await.unwrap();
    assert!(summary.syndication.is_empty());
    assert!(summary.video_platform.is_empty());
    assert!(summary.podcast_platform.is_empty());
    assert_eq!(summary.totals.attempted, 0);
    assert_eq!(summary.totals.errors, 0);
    assert!(sink.is_empty());
    assert!(observer.results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn subscription_store_failure_fails_the_cycle() {
    let addr = common::spawn_server(Router::new()).await;
    let sink = Arc::new(MemorySink::new());
    let coordinator = build_coordinator(addr, Arc::new(FailingSubscriptions), sink);

    let error = coordinator.run_cycle().await.unwrap_err();
    assert!(error.to_string().contains("listing active subscriptions"));
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let app = Router::new().route(
        "/feed.xml",
        get(|| async { ([(header::CONTENT_TYPE, "application/rss+xml")], GOOD_FEED) }),
    );
    let addr = common::spawn_server(app).await;

    let subscriptions = Arc::new(StaticSubscriptions {
        subscriptions: vec![common::subscription(
            SourceKind::News,
            &format!("http://{addr}/feed.xml"),
        )],
    });
    let sink = Arc::new(MemorySink::new());
    let coordinator = build_coordinator(addr, subscriptions, sink.clone());

    coordinator.run_cycle().await.unwrap();
    coordinator.run_cycle().await.unwrap();

    // Same item twice; the sink keeps a single record.
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.batch_sizes(), vec![1, 1]);
}
