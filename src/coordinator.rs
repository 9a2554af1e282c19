// src/coordinator.rs
// Routing/aggregation coordinator: one `run_cycle` walks every active
// subscription through its pipeline and folds the per-subscription results
// into a cycle summary. Buckets and subscriptions are processed sequentially
// to keep outbound request concurrency bounded against rate-limited APIs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipelines::feed::FeedIngestor;
use crate::pipelines::spotify::SpotifyIngestor;
use crate::pipelines::youtube::YoutubeIngestor;
use crate::subscription::{RouteBucket, Subscription};
use crate::types::{ContentSink, CycleObserver, IngestResult, SubscriptionSource, TracingObserver};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleTotals {
    pub attempted: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl CycleTotals {
    fn add(&mut self, result: &IngestResult) {
        self.attempted += result.attempted;
        self.ingested += result.ingested;
        self.skipped += result.skipped;
        self.errors += result.errors;
    }
}

/// Everything one cycle produced. Owned by the caller; nothing here outlives
/// the cycle except what the observer chose to retain.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: CycleTotals,
    pub syndication: Vec<IngestResult>,
    pub video_platform: Vec<IngestResult>,
    pub podcast_platform: Vec<IngestResult>,
}

pub struct Coordinator {
    subscriptions: Arc<dyn SubscriptionSource>,
    sink: Arc<dyn ContentSink>,
    feeds: FeedIngestor,
    youtube: YoutubeIngestor,
    spotify: SpotifyIngestor,
    observer: Arc<dyn CycleObserver>,
    /// Optional pause between subscriptions, for rate-limit friendliness.
    delay_between: Duration,
}

impl Coordinator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionSource>,
        sink: Arc<dyn ContentSink>,
        feeds: FeedIngestor,
        youtube: YoutubeIngestor,
        spotify: SpotifyIngestor,
    ) -> Self {
        Self {
            subscriptions,
            sink,
            feeds,
            youtube,
            spotify,
            observer: Arc::new(TracingObserver),
            delay_between: Duration::ZERO,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_delay_between(mut self, delay: Duration) -> Self {
        self.delay_between = delay;
        self
    }

    /// Run one full ingestion cycle. Only a subscription-source failure
    /// (a configuration-level problem) fails the whole cycle; everything
    /// per-subscription is captured in that subscription's result.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        let started_at = Utc::now();

        let subscriptions = self
            .subscriptions
            .list_active_subscriptions()
            .await
            .context("listing active subscriptions")?;

        let mut syndication: Vec<Subscription> = Vec::new();
        let mut video: Vec<Subscription> = Vec::new();
        let mut podcast: Vec<Subscription> = Vec::new();
        for subscription in subscriptions {
            match subscription.route() {
                Some(RouteBucket::Syndication) => syndication.push(subscription),
                Some(RouteBucket::VideoPlatform) => video.push(subscription),
                Some(RouteBucket::PodcastPlatform) => podcast.push(subscription),
                None => {}
            }
        }

        tracing::debug!(
            target: "ingest",
            syndication = syndication.len(),
            video_platform = video.len(),
            podcast_platform = podcast.len(),
            "cycle buckets partitioned"
        );

        let mut summary = CycleSummary {
            started_at,
            finished_at: started_at,
            totals: CycleTotals::default(),
            syndication: Vec::with_capacity(syndication.len()),
            video_platform: Vec::with_capacity(video.len()),
            podcast_platform: Vec::with_capacity(podcast.len()),
        };

        for subscription in &syndication {
            let result = self
                .feeds
                .ingest_subscription(self.sink.as_ref(), subscription)
                .await;
            self.observer.on_result(RouteBucket::Syndication, &result);
            summary.totals.add(&result);
            summary.syndication.push(result);
            self.pause().await;
        }

        for subscription in &video {
            let result = self
                .youtube
                .ingest_subscription(self.sink.as_ref(), subscription)
                .await;
            self.observer.on_result(RouteBucket::VideoPlatform, &result);
            summary.totals.add(&result);
            summary.video_platform.push(result);
            self.pause().await;
        }

        for subscription in &podcast {
            let result = self
                .spotify
                .ingest_subscription(self.sink.as_ref(), subscription)
                .await;
            self.observer.on_result(RouteBucket::PodcastPlatform, &result);
            summary.totals.add(&result);
            summary.podcast_platform.push(result);
            self.pause().await;
        }

        summary.finished_at = Utc::now();
        Ok(summary)
    }

    async fn pause(&self) {
        if !self.delay_between.is_zero() {
            tokio::time::sleep(self.delay_between).await;
        }
    }
}
