// src/main.rs
// Standalone runner: subscriptions from a JSON file, ingested content mirrored
// to an NDJSON file. Real deployments embed the library and wire their own
// subscription source and content sink.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use dayroll_ingest::config;
use dayroll_ingest::content::{CanonicalContent, SourceKind};
use dayroll_ingest::coordinator::Coordinator;
use dayroll_ingest::pipelines::feed::FeedIngestor;
use dayroll_ingest::pipelines::spotify::SpotifyIngestor;
use dayroll_ingest::pipelines::youtube::YoutubeIngestor;
use dayroll_ingest::scheduler::CycleScheduler;
use dayroll_ingest::subscription::Subscription;
use dayroll_ingest::types::{ContentSink, SubscriptionSource, TracingObserver};

struct JsonFileSubscriptions {
    path: PathBuf,
}

#[async_trait::async_trait]
impl SubscriptionSource for JsonFileSubscriptions {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading subscriptions from {}", self.path.display()))?;
        let subscriptions: Vec<Subscription> =
            serde_json::from_str(&raw).context("parsing subscriptions JSON")?;
        Ok(subscriptions.into_iter().filter(|s| s.is_active).collect())
    }
}

/// File-backed sink that keeps the idempotency contract: records live in a
/// keyed map and the NDJSON file is rewritten wholesale on each upsert.
struct NdjsonSink {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<(SourceKind, String), CanonicalContent>>,
}

impl NdjsonSink {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: tokio::sync::Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl ContentSink for NdjsonSink {
    async fn upsert_many(&self, items: &[CanonicalContent]) -> Result<usize> {
        let mut records = self.records.lock().await;
        for item in items {
            records.insert((item.source_kind, item.external_id.clone()), item.clone());
        }
        let mut out = String::new();
        for record in records.values() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.path, out)
            .await
            .with_context(|| format!("writing content to {}", self.path.display()))?;
        Ok(items.len())
    }
}

fn env_path(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::load_default()?;
    let client = reqwest::Client::new();

    let subscriptions = Arc::new(JsonFileSubscriptions {
        path: env_path("SUBSCRIPTIONS_PATH", "config/subscriptions.json"),
    });
    let sink = Arc::new(NdjsonSink::new(env_path("CONTENT_PATH", "data/content.ndjson")));

    let coordinator = Arc::new(
        Coordinator::new(
            subscriptions,
            sink,
            FeedIngestor::new(client.clone(), settings.feed_options()),
            YoutubeIngestor::new(client.clone(), settings.youtube_options()),
            SpotifyIngestor::new(client, settings.spotify_options()),
        )
        .with_delay_between(settings.delay_between()),
    );

    let scheduler = CycleScheduler::new(
        move || {
            let coordinator = coordinator.clone();
            async move {
                let summary = coordinator.run_cycle().await?;
                tracing::info!(
                    target: "ingest",
                    attempted = summary.totals.attempted,
                    ingested = summary.totals.ingested,
                    skipped = summary.totals.skipped,
                    errors = summary.totals.errors,
                    "cycle complete"
                );
                Ok(())
            }
        },
        settings.scheduler_config(),
        Arc::new(TracingObserver),
    )?;

    scheduler.start();
    tracing::info!(
        interval_secs = settings.schedule.interval_secs,
        "ingestion scheduler started, ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    scheduler.stop();
    tracing::info!("ingestion scheduler stopped");
    Ok(())
}
