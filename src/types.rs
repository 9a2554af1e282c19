// src/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::content::{CanonicalContent, SourceKind};
use crate::subscription::{RouteBucket, Subscription};

/// Read-only view of the external subscription store.
#[async_trait::async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>>;
}

/// Idempotent bulk upsert into the external content store, keyed on
/// (source kind, external id); mutable fields win on conflict.
#[async_trait::async_trait]
pub trait ContentSink: Send + Sync {
    async fn upsert_many(&self, items: &[CanonicalContent]) -> Result<usize>;
}

/// Observability surface: one event per completed per-subscription result,
/// one per cycle-level failure. Defaults log through `tracing`.
pub trait CycleObserver: Send + Sync {
    fn on_result(&self, bucket: RouteBucket, result: &IngestResult) {
        tracing::info!(
            target: "ingest",
            pipeline = bucket.as_str(),
            subscription_id = %result.subscription_id,
            attempted = result.attempted,
            ingested = result.ingested,
            skipped = result.skipped,
            errors = result.errors,
            feed_title = result.feed_title.as_deref().unwrap_or(""),
            "subscription processed"
        );
    }

    fn on_cycle_error(&self, error: &anyhow::Error) {
        tracing::error!(target: "ingest", error = %error, "ingestion cycle failed");
    }
}

/// The stock observer; only emits tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CycleObserver for TracingObserver {}

/// Per-subscription outcome of one cycle. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub subscription_id: Uuid,
    pub attempted: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub errors: usize,
    pub feed_title: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl IngestResult {
    /// Short-circuit result: nothing fetched, nothing wrong.
    pub fn noop(subscription_id: Uuid, feed_title: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id,
            attempted: 0,
            ingested: 0,
            skipped: 0,
            errors: 0,
            feed_title,
            fetched_at: now,
        }
    }

    /// One failed subscription; siblings keep going.
    pub fn failure(subscription_id: Uuid, feed_title: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            errors: 1,
            ..Self::noop(subscription_id, feed_title, now)
        }
    }
}

// --- Test helper ---
// In-memory sink mirroring the upsert contract: keyed map, last write wins,
// batch sizes recorded so tests can count sink calls.
#[derive(Default)]
pub struct MemorySink {
    state: std::sync::Mutex<MemorySinkState>,
}

#[derive(Default)]
struct MemorySinkState {
    records: std::collections::BTreeMap<(SourceKind, String), CanonicalContent>,
    batches: Vec<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CanonicalContent> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().batches.clone()
    }
}

#[async_trait::async_trait]
impl ContentSink for MemorySink {
    async fn upsert_many(&self, items: &[CanonicalContent]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(items.len());
        for item in items {
            let key = (item.source_kind, item.external_id.clone());
            state.records.insert(key, item.clone());
        }
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{validate, CandidateContent};

    fn canonical(title: &str) -> CanonicalContent {
        validate(CandidateContent {
            source_kind: SourceKind::News,
            external_id: "item-1".into(),
            source_id: "https://example.test/feed.xml".into(),
            title: title.into(),
            url: "https://example.test/a".into(),
            creator: None,
            thumbnail_url: None,
            description: None,
            published_at: Utc::now(),
            duration_seconds: None,
            summary: None,
            topics: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_last_write_wins() {
        let sink = MemorySink::new();
        let first = canonical("Original title");
        let second = canonical("Updated title");

        assert_eq!(sink.upsert_many(&[first.clone()]).await.unwrap(), 1);
        assert_eq!(sink.upsert_many(&[second.clone()]).await.unwrap(), 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Updated title");
        assert_eq!(sink.batch_sizes(), vec![1, 1]);
    }
}
