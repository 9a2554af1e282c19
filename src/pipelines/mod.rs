// src/pipelines/mod.rs
pub mod feed;
pub mod spotify;
pub mod youtube;

use std::time::Duration;

use crate::content::CanonicalContent;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const USER_AGENT: &str = "dayroll-ingest/0.1 (+https://dayroll.app)";

/// A source item that was parsed but rejected before or during validation.
/// Never persisted; only counted and logged.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub external_id: String,
    pub title: String,
    pub reason: String,
}

/// Outcome of mapping one fetched batch to canonical candidates.
#[derive(Debug, Default)]
pub struct MapOutcome {
    pub entries: Vec<CanonicalContent>,
    pub skipped: Vec<SkippedItem>,
}

impl MapOutcome {
    pub(crate) fn log_skipped(&self, source_id: &str) {
        for item in &self.skipped {
            tracing::debug!(
                target: "ingest",
                source_id,
                external_id = %item.external_id,
                title = %item.title,
                reason = %item.reason,
                "item rejected"
            );
        }
    }
}
