// src/pipelines/youtube.rs
// Video-platform pipeline: derive the channel's uploads playlist, page
// through it, map playlist items to canonical candidates.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::content::{truncate_chars, validate, CandidateContent, SourceKind};
use crate::net::{self, RetryPolicy};
use crate::pipelines::{MapOutcome, SkippedItem, DEFAULT_TIMEOUT};
use crate::subscription::Subscription;
use crate::types::{ContentSink, IngestResult};

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/playlistItems";
const MAX_DESCRIPTION: usize = 5000;
const THUMBNAIL_ORDER: [&str; 5] = ["maxres", "standard", "high", "medium", "default"];

#[derive(Debug, Clone)]
pub struct YoutubeOptions {
    pub api_key: Option<String>,
    /// Playlist-items endpoint; overridable so tests can point at a local server.
    pub endpoint: String,
    pub max_results: u32,
    pub max_pages: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for YoutubeOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: 50,
            max_pages: 5,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Uploads collection id: the platform swaps the `UC` channel prefix for `UU`.
/// Anything that is not a well-formed channel id resolves to `None`.
pub fn derive_uploads_playlist_id(channel_id: &str) -> Option<String> {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^UC[0-9A-Za-z_-]{22}$").unwrap());
    if !re.is_match(channel_id) {
        return None;
    }
    Some(format!("UU{}", &channel_id[2..]))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    id: Option<String>,
    snippet: Option<Snippet>,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    channel_title: Option<String>,
    thumbnails: Option<BTreeMap<String, Thumbnail>>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_id: Option<String>,
    video_published_at: Option<String>,
}

fn pick_thumbnail(thumbnails: Option<&BTreeMap<String, Thumbnail>>) -> Option<String> {
    let thumbnails = thumbnails?;
    THUMBNAIL_ORDER
        .iter()
        .find_map(|key| thumbnails.get(*key).and_then(|t| t.url.clone()))
        .or_else(|| thumbnails.values().find_map(|t| t.url.clone()))
}

pub struct YoutubeIngestor {
    client: reqwest::Client,
    opts: YoutubeOptions,
}

impl YoutubeIngestor {
    pub fn new(client: reqwest::Client, opts: YoutubeOptions) -> Self {
        Self { client, opts }
    }

    pub async fn ingest_subscription(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
    ) -> IngestResult {
        let now = Utc::now();
        if subscription.source_kind != SourceKind::Youtube {
            return IngestResult::noop(subscription.id, subscription.source_name.clone(), now);
        }

        let Some(api_key) = self.opts.api_key.as_deref() else {
            tracing::warn!(
                target: "ingest",
                subscription_id = %subscription.id,
                "video platform API key not configured"
            );
            return IngestResult::failure(subscription.id, subscription.source_name.clone(), now);
        };

        let Some(playlist_id) = derive_uploads_playlist_id(&subscription.source_id) else {
            tracing::warn!(
                target: "ingest",
                subscription_id = %subscription.id,
                source_id = %subscription.source_id,
                "malformed channel id"
            );
            return IngestResult::failure(subscription.id, subscription.source_name.clone(), now);
        };

        match self.run(sink, subscription, api_key, &playlist_id, now).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    target: "ingest",
                    subscription_id = %subscription.id,
                    source_id = %subscription.source_id,
                    error = %err,
                    "video platform ingest failed"
                );
                IngestResult::failure(subscription.id, subscription.source_name.clone(), now)
            }
        }
    }

    async fn run(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
        api_key: &str,
        playlist_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IngestResult> {
        let per_page = self.opts.max_results.clamp(1, 50).to_string();
        let mut items: Vec<PlaylistItem> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = net::with_retry(&self.opts.retry, || {
                let mut request = self.client.get(&self.opts.endpoint).query(&[
                    ("part", "snippet,contentDetails"),
                    ("playlistId", playlist_id),
                    ("maxResults", per_page.as_str()),
                    ("key", api_key),
                ]);
                if let Some(token) = page_token.as_deref() {
                    request = request.query(&[("pageToken", token)]);
                }
                net::fetch_json::<PlaylistPage>(request, self.opts.timeout)
            })
            .await?;

            items.extend(page.items);
            page_token = page.next_page_token;
            pages += 1;
            if page_token.is_none() || pages >= self.opts.max_pages.max(1) {
                break;
            }
        }

        let attempted = items.len();
        let outcome = map_playlist_items(
            &items,
            &subscription.source_id,
            subscription.source_name.as_deref(),
            now,
        );
        outcome.log_skipped(&subscription.source_id);

        let ingested = if outcome.entries.is_empty() {
            0
        } else {
            sink.upsert_many(&outcome.entries).await?
        };

        Ok(IngestResult {
            subscription_id: subscription.id,
            attempted,
            ingested,
            skipped: outcome.skipped.len(),
            errors: 0,
            feed_title: subscription.source_name.clone(),
            fetched_at: now,
        })
    }
}

fn map_playlist_items(
    items: &[PlaylistItem],
    channel_id: &str,
    channel_title: Option<&str>,
    now: DateTime<Utc>,
) -> MapOutcome {
    let mut outcome = MapOutcome::default();
    for item in items {
        let snippet = item.snippet.as_ref();
        let details = item.content_details.as_ref();

        let video_id = details
            .and_then(|d| d.video_id.clone())
            .or_else(|| snippet.and_then(|s| s.resource_id.as_ref()?.video_id.clone()));
        let title = snippet
            .and_then(|s| s.title.as_deref())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let (Some(video_id), false) = (video_id, title.is_empty()) else {
            outcome.skipped.push(SkippedItem {
                external_id: item.id.clone().unwrap_or_else(|| "unknown".into()),
                title: if title.is_empty() { "Untitled".into() } else { title },
                reason: "missing video id or title".into(),
            });
            continue;
        };

        let published_at = details
            .and_then(|d| d.video_published_at.as_deref())
            .or_else(|| snippet.and_then(|s| s.published_at.as_deref()))
            .and_then(crate::content::parse_datetime)
            .unwrap_or(now);

        let candidate = CandidateContent {
            source_kind: SourceKind::Youtube,
            external_id: video_id.clone(),
            source_id: channel_id.to_string(),
            title: title.clone(),
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            creator: channel_title
                .map(str::to_string)
                .or_else(|| snippet.and_then(|s| s.channel_title.clone())),
            thumbnail_url: pick_thumbnail(snippet.and_then(|s| s.thumbnails.as_ref())),
            description: snippet
                .and_then(|s| s.description.as_deref())
                .map(|d| truncate_chars(d, MAX_DESCRIPTION)),
            published_at,
            duration_seconds: None,
            summary: None,
            topics: None,
        };

        match validate(candidate) {
            Ok(entry) => outcome.entries.push(entry),
            Err(err) => outcome.skipped.push(SkippedItem {
                external_id: video_id,
                title,
                reason: err.issues.join("; "),
            }),
        }
    }
    outcome
}
