// src/pipelines/spotify.rs
// Podcast-platform pipeline: client-credentials token exchange, show lookup,
// episode pagination via the API's absolute `next` URLs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::content::{parse_datetime, truncate_chars, validate, CandidateContent, SourceKind};
use crate::net::{self, RetryPolicy};
use crate::pipelines::{MapOutcome, SkippedItem, DEFAULT_TIMEOUT};
use crate::subscription::Subscription;
use crate::types::{ContentSink, IngestResult};

const DEFAULT_TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";
const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const DEFAULT_MARKET: &str = "US";
const PAGE_LIMIT: u32 = 50;
const MAX_DESCRIPTION: usize = 5000;

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct SpotifyOptions {
    pub credentials: Option<SpotifyCredentials>,
    /// Token and API endpoints; overridable so tests can point at a local server.
    pub token_endpoint: String,
    pub api_base: String,
    pub market: String,
    pub max_pages: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SpotifyOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            market: DEFAULT_MARKET.to_string(),
            max_pages: 5,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Show {
    id: String,
    name: Option<String>,
    publisher: Option<String>,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodesPage {
    #[serde(default)]
    items: Vec<Episode>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    release_date: Option<String>,
    duration_ms: Option<u64>,
    external_urls: Option<ExternalUrls>,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

fn first_image(images: &[Image]) -> Option<String> {
    images.iter().find_map(|i| i.url.clone())
}

pub struct SpotifyIngestor {
    client: reqwest::Client,
    opts: SpotifyOptions,
}

impl SpotifyIngestor {
    pub fn new(client: reqwest::Client, opts: SpotifyOptions) -> Self {
        Self { client, opts }
    }

    pub async fn ingest_subscription(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
    ) -> IngestResult {
        let now = Utc::now();
        if subscription.source_kind != SourceKind::Podcast {
            return IngestResult::noop(subscription.id, subscription.source_name.clone(), now);
        }

        let Some(credentials) = self.opts.credentials.as_ref() else {
            tracing::warn!(
                target: "ingest",
                subscription_id = %subscription.id,
                "podcast platform credentials not configured"
            );
            return IngestResult::failure(subscription.id, subscription.source_name.clone(), now);
        };

        match self.run(sink, subscription, credentials, now).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    target: "ingest",
                    subscription_id = %subscription.id,
                    source_id = %subscription.source_id,
                    error = %err,
                    "podcast platform ingest failed"
                );
                IngestResult::failure(subscription.id, subscription.source_name.clone(), now)
            }
        }
    }

    async fn run(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
        credentials: &SpotifyCredentials,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IngestResult> {
        // Short-lived bearer credential, scoped to this one subscription.
        let token = self.fetch_token(credentials).await?;
        let show = self.fetch_show(&subscription.source_id, &token).await?;

        let mut episodes: Vec<Episode> = Vec::new();
        let mut next_url = Some(self.episodes_url(&show.id));
        let mut pages = 0u32;

        while let Some(url) = next_url {
            let page = net::with_retry(&self.opts.retry, || {
                let request = self.client.get(&url).bearer_auth(&token);
                net::fetch_json::<EpisodesPage>(request, self.opts.timeout)
            })
            .await?;

            episodes.extend(page.items);
            pages += 1;
            next_url = if pages < self.opts.max_pages.max(1) {
                page.next
            } else {
                None
            };
        }

        let attempted = episodes.len();
        let outcome = map_episodes(&episodes, &show, now);
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
            feed_title: show.name.clone().or_else(|| subscription.source_name.clone()),
            fetched_at: now,
        })
    }

    async fn fetch_token(&self, credentials: &SpotifyCredentials) -> anyhow::Result<String> {
        let response = net::with_retry(&self.opts.retry, || {
            let request = self
                .client
                .post(&self.opts.token_endpoint)
                .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
                .form(&[("grant_type", "client_credentials")]);
            net::fetch_json::<TokenResponse>(request, self.opts.timeout)
        })
        .await?;
        Ok(response.access_token)
    }

    async fn fetch_show(&self, show_id: &str, token: &str) -> anyhow::Result<Show> {
        let url = format!("{}/shows/{}", self.opts.api_base, show_id);
        let show = net::with_retry(&self.opts.retry, || {
            let request = self
                .client
                .get(&url)
                .query(&[("market", self.opts.market.as_str())])
                .bearer_auth(token);
            net::fetch_json::<Show>(request, self.opts.timeout)
        })
        .await?;
        Ok(show)
    }

    fn episodes_url(&self, show_id: &str) -> String {
        format!(
            "{}/shows/{}/episodes?market={}&limit={}&offset=0",
            self.opts.api_base, show_id, self.opts.market, PAGE_LIMIT
        )
    }
}

fn map_episodes(episodes: &[Episode], show: &Show, now: DateTime<Utc>) -> MapOutcome {
    let mut outcome = MapOutcome::default();
    for episode in episodes {
        let title = episode
            .name
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let link = episode
            .external_urls
            .as_ref()
            .and_then(|u| u.spotify.clone())
            .or_else(|| {
                episode
                    .id
                    .as_deref()
                    .map(|id| format!("https://open.spotify.com/episode/{id}"))
            });

        let (Some(id), Some(link), false) =
            (episode.id.clone(), link, title.is_empty())
        else {
            outcome.skipped.push(SkippedItem {
                external_id: episode.id.clone().unwrap_or_else(|| "unknown".into()),
                title: if title.is_empty() {
                    "Untitled episode".into()
                } else {
                    title
                },
                reason: "missing required episode metadata".into(),
            });
            continue;
        };

        // Whole seconds, rounded; zero-length media carries no duration.
        let duration_seconds = episode
            .duration_ms
            .map(|ms| ((ms as f64) / 1000.0).round() as u32)
            .filter(|secs| *secs > 0);

        let candidate = CandidateContent {
            source_kind: SourceKind::Podcast,
            external_id: id.clone(),
            source_id: show.id.clone(),
            title: title.clone(),
            url: link,
            creator: show.publisher.clone().or_else(|| show.name.clone()),
            thumbnail_url: first_image(&episode.images).or_else(|| first_image(&show.images)),
            description: episode
                .description
                .as_deref()
                .map(|d| truncate_chars(d, MAX_DESCRIPTION)),
            published_at: episode
                .release_date
                .as_deref()
                .and_then(parse_datetime)
                .unwrap_or(now),
            duration_seconds,
            summary: None,
            topics: None,
        };

        match validate(candidate) {
            Ok(entry) => outcome.entries.push(entry),
            Err(err) => outcome.skipped.push(SkippedItem {
                external_id: id,
                title,
                reason: err.issues.join("; "),
            }),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show() -> Show {
        Show {
            id: "4rOoJ6Egrf8K2IrywzwOMk".into(),
            name: Some("Example Show".into()),
            publisher: Some("Example Network".into()),
            images: vec![Image {
                url: Some("https://img.test/show.jpg".into()),
            }],
        }
    }

    fn episode() -> Episode {
        Episode {
            id: Some("ep1".into()),
            name: Some("Pilot".into()),
            description: Some("First episode.".into()),
            release_date: Some("2024-01-20".into()),
            duration_ms: Some(1_800_400),
            external_urls: Some(ExternalUrls {
                spotify: Some("https://open.spotify.com/episode/ep1".into()),
            }),
            images: vec![],
        }
    }

    #[test]
    fn episode_maps_with_show_fallbacks() {
        let outcome = map_episodes(&[episode()], &show(), Utc::now());
        assert_eq!(outcome.entries.len(), 1);
        let entry = &outcome.entries[0];
        assert_eq!(entry.creator.as_deref(), Some("Example Network"));
        assert_eq!(entry.thumbnail_url.as_deref(), Some("https://img.test/show.jpg"));
        assert_eq!(entry.duration_seconds, Some(1800));
        assert_eq!(entry.source_id, "4rOoJ6Egrf8K2IrywzwOMk");
    }

    #[test]
    fn missing_id_is_skipped_pre_validation() {
        let mut ep = episode();
        ep.id = None;
        ep.external_urls = None;
        let outcome = map_episodes(&[ep], &show(), Utc::now());
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn zero_duration_maps_to_none() {
        let mut ep = episode();
        ep.duration_ms = Some(300);
        let outcome = map_episodes(&[ep], &show(), Utc::now());
        assert_eq!(outcome.entries[0].duration_seconds, None);
    }

    #[test]
    fn link_falls_back_to_constructed_episode_url() {
        let mut ep = episode();
        ep.external_urls = None;
        let outcome = map_episodes(&[ep], &show(), Utc::now());
        assert_eq!(
            outcome.entries[0].url,
            "https://open.spotify.com/episode/ep1"
        );
    }
}
