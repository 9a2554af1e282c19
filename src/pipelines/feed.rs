// src/pipelines/feed.rs
// Syndication pipeline: fetch an RSS 2.0 or Atom document, flatten the
// heterogeneous shapes into one in-memory feed, map items to canonical
// candidates. Feeds in the wild are sloppy; every optional element here has
// been seen missing, duplicated, or encoded the other way.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header;
use serde::Deserialize;
use thiserror::Error;

use crate::content::{
    clean_text, parse_clock_duration, parse_datetime, truncate_chars, validate, CandidateContent,
    SourceKind,
};
use crate::net::{self, RetryPolicy};
use crate::pipelines::{MapOutcome, SkippedItem, DEFAULT_TIMEOUT, USER_AGENT};
use crate::subscription::Subscription;
use crate::types::{ContentSink, IngestResult};

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.1";
const MAX_FEED_DESCRIPTION: usize = 2000;

#[derive(Debug, Error)]
#[error("unable to parse feed XML: {0}")]
pub struct FeedParseError(#[from] quick_xml::DeError);

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct FeedIngestor {
    client: reqwest::Client,
    opts: FeedOptions,
}

impl FeedIngestor {
    pub fn new(client: reqwest::Client, opts: FeedOptions) -> Self {
        Self { client, opts }
    }

    /// Process one subscription end to end. Never fails: fetch or parse
    /// trouble becomes an `errors: 1` result for this subscription only.
    pub async fn ingest_subscription(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
    ) -> IngestResult {
        let now = Utc::now();
        if !matches!(
            subscription.source_kind,
            SourceKind::News | SourceKind::Podcast
        ) {
            return IngestResult::noop(subscription.id, subscription.source_name.clone(), now);
        }

        match self.run(sink, subscription, now).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    target: "ingest",
                    subscription_id = %subscription.id,
                    source_id = %subscription.source_id,
                    error = %err,
                    "feed ingest failed"
                );
                IngestResult::failure(subscription.id, subscription.source_name.clone(), now)
            }
        }
    }

    async fn run(
        &self,
        sink: &dyn ContentSink,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IngestResult> {
        let xml = net::with_retry(&self.opts.retry, || {
            let request = self
                .client
                .get(&subscription.source_id)
                .header(header::ACCEPT, FEED_ACCEPT)
                .header(header::USER_AGENT, USER_AGENT);
            net::fetch_text(request, self.opts.timeout)
        })
        .await?;

        let feed = parse_feed(&xml)?;
        let attempted = feed.items.len();
        let outcome = map_feed_items(&feed, subscription, now);
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
            feed_title: feed.title.clone(),
            fetched_at: now,
        })
    }
}

fn map_feed_items(feed: &ParsedFeed, subscription: &Subscription, now: DateTime<Utc>) -> MapOutcome {
    let mut outcome = MapOutcome::default();
    for item in &feed.items {
        let candidate = CandidateContent {
            source_kind: subscription.source_kind,
            external_id: item.id.clone(),
            source_id: subscription.source_id.clone(),
            title: clean_text(&item.title),
            url: item.link.clone(),
            creator: item
                .author
                .clone()
                .or_else(|| subscription.source_name.clone()),
            thumbnail_url: item.image_url.clone().or_else(|| feed.image_url.clone()),
            description: item
                .description
                .as_deref()
                .map(|d| truncate_chars(d, MAX_FEED_DESCRIPTION)),
            published_at: item.published_at.unwrap_or(now),
            duration_seconds: item.duration_seconds,
            summary: None,
            topics: None,
        };
        match validate(candidate) {
            Ok(entry) => outcome.entries.push(entry),
            Err(err) => outcome.skipped.push(SkippedItem {
                external_id: item.id.clone(),
                title: item.title.clone(),
                reason: err.issues.join("; "),
            }),
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Parsing

/// Uniform in-memory feed, source format erased.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub items: Vec<FeedItem>,
}

/// One feed item that survived fallback resolution: id, title and link are
/// all present. Items missing any of the three never leave the parser.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u32>,
}

pub fn parse_feed(xml: &str) -> Result<ParsedFeed, FeedParseError> {
    // RSS roots carry a <channel>; an Atom document deserializes here with
    // channel: None and falls through.
    if let Ok(doc) = quick_xml::de::from_str::<RssDocument>(xml) {
        if let Some(channel) = doc.channel {
            return Ok(flatten_rss(channel));
        }
    }
    let atom: AtomDocument = quick_xml::de::from_str(xml)?;
    Ok(flatten_atom(atom))
}

/// Element that may carry text, possibly alongside attributes (CDATA and
/// typed Atom text constructs land here too).
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text")]
    value: Option<String>,
}

impl Text {
    fn get(&self) -> Option<String> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn text_of(node: &Option<Text>) -> Option<String> {
    node.as_ref().and_then(Text::get)
}

/// Link encoded either as plain text (RSS) or as an attribute-bearing node
/// (Atom `href`).
#[derive(Debug, Default, Deserialize)]
struct LinkNode {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "$text")]
    text: Option<String>,
}

impl LinkNode {
    fn url(&self) -> Option<String> {
        self.href
            .as_deref()
            .or(self.text.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Image reference in any of its encodings: `url`/`href` attribute
/// (media:thumbnail, itunes:image), nested `<url>` child (RSS channel image),
/// or bare text.
#[derive(Debug, Default, Deserialize)]
struct ImageNode {
    #[serde(rename = "@url")]
    url_attr: Option<String>,
    #[serde(rename = "@href")]
    href_attr: Option<String>,
    url: Option<Text>,
    #[serde(rename = "$text")]
    text: Option<String>,
}

impl ImageNode {
    fn image_url(&self) -> Option<String> {
        self.url_attr
            .as_deref()
            .or(self.href_attr.as_deref())
            .map(str::to_string)
            .or_else(|| text_of(&self.url))
            .or_else(|| {
                self.text
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
    }
}

fn image_of(node: &Option<ImageNode>) -> Option<String> {
    node.as_ref().and_then(ImageNode::image_url)
}

#[derive(Debug, Default, Deserialize)]
struct EnclosureNode {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

impl EnclosureNode {
    fn image_url(&self) -> Option<String> {
        // Podcast enclosures are audio; only borrow them as artwork when the
        // mime type says image.
        match (&self.url, &self.mime) {
            (Some(url), Some(mime)) if mime.starts_with("image/") => Some(url.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssDocument {
    channel: Option<RssChannel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssChannel {
    title: Option<Text>,
    link: Option<LinkNode>,
    image: Option<ImageNode>,
    #[serde(rename = "itunes:image")]
    itunes_image: Option<ImageNode>,
    #[serde(rename = "thumbnail")]
    media_thumbnail: Option<ImageNode>,
    #[serde(rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssItem {
    guid: Option<Text>,
    title: Option<Text>,
    link: Option<LinkNode>,
    description: Option<Text>,
    #[serde(rename = "encoded")]
    content_encoded: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(rename = "date")]
    dc_date: Option<Text>,
    // Atom-style elements that hybrid feeds put on RSS items.
    published: Option<Text>,
    updated: Option<Text>,
    summary: Option<Text>,
    content: Option<Text>,
    #[serde(rename = "creator")]
    dc_creator: Option<Text>,
    author: Option<Text>,
    enclosure: Option<EnclosureNode>,
    #[serde(rename = "thumbnail")]
    media_thumbnail: Vec<ImageNode>,
    #[serde(rename = "media:content")]
    media_content: Vec<ImageNode>,
    #[serde(rename = "itunes:image")]
    itunes_image: Option<ImageNode>,
    #[serde(rename = "duration")]
    itunes_duration: Option<Text>,
    image: Option<ImageNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomDocument {
    title: Option<Text>,
    #[serde(rename = "link")]
    links: Vec<LinkNode>,
    logo: Option<Text>,
    icon: Option<Text>,
    #[serde(rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomEntry {
    id: Option<Text>,
    title: Option<Text>,
    #[serde(rename = "link")]
    links: Vec<LinkNode>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<Text>,
    updated: Option<Text>,
    author: Option<AtomAuthor>,
    #[serde(rename = "thumbnail")]
    media_thumbnail: Vec<ImageNode>,
}

/// Author as a structured `<name>` child or, in looser feeds, bare text.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomAuthor {
    name: Option<Text>,
    #[serde(rename = "$text")]
    text: Option<String>,
}

impl AtomAuthor {
    fn value(&self) -> Option<String> {
        text_of(&self.name).or_else(|| {
            self.text
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

fn flatten_rss(channel: RssChannel) -> ParsedFeed {
    let image_url = image_of(&channel.image)
        .or_else(|| image_of(&channel.itunes_image))
        .or_else(|| image_of(&channel.media_thumbnail));

    let items = channel.items.iter().filter_map(resolve_rss_item).collect();

    ParsedFeed {
        title: text_of(&channel.title).map(|t| clean_text(&t)),
        link: channel.link.as_ref().and_then(LinkNode::url),
        image_url,
        items,
    }
}

fn resolve_rss_item(item: &RssItem) -> Option<FeedItem> {
    let guid = text_of(&item.guid);
    let title = text_of(&item.title)?;
    let link = item.link.as_ref().and_then(LinkNode::url)?;
    let id = guid.unwrap_or_else(|| link.clone());

    let description = text_of(&item.content_encoded)
        .or_else(|| text_of(&item.description))
        .or_else(|| text_of(&item.summary))
        .or_else(|| text_of(&item.content));
    let author = text_of(&item.dc_creator).or_else(|| text_of(&item.author));
    let image_url = item
        .media_thumbnail
        .iter()
        .chain(item.media_content.iter())
        .find_map(ImageNode::image_url)
        .or_else(|| image_of(&item.itunes_image))
        .or_else(|| image_of(&item.image))
        .or_else(|| item.enclosure.as_ref().and_then(EnclosureNode::image_url));
    let published_at = text_of(&item.pub_date)
        .or_else(|| text_of(&item.dc_date))
        .or_else(|| text_of(&item.published))
        .or_else(|| text_of(&item.updated))
        .and_then(|s| parse_datetime(&s));
    let duration_seconds = text_of(&item.itunes_duration).and_then(|s| parse_clock_duration(&s));

    Some(FeedItem {
        id,
        title,
        link,
        description,
        author,
        image_url,
        published_at,
        duration_seconds,
    })
}

fn flatten_atom(doc: AtomDocument) -> ParsedFeed {
    let link = pick_atom_link(&doc.links);
    let image_url = text_of(&doc.logo).or_else(|| text_of(&doc.icon));
    let items = doc.entries.iter().filter_map(resolve_atom_entry).collect();

    ParsedFeed {
        title: text_of(&doc.title).map(|t| clean_text(&t)),
        link,
        image_url,
        items,
    }
}

fn resolve_atom_entry(entry: &AtomEntry) -> Option<FeedItem> {
    let id = text_of(&entry.id);
    let title = text_of(&entry.title)?;
    // Entries without a link element sometimes carry a resolvable URL as id.
    let link = pick_atom_link(&entry.links).or_else(|| {
        id.clone().filter(|candidate| candidate.starts_with("http"))
    })?;
    let id = id.unwrap_or_else(|| link.clone());

    let description = text_of(&entry.summary).or_else(|| text_of(&entry.content));
    let author = entry.author.as_ref().and_then(AtomAuthor::value);
    let image_url = entry.media_thumbnail.iter().find_map(ImageNode::image_url);
    let published_at = text_of(&entry.published)
        .or_else(|| text_of(&entry.updated))
        .and_then(|s| parse_datetime(&s));

    Some(FeedItem {
        id,
        title,
        link,
        description,
        author,
        image_url,
        published_at,
        duration_seconds: None,
    })
}

fn pick_atom_link(links: &[LinkNode]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .and_then(LinkNode::url)
        .or_else(|| links.iter().find_map(LinkNode::url))
}
