// src/content.rs
// Canonical content shape shared by every pipeline: loose candidates go in,
// validated records with a dedupe fingerprint come out.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_TITLE_CHARS: usize = 240;
pub const MAX_CREATOR_CHARS: usize = 180;
pub const MAX_TOPICS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Youtube,
    Podcast,
    News,
    Topic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Youtube => "youtube",
            SourceKind::Podcast => "podcast",
            SourceKind::News => "news",
            SourceKind::Topic => "topic",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loosely-typed record as produced by a pipeline mapper, before validation.
#[derive(Debug, Clone)]
pub struct CandidateContent {
    pub source_kind: SourceKind,
    pub external_id: String,
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub creator: Option<String>,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
    pub summary: Option<String>,
    pub topics: Option<Vec<String>>,
}

/// Validated, normalized record with the fingerprint populated. This is the
/// only shape the content sink ever sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalContent {
    pub source_kind: SourceKind,
    pub external_id: String,
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub creator: Option<String>,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
    pub summary: Option<String>,
    pub topics: Option<Vec<String>>,
    pub fingerprint: String,
}

impl CanonicalContent {
    /// Natural key for idempotent upserts.
    pub fn dedupe_key(&self) -> (SourceKind, &str) {
        (self.source_kind, self.external_id.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("validation failed: {}", issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

/// Validate a candidate against the canonical schema. Collects every violated
/// field instead of stopping at the first one, so skip reasons stay useful.
pub fn validate(candidate: CandidateContent) -> Result<CanonicalContent, ValidationError> {
    let mut issues = Vec::new();

    let external_id = candidate.external_id.trim().to_string();
    if external_id.is_empty() {
        issues.push("external_id must not be empty".to_string());
    }

    let source_id = candidate.source_id.trim().to_string();
    if source_id.is_empty() {
        issues.push("source_id must not be empty".to_string());
    }

    let title = candidate.title.trim().to_string();
    if title.is_empty() {
        issues.push("title must not be empty".to_string());
    } else if title.chars().count() > MAX_TITLE_CHARS {
        issues.push(format!("title exceeds {MAX_TITLE_CHARS} characters"));
    }

    let url = candidate.url.trim().to_string();
    if url.is_empty() {
        issues.push("url must not be empty".to_string());
    } else if url::Url::parse(&url).is_err() {
        issues.push(format!("url is not a valid URL: {url}"));
    }

    let creator = candidate.creator.as_deref().map(str::trim);
    match creator {
        Some("") => issues.push("creator must not be empty when present".to_string()),
        Some(c) if c.chars().count() > MAX_CREATOR_CHARS => {
            issues.push(format!("creator exceeds {MAX_CREATOR_CHARS} characters"));
        }
        _ => {}
    }

    let thumbnail_url = candidate.thumbnail_url.as_deref().map(str::trim);
    if let Some(thumb) = thumbnail_url {
        if thumb.is_empty() || url::Url::parse(thumb).is_err() {
            issues.push(format!("thumbnail_url is not a valid URL: {thumb}"));
        }
    }

    if let Some(topics) = &candidate.topics {
        if topics.len() > MAX_TOPICS {
            issues.push(format!("topics exceeds {MAX_TOPICS} entries"));
        }
        if topics.iter().any(|t| t.trim().is_empty()) {
            issues.push("topics must not contain empty entries".to_string());
        }
    }

    if candidate.duration_seconds == Some(0) {
        issues.push("duration_seconds must be positive when present".to_string());
    }

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }

    let fingerprint = fingerprint(candidate.source_kind, &external_id, &url, &title);
    Ok(CanonicalContent {
        source_kind: candidate.source_kind,
        external_id,
        source_id,
        title,
        url,
        creator: creator.map(str::to_string),
        thumbnail_url: thumbnail_url.map(str::to_string),
        description: candidate.description,
        published_at: candidate.published_at,
        duration_seconds: candidate.duration_seconds,
        summary: candidate.summary,
        topics: candidate.topics,
        fingerprint,
    })
}

/// Dedupe fingerprint: SHA-256 over the ordered natural-key tuple. The title
/// participates trimmed and lower-cased so trivial reformatting upstream does
/// not produce a new identity.
pub fn fingerprint(kind: SourceKind, external_id: &str, url: &str, title: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized_title = title.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(external_id.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_title.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Cleanup for titles and other single-line text pulled out of feeds:
/// entity decode, tag strip, whitespace collapse, trim.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Char-based truncation; upstream descriptions can be arbitrarily large.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Coerce the publish-date representations the three upstreams actually emit:
/// RFC 2822 (RSS pubDate), RFC 3339 (Atom / API timestamps), bare dates and
/// naive datetimes (Spotify release_date).
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

/// Parse `HH:MM:SS`, `MM:SS` or bare-seconds clock durations (itunes:duration
/// style). Returns whole seconds; zero-length maps to `None`.
pub fn parse_clock_duration(raw: &str) -> Option<u32> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let mut total: u64 = 0;
    for part in s.split(':') {
        let n: u64 = part.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(n)?;
    }
    if total == 0 {
        None
    } else {
        u32::try_from(total).ok()
    }
}
