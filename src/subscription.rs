// src/subscription.rs
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::SourceKind;

/// A user's registered interest in one external source. Owned by the external
/// subscription store; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_kind: SourceKind,
    /// Channel id, show id, or feed URL depending on the kind.
    pub source_id: String,
    pub source_name: Option<String>,
    /// Free-form metadata; may carry a `provider` hint for podcasts.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// The pipeline a subscription is routed to, decided exactly once per cycle
/// entry rather than re-sniffed from untyped metadata downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteBucket {
    Syndication,
    VideoPlatform,
    PodcastPlatform,
}

impl RouteBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteBucket::Syndication => "syndication",
            RouteBucket::VideoPlatform => "video_platform",
            RouteBucket::PodcastPlatform => "podcast_platform",
        }
    }
}

fn spotify_show_id_shape(id: &str) -> bool {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    RE.get_or_init(|| regex::Regex::new(r"^[0-9A-Za-z]{22}$").unwrap())
        .is_match(id)
}

impl Subscription {
    fn provider_hint(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("provider"))
            .and_then(|v| v.as_str())
    }

    /// Pure routing function of (source kind, metadata, id shape). Returns
    /// `None` for inactive subscriptions and kinds no pipeline serves.
    pub fn route(&self) -> Option<RouteBucket> {
        if !self.is_active {
            return None;
        }
        match self.source_kind {
            SourceKind::Youtube => Some(RouteBucket::VideoPlatform),
            SourceKind::News => Some(RouteBucket::Syndication),
            SourceKind::Podcast => {
                // Dedicated podcast API only when the subscription says so,
                // or when the id is unambiguously a show id; everything else
                // is a podcast feed served over plain syndication.
                if self.provider_hint() == Some("spotify")
                    || spotify_show_id_shape(&self.source_id)
                {
                    Some(RouteBucket::PodcastPlatform)
                } else {
                    Some(RouteBucket::Syndication)
                }
            }
            SourceKind::Topic => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(kind: SourceKind, source_id: &str, metadata: Option<serde_json::Value>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source_kind: kind,
            source_id: source_id.to_string(),
            source_name: Some("Example".into()),
            metadata,
            is_active: true,
        }
    }

    #[test]
    fn provider_hint_routes_podcast_to_platform() {
        let s = sub(
            SourceKind::Podcast,
            "https://example.test/feed.xml",
            Some(serde_json::json!({"provider": "spotify"})),
        );
        assert_eq!(s.route(), Some(RouteBucket::PodcastPlatform));
    }

    #[test]
    fn show_id_shape_routes_podcast_to_platform() {
        let s = sub(SourceKind::Podcast, "4rOoJ6Egrf8K2IrywzwOMk", None);
        assert_eq!(s.route(), Some(RouteBucket::PodcastPlatform));
    }

    #[test]
    fn plain_podcast_feed_routes_to_syndication() {
        let s = sub(SourceKind::Podcast, "https://example.test/showfeed.xml", None);
        assert_eq!(s.route(), Some(RouteBucket::Syndication));
    }

    #[test]
    fn news_and_youtube_route_directly() {
        assert_eq!(
            sub(SourceKind::News, "https://example.test/f.xml", None).route(),
            Some(RouteBucket::Syndication)
        );
        assert_eq!(
            sub(SourceKind::Youtube, "UCAbCdEfGhIjKlMnOpQrStUv", None).route(),
            Some(RouteBucket::VideoPlatform)
        );
    }

    #[test]
    fn inactive_and_topic_route_nowhere() {
        let mut s = sub(SourceKind::News, "https://example.test/f.xml", None);
        s.is_active = false;
        assert_eq!(s.route(), None);
        assert_eq!(sub(SourceKind::Topic, "rust", None).route(), None);
    }
}
