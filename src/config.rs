// src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::net::RetryPolicy;
use crate::pipelines::feed::FeedOptions;
use crate::pipelines::spotify::{SpotifyCredentials, SpotifyOptions};
use crate::pipelines::youtube::YoutubeOptions;
use crate::scheduler::SchedulerConfig;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";

/// Ingestion settings. Everything has a workable default; API credentials
/// come from the environment and are never written to the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schedule: ScheduleSettings,
    pub fetch: FetchSettings,
    pub youtube: YoutubeSettings,
    pub spotify: SpotifySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_secs: u64,
    pub run_on_start: bool,
    pub delay_between_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            run_on_start: true,
            delay_between_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_retry_ms: u64,
    pub retry_factor: f64,
    pub randomize_backoff: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 3,
            initial_retry_ms: 500,
            retry_factor: 2.0,
            randomize_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    pub api_key: Option<String>,
    pub max_results: u32,
    pub max_pages: u32,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            max_results: 50,
            max_pages: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpotifySettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub market: String,
    pub max_pages: u32,
}

impl Default for SpotifySettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            market: "US".to_string(),
            max_pages: 5,
        }
    }
}

/// Load settings from an explicit TOML path.
pub fn load_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(settings)
}

/// Load settings using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) built-in defaults
/// Credentials are then overlaid from the environment.
pub fn load_default() -> Result<Settings> {
    let mut settings = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
        load_from(&pb)?
    } else {
        let default_path = PathBuf::from("config/ingest.toml");
        if default_path.exists() {
            load_from(&default_path)?
        } else {
            Settings::default()
        }
    };
    settings.apply_env_credentials();
    Ok(settings)
}

impl Settings {
    pub fn apply_env_credentials(&mut self) {
        if let Ok(key) = std::env::var("YOUTUBE_API_KEY") {
            if !key.trim().is_empty() {
                self.youtube.api_key = Some(key);
            }
        }
        if let Ok(id) = std::env::var("SPOTIFY_CLIENT_ID") {
            if !id.trim().is_empty() {
                self.spotify.client_id = Some(id);
            }
        }
        if let Ok(secret) = std::env::var("SPOTIFY_CLIENT_SECRET") {
            if !secret.trim().is_empty() {
                self.spotify.client_secret = Some(secret);
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_retries,
            initial_delay: Duration::from_millis(self.fetch.initial_retry_ms),
            factor: self.fetch.retry_factor,
            jitter: self.fetch.randomize_backoff,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.fetch.timeout_ms)
    }

    pub fn delay_between(&self) -> Duration {
        Duration::from_millis(self.schedule.delay_between_ms)
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            timeout: self.timeout(),
            retry: self.retry_policy(),
        }
    }

    pub fn youtube_options(&self) -> YoutubeOptions {
        YoutubeOptions {
            api_key: self.youtube.api_key.clone(),
            max_results: self.youtube.max_results,
            max_pages: self.youtube.max_pages,
            timeout: self.timeout(),
            retry: self.retry_policy(),
            ..YoutubeOptions::default()
        }
    }

    pub fn spotify_options(&self) -> SpotifyOptions {
        let credentials = match (&self.spotify.client_id, &self.spotify.client_secret) {
            (Some(id), Some(secret)) => Some(SpotifyCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        };
        SpotifyOptions {
            credentials,
            market: self.spotify.market.clone(),
            max_pages: self.spotify.max_pages,
            timeout: self.timeout(),
            retry: self.retry_policy(),
            ..SpotifyOptions::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.schedule.interval_secs),
            run_on_start: self.schedule.run_on_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn toml_overrides_defaults_and_gaps_fall_back() {
        let toml = r#"
            [schedule]
            interval_secs = 60

            [fetch]
            max_retries = 5

            [spotify]
            market = "DE"
        "#;
        let s: Settings = toml::from_str(toml).unwrap();
        assert_eq!(s.schedule.interval_secs, 60);
        assert!(s.schedule.run_on_start);
        assert_eq!(s.fetch.max_retries, 5);
        assert_eq!(s.fetch.timeout_ms, 15_000);
        assert_eq!(s.spotify.market, "DE");
        assert_eq!(s.youtube.max_pages, 5);
    }

    #[test]
    fn retry_policy_reflects_fetch_settings() {
        let mut s = Settings::default();
        s.fetch.max_retries = 2;
        s.fetch.initial_retry_ms = 100;
        s.fetch.randomize_backoff = false;
        let policy = s.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert!(!policy.jitter);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_path_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);
        env::remove_var("YOUTUBE_API_KEY");
        env::remove_var("SPOTIFY_CLIENT_ID");
        env::remove_var("SPOTIFY_CLIENT_SECRET");

        // No files in the temp CWD: built-in defaults.
        let s = load_default().unwrap();
        assert_eq!(s.schedule.interval_secs, 900);

        // Env var takes precedence.
        let p = tmp.path().join("ingest.toml");
        fs::write(&p, "[schedule]\ninterval_secs = 30\n").unwrap();
        env::set_var(ENV_PATH, p.display().to_string());
        let s2 = load_default().unwrap();
        assert_eq!(s2.schedule.interval_secs, 30);
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn env_credentials_overlay() {
        env::set_var("YOUTUBE_API_KEY", "yt-key");
        env::set_var("SPOTIFY_CLIENT_ID", "sp-id");
        env::set_var("SPOTIFY_CLIENT_SECRET", "sp-secret");
        let mut s = Settings::default();
        s.apply_env_credentials();
        assert_eq!(s.youtube.api_key.as_deref(), Some("yt-key"));
        assert!(s.spotify_options().credentials.is_some());
        env::remove_var("YOUTUBE_API_KEY");
        env::remove_var("SPOTIFY_CLIENT_ID");
        env::remove_var("SPOTIFY_CLIENT_SECRET");
    }
}
