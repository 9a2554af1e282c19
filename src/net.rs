// src/net.rs
// Shared retrying HTTP layer. Every remote call in the crate goes through
// `with_retry` + one of the fetch helpers, so the backoff budget and the
// per-attempt timeout live in exactly one place.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

const ERROR_BODY_CAP: usize = 256;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Transport hiccups, timeouts and 5xx-class answers are worth another
    /// attempt; 4xx answers and decode failures fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Transport(err) => !(err.is_decode() || err.is_builder()),
        }
    }
}

/// Backoff policy shared by all pipelines. `max_attempts` counts total
/// attempts, so `3` means one try plus two retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: true,
        }
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the attempt
/// budget is spent. Delays grow by `factor` per attempt; jitter multiplies
/// each delay by a random factor in `[1, 2)`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && err.is_retryable() => {
                let pause = if policy.jitter {
                    delay.mul_f64(1.0 + rand::random::<f64>())
                } else {
                    delay
                };
                tracing::debug!(
                    attempt,
                    delay_ms = pause.as_millis() as u64,
                    error = %err,
                    "transient fetch failure, backing off"
                );
                tokio::time::sleep(pause).await;
                delay = delay.mul_f64(policy.factor);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Send the request and read the body as text, all inside one per-attempt
/// timeout. Non-success statuses become `FetchError::Status`.
pub async fn fetch_text(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<String, FetchError> {
    let fut = async {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }
        Ok(response.text().await?)
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

/// Same as [`fetch_text`] but decodes a JSON body.
pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, FetchError> {
    let fut = async {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }
        Ok(response.json::<T>().await?)
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

fn status_error(status: u16, body: String) -> FetchError {
    let body = if body.chars().count() > ERROR_BODY_CAP {
        body.chars().take(ERROR_BODY_CAP).collect()
    } else {
        body
    };
    FetchError::Status { status, body }
}
