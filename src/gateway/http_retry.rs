//! Retry wrapper for idempotent gateway requests.
//!
//! `send_with_retry()` replaces `client.execute(request)` for listing and
//! metadata reads:
//! - Exponential backoff with jitter on 429 (Too Many Requests), 500, 502,
//!   503 (S3 `SlowDown`) and 504
//! - Retry-After header honoured when present (seconds form)
//! - Non-retryable statuses pass straight through to the caller
//!
//! Mutations (PUT/DELETE/POST) are never routed through here.

use reqwest::{Client, Request, Response};
use std::time::Duration;

use super::StorageError;

/// Configuration for HTTP retry behavior
#[derive(Debug, Clone)]
pub struct HttpRetryConfig {
    /// Maximum number of retry attempts after the first request
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl HttpRetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Parse a numeric Retry-After header, capped at 30 seconds
fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(30)))
}

/// Delay for a given retry attempt, with 10-30% jitter
fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

/// Send a request, retrying on 429/5xx.
///
/// The request body (if any) must be buffered; streaming bodies cannot be
/// replayed and are sent exactly once.
pub async fn send_with_retry(
    client: &Client,
    request: Request,
    config: &HttpRetryConfig,
) -> Result<Response, StorageError> {
    let replay = request.try_clone();
    let method = request.method().clone();
    let url = request.url().clone();

    let mut last_response = client.execute(request).await?;

    let Some(template) = replay else {
        return Ok(last_response);
    };

    for attempt in 0..config.max_retries {
        if !is_retryable_status(last_response.status().as_u16()) {
            return Ok(last_response);
        }

        let delay = parse_retry_after(&last_response)
            .unwrap_or_else(|| calculate_delay(attempt, config));

        tracing::debug!(
            "[S3] {} {} returned {}. Retry {}/{} after {:?}",
            method,
            url.path(),
            last_response.status(),
            attempt + 1,
            config.max_retries,
            delay
        );

        tokio::time::sleep(delay).await;

        let retry = template
            .try_clone()
            .ok_or_else(|| StorageError::Other("request cannot be replayed".to_string()))?;
        last_response = client.execute(retry).await?;
    }

    Ok(last_response)
}
