//! Shared HTTP plumbing for the external clients: one retry loop with
//! exponential backoff and status classification.
//!
//! | Outcome | Result |
//! |---------|--------|
//! | 2xx, 404 | `Ok(response)` (callers decide what 404 means) |
//! | 401, 403 | [`ShelfError::Auth`], no retry |
//! | 429, 5xx, network error | retried, then [`ShelfError::TransientNetwork`] |
//! | other 4xx | plain error, no retry |

use anyhow::{bail, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use starshelf_core::error::ShelfError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt up to 32×.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("starshelf/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Send the request built by `make`, retrying transient failures.
pub async fn send_with_retry<F>(policy: &RetryPolicy, service: &str, make: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = String::new();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match make().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status == StatusCode::NOT_FOUND {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(ShelfError::Auth(format!(
                        "{} rejected credentials ({}): {}",
                        service, status, body_text
                    ))
                    .into());
                }

                // Rate limited or server error; retry
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    last_err = format!("{} API error {}: {}", service, status, body_text);
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = format!("{} request failed: {}", service, e);
                continue;
            }
        }
    }

    Err(ShelfError::TransientNetwork(last_err).into())
}

/// Decode a JSON body, classifying failures as [`ShelfError::Parse`].
pub async fn json_body<T: serde::de::DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| ShelfError::TransientNetwork(format!("{}: {}", what, e)))?;
    serde_json::from_str(&text)
        .map_err(|e| ShelfError::Parse(format!("{}: {}", what, e)).into())
}
