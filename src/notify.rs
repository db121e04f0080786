//! Webhook notification sender.
//!
//! Fire-and-forget JSON POST with bounded retry: a fixed number of
//! attempts, exponential backoff doubling from the initial delay, no
//! jitter, no circuit breaking. The final failure surfaces as an error
//! after the last attempt.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Production policy: 3 attempts, 1s then 2s between them.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification to {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

#[derive(Clone)]
pub struct NotifySender {
    client: reqwest::Client,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl Default for NotifySender {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifySender {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_BACKOFF)
    }

    /// Override the retry policy (tests use millisecond backoffs).
    pub fn with_policy(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Delay before retrying after attempt `attempt` (1-based): the initial
    /// backoff doubled per prior failure.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// POST `payload` as JSON to `url`, retrying per the policy. A non-2xx
    /// response counts as a failed attempt.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<(), NotifyError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.client.post(url).json(payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Notification delivered to {} (attempt {})", url, attempt);
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                    warn!(
                        "Notification to {} failed: {} (attempt {}/{})",
                        url, last_error, attempt, self.max_attempts
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "Notification to {} failed: {} (attempt {}/{})",
                        url, last_error, attempt, self.max_attempts
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        Err(NotifyError::Exhausted {
            url: url.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_backoff_schedule() {
        let sender = NotifySender::new();
        assert_eq!(sender.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(sender.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(sender.backoff_delay(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_delivers_on_first_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body(json!({"hello": "world"}));
            then.status(200);
        });

        let sender = NotifySender::with_policy(3, Duration::from_millis(5));
        sender
            .send_json(&server.url("/hook"), &json!({"hello": "world"}))
            .await
            .unwrap();

        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_exhausts_after_three_failures() {
        let server = MockServer::start();
        let failures = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(500);
        });

        let sender = NotifySender::with_policy(3, Duration::from_millis(5));
        let err = sender
            .send_json(&server.url("/hook"), &json!({"n": 1}))
            .await
            .unwrap_err();

        failures.assert_hits(3);
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"), "unexpected error: {msg}");
        assert!(msg.contains("500"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn test_connection_errors_also_exhaust() {
        // Nothing listens on this port.
        let sender = NotifySender::with_policy(2, Duration::from_millis(5));
        let err = sender
            .send_json("http://127.0.0.1:9/hook", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
