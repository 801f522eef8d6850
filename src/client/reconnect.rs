//! Client reconnection policy.
//!
//! The server never dials out; after any close it simply accepts a fresh
//! connection for a known client identifier. Re-establishing the link is
//! the client's job, driven by an explicit retry policy: a fixed delay
//! between attempts, with no attempt cap.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};
use url::Url;

/// Errors from connection establishment.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint URL could not be parsed; retrying would never help.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Fixed-delay, unbounded reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before the given attempt. Fixed: every attempt waits the same.
    pub fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Whether another attempt is allowed. Always true: the client retries
    /// indefinitely and relies on the server accepting a fresh connection
    /// for its identifier whenever it comes back.
    pub fn should_retry(&self, _attempt: u32) -> bool {
        true
    }
}

/// A connected client WebSocket stream.
pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial `endpoint` until a connection is established, sleeping the policy's
/// delay after every failed attempt.
pub async fn connect_with_retry(
    endpoint: &str,
    policy: &ReconnectPolicy,
) -> Result<ClientStream, ClientError> {
    // Validate once up front so a typo is not retried forever.
    Url::parse(endpoint).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match connect_async(endpoint).await {
            Ok((stream, _response)) => {
                info!(endpoint, attempt, "connected");
                return Ok(stream);
            }
            Err(e) => {
                warn!(endpoint, attempt, error = %e, "connection attempt failed, retrying");
                tokio::time::sleep(policy.next_delay(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_three_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(3));
    }

    #[test]
    fn test_delay_is_fixed_across_attempts() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.next_delay(1), Duration::from_millis(250));
        assert_eq!(policy.next_delay(100), Duration::from_millis(250));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(250));
    }

    #[test]
    fn test_retries_are_unbounded() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(10_000));
        assert!(policy.should_retry(u32::MAX));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_retrying() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(1));
        let result = connect_with_retry("not a url", &policy).await;
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }
}
