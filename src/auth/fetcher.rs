//! Outbound JSON fetches to provider endpoints

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Fetch failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {0} was rejected as unauthorized")]
    Unauthorized(String),

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Invalid JSON from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Fetch a URL and parse the body as JSON
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    /// GET `url`, optionally with a bearer token
    async fn get_json(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, FetchError>;
}

/// reqwest-backed fetcher with a per-request timeout
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("marketplace-auth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn get_json(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| transport_error(url, e))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Unauthorized(url.to_string()))
            }
            status => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                })
            }
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Decode {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(10)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_or_timeout() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is closed in test environments
        let result = fetcher.get_json("http://127.0.0.1:9/keys", None).await;
        assert!(matches!(
            result,
            Err(FetchError::Transport { .. }) | Err(FetchError::Timeout(_))
        ));
    }

    #[test]
    fn test_error_messages_name_the_url() {
        let err = FetchError::Status {
            url: "https://example.com/keys".to_string(),
            status: 503,
        };
        assert!(err.to_string().contains("https://example.com/keys"));
        assert!(err.to_string().contains("503"));
    }
}
