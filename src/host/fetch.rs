//! Network reads for remote attachment locators.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Raw payload of a resolved locator. A non-success status is carried here,
/// not raised as an error — the image pipeline decides what to record.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors raised before a status line exists (transport failures, schemes
/// the fetcher cannot handle).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported locator scheme: {0}")]
    UnsupportedScheme(String),
    #[error("network error: {0}")]
    Transport(String),
}

/// Resolves a remote locator to bytes. Implementations must not retry;
/// retry policy belongs to the caller's failure records.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<FetchedResource, FetchError>;
}

/// [`ResourceFetcher`] backed by a shared `reqwest` client.
///
/// Where the origin requires credentials, construct the client with the
/// session's cookies/headers and pass it through [`with_client`](Self::with_client).
#[derive(Debug, Clone, Default)]
pub struct HttpResourceFetcher {
    client: reqwest::Client,
}

impl HttpResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, locator: &str) -> Result<FetchedResource, FetchError> {
        if !locator.starts_with("http://") && !locator.starts_with("https://") {
            let scheme = locator.split(':').next().unwrap_or("").to_string();
            return Err(FetchError::UnsupportedScheme(scheme));
        }

        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_vec();

        Ok(FetchedResource {
            status,
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_is_2xx() {
        let ok = FetchedResource {
            status: 204,
            content_type: None,
            bytes: vec![],
        };
        let missing = FetchedResource {
            status: 404,
            content_type: None,
            bytes: vec![],
        };
        assert!(ok.is_success());
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let fetcher = HttpResourceFetcher::new();
        let err = fetcher.fetch("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(s) if s == "ftp"));
    }
}
