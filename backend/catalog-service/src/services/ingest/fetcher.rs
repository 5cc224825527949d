//! Source image fetcher
//!
//! Downloads raw image bytes with a bounded per-request timeout and sorts
//! failures into retryable (network, 5xx) and terminal (malformed URL, 4xx)
//! so the worker can decide between redelivery and dropping.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Worth another attempt: the source may become reachable again.
    #[error("retryable fetch failure: {0}")]
    Retryable(String),

    /// Will never succeed; the work item should be dropped.
    #[error("terminal fetch failure: {0}")]
    Terminal(String),
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// Fetcher over a shared reqwest client with a global request timeout.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    http: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        if reqwest::Url::parse(url).is_err() {
            return Err(FetchError::Terminal(format!("malformed URL: {url}")));
        }

        let response = self.http.get(url).send().await.map_err(classify_transport)?;
        classify_status(response.status())?;

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Retryable(format!("reading response body failed: {e}")))
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Retryable(format!("download timed out: {err}"))
    } else if err.is_redirect() {
        FetchError::Terminal(format!("redirect policy exhausted: {err}"))
    } else {
        FetchError::Retryable(format!("transport failure: {err}"))
    }
}

fn classify_status(status: StatusCode) -> std::result::Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        Err(FetchError::Terminal(format!("source returned {status}")))
    } else {
        Err(FetchError::Retryable(format!("source returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_passes() {
        assert!(classify_status(StatusCode::OK).is_ok());
    }

    #[test]
    fn not_found_is_terminal() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Err(FetchError::Terminal(_))
        ));
    }

    #[test]
    fn gone_is_terminal() {
        assert!(matches!(
            classify_status(StatusCode::GONE),
            Err(FetchError::Terminal(_))
        ));
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                classify_status(status),
                Err(FetchError::Retryable(_))
            ));
        }
    }

    #[tokio::test]
    async fn malformed_url_is_terminal_without_a_request() {
        let fetcher = HttpAssetFetcher::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(FetchError::Terminal(_))
        ));
    }
}
