// src/cache/fetch.rs v1
//! Fetching tile bytes over HTTP

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Source of tile bytes for a URL.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Query string the tile server uses for usage logging.
pub fn logging_params(version: &str, user_id: &str, cache: bool) -> String {
    format!("?version={}&id={}&app=free&cache={}", version, user_id, cache)
}

pub struct HttpTileFetcher {
    client: reqwest::Client,
    query: Option<String>,
}

impl HttpTileFetcher {
    /// Client with a per-request `timeout`; there is no retry.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fieldtrip-cache/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Other(format!("HTTP client error: {}", e)))?;

        Ok(Self { client, query: None })
    }

    /// Append usage logging parameters to every tile request.
    pub fn with_logging_params(mut self, version: &str, user_id: &str) -> Self {
        self.query = Some(logging_params(version, user_id, true));
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn request_url(&self, url: &str) -> String {
        match &self.query {
            Some(query) => format!("{}{}", url, query),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.request_url(url);
        log::debug!("download {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CacheError::TileFetch(format!("Download failed for {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(CacheError::TileFetch(format!("HTTP error {} for {}", response.status(), url)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::TileFetch(format!("Failed to read response for {}: {}", url, e)))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_params() {
        assert_eq!(
            logging_params("1.2.7", "abc", true),
            "?version=1.2.7&id=abc&app=free&cache=true"
        );
    }

    #[test]
    fn test_request_url() {
        let fetcher = HttpTileFetcher::new(Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.request_url("http://h/1/2/3.png"), "http://h/1/2/3.png");

        let fetcher = fetcher.with_logging_params("0.1.0", "none");
        assert_eq!(
            fetcher.request_url("http://h/1/2/3.png"),
            "http://h/1/2/3.png?version=0.1.0&id=none&app=free&cache=true"
        );
    }
}
