// BDPM file downloader (HTTP)

use crate::config::IngestConfig;
use crate::pipeline::write_atomic;
use bdpm_common::{BdpmError, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// HTTP client for downloading source files
pub struct Downloader {
    client: Client,
    max_retries: u32,
    retry_base: Duration,
}

impl Downloader {
    /// Create new downloader with configuration
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("BDPM-Ingester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BdpmError::Network(e.to_string()))?;

        Ok(Downloader {
            client,
            max_retries: config.max_retries.max(1),
            retry_base: Duration::from_secs(1),
        })
    }

    /// Base delay between attempts, doubled after each failure
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Download `url` to `dest`, returning the number of bytes written
    ///
    /// The file is replaced atomically, so a failed download leaves any
    /// previous copy intact.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let content = self.download_with_retry(url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(dest, &content).await?;

        info!(
            "Downloaded {} ({} KB) to {}",
            url,
            content.len() / 1024,
            dest.display()
        );

        Ok(content.len() as u64)
    }

    /// Download URL with retry logic
    async fn download_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.download_url(url).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt < self.max_retries => {
                    // Exponential backoff: base * 2^(attempt - 1)
                    let delay = self.retry_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Download attempt {}/{} failed for {}: {}. Retrying in {:?}",
                        attempt, self.max_retries, url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    return Err(BdpmError::Network(format!(
                        "{} failed after {} attempts: {}",
                        url, attempt, e
                    )));
                },
            }
        }
    }

    /// Download URL without retry
    async fn download_url(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_downloader_creation() {
        let config = IngestConfig::default();
        let downloader = Downloader::new(&config).unwrap();
        assert_eq!(downloader.max_retries, config.max_retries);
    }
}
