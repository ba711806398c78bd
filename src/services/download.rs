// HTTP source image fetcher

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::core::config::DownloadConfig;
use crate::core::errors::AcquisitionError;

/// Fetches the raw bytes behind an image URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionError>;
}

/// Plain HTTP GET fetcher
pub struct HttpImageFetcher {
    http_client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.concurrency)
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionError> {
        let http_err = |source| AcquisitionError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.http_client.get(url).send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(http_err)?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
