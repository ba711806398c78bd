// Phase 1: Image acquisition
//
// Downloads a product's image URLs into a scratch directory it owns. File
// names carry role and ordinal so logical order survives whatever order the
// network completes in.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::AcquisitionError;
use crate::core::types::{DownloadedImage, ImageRole, ProductImageSet};
use crate::services::download::ImageFetcher;
use crate::utils::{scratch_dir, Metrics};

/// Downloaded images plus the directory holding them.
///
/// Dropping this removes the directory and everything in it.
pub struct AcquiredImages {
    pub dir: TempDir,
    /// Sorted by (role, ordinal)
    pub images: Vec<DownloadedImage>,
}

impl AcquiredImages {
    pub fn by_role(&self, role: ImageRole) -> impl Iterator<Item = &DownloadedImage> {
        self.images.iter().filter(move |img| img.role == role)
    }

    pub fn paths(&self, role: ImageRole) -> Vec<PathBuf> {
        self.by_role(role).map(|img| img.path.clone()).collect()
    }
}

pub struct ImageAcquisition {
    fetcher: Arc<dyn ImageFetcher>,
    work_dir: PathBuf,
    concurrency: usize,
    metrics: Option<Metrics>,
}

impl ImageAcquisition {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        work_dir: impl Into<PathBuf>,
        concurrency: usize,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            work_dir: work_dir.into(),
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    /// Download both image lists of a product into one fresh scratch directory.
    ///
    /// Individual download failures are logged and skipped; only failing to
    /// create the directory is an error.
    #[instrument(skip(self, product), fields(product_id = %product.product_id))]
    pub async fn acquire_product(&self, product: &ProductImageSet) -> Result<AcquiredImages, AcquisitionError> {
        let start = Instant::now();
        let dir = scratch_dir(&self.work_dir, &product.product_id, "dl").map_err(AcquisitionError::ScratchDir)?;

        let jobs = [ImageRole::Primary, ImageRole::Description]
            .into_iter()
            .flat_map(|role| download_jobs(role, product.urls(role)))
            .collect();
        let images = self.download_all(&product.product_id, jobs, dir.path()).await;

        let requested = product.primary_urls.len() + product.description_urls.len();
        info!(
            "Acquired {}/{} images in {:.2}ms",
            images.len(),
            requested,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(AcquiredImages { dir, images })
    }

    // One fan-out over every job, then back into (role, ordinal) order.
    // Jobs own their URL so the stream closure borrows nothing per item.
    // The result is shorter than `jobs` when downloads fail.
    async fn download_all(
        &self,
        product_id: &str,
        jobs: Vec<(ImageRole, usize, String)>,
        dir: &Path,
    ) -> Vec<DownloadedImage> {
        let mut images: Vec<DownloadedImage> = stream::iter(jobs)
            .map(|(role, ordinal, url)| async move {
                self.download_one(product_id, role, ordinal, &url, dir)
                    .await
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        images.sort_by_key(|img| (img.role, img.ordinal));
        images
    }

    async fn download_one(
        &self,
        product_id: &str,
        role: ImageRole,
        ordinal: usize,
        raw_url: &str,
        dir: &Path,
    ) -> Option<DownloadedImage> {
        let result = self.try_download(role, ordinal, raw_url, dir).await;
        if let Some(ref m) = self.metrics {
            m.record_download(result.is_ok());
        }

        match result {
            Ok(image) => {
                debug!("Downloaded {} {} -> {}", role, ordinal, image.path.display());
                Some(image)
            }
            Err(e) => {
                warn!("Dropping {} image {} of product {}: {}", role, ordinal, product_id, e);
                None
            }
        }
    }

    async fn try_download(
        &self,
        role: ImageRole,
        ordinal: usize,
        raw_url: &str,
        dir: &Path,
    ) -> Result<DownloadedImage, AcquisitionError> {
        let url = normalize_url(raw_url).ok_or_else(|| AcquisitionError::InvalidUrl(raw_url.to_string()))?;
        let bytes = self.fetcher.fetch(&url).await?;

        let path = dir.join(file_name(role, ordinal, &url));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| AcquisitionError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(DownloadedImage {
            source_url: url,
            path,
            role,
            ordinal,
        })
    }
}

/// Normalise a scraped image URL.
///
/// Protocol-relative URLs get `https:`; anything that isn't http(s) after
/// that is rejected.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else {
        trimmed.to_string()
    };
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url)
    } else {
        None
    }
}

fn download_jobs(role: ImageRole, urls: &[String]) -> impl Iterator<Item = (ImageRole, usize, String)> + '_ {
    urls.iter()
        .cloned()
        .enumerate()
        .map(move |(ordinal, url)| (role, ordinal, url))
}

// e.g. p_003.jpg; the zero-padded ordinal keeps lexical order equal to list order
fn file_name(role: ImageRole, ordinal: usize, url: &str) -> String {
    format!("{}_{:03}.{}", role.file_prefix(), ordinal, extension_of(url))
}

fn extension_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "img",
    }
}
