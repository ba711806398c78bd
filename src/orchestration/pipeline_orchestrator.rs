// Pipeline Orchestrator: per-product workflow coordinator

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::PipelineError;
use crate::core::types::{BatchResult, PipelineStage, ProductImageSet, ProductOutcome};
use crate::middleware::retry::{Sleeper, TokioSleeper};
use crate::phases::acquisition::ImageAcquisition;
use crate::phases::composition::{CanvasComposer, ComposedCanvas};
use crate::phases::decomposition::{CanvasDecomposer, DecomposedImages};
use crate::phases::translation::CanvasTranslation;
use crate::services::catalog::{CatalogStore, JsonFileCatalog};
use crate::services::download::{HttpImageFetcher, ImageFetcher};
use crate::services::translation::TranslationClient;
use crate::utils::Metrics;

/// Collaborators the orchestrator drives; swapped for fakes in tests
pub struct PipelineParts {
    pub fetcher: Arc<dyn ImageFetcher>,
    pub translator: Arc<TranslationClient>,
    pub catalog: Arc<dyn CatalogStore>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Runs acquisition → composition → translation → decomposition → persistence
/// for each product, a bounded number of products at a time.
pub struct PipelineOrchestrator {
    acquisition: ImageAcquisition,
    composer: CanvasComposer,
    translation: CanvasTranslation,
    decomposer: CanvasDecomposer,
    catalog: Arc<dyn CatalogStore>,
    sleeper: Arc<dyn Sleeper>,
    product_semaphore: Arc<Semaphore>,
    submission_delay: Duration,
    metrics: Metrics,
}

impl PipelineOrchestrator {
    /// Create an orchestrator backed by HTTP services and the JSON catalog file
    #[instrument(skip_all)]
    pub fn new(config: &Config, metrics: Metrics) -> Result<Self> {
        info!("Initializing services...");

        let fetcher = HttpImageFetcher::new(&config.download).context("failed to build download client")?;
        let translator = TranslationClient::new(&config.translation, Some(metrics.clone()))
            .context("failed to build translation client")?;
        let catalog = JsonFileCatalog::new(config.catalog_file());

        let parts = PipelineParts {
            fetcher: Arc::new(fetcher),
            translator: Arc::new(translator),
            catalog: Arc::new(catalog),
            sleeper: Arc::new(TokioSleeper),
        };

        info!(
            "✓ Ready (products: {}, submission delay: {}ms, translation: {})",
            config.max_concurrent_products(),
            config.pipeline.submission_delay_ms,
            config.translation.api_url
        );

        Ok(Self::from_parts(config, parts, metrics))
    }

    pub fn from_parts(config: &Config, parts: PipelineParts, metrics: Metrics) -> Self {
        Self {
            acquisition: ImageAcquisition::new(
                parts.fetcher,
                config.work_dir(),
                config.download.concurrency,
                Some(metrics.clone()),
            ),
            composer: CanvasComposer::new(config.work_dir()),
            translation: CanvasTranslation::new(parts.translator, config.work_dir()),
            decomposer: CanvasDecomposer::new(config.output_dir()),
            catalog: parts.catalog,
            sleeper: parts.sleeper,
            product_semaphore: Arc::new(Semaphore::new(config.max_concurrent_products().max(1))),
            submission_delay: config.submission_delay(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Process a batch of products.
    ///
    /// Products are submitted in order with a fixed pause between
    /// submissions, and at most `MAX_CONCURRENT_PRODUCTS` run at once. A
    /// product failing never affects its siblings: the result holds exactly
    /// one outcome per input, in input order.
    #[instrument(skip(self, products), fields(total_products = products.len()))]
    pub async fn process_batch(self: &Arc<Self>, products: Vec<ProductImageSet>) -> BatchResult {
        let start_time = Instant::now();
        let total = products.len();
        info!("Processing {} products", total);

        let mut handles = Vec::with_capacity(total);
        for (i, product) in products.into_iter().enumerate() {
            if i > 0 && !self.submission_delay.is_zero() {
                self.sleeper.sleep(self.submission_delay).await;
            }

            // The semaphore is never closed, so this only yields None if that changes
            let permit = self.product_semaphore.clone().acquire_owned().await.ok();
            let product_id = product.product_id.clone();
            let orchestrator = Arc::clone(self);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.process_product(product).await
            });
            handles.push((product_id, handle));
        }

        let (ids, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let results: Vec<ProductOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, product_id)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = PipelineError::TaskJoin(e.to_string());
                    error!("✗ {}: {}", product_id, err);
                    self.metrics.record_product_failure(err.stage());
                    ProductOutcome::Failure {
                        product_id,
                        stage: err.stage(),
                        reason: err.to_string(),
                        processing_time_ms: 0.0,
                    }
                }
            })
            .collect();

        let successful = results.iter().filter(|r| r.is_success()).count();
        let processing_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_batch_processed();

        info!(
            "✓ Batch complete: {}/{} products succeeded in {:.2}ms",
            successful, total, processing_time_ms
        );

        BatchResult {
            total,
            successful,
            failed: total - successful,
            processing_time_ms,
            results,
        }
    }

    /// Run one product end to end and turn the result into an outcome
    pub async fn process_product(&self, product: ProductImageSet) -> ProductOutcome {
        let start = Instant::now();
        let result = self.run_stages(&product).await;
        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(images) => {
                self.metrics.record_product_success();
                info!(
                    "✓ {}: {} primary, {} description images ({:.2}ms)",
                    product.product_id,
                    images.primary.len(),
                    images.description.len(),
                    processing_time_ms
                );
                ProductOutcome::Success {
                    primary_images: images.primary_paths(),
                    description_images: images.description_paths(),
                    product_id: product.product_id,
                    processing_time_ms,
                }
            }
            Err(e) => {
                let stage = e.stage();
                self.metrics.record_product_failure(stage);
                error!("✗ {} failed at {}: {}", product.product_id, stage, e);
                ProductOutcome::Failure {
                    product_id: product.product_id,
                    stage,
                    reason: e.to_string(),
                    processing_time_ms,
                }
            }
        }
    }

    /// Every scratch directory is owned by a stage output value. Each is closed
    /// as soon as the next stage is done with it, and dropped (and deleted) on
    /// any early return.
    #[instrument(skip_all, fields(product_id = %product.product_id))]
    async fn run_stages(&self, product: &ProductImageSet) -> Result<DecomposedImages, PipelineError> {
        let product_id = product.product_id.as_str();

        let stage_start = Instant::now();
        let acquired = self.acquisition.acquire_product(product).await?;
        self.metrics
            .record_stage_duration(PipelineStage::Acquisition, stage_start.elapsed());

        let stage_start = Instant::now();
        let composed = self.composer.compose(product_id, &acquired).await?;
        self.metrics
            .record_stage_duration(PipelineStage::Composition, stage_start.elapsed());
        close_scratch(acquired.dir);

        let stage_start = Instant::now();
        let translated = self
            .translation
            .translate(product_id, &composed, &product.target_language)
            .await?;
        self.metrics
            .record_stage_duration(PipelineStage::Translation, stage_start.elapsed());
        let ComposedCanvas { dir, arena, .. } = composed;
        close_scratch(dir);

        let stage_start = Instant::now();
        let images = self.decomposer.decompose(product_id, &translated, arena).await?;
        self.metrics
            .record_stage_duration(PipelineStage::Decomposition, stage_start.elapsed());
        close_scratch(translated.dir);

        if let Err(e) = self
            .catalog
            .save_translated_images(product_id, &images.primary_paths(), &images.description_paths())
            .await
        {
            let product_dir = self.decomposer.product_dir(product_id);
            if let Err(cleanup) = tokio::fs::remove_dir_all(&product_dir).await {
                warn!("Failed to remove unpersisted output {}: {}", product_dir.display(), cleanup);
            }
            return Err(e.into());
        }

        Ok(images)
    }
}

fn close_scratch(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        warn!("Failed to remove scratch directory {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{CatalogError, TranslationError};
    use crate::core::layout::DESCRIPTION_WIDTH;
    use crate::core::types::TranslationStyle;
    use crate::middleware::retry::tests::FakeSleeper;
    use crate::middleware::retry::RetryPolicy;
    use crate::phases::acquisition::tests::MapFetcher;
    use crate::phases::composition::{cut_segments, tests::pattern};
    use crate::services::catalog::InMemoryCatalog;
    use crate::services::translation::api_client::tests::EchoTransport;
    use crate::services::translation::{TranslateRequest, TranslationTransport};
    use crate::utils::{load_rgba, output_dir_name, resize_exact, resize_to_width};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn test_config(root: &Path, overrides: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("WORK_DIR".to_string(), root.join("work").display().to_string()),
            ("OUTPUT_DIR".to_string(), root.join("output").display().to_string()),
            ("CATALOG_FILE".to_string(), root.join("output/catalog.json").display().to_string()),
            ("SUBMISSION_DELAY_MS".to_string(), "0".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }
        Config::load_with(|key| vars.get(key).cloned())
    }

    fn translator(transport: Arc<dyn TranslationTransport>) -> Arc<TranslationClient> {
        Arc::new(TranslationClient::with_transport(
            transport,
            Arc::new(FakeSleeper::default()),
            RetryPolicy::new(2, Duration::from_millis(7000), Duration::from_millis(10000)),
            TranslationStyle {
                font: "NotoSans-Regular".to_string(),
                stroke_disabled: true,
            },
            None,
        ))
    }

    fn orchestrator(
        config: &Config,
        fetcher: impl ImageFetcher + 'static,
        transport: Arc<dyn TranslationTransport>,
        catalog: Arc<dyn CatalogStore>,
        sleeper: Arc<FakeSleeper>,
    ) -> Arc<PipelineOrchestrator> {
        let parts = PipelineParts {
            fetcher: Arc::new(fetcher),
            translator: translator(transport),
            catalog,
            sleeper,
        };
        Arc::new(PipelineOrchestrator::from_parts(config, parts, Metrics::new()))
    }

    fn product(id: &str, primary: &[&str], description: &[&str], lang: &str) -> ProductImageSet {
        ProductImageSet {
            product_id: id.to_string(),
            primary_urls: primary.iter().map(|s| s.to_string()).collect(),
            description_urls: description.iter().map(|s| s.to_string()).collect(),
            target_language: lang.to_string(),
        }
    }

    fn assert_empty_dir(path: &Path) {
        let leftovers: Vec<_> = std::fs::read_dir(path)
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "scratch files left behind: {:?}", leftovers);
    }

    /// Fails every request whose target language is "xx"
    struct LanguageGatedTransport;

    #[async_trait]
    impl TranslationTransport for LanguageGatedTransport {
        async fn submit(&self, request: &TranslateRequest) -> Result<Vec<u8>, TranslationError> {
            if request.target_lang == "xx" {
                return Err(TranslationError::Upstream {
                    status: 503,
                    body: "unsupported language".to_string(),
                });
            }
            Ok(request.image_bytes.clone())
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl CatalogStore for FailingCatalog {
        async fn save_translated_images(
            &self,
            _product_id: &str,
            _primary: &[std::path::PathBuf],
            _description: &[std::path::PathBuf],
        ) -> Result<(), CatalogError> {
            Err(CatalogError::Io {
                path: "catalog.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    /// Tracks how many fetches are in flight at once across all products
    #[derive(Default)]
    struct CountingFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, crate::core::errors::AcquisitionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(b"not an image".to_vec())
        }
    }

    #[tokio::test]
    async fn test_identity_round_trip_reproduces_resized_inputs() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), &[]);

        let primaries: Vec<RgbaImage> = (0..3).map(|i| pattern(2000, 2000, i)).collect();
        let descriptions: Vec<RgbaImage> = (0..5).map(|i| pattern(430, 600, 40 + i)).collect();

        let mut responses = HashMap::new();
        let mut primary_urls = Vec::new();
        let mut description_urls = Vec::new();
        for (i, img) in primaries.iter().enumerate() {
            let url = format!("https://cdn.test/main/{i}.png");
            responses.insert(url.clone(), png_bytes(img));
            primary_urls.push(url);
        }
        for (i, img) in descriptions.iter().enumerate() {
            let url = format!("https://cdn.test/detail/{i}.png");
            responses.insert(url.clone(), png_bytes(img));
            // Scraped description URLs are often protocol-relative
            description_urls.push(url.replacen("https:", "", 1));
        }

        let catalog = Arc::new(InMemoryCatalog::new());
        let sleeper = Arc::new(FakeSleeper::default());
        let orchestrator = orchestrator(
            &config,
            MapFetcher::new(responses),
            Arc::new(EchoTransport),
            catalog.clone(),
            sleeper.clone(),
        );

        let batch = orchestrator
            .process_batch(vec![ProductImageSet {
                product_id: "sku-ref".to_string(),
                primary_urls,
                description_urls,
                target_language: "en".to_string(),
            }])
            .await;

        assert_eq!(batch.total, 1);
        assert_eq!(batch.successful, 1);
        let (primary_images, description_images) = match &batch.results[0] {
            ProductOutcome::Success {
                primary_images,
                description_images,
                ..
            } => (primary_images.clone(), description_images.clone()),
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(primary_images.len(), 3);
        assert_eq!(description_images.len(), 2);

        for (path, source) in primary_images.iter().zip(&primaries) {
            let expected = resize_exact(&DynamicImage::ImageRgba8(source.clone()), 1000, 1000);
            assert_eq!(load_rgba(path).unwrap(), expected);
        }

        let resized: Vec<RgbaImage> = descriptions
            .iter()
            .map(|img| resize_to_width(&DynamicImage::ImageRgba8(img.clone()), DESCRIPTION_WIDTH).unwrap())
            .collect();
        for (path, expected) in description_images.iter().zip(cut_segments(&resized)) {
            assert_eq!(load_rgba(path).unwrap(), expected);
        }

        let record = catalog.get("sku-ref").unwrap();
        assert_eq!(record.primary_images, primary_images);
        assert_eq!(record.description_images, description_images);

        assert_empty_dir(config.work_dir());
        assert!(sleeper.slept.lock().is_empty());
        assert_eq!(orchestrator.metrics().snapshot().products_succeeded, 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_product() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), &[("SUBMISSION_DELAY_MS", "1500")]);

        let url = "https://cdn.test/ok.png";
        let fetcher = MapFetcher::new(HashMap::from([(url.to_string(), png_bytes(&pattern(300, 300, 7)))]));
        let catalog = Arc::new(InMemoryCatalog::new());
        let sleeper = Arc::new(FakeSleeper::default());
        let orchestrator = orchestrator(
            &config,
            fetcher,
            Arc::new(LanguageGatedTransport),
            catalog.clone(),
            sleeper.clone(),
        );

        let batch = orchestrator
            .process_batch(vec![
                product("a", &[url], &[], "en"),
                product("b", &["https://cdn.test/missing.png"], &[], "en"),
                product("c", &[url], &[], "xx"),
                product("d", &[], &[url], "ko"),
            ])
            .await;

        assert_eq!(batch.total, 4);
        assert_eq!(batch.successful, 2);
        assert_eq!(batch.failed, 2);

        let ids: Vec<&str> = batch.results.iter().map(|r| r.product_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        match &batch.results[1] {
            ProductOutcome::Failure { stage, .. } => assert_eq!(*stage, PipelineStage::Composition),
            other => panic!("unexpected outcome: {:?}", other),
        }
        match &batch.results[2] {
            ProductOutcome::Failure { stage, reason, .. } => {
                assert_eq!(*stage, PipelineStage::Translation);
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("c").is_none());
        assert!(!config.output_dir().join(output_dir_name("c")).exists());
        assert_empty_dir(config.work_dir());

        assert_eq!(*sleeper.slept.lock(), vec![Duration::from_millis(1500); 3]);

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.products_failed, 2);
        assert_eq!(snapshot.failures_by_stage.get("translation"), Some(&1));
    }

    #[tokio::test]
    async fn test_persistence_failure_removes_outputs() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), &[]);

        let url = "https://cdn.test/ok.png";
        let fetcher = MapFetcher::new(HashMap::from([(url.to_string(), png_bytes(&pattern(64, 64, 3)))]));
        let orchestrator = orchestrator(
            &config,
            fetcher,
            Arc::new(EchoTransport),
            Arc::new(FailingCatalog),
            Arc::new(FakeSleeper::default()),
        );

        let outcome = orchestrator.process_product(product("p", &[url], &[], "en")).await;
        match outcome {
            ProductOutcome::Failure { stage, .. } => assert_eq!(stage, PipelineStage::Persistence),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!config.output_dir().join(output_dir_name("p")).exists());
        assert_empty_dir(config.work_dir());
    }

    #[tokio::test]
    async fn test_ids_that_sanitize_alike_keep_separate_outputs() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), &[]);

        let (first, second) = (pattern(64, 64, 1), pattern(64, 64, 200));
        let fetcher = MapFetcher::new(HashMap::from([
            ("https://cdn.test/1.png".to_string(), png_bytes(&first)),
            ("https://cdn.test/200.png".to_string(), png_bytes(&second)),
        ]));
        let catalog = Arc::new(InMemoryCatalog::new());
        let orchestrator = orchestrator(
            &config,
            fetcher,
            Arc::new(EchoTransport),
            catalog.clone(),
            Arc::new(FakeSleeper::default()),
        );

        let batch = orchestrator
            .process_batch(vec![
                product("shop/1", &["https://cdn.test/1.png"], &[], "en"),
                product("shop_1", &["https://cdn.test/200.png"], &[], "en"),
            ])
            .await;
        assert_eq!(batch.successful, 2);

        let left = catalog.get("shop/1").unwrap().primary_images;
        let right = catalog.get("shop_1").unwrap().primary_images;
        assert_ne!(left, right);
        assert!(left[0].exists() && right[0].exists());

        let resize = |img: &RgbaImage| resize_exact(&DynamicImage::ImageRgba8(img.clone()), 1000, 1000);
        assert_eq!(load_rgba(&left[0]).unwrap(), resize(&first));
        assert_eq!(load_rgba(&right[0]).unwrap(), resize(&second));
    }

    #[tokio::test]
    async fn test_concurrent_products_are_bounded() {
        let root = TempDir::new().unwrap();
        let config = test_config(
            root.path(),
            &[("MAX_CONCURRENT_PRODUCTS", "2"), ("DOWNLOAD_CONCURRENCY", "1")],
        );

        let fetcher = Arc::new(CountingFetcher::default());
        let parts = PipelineParts {
            fetcher: fetcher.clone(),
            translator: translator(Arc::new(EchoTransport)),
            catalog: Arc::new(InMemoryCatalog::new()),
            sleeper: Arc::new(FakeSleeper::default()),
        };
        let orchestrator = Arc::new(PipelineOrchestrator::from_parts(&config, parts, Metrics::new()));

        let products: Vec<ProductImageSet> = (0..6)
            .map(|i| product(&format!("sku-{i}"), &["https://cdn.test/a.png"], &[], "en"))
            .collect();
        let batch = orchestrator.process_batch(products).await;

        // Every image is unreadable, so every product fails at composition
        assert_eq!(batch.results.len(), 6);
        assert_eq!(batch.failed, 6);
        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=2).contains(&max), "max in flight was {}", max);
        assert_empty_dir(config.work_dir());
    }
}
