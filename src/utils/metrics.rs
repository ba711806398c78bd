use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::PipelineStage;

/// Latency and duration samples kept per series; older ones are evicted.
pub const MAX_SAMPLES: usize = 1024;

type Samples = RwLock<VecDeque<u64>>;

/// Process-wide metrics collector.
///
/// Tracks downloads, translation calls, stage durations and product outcomes.
/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Acquisition
    images_downloaded: AtomicUsize,
    images_dropped: AtomicUsize,

    // Translation service
    translate_calls_total: AtomicUsize,
    translate_calls_success: AtomicUsize,
    translate_calls_failed: AtomicUsize,
    rate_limit_retries: AtomicUsize,
    translate_latency_ms: Samples,

    // Stage durations
    acquisition_duration_ms: Samples,
    composition_duration_ms: Samples,
    translation_duration_ms: Samples,
    decomposition_duration_ms: Samples,

    // Outcomes
    batches_processed: AtomicUsize,
    products_succeeded: AtomicUsize,
    products_failed: AtomicUsize,
    failures_by_stage: DashMap<PipelineStage, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                images_downloaded: AtomicUsize::new(0),
                images_dropped: AtomicUsize::new(0),
                translate_calls_total: AtomicUsize::new(0),
                translate_calls_success: AtomicUsize::new(0),
                translate_calls_failed: AtomicUsize::new(0),
                rate_limit_retries: AtomicUsize::new(0),
                translate_latency_ms: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
                acquisition_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
                composition_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
                translation_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
                decomposition_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
                batches_processed: AtomicUsize::new(0),
                products_succeeded: AtomicUsize::new(0),
                products_failed: AtomicUsize::new(0),
                failures_by_stage: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Acquisition
    pub fn record_download(&self, success: bool) {
        if success {
            self.inner.images_downloaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.images_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Translation service
    pub fn record_translate_call(&self, success: bool, duration: Duration) {
        self.inner.translate_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.translate_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.translate_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        push_sample(&self.inner.translate_latency_ms, duration);
    }

    pub fn record_rate_limit_retry(&self) {
        self.inner.rate_limit_retries.fetch_add(1, Ordering::Relaxed);
    }

    // Stage durations
    pub fn record_stage_duration(&self, stage: PipelineStage, duration: Duration) {
        let bucket = match stage {
            PipelineStage::Acquisition => &self.inner.acquisition_duration_ms,
            PipelineStage::Composition => &self.inner.composition_duration_ms,
            PipelineStage::Translation => &self.inner.translation_duration_ms,
            PipelineStage::Decomposition => &self.inner.decomposition_duration_ms,
            PipelineStage::Persistence | PipelineStage::Orchestration => return,
        };
        push_sample(bucket, duration);
    }

    // Outcomes
    pub fn record_product_success(&self) {
        self.inner.products_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_product_failure(&self, stage: PipelineStage) {
        self.inner.products_failed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .failures_by_stage
            .entry(stage)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_processed(&self) {
        self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.translate_latency_ms.read();
        let translate_latency_avg_ms = avg(&latency);
        let translate_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let failures_by_stage = self
            .inner
            .failures_by_stage
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            images_downloaded: self.inner.images_downloaded.load(Ordering::Relaxed),
            images_dropped: self.inner.images_dropped.load(Ordering::Relaxed),
            translate_calls_total: self.inner.translate_calls_total.load(Ordering::Relaxed),
            translate_calls_success: self.inner.translate_calls_success.load(Ordering::Relaxed),
            translate_calls_failed: self.inner.translate_calls_failed.load(Ordering::Relaxed),
            rate_limit_retries: self.inner.rate_limit_retries.load(Ordering::Relaxed),
            translate_latency_avg_ms,
            translate_latency_p95_ms,
            acquisition_avg_ms: avg(&self.inner.acquisition_duration_ms.read()),
            composition_avg_ms: avg(&self.inner.composition_duration_ms.read()),
            translation_avg_ms: avg(&self.inner.translation_duration_ms.read()),
            decomposition_avg_ms: avg(&self.inner.decomposition_duration_ms.read()),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            products_succeeded: self.inner.products_succeeded.load(Ordering::Relaxed),
            products_failed: self.inner.products_failed.load(Ordering::Relaxed),
            failures_by_stage,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP images_downloaded_total Source images written to disk
# TYPE images_downloaded_total counter
images_downloaded_total {}

# HELP images_dropped_total Source images skipped after a failed download
# TYPE images_dropped_total counter
images_dropped_total {}

# HELP translate_calls_total Translation service calls by result
# TYPE translate_calls_total counter
translate_calls_total{{result="success"}} {}
translate_calls_total{{result="failure"}} {}

# HELP rate_limit_retries_total Translation calls retried after HTTP 429
# TYPE rate_limit_retries_total counter
rate_limit_retries_total {}

# HELP translate_latency_avg_ms Average translation call latency in milliseconds
# TYPE translate_latency_avg_ms gauge
translate_latency_avg_ms {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms{{stage="acquisition"}} {}
stage_avg_duration_ms{{stage="composition"}} {}
stage_avg_duration_ms{{stage="translation"}} {}
stage_avg_duration_ms{{stage="decomposition"}} {}

# HELP batches_processed_total Batches processed
# TYPE batches_processed_total counter
batches_processed_total {}

# HELP products_total Products processed by outcome
# TYPE products_total counter
products_total{{outcome="success"}} {}
products_total{{outcome="failure"}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {}
"#,
            snapshot.images_downloaded,
            snapshot.images_dropped,
            snapshot.translate_calls_success,
            snapshot.translate_calls_failed,
            snapshot.rate_limit_retries,
            snapshot.translate_latency_avg_ms,
            snapshot.acquisition_avg_ms,
            snapshot.composition_avg_ms,
            snapshot.translation_avg_ms,
            snapshot.decomposition_avg_ms,
            snapshot.batches_processed,
            snapshot.products_succeeded,
            snapshot.products_failed,
            snapshot.uptime_seconds,
        );

        if !snapshot.failures_by_stage.is_empty() {
            out.push_str("\n# HELP product_failures_total Product failures by stage\n");
            out.push_str("# TYPE product_failures_total counter\n");
            for (stage, count) in &snapshot.failures_by_stage {
                out.push_str(&format!("product_failures_total{{stage=\"{}\"}} {}\n", stage, count));
            }
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub images_downloaded: usize,
    pub images_dropped: usize,
    pub translate_calls_total: usize,
    pub translate_calls_success: usize,
    pub translate_calls_failed: usize,
    pub rate_limit_retries: usize,
    pub translate_latency_avg_ms: u64,
    pub translate_latency_p95_ms: u64,
    pub acquisition_avg_ms: u64,
    pub composition_avg_ms: u64,
    pub translation_avg_ms: u64,
    pub decomposition_avg_ms: u64,
    pub batches_processed: usize,
    pub products_succeeded: usize,
    pub products_failed: usize,
    pub failures_by_stage: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn push_sample(samples: &Samples, duration: Duration) {
    let mut samples = samples.write();
    if samples.len() == MAX_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(duration.as_millis() as u64);
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
