// Shared data types for the compositor pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which list an image came from on the product record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRole {
    /// Main product photo
    Primary,
    /// Long-form detail image (size charts, usage illustrations)
    Description,
}

impl ImageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageRole::Primary => "primary",
            ImageRole::Description => "description",
        }
    }

    /// Short prefix used for downloaded file names
    pub(crate) fn file_prefix(self) -> &'static str {
        match self {
            ImageRole::Primary => "p",
            ImageRole::Description => "d",
        }
    }
}

impl std::fmt::Display for ImageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for one product, supplied by the catalog layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImageSet {
    pub product_id: String,
    #[serde(default)]
    pub primary_urls: Vec<String>,
    #[serde(default)]
    pub description_urls: Vec<String>,
    pub target_language: String,
}

impl ProductImageSet {
    pub fn urls(&self, role: ImageRole) -> &[String] {
        match role {
            ImageRole::Primary => &self.primary_urls,
            ImageRole::Description => &self.description_urls,
        }
    }
}

/// A source image that made it to local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub source_url: String,
    pub path: PathBuf,
    pub role: ImageRole,
    /// Position in the product's URL list for this role
    pub ordinal: usize,
}

/// Font and stroke options forwarded to the translation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationStyle {
    pub font: String,
    pub stroke_disabled: bool,
}

/// One final cropped output image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    pub role: ImageRole,
    pub index: usize,
    pub path: PathBuf,
}

/// Pipeline stage a product failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Acquisition,
    Composition,
    Translation,
    Decomposition,
    Persistence,
    /// The product task itself died (panic or cancellation)
    Orchestration,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Acquisition => "acquisition",
            PipelineStage::Composition => "composition",
            PipelineStage::Translation => "translation",
            PipelineStage::Decomposition => "decomposition",
            PipelineStage::Persistence => "persistence",
            PipelineStage::Orchestration => "orchestration",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one product's pipeline run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProductOutcome {
    Success {
        product_id: String,
        primary_images: Vec<PathBuf>,
        description_images: Vec<PathBuf>,
        processing_time_ms: f64,
    },
    Failure {
        product_id: String,
        stage: PipelineStage,
        reason: String,
        processing_time_ms: f64,
    },
}

impl ProductOutcome {
    pub fn product_id(&self) -> &str {
        match self {
            ProductOutcome::Success { product_id, .. } | ProductOutcome::Failure { product_id, .. } => {
                product_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProductOutcome::Success { .. })
    }
}

/// Batch processing result, one outcome per submitted product in submission order
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub processing_time_ms: f64,
    pub results: Vec<ProductOutcome>,
}
