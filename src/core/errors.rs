// Error types for each pipeline stage
//
// Per-stage enums carry enough context to explain a failure on their own;
// PipelineError wraps them and knows which stage each belongs to.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::layout::Rect;
use crate::core::types::{ImageRole, PipelineStage};

/// Placement formula violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("no {role} slot for index {index}")]
    SlotOutOfRange { role: ImageRole, index: usize },

    #[error("invalid height {height} for {role} slot {index}")]
    InvalidHeight {
        role: ImageRole,
        index: usize,
        height: u32,
    },

    #[error("{role} slot {index} at {rect:?} does not fit inside a single canvas half")]
    StraddlesHalves {
        role: ImageRole,
        index: usize,
        rect: Rect,
    },

    #[error("placements {first:?} and {second:?} overlap")]
    Overlap {
        first: (ImageRole, usize),
        second: (ImageRole, usize),
    },
}

/// Image download errors
///
/// Per-image failures are logged and dropped by the acquisition phase; only
/// the scratch-directory variants abort a product.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("unsupported image URL: {0:?}")]
    InvalidUrl(String),

    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create download directory: {0}")]
    ScratchDir(#[source] std::io::Error),
}

/// Canvas composition errors (fatal for the product)
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("no readable images to compose")]
    NoImages,

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("{role} image {index} is {actual:?}, slot expects {expected:?}")]
    SizeMismatch {
        role: ImageRole,
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("failed to encode canvas half {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create composite directory: {0}")]
    ScratchDir(#[source] std::io::Error),

    #[error("composition task failed: {0}")]
    TaskJoin(String),
}

/// Translation service errors
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Single 429 response, retried by the client
    #[error("translation service rate limited the request (HTTP 429)")]
    RateLimited,

    #[error("translation service still rate limiting after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("translation service returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("translated image is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("unreadable image {context}: {source}")]
    InvalidImage {
        context: String,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O on {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create translation directory: {0}")]
    ScratchDir(#[source] std::io::Error),
}

impl TranslationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TranslationError::RateLimited)
    }

    /// Upstream HTTP status, where there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            TranslationError::RateLimited | TranslationError::RateLimitExhausted { .. } => Some(429),
            TranslationError::Upstream { status, .. } => Some(*status),
            TranslationError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Canvas decomposition errors
///
/// Any record/half disagreement is fatal: a crop is only taken when the
/// record matches the placement formula and fits the translated half.
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("{role} record {index} at {recorded:?} diverges from layout {derived:?}")]
    FormulaMismatch {
        role: ImageRole,
        index: usize,
        recorded: (Rect, &'static str),
        derived: (Rect, &'static str),
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("{role} record {index} at {rect:?} exceeds {half} half of {width}x{height}")]
    OutOfBounds {
        role: ImageRole,
        index: usize,
        rect: Rect,
        half: &'static str,
        width: u32,
        height: u32,
    },

    #[error("failed to read translated half {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decomposition task failed: {0}")]
    TaskJoin(String),
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog file {path} I/O failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A product pipeline failure, tagged with its stage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("composition failed: {0}")]
    Composition(#[from] ComposeError),

    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error("decomposition failed: {0}")]
    Decomposition(#[from] DecomposeError),

    #[error("persisting results failed: {0}")]
    Persistence(#[from] CatalogError),

    #[error("product task failed: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Acquisition(_) => PipelineStage::Acquisition,
            PipelineError::Composition(_) => PipelineStage::Composition,
            PipelineError::Translation(_) => PipelineStage::Translation,
            PipelineError::Decomposition(_) => PipelineStage::Decomposition,
            PipelineError::Persistence(_) => PipelineStage::Persistence,
            PipelineError::TaskJoin(_) => PipelineStage::Orchestration,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TRANSLATION_API_URL must be an http(s) URL, got {0:?}")]
    InvalidTranslationUrl(String),

    #[error("rate limit delay range is empty: {min_ms}ms..={max_ms}ms")]
    InvalidDelayRange { min_ms: u64, max_ms: u64 },

    #[error("{name} must be > 0, got {value}")]
    ZeroValue { name: &'static str, value: u64 },

    #[error("invalid path for {name}: {reason}")]
    InvalidPath { name: &'static str, reason: String },
}
