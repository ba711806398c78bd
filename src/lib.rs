// Library exports for the batch image-translation compositor
//
// Products' images are packed onto shared canvases, translated half by half,
// and cut back into individual images.

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{
        AcquisitionError, CatalogError, ComposeError, ConfigError, DecomposeError, LayoutError,
        PipelineError, TranslationError,
    },
    layout::{Half, PlacementArena, PlacementRecord, Rect},
    types::{
        BatchResult, DownloadedImage, ExtractedImage, ImageRole, PipelineStage, ProductImageSet,
        ProductOutcome, TranslationStyle,
    },
};

pub use middleware::{RetryPolicy, Sleeper, TokioSleeper};

pub use orchestration::{PipelineOrchestrator, PipelineParts};

pub use phases::{CanvasComposer, CanvasDecomposer, CanvasTranslation, ImageAcquisition};

pub use services::{CatalogStore, ImageFetcher, InMemoryCatalog, JsonFileCatalog, TranslationClient, TranslationTransport};

pub use utils::{Metrics, MetricsSnapshot};
