pub mod config;
pub mod errors;
pub mod layout;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    AcquisitionError, CatalogError, ComposeError, ConfigError, DecomposeError, LayoutError,
    PipelineError, TranslationError,
};
pub use layout::{Half, PlacementArena, PlacementRecord, Rect};
pub use types::{
    BatchResult, DownloadedImage, ExtractedImage, ImageRole, PipelineStage, ProductImageSet,
    ProductOutcome, TranslationStyle,
};
