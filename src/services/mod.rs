pub mod catalog;
pub mod download;
pub mod translation;

// Re-export commonly used services
pub use catalog::{CatalogStore, InMemoryCatalog, JsonFileCatalog, TranslatedImageRecord};
pub use download::{HttpImageFetcher, ImageFetcher};
pub use translation::{HttpTranslationTransport, TranslationClient, TranslationTransport};
