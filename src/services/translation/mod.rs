pub mod api_client;

pub use api_client::{HttpTranslationTransport, TranslateRequest, TranslationClient, TranslationTransport};
