pub mod acquisition;
pub mod composition;
pub mod decomposition;
pub mod translation;

pub use acquisition::{AcquiredImages, ImageAcquisition};
pub use composition::{CanvasComposer, ComposedCanvas};
pub use decomposition::{CanvasDecomposer, DecomposedImages};
pub use translation::{CanvasTranslation, TranslatedCanvas};
