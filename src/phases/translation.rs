// Phase 3: Canvas translation
//
// Sends both halves of a composed canvas to the translation service at the
// same time. Either half failing fails the product.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{info, instrument};

use crate::core::errors::TranslationError;
use crate::core::layout::Half;
use crate::phases::composition::ComposedCanvas;
use crate::services::translation::TranslationClient;
use crate::utils::scratch_dir;

/// Translated halves; same pixel dimensions as the composed ones
pub struct TranslatedCanvas {
    pub dir: TempDir,
    pub left: PathBuf,
    pub right: PathBuf,
}

impl TranslatedCanvas {
    pub fn half_path(&self, half: Half) -> &Path {
        match half {
            Half::Left => &self.left,
            Half::Right => &self.right,
        }
    }
}

pub struct CanvasTranslation {
    client: Arc<TranslationClient>,
    work_dir: PathBuf,
}

impl CanvasTranslation {
    pub fn new(client: Arc<TranslationClient>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            work_dir: work_dir.into(),
        }
    }

    #[instrument(skip_all, fields(product_id = %product_id, target_lang = %target_lang))]
    pub async fn translate(
        &self,
        product_id: &str,
        canvas: &ComposedCanvas,
        target_lang: &str,
    ) -> Result<TranslatedCanvas, TranslationError> {
        let start = Instant::now();
        let dir = scratch_dir(&self.work_dir, product_id, "tr").map_err(TranslationError::ScratchDir)?;

        let left = dir.path().join("left.png");
        let right = dir.path().join("right.png");

        tokio::try_join!(
            self.client.translate_file(&canvas.left, &left, target_lang),
            self.client.translate_file(&canvas.right, &right, target_lang),
        )?;

        info!(
            "Translated both halves in {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(TranslatedCanvas { dir, left, right })
    }
}
