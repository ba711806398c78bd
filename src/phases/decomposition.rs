// Phase 4: Canvas decomposition
//
// Crops translated halves back into individual images. Every record is
// checked against the layout formula and the actual half size before a single
// file is written; a disagreement fails the product instead of producing a
// misaligned crop.

use image::{imageops, RgbaImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::DecomposeError;
use crate::core::layout::{self, Half, PlacementArena, PlacementRecord};
use crate::core::types::{ExtractedImage, ImageRole};
use crate::phases::translation::TranslatedCanvas;
use crate::utils::{load_rgba, output_dir_name, save_png};

/// Final per-product outputs, each list ordered by index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecomposedImages {
    pub primary: Vec<ExtractedImage>,
    pub description: Vec<ExtractedImage>,
}

impl DecomposedImages {
    pub fn primary_paths(&self) -> Vec<PathBuf> {
        self.primary.iter().map(|img| img.path.clone()).collect()
    }

    pub fn description_paths(&self) -> Vec<PathBuf> {
        self.description.iter().map(|img| img.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.description.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CanvasDecomposer {
    output_dir: PathBuf,
}

impl CanvasDecomposer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory a product's extracted images are written to.
    ///
    /// Distinct product ids never share one, since `decompose_into` replaces
    /// whatever the directory held.
    pub fn product_dir(&self, product_id: &str) -> PathBuf {
        self.output_dir.join(output_dir_name(product_id))
    }

    #[instrument(skip_all, fields(product_id = %product_id, records = arena.len()))]
    pub async fn decompose(
        &self,
        product_id: &str,
        translated: &TranslatedCanvas,
        arena: PlacementArena,
    ) -> Result<DecomposedImages, DecomposeError> {
        let start = Instant::now();
        let left = translated.left.clone();
        let right = translated.right.clone();
        let product_dir = self.product_dir(product_id);

        let images = tokio::task::spawn_blocking(move || decompose_into(&left, &right, &arena, &product_dir))
            .await
            .map_err(|e| DecomposeError::TaskJoin(e.to_string()))??;

        info!(
            "Extracted {} primary + {} description images in {:.2}ms",
            images.primary.len(),
            images.description.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(images)
    }
}

/// Blocking body of `decompose`.
///
/// Replaces whatever `product_dir` held before. If writing fails part way the
/// directory is removed again, so a product never ends up with a partial set.
pub fn decompose_into(
    left_path: &Path,
    right_path: &Path,
    arena: &PlacementArena,
    product_dir: &Path,
) -> Result<DecomposedImages, DecomposeError> {
    let load = |path: &Path| {
        load_rgba(path).map_err(|source| DecomposeError::Load {
            path: path.to_path_buf(),
            source,
        })
    };
    let (left, right) = rayon::join(|| load(left_path), || load(right_path));
    let (left, right) = (left?, right?);

    verify(arena, |half| pick(half, &left, &right).dimensions())?;

    if product_dir.exists() {
        std::fs::remove_dir_all(product_dir).map_err(|source| DecomposeError::OutputDir {
            path: product_dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::create_dir_all(product_dir).map_err(|source| DecomposeError::OutputDir {
        path: product_dir.to_path_buf(),
        source,
    })?;

    let written: Result<Vec<ExtractedImage>, DecomposeError> = arena
        .records()
        .par_iter()
        .map(|record| extract(record, pick(record.half, &left, &right), product_dir))
        .collect();

    let extracted = match written {
        Ok(extracted) => extracted,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_dir_all(product_dir) {
                warn!("Failed to remove partial output {}: {}", product_dir.display(), cleanup);
            }
            return Err(e);
        }
    };

    let (mut primary, mut description): (Vec<_>, Vec<_>) = extracted
        .into_iter()
        .partition(|img| img.role == ImageRole::Primary);
    primary.sort_by_key(|img| img.index);
    description.sort_by_key(|img| img.index);

    Ok(DecomposedImages { primary, description })
}

/// Check every record against the layout formula and the translated half sizes.
pub fn verify<F>(arena: &PlacementArena, half_dimensions: F) -> Result<(), DecomposeError>
where
    F: Fn(Half) -> (u32, u32),
{
    for record in arena.records() {
        let (rect, half) = layout::slot(record.role, record.index, record.rect.height)?;
        if rect != record.rect || half != record.half {
            return Err(DecomposeError::FormulaMismatch {
                role: record.role,
                index: record.index,
                recorded: (record.rect, record.half.as_str()),
                derived: (rect, half.as_str()),
            });
        }

        let local = record.local_rect();
        let (width, height) = half_dimensions(record.half);
        if local.right() > width || local.bottom() > height {
            return Err(DecomposeError::OutOfBounds {
                role: record.role,
                index: record.index,
                rect: record.rect,
                half: record.half.as_str(),
                width,
                height,
            });
        }
    }
    Ok(())
}

fn pick<'a>(half: Half, left: &'a RgbaImage, right: &'a RgbaImage) -> &'a RgbaImage {
    match half {
        Half::Left => left,
        Half::Right => right,
    }
}

fn extract(record: &PlacementRecord, half: &RgbaImage, product_dir: &Path) -> Result<ExtractedImage, DecomposeError> {
    let local = record.local_rect();
    let crop = imageops::crop_imm(half, local.x, local.y, local.width, local.height).to_image();

    let path = product_dir.join(format!("{}_{:02}.png", record.role, record.index));
    save_png(&crop, &path).map_err(|source| DecomposeError::Save {
        path: path.clone(),
        source,
    })?;
    debug!("Extracted {} {} -> {}", record.role, record.index, path.display());

    Ok(ExtractedImage {
        role: record.role,
        index: record.index,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::{CANVAS_HEIGHT, HALF_WIDTH};
    use crate::phases::composition::tests::pattern;
    use image::Rgba;
    use tempfile::TempDir;

    fn halves(dir: &Path, left: &RgbaImage, right: &RgbaImage) -> (PathBuf, PathBuf) {
        let (l, r) = (dir.join("left.png"), dir.join("right.png"));
        save_png(left, &l).unwrap();
        save_png(right, &r).unwrap();
        (l, r)
    }

    fn tampered(arena: &PlacementArena, f: impl FnOnce(&mut serde_json::Value)) -> PlacementArena {
        let mut value = serde_json::to_value(arena).unwrap();
        f(&mut value);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_crops_follow_records_and_index_order() {
        let work = TempDir::new().unwrap();
        let left = pattern(HALF_WIDTH, CANVAS_HEIGHT, 1);
        let right = pattern(HALF_WIDTH, CANVAS_HEIGHT, 2);
        let (l, r) = halves(work.path(), &left, &right);

        let arena = layout::plan(2, &[3000, 3000, 1500]).unwrap();
        let out = work.path().join("out/sku-1");
        let images = decompose_into(&l, &r, &arena, &out).unwrap();

        assert_eq!(images.primary.len(), 2);
        assert_eq!(images.description.len(), 3);
        let indices: Vec<usize> = images.description.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(images.primary[1].path, out.join("primary_01.png"));

        let p1 = load_rgba(&images.primary[1].path).unwrap();
        assert_eq!(p1, imageops::crop_imm(&left, 0, 1250, 1000, 1000).to_image());

        // Description segment 2 lives in the right half at local x=140
        let d2 = load_rgba(&images.description[2].path).unwrap();
        assert_eq!(d2.dimensions(), (860, 1500));
        assert_eq!(d2, imageops::crop_imm(&right, 140, 0, 860, 1500).to_image());
    }

    #[test]
    fn test_rerun_replaces_previous_outputs() {
        let work = TempDir::new().unwrap();
        let blank = RgbaImage::from_pixel(HALF_WIDTH, CANVAS_HEIGHT, Rgba([255, 255, 255, 255]));
        let (l, r) = halves(work.path(), &blank, &blank);
        let out = work.path().join("out/sku");

        decompose_into(&l, &r, &layout::plan(4, &[]).unwrap(), &out).unwrap();
        decompose_into(&l, &r, &layout::plan(1, &[]).unwrap(), &out).unwrap();

        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn test_record_diverging_from_formula_is_fatal() {
        let work = TempDir::new().unwrap();
        let blank = RgbaImage::from_pixel(HALF_WIDTH, CANVAS_HEIGHT, Rgba([255, 255, 255, 255]));
        let (l, r) = halves(work.path(), &blank, &blank);

        let arena = tampered(&layout::plan(2, &[]).unwrap(), |v| {
            v["records"][1]["rect"]["y"] = serde_json::json!(1300);
        });
        let out = work.path().join("out/sku");
        let err = decompose_into(&l, &r, &arena, &out).unwrap_err();

        assert!(matches!(
            err,
            DecomposeError::FormulaMismatch {
                role: ImageRole::Primary,
                index: 1,
                ..
            }
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_wrong_half_label_is_fatal() {
        let arena = tampered(&layout::plan(1, &[]).unwrap(), |v| {
            v["records"][0]["half"] = serde_json::json!("right");
        });
        let err = verify(&arena, |_| (HALF_WIDTH, CANVAS_HEIGHT)).unwrap_err();
        assert!(matches!(err, DecomposeError::FormulaMismatch { .. }));
    }

    #[test]
    fn test_half_smaller_than_records_is_fatal() {
        let work = TempDir::new().unwrap();
        let small = RgbaImage::from_pixel(HALF_WIDTH, 4000, Rgba([255, 255, 255, 255]));
        let (l, r) = halves(work.path(), &small, &small);

        let arena = layout::plan(5, &[]).unwrap();
        let out = work.path().join("out/sku");
        let err = decompose_into(&l, &r, &arena, &out).unwrap_err();

        // Slot 3 ends at y=4750
        assert!(matches!(err, DecomposeError::OutOfBounds { index: 3, height: 4000, .. }));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_decompose_uses_per_product_dir() {
        let work = TempDir::new().unwrap();
        let tr_dir = TempDir::new_in(work.path()).unwrap();
        let img = pattern(HALF_WIDTH, CANVAS_HEIGHT, 3);
        let (left, right) = halves(tr_dir.path(), &img, &img);
        let translated = TranslatedCanvas { dir: tr_dir, left, right };

        let decomposer = CanvasDecomposer::new(work.path().join("output"));
        let images = decomposer
            .decompose("shop/42", &translated, layout::plan(1, &[10]).unwrap())
            .await
            .unwrap();

        assert_eq!(images.len(), 2);
        let expected = work.path().join("output").join(output_dir_name("shop/42"));
        assert!(images.primary[0].path.starts_with(&expected));
        assert_ne!(decomposer.product_dir("shop/42"), decomposer.product_dir("shop_42"));
        assert_eq!(images.description_paths()[0].file_name().unwrap(), "description_00.png");
    }
}
