// Phase 2: Canvas composition
//
// Resizes a product's images, pages the description strip into segments and
// tiles everything onto the fixed canvas. The two halves are rendered
// directly (never the full 4000px canvas) and written as lossless PNGs.

use image::{imageops, DynamicImage, Rgba, RgbaImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::{ComposeError, LayoutError};
use crate::core::layout::{
    self, Half, PlacementArena, CANVAS_HEIGHT, DESCRIPTION_WIDTH, HALF_WIDTH, MAX_PRIMARY_IMAGES,
    PRIMARY_SIZE, SEGMENT_MAX_HEIGHT, STRIP_MAX_HEIGHT,
};
use crate::core::types::ImageRole;
use crate::phases::acquisition::AcquiredImages;
use crate::utils::{load_image, resize_exact, resize_to_width_capped, save_png, scaled_height, scratch_dir};

pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Both canvas halves on disk plus the placement record set that built them
pub struct ComposedCanvas {
    pub dir: TempDir,
    pub left: PathBuf,
    pub right: PathBuf,
    pub arena: PlacementArena,
}

impl ComposedCanvas {
    pub fn half_path(&self, half: Half) -> &Path {
        match half {
            Half::Left => &self.left,
            Half::Right => &self.right,
        }
    }
}

/// Resized inputs, in logical order, ready to be placed
#[derive(Debug, Default)]
pub struct PreparedImages {
    /// At most five, each exactly 1000×1000
    pub primary: Vec<RgbaImage>,
    /// Each 860 wide at its proportional height
    pub description: Vec<RgbaImage>,
}

impl PreparedImages {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.description.is_empty()
    }

    pub fn description_heights(&self) -> Vec<u32> {
        self.description.iter().map(|img| img.height()).collect()
    }
}

pub struct CanvasComposer {
    work_dir: PathBuf,
}

impl CanvasComposer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Compose a product's downloaded images into two canvas halves.
    ///
    /// Decoding, resizing and encoding run on the blocking pool.
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn compose(&self, product_id: &str, images: &AcquiredImages) -> Result<ComposedCanvas, ComposeError> {
        let start = Instant::now();
        let dir = scratch_dir(&self.work_dir, product_id, "canvas").map_err(ComposeError::ScratchDir)?;

        let primary_paths = images.paths(ImageRole::Primary);
        let description_paths = images.paths(ImageRole::Description);
        let out_dir = dir.path().to_path_buf();

        let (arena, left, right) = tokio::task::spawn_blocking(move || {
            compose_into(&primary_paths, &description_paths, &out_dir)
        })
        .await
        .map_err(|e| ComposeError::TaskJoin(e.to_string()))??;

        info!(
            "Composed {} primary + {} description placements in {:.2}ms",
            arena.count(ImageRole::Primary),
            arena.count(ImageRole::Description),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(ComposedCanvas {
            dir,
            left,
            right,
            arena,
        })
    }
}

/// Blocking body of `compose`: prepare, plan, render both halves, save them.
pub fn compose_into(
    primary_paths: &[PathBuf],
    description_paths: &[PathBuf],
    out_dir: &Path,
) -> Result<(PlacementArena, PathBuf, PathBuf), ComposeError> {
    let prepared = prepare(primary_paths, description_paths);
    if prepared.is_empty() {
        return Err(ComposeError::NoImages);
    }

    let segments = cut_segments(&prepared.description);
    let arena = layout::plan(prepared.primary.len(), &prepared.description_heights())?;

    let (left, right) = rayon::join(
        || render_and_save(Half::Left, &arena, &prepared.primary, &segments, out_dir),
        || render_and_save(Half::Right, &arena, &prepared.primary, &segments, out_dir),
    );

    Ok((arena, left?, right?))
}

/// Run the primary and description resize passes in parallel.
///
/// Unreadable files are skipped. Only the first five readable primaries are
/// kept, so a broken primary lets the sixth one move up.
pub fn prepare(primary_paths: &[PathBuf], description_paths: &[PathBuf]) -> PreparedImages {
    let (primary, description) = rayon::join(
        || prepare_primaries(primary_paths),
        || prepare_descriptions(description_paths),
    );
    PreparedImages { primary, description }
}

pub fn prepare_primaries(paths: &[PathBuf]) -> Vec<RgbaImage> {
    let decoded: Vec<DynamicImage> = paths
        .par_iter()
        .map(|path| decode(path, ImageRole::Primary))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .take(MAX_PRIMARY_IMAGES)
        .collect();

    if paths.len() > MAX_PRIMARY_IMAGES {
        debug!("Keeping {} of {} primary images", decoded.len(), paths.len());
    }

    decoded
        .par_iter()
        .map(|img| resize_exact(img, PRIMARY_SIZE, PRIMARY_SIZE))
        .collect()
}

/// Resize description images to `DESCRIPTION_WIDTH`.
///
/// Each image only gets the strip height left over by the ones before it, so
/// nothing past the strip cap is ever resized.
pub fn prepare_descriptions(paths: &[PathBuf]) -> Vec<RgbaImage> {
    let decoded: Vec<DynamicImage> = paths
        .par_iter()
        .filter_map(|path| decode(path, ImageRole::Description))
        .collect();

    let full: Vec<Option<u32>> = decoded
        .iter()
        .map(|img| scaled_height(img.width(), img.height(), DESCRIPTION_WIDTH))
        .collect();
    let budgets = fit_to_strip(&full);
    if let Some(skipped) = budgets.iter().position(|&b| b == 0) {
        warn!(
            "Description strip full; skipping {} of {} images",
            decoded.len() - skipped,
            decoded.len()
        );
    }

    decoded
        .par_iter()
        .zip(budgets)
        .filter_map(|(img, budget)| resize_to_width_capped(img, DESCRIPTION_WIDTH, budget))
        .collect()
}

/// Height each description may take, given the full scaled heights in order.
///
/// `None` marks a height too large to represent; it takes whatever is left.
/// Budgets run out at `STRIP_MAX_HEIGHT`, after which every entry is 0.
pub fn fit_to_strip(full_heights: &[Option<u32>]) -> Vec<u32> {
    let mut remaining = STRIP_MAX_HEIGHT;
    full_heights
        .iter()
        .map(|height| {
            let budget = height.unwrap_or(u32::MAX).min(remaining);
            remaining -= budget;
            budget
        })
        .collect()
}

fn decode(path: &Path, role: ImageRole) -> Option<DynamicImage> {
    match load_image(path) {
        Ok(img) if img.width() > 0 && img.height() > 0 => Some(img),
        Ok(_) => {
            warn!("Skipping empty {} image {}", role, path.display());
            None
        }
        Err(e) => {
            warn!("Skipping unreadable {} image {}: {}", role, path.display(), e);
            None
        }
    }
}

/// Stack description images top to bottom and cut the strip into page segments.
///
/// Segment heights come from `layout::segment_heights`, so anything past the
/// sixth segment is cut off.
pub fn cut_segments(images: &[RgbaImage]) -> Vec<RgbaImage> {
    let heights: Vec<u32> = images.iter().map(|img| img.height()).collect();
    let offsets: Vec<u64> = heights
        .iter()
        .scan(0u64, |acc, &h| {
            let top = *acc;
            *acc += u64::from(h);
            Some(top)
        })
        .collect();

    let segment_heights = layout::segment_heights(&heights);
    let stacked: u64 = heights.iter().map(|&h| u64::from(h)).sum();
    let kept: u64 = segment_heights.iter().map(|&h| u64::from(h)).sum();
    if kept < stacked {
        warn!("Description strip truncated from {}px to {}px", stacked, kept);
    }

    segment_heights
        .into_par_iter()
        .enumerate()
        .map(|(k, height)| {
            let top = k as u64 * u64::from(SEGMENT_MAX_HEIGHT);
            let bottom = top + u64::from(height);
            let mut segment = RgbaImage::from_pixel(DESCRIPTION_WIDTH, height, BACKGROUND);

            for (img, &offset) in images.iter().zip(&offsets) {
                let end = offset + u64::from(img.height());
                if end <= top || offset >= bottom {
                    continue;
                }
                // replace() clips, so a negative offset copies the image's tail
                imageops::replace(&mut segment, img, 0, offset as i64 - top as i64);
            }
            segment
        })
        .collect()
}

/// Paint every record belonging to `half` onto a blank half-canvas.
pub fn render_half(
    half: Half,
    arena: &PlacementArena,
    primaries: &[RgbaImage],
    segments: &[RgbaImage],
) -> Result<RgbaImage, ComposeError> {
    let mut canvas = RgbaImage::from_pixel(HALF_WIDTH, CANVAS_HEIGHT, BACKGROUND);

    for record in arena.by_half(half) {
        let source = match record.role {
            ImageRole::Primary => primaries.get(record.index),
            ImageRole::Description => segments.get(record.index),
        }
        .ok_or(LayoutError::SlotOutOfRange {
            role: record.role,
            index: record.index,
        })?;

        let expected = (record.rect.width, record.rect.height);
        if source.dimensions() != expected {
            return Err(ComposeError::SizeMismatch {
                role: record.role,
                index: record.index,
                expected,
                actual: source.dimensions(),
            });
        }

        let local = record.local_rect();
        imageops::replace(&mut canvas, source, i64::from(local.x), i64::from(local.y));
    }

    Ok(canvas)
}

fn render_and_save(
    half: Half,
    arena: &PlacementArena,
    primaries: &[RgbaImage],
    segments: &[RgbaImage],
    out_dir: &Path,
) -> Result<PathBuf, ComposeError> {
    let canvas = render_half(half, arena, primaries, segments)?;
    let path = out_dir.join(format!("{}.png", half.as_str()));
    save_png(&canvas, &path).map_err(|source| ComposeError::Encode {
        path: path.clone(),
        source,
    })?;
    debug!("Wrote {} half ({} placements)", half.as_str(), arena.by_half(half).count());
    Ok(path)
}
