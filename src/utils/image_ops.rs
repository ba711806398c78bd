use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Filter used for every resize, so repeated runs yield identical pixels
pub const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// Decode an image file, sniffing the format from its contents rather than the extension.
pub fn load_image(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Decode an image file straight to RGBA8
pub fn load_rgba(path: &Path) -> image::ImageResult<RgbaImage> {
    Ok(load_image(path)?.to_rgba8())
}

/// Read pixel dimensions from encoded bytes without decoding the whole image.
pub fn dimensions_from_bytes(bytes: &[u8]) -> image::ImageResult<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}

/// Write an RGBA image as PNG (lossless, so crops survive byte-exact)
pub fn save_png(img: &RgbaImage, path: &Path) -> image::ImageResult<()> {
    img.save_with_format(path, ImageFormat::Png)
}

/// Resize to an exact size regardless of aspect ratio
pub fn resize_exact(img: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    image::imageops::resize(&img.to_rgba8(), width, height, RESIZE_FILTER)
}

/// Height `src_w`×`src_h` scales to at `width`, rounded, at least 1px.
///
/// `None` when the result does not fit in a `u32`.
pub fn scaled_height(src_w: u32, src_h: u32, width: u32) -> Option<u32> {
    let src_w = u64::from(src_w.max(1));
    let height = ((u64::from(src_h) * u64::from(width) + src_w / 2) / src_w).max(1);
    u32::try_from(height).ok()
}

/// Resize to a fixed width, keeping the aspect ratio (height at least 1px).
///
/// `None` when the scaled height overflows.
pub fn resize_to_width(img: &DynamicImage, width: u32) -> Option<RgbaImage> {
    let height = scaled_height(img.width(), img.height(), width)?;
    Some(resize_exact(img, width, height))
}

/// Like `resize_to_width`, but never taller than `max_height`.
///
/// An image that would overshoot keeps only the source rows that land within
/// `max_height`, so the full-height resize is never materialised.
pub fn resize_to_width_capped(img: &DynamicImage, width: u32, max_height: u32) -> Option<RgbaImage> {
    if max_height == 0 || width == 0 {
        return None;
    }
    match scaled_height(img.width(), img.height(), width) {
        Some(height) if height <= max_height => Some(resize_exact(img, width, height)),
        _ => {
            let src_w = u64::from(img.width().max(1));
            let rows = (u64::from(max_height) * src_w).div_ceil(u64::from(width));
            let rows = rows.clamp(1, u64::from(img.height())) as u32;
            let top = img.crop_imm(0, 0, img.width(), rows);
            Some(resize_exact(&top, width, max_height))
        }
    }
}
