pub mod image_ops;
pub mod metrics;
pub mod scratch;

// Re-export commonly used items
pub use image_ops::{
    dimensions_from_bytes, load_image, load_rgba, resize_exact, resize_to_width,
    resize_to_width_capped, save_png, scaled_height, RESIZE_FILTER,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use scratch::{output_dir_name, sanitize_id, scratch_dir};
