// Per-product scratch directories
//
// Each stage of a product run gets its own TempDir under the configured work
// directory. Dropping the handle deletes the directory, which is what ties
// cleanup to the end of a product run on every exit path.

use std::io;
use std::path::Path;
use tempfile::TempDir;
use xxhash_rust::xxh3::xxh3_64;

/// Create a fresh scratch directory named after the product and stage
pub fn scratch_dir(work_dir: &Path, product_id: &str, purpose: &str) -> io::Result<TempDir> {
    std::fs::create_dir_all(work_dir)?;
    tempfile::Builder::new()
        .prefix(&format!("{}-{}-", sanitize_id(product_id), purpose))
        .tempdir_in(work_dir)
}

/// Make a product id safe to embed in a file name
pub fn sanitize_id(product_id: &str) -> String {
    let cleaned: String = product_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "product".to_string()
    } else {
        cleaned
    }
}

/// Directory name owned by exactly one product id.
///
/// The sanitised prefix keeps it readable; the hash of the raw id keeps ids
/// that sanitise alike (`shop/1`, `shop_1`) apart. Stable across runs.
pub fn output_dir_name(product_id: &str) -> String {
    format!("{}-{:016x}", sanitize_id(product_id), xxh3_64(product_id.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("sku/12 34"), "sku_12_34");
        assert_eq!(sanitize_id("../etc"), "___etc");
        assert_eq!(sanitize_id(""), "product");
    }

    #[test]
    fn test_output_dir_name_separates_colliding_ids() {
        assert_eq!(sanitize_id("shop/1"), sanitize_id("shop_1"));
        assert_ne!(output_dir_name("shop/1"), output_dir_name("shop_1"));

        let name = output_dir_name("shop/1");
        assert_eq!(name, output_dir_name("shop/1"));
        assert!(name.starts_with("shop_1-"));
        assert_eq!(name.len(), "shop_1-".len() + 16);
    }

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let work = TempDir::new().unwrap();
        let nested = work.path().join("not/yet/there");

        let dir = scratch_dir(&nested, "sku 1", "dl").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.starts_with(&nested));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("sku_1-dl-"));

        drop(dir);
        assert!(!path.exists());
    }
}
