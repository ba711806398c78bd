// Persistence collaborator: stores extracted image paths on the product record
//
// The real catalog lives in the database layer. JsonFileCatalog keeps the
// binary self-contained; InMemoryCatalog serves embedders and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::errors::CatalogError;

/// Translated image paths stored for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedImageRecord {
    pub primary_images: Vec<PathBuf>,
    pub description_images: Vec<PathBuf>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Replace the product's translated image lists, in output order
    async fn save_translated_images(
        &self,
        product_id: &str,
        primary: &[PathBuf],
        description: &[PathBuf],
    ) -> Result<(), CatalogError>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    records: DashMap<String, TranslatedImageRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: &str) -> Option<TranslatedImageRecord> {
        self.records.get(product_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn save_translated_images(
        &self,
        product_id: &str,
        primary: &[PathBuf],
        description: &[PathBuf],
    ) -> Result<(), CatalogError> {
        self.records.insert(
            product_id.to_string(),
            TranslatedImageRecord {
                primary_images: primary.to_vec(),
                description_images: description.to_vec(),
            },
        );
        Ok(())
    }
}

/// JSON file keyed by product id, rewritten atomically on every save
pub struct JsonFileCatalog {
    path: PathBuf,
    // Serialises read-modify-write cycles on the file
    write_lock: Mutex<()>,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<BTreeMap<String, TranslatedImageRecord>, CatalogError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(CatalogError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn io_err(&self, source: std::io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CatalogStore for JsonFileCatalog {
    async fn save_translated_images(
        &self,
        product_id: &str,
        primary: &[PathBuf],
        description: &[PathBuf],
    ) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await?;
        records.insert(
            product_id.to_string(),
            TranslatedImageRecord {
                primary_images: primary.to_vec(),
                description_images: description.to_vec(),
            },
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let data = serde_json::to_vec_pretty(&records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        debug!(
            "Catalog updated for {} ({} primary, {} description)",
            product_id,
            primary.len(),
            description.len()
        );
        Ok(())
    }
}
