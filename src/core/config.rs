use crate::core::errors::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Translation service configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub font: String,
    pub stroke_disabled: bool,
    pub timeout_seconds: u64,
    /// Additional attempts after the first 429 response
    pub rate_limit_max_retries: u32,
    pub rate_limit_delay_min_ms: u64,
    pub rate_limit_delay_max_ms: u64,
}

/// Source image download configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout_seconds: u64,
    /// Concurrent downloads within one product
    pub concurrency: usize,
}

/// Batch pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_products: usize,
    /// Pause between product submissions, keeps the translation API under its rate budget
    pub submission_delay_ms: u64,
    /// Root for per-product scratch directories
    pub work_dir: PathBuf,
    /// Root for extracted output images
    pub output_dir: PathBuf,
    pub catalog_file: PathBuf,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub translation: TranslationConfig,
    pub download: DownloadConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_with(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build a config from an arbitrary key lookup, without validating it
    pub fn load_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Self {
            server: ServerConfig {
                port: parse_env(&lookup, "SERVER_PORT").unwrap_or(1430),
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
            },
            translation: TranslationConfig {
                api_url: lookup("TRANSLATION_API_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8088/translate".to_string()),
                api_key: lookup("TRANSLATION_API_KEY")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                font: lookup("TRANSLATION_FONT").unwrap_or_else(|| "NotoSans-Regular".to_string()),
                stroke_disabled: parse_env(&lookup, "TRANSLATION_STROKE_DISABLED").unwrap_or(true),
                timeout_seconds: parse_env(&lookup, "TRANSLATION_TIMEOUT_SECONDS").unwrap_or(120),
                rate_limit_max_retries: parse_env(&lookup, "RATE_LIMIT_MAX_RETRIES").unwrap_or(2),
                rate_limit_delay_min_ms: parse_env(&lookup, "RATE_LIMIT_DELAY_MIN_MS").unwrap_or(7_000),
                rate_limit_delay_max_ms: parse_env(&lookup, "RATE_LIMIT_DELAY_MAX_MS").unwrap_or(10_000),
            },
            download: DownloadConfig {
                timeout_seconds: parse_env(&lookup, "DOWNLOAD_TIMEOUT_SECONDS").unwrap_or(30),
                concurrency: parse_env(&lookup, "DOWNLOAD_CONCURRENCY").unwrap_or(8),
            },
            pipeline: PipelineConfig {
                max_concurrent_products: parse_env(&lookup, "MAX_CONCURRENT_PRODUCTS").unwrap_or(4),
                submission_delay_ms: parse_env(&lookup, "SUBMISSION_DELAY_MS").unwrap_or(1_500),
                work_dir: lookup("WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| env::temp_dir().join("canvas_translate")),
                output_dir: lookup("OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("output")),
                catalog_file: lookup("CATALOG_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("output/catalog.json")),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.translation.api_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidTranslationUrl(url.to_string()));
        }

        if self.translation.rate_limit_delay_min_ms > self.translation.rate_limit_delay_max_ms {
            return Err(ConfigError::InvalidDelayRange {
                min_ms: self.translation.rate_limit_delay_min_ms,
                max_ms: self.translation.rate_limit_delay_max_ms,
            });
        }

        for (name, value) in [
            ("TRANSLATION_TIMEOUT_SECONDS", self.translation.timeout_seconds),
            ("DOWNLOAD_TIMEOUT_SECONDS", self.download.timeout_seconds),
            ("DOWNLOAD_CONCURRENCY", self.download.concurrency as u64),
            ("MAX_CONCURRENT_PRODUCTS", self.pipeline.max_concurrent_products as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name, value });
            }
        }

        if self.pipeline.work_dir == self.pipeline.output_dir {
            return Err(ConfigError::InvalidPath {
                name: "WORK_DIR",
                reason: "must differ from OUTPUT_DIR (scratch contents are deleted)".to_string(),
            });
        }

        check_parent_exists("CATALOG_FILE", &self.pipeline.catalog_file, &self.pipeline.output_dir)?;

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_concurrent_products(&self) -> usize {
        self.pipeline.max_concurrent_products
    }

    pub fn submission_delay(&self) -> Duration {
        Duration::from_millis(self.pipeline.submission_delay_ms)
    }

    pub fn work_dir(&self) -> &Path {
        &self.pipeline.work_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.pipeline.output_dir
    }

    pub fn catalog_file(&self) -> &Path {
        &self.pipeline.catalog_file
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}

// The catalog file may live under OUTPUT_DIR, which is created on startup
fn check_parent_exists(name: &'static str, path: &Path, output_dir: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() && !parent.starts_with(output_dir) {
            return Err(ConfigError::InvalidPath {
                name,
                reason: format!("parent directory does not exist: {}", parent.display()),
            });
        }
    }
    Ok(())
}
