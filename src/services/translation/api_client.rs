use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::TranslationError;
use crate::core::types::TranslationStyle;
use crate::middleware::retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
use crate::utils::image_ops::dimensions_from_bytes;
use crate::utils::Metrics;

/// One submission to the OCR-and-redraw service
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub image_bytes: Vec<u8>,
    pub file_name: String,
    pub target_lang: String,
    pub style: TranslationStyle,
}

/// Sends a single request and returns the translated image bytes.
///
/// Implementations map HTTP 429 to `TranslationError::RateLimited` and any
/// other non-success status to `TranslationError::Upstream`.
#[async_trait]
pub trait TranslationTransport: Send + Sync {
    async fn submit(&self, request: &TranslateRequest) -> Result<Vec<u8>, TranslationError>;
}

/// Multipart HTTP transport
pub struct HttpTranslationTransport {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslationTransport {
    pub fn new(config: &TranslationConfig) -> Result<Self, TranslationError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TranslationTransport for HttpTranslationTransport {
    async fn submit(&self, request: &TranslateRequest) -> Result<Vec<u8>, TranslationError> {
        let image = Part::bytes(request.image_bytes.clone())
            .file_name(request.file_name.clone())
            .mime_str("image/png")?;

        let form = Form::new()
            .part("image", image)
            .text("target_lang", request.target_lang.clone())
            .text("font", request.style.font.clone())
            .text("stroke_disabled", request.style.stroke_disabled.to_string());

        let mut builder = self.http_client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(TranslationError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::Upstream {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Translation client for canvas halves.
///
/// Each call owns its inputs and outputs; the two halves of a product are
/// translated through independent calls with no shared state beyond metrics.
pub struct TranslationClient {
    transport: Arc<dyn TranslationTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    style: TranslationStyle,
    metrics: Option<Metrics>,
}

impl TranslationClient {
    /// Create a client talking to the configured HTTP endpoint
    pub fn new(config: &TranslationConfig, metrics: Option<Metrics>) -> Result<Self, TranslationError> {
        let transport = Arc::new(HttpTranslationTransport::new(config)?);
        Ok(Self::with_transport(
            transport,
            Arc::new(TokioSleeper),
            Self::policy_from(config),
            TranslationStyle {
                font: config.font.clone(),
                stroke_disabled: config.stroke_disabled,
            },
            metrics,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn TranslationTransport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        style: TranslationStyle,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            style,
            metrics,
        }
    }

    pub fn policy_from(config: &TranslationConfig) -> RetryPolicy {
        RetryPolicy::new(
            config.rate_limit_max_retries,
            Duration::from_millis(config.rate_limit_delay_min_ms),
            Duration::from_millis(config.rate_limit_delay_max_ms),
        )
    }

    pub fn style(&self) -> &TranslationStyle {
        &self.style
    }

    /// Translate the image at `input` and write the result to `output`.
    ///
    /// 429 responses are retried per the rate-limit policy and become
    /// `RateLimitExhausted` once it runs out. The response must have the same
    /// pixel dimensions as the input.
    #[instrument(skip(self, input, output), fields(input = %input.display()))]
    pub async fn translate_file(
        &self,
        input: &Path,
        output: &Path,
        target_lang: &str,
    ) -> Result<(), TranslationError> {
        let image_bytes = tokio::fs::read(input).await.map_err(|source| TranslationError::Io {
            path: input.to_path_buf(),
            source,
        })?;

        let expected = dimensions_from_bytes(&image_bytes).map_err(|source| TranslationError::InvalidImage {
            context: input.display().to_string(),
            source,
        })?;

        let request = TranslateRequest {
            image_bytes,
            file_name: input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "canvas.png".to_string()),
            target_lang: target_lang.to_string(),
            style: self.style.clone(),
        };

        let translated = self.submit_with_retry(&request).await?;

        let actual = dimensions_from_bytes(&translated).map_err(|source| TranslationError::InvalidImage {
            context: "translation response".to_string(),
            source,
        })?;
        if actual != expected {
            return Err(TranslationError::DimensionMismatch { expected, actual });
        }

        tokio::fs::write(output, &translated)
            .await
            .map_err(|source| TranslationError::Io {
                path: output.to_path_buf(),
                source,
            })?;

        debug!("Translated {} -> {} ({}x{})", input.display(), output.display(), actual.0, actual.1);
        Ok(())
    }

    async fn submit_with_retry(&self, request: &TranslateRequest) -> Result<Vec<u8>, TranslationError> {
        let result = with_retry(
            &self.policy,
            self.sleeper.as_ref(),
            |attempt| async move {
                if attempt > 1 {
                    if let Some(ref m) = self.metrics {
                        m.record_rate_limit_retry();
                    }
                }
                let start = Instant::now();
                let result = self.transport.submit(request).await;
                if let Some(ref m) = self.metrics {
                    m.record_translate_call(result.is_ok(), start.elapsed());
                }
                result
            },
            TranslationError::is_rate_limited,
        )
        .await;

        match result {
            Err(TranslationError::RateLimited) => {
                warn!(
                    "Translation service rate limit persisted through {} attempts",
                    self.policy.max_attempts
                );
                Err(TranslationError::RateLimitExhausted {
                    attempts: self.policy.max_attempts,
                })
            }
            other => other,
        }
    }
}
