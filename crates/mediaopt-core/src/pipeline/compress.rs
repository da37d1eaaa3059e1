//! Optional remote compression pass applied to image bytes before encoding.
//!
//! The pass is best-effort: callers treat every error as "keep the original
//! buffer" and never fail an asset because of it.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CompressionConfig;
use crate::error::{PipelineError, PipelineResult};

use super::retry;

/// A byte-in, byte-out image compressor.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Provider name for log lines.
    fn name(&self) -> &str;

    /// Whether the provider accepts images with this (lowercase) extension.
    fn supports(&self, extension: &str) -> bool;

    /// Compress an encoded image, returning the new encoded bytes in the
    /// same format.
    async fn compress(&self, data: &[u8]) -> PipelineResult<Vec<u8>>;
}

/// Run `compressor` over `data`, falling back to the original on any failure.
pub async fn compress_or_original(
    compressor: Option<&dyn Compressor>,
    data: Vec<u8>,
    extension: &str,
) -> Vec<u8> {
    let Some(compressor) = compressor else {
        return data;
    };
    if !compressor.supports(extension) {
        return data;
    }
    match compressor.compress(&data).await {
        Ok(out) if !out.is_empty() => {
            tracing::debug!(
                "{} pass: {} -> {} bytes",
                compressor.name(),
                data.len(),
                out.len()
            );
            out
        }
        Ok(_) => {
            tracing::warn!("{} pass returned no data; using original", compressor.name());
            data
        }
        Err(e) => {
            tracing::warn!("{} pass failed, using original: {e}", compressor.name());
            data
        }
    }
}

/// Tinify (TinyPNG/TinyJPG) API client.
pub struct TinifyCompressor {
    api_key: String,
    endpoint: String,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay_ms: u64,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ShrinkResponse {
    output: ShrinkOutput,
}

#[derive(Deserialize)]
struct ShrinkOutput {
    url: String,
}

impl TinifyCompressor {
    pub fn new(api_key: &str, config: &CompressionConfig) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
            client: reqwest::Client::new(),
        }
    }

    /// Build a compressor from configuration; `None` when no key is set.
    pub fn from_config(config: &CompressionConfig) -> Option<Self> {
        config.api_key().map(|key| Self::new(key, config))
    }

    async fn shrink_once(&self, data: &[u8]) -> PipelineResult<Vec<u8>> {
        let resp = self
            .client
            .post(format!("{}/shrink", self.endpoint))
            .basic_auth("api", Some(&self.api_key))
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::Compression {
                message: format!("Tinify request failed: {e}"),
                status_code: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Compression {
                message: format!("Tinify HTTP {status}: {text}"),
                status_code: Some(status.as_u16()),
            });
        }

        let shrink: ShrinkResponse =
            resp.json().await.map_err(|e| PipelineError::Compression {
                message: format!("Failed to parse Tinify response: {e}"),
                status_code: None,
            })?;

        let resp = self
            .client
            .get(&shrink.output.url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await
            .map_err(|e| PipelineError::Compression {
                message: format!("Tinify download failed: {e}"),
                status_code: None,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Compression {
                message: format!("Tinify download HTTP {status}"),
                status_code: Some(status.as_u16()),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| PipelineError::Compression {
            message: format!("Tinify download failed: {e}"),
            status_code: None,
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Compressor for TinifyCompressor {
    fn name(&self) -> &str {
        "tinify"
    }

    fn supports(&self, extension: &str) -> bool {
        matches!(extension, "png" | "jpg" | "jpeg" | "webp")
    }

    async fn compress(&self, data: &[u8]) -> PipelineResult<Vec<u8>> {
        let mut last_error = PipelineError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        };
        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                let delay = retry::backoff_duration(attempt - 1, self.retry_delay_ms);
                tracing::debug!("Tinify retry {attempt}/{} after {delay:?}", self.retry_attempts);
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.timeout, self.shrink_once(data)).await {
                Ok(Ok(out)) => return Ok(out),
                Ok(Err(e)) => {
                    let retryable = retry::is_retryable(&e);
                    last_error = e;
                    if !retryable {
                        break;
                    }
                }
                Err(_) => {
                    last_error = PipelineError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    };
                }
            }
        }
        Err(last_error)
    }
}
