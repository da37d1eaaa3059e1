//! Image renditions: same-format recompression plus a WebP sibling.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ImageConfig, PngCompression};
use crate::error::{PipelineError, PipelineResult};
use crate::types::SourceAsset;

use super::atomic::write_atomic_async;
use super::compress::{compress_or_original, Compressor};
use super::plan::ImagePlan;

/// Produces the derivatives for a single image.
#[async_trait]
pub trait ImageTranscode: Send + Sync {
    /// Write every file in `plan` from the source bytes `data`.
    ///
    /// Returns only once all planned files are on disk.
    async fn transcode(
        &self,
        asset: &SourceAsset,
        data: Vec<u8>,
        plan: &ImagePlan,
    ) -> PipelineResult<()>;
}

/// Encoded outputs for one image, before they are written.
#[derive(Debug)]
pub struct RenderedImage {
    pub primary: Vec<u8>,
    /// `None` when the source is itself WebP
    pub webp: Option<Vec<u8>>,
}

/// Image transcoder backed by the `image` and `webp` crates.
pub struct ImageTranscoder {
    config: ImageConfig,
    compressor: Option<Arc<dyn Compressor>>,
}

impl ImageTranscoder {
    /// Create a transcoder with the given quality settings.
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            compressor: None,
        }
    }

    /// Attach an optional pre-encoding compression pass.
    pub fn with_compressor(mut self, compressor: Option<Arc<dyn Compressor>>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Encode both renditions in memory (CPU-bound; call off the async runtime).
    pub fn render(
        config: &ImageConfig,
        data: &[u8],
        extension: &str,
        path: &Path,
        single_file: bool,
    ) -> PipelineResult<RenderedImage> {
        let image = decode(data, path)?;

        let primary = match extension {
            "jpg" | "jpeg" => encode_jpeg(&image, config.quality, path)?,
            "png" => encode_png(&image, config.png_compression, path)?,
            "webp" => encode_webp(&image, config.webp_quality, path)?,
            // No recompression for the rest; copy so the output path stays valid
            _ => data.to_vec(),
        };

        let webp = if single_file {
            None
        } else {
            Some(encode_webp(&image, config.webp_quality, path)?)
        };

        Ok(RenderedImage { primary, webp })
    }
}

#[async_trait]
impl ImageTranscode for ImageTranscoder {
    async fn transcode(
        &self,
        asset: &SourceAsset,
        data: Vec<u8>,
        plan: &ImagePlan,
    ) -> PipelineResult<()> {
        let data = compress_or_original(self.compressor.as_deref(), data, &asset.extension).await;

        let config = self.config.clone();
        let extension = asset.extension.clone();
        let path = asset.path.clone();
        let single_file = plan.is_single_file();
        let rendered = tokio::task::spawn_blocking(move || {
            ImageTranscoder::render(&config, &data, &extension, &path, single_file)
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))??;

        write_atomic_async(plan.primary.clone(), rendered.primary)
            .await
            .map_err(|e| PipelineError::io(&plan.primary, e))?;
        if let Some(webp) = rendered.webp {
            write_atomic_async(plan.webp.clone(), webp)
                .await
                .map_err(|e| PipelineError::io(&plan.webp, e))?;
        }

        tracing::debug!("Wrote {:?} and {:?}", plan.primary, plan.webp);
        Ok(())
    }
}

/// Decode an image, detecting the format from content rather than extension.
fn decode(data: &[u8], path: &Path) -> PipelineResult<DynamicImage> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            message: format!("Cannot detect image format: {}", e),
        })?;
    reader.decode().map_err(|e| PipelineError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8, path: &Path) -> PipelineResult<Vec<u8>> {
    // JPEG carries no alpha channel
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| encode_error(path, "jpeg", e))?;
    Ok(buffer)
}

fn encode_png(
    image: &DynamicImage,
    compression: PngCompression,
    path: &Path,
) -> PipelineResult<Vec<u8>> {
    let compression = match compression {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
    image
        .write_with_encoder(encoder)
        .map_err(|e| encode_error(path, "png", e))?;
    Ok(buffer)
}

fn encode_webp(image: &DynamicImage, quality: u8, path: &Path) -> PipelineResult<Vec<u8>> {
    let (width, height) = image.dimensions();
    let quality = f32::from(quality.min(100));

    let encoded = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode_simple(false, quality)
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode_simple(false, quality)
    };

    encoded
        .map(|mem| mem.to_vec())
        .map_err(|e| encode_error(path, "webp", format!("{e:?}")))
}

fn encode_error(path: &Path, format: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Encode {
        path: path.to_path_buf(),
        message: format!("{format}: {e}"),
    }
}
