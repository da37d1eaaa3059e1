//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings: where sources live and where derivatives go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory relative paths below are resolved against
    pub project_dir: PathBuf,

    /// Source roots to scan
    pub source_roots: Vec<PathBuf>,

    /// Reserved output root; never scanned even when it lies inside a source root
    pub output_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            source_roots: vec![PathBuf::from("public")],
            output_dir: PathBuf::from("public/optimized"),
        }
    }
}

/// Extension sets used to classify discovered files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Extensions treated as images (lowercase, no dot)
    pub image_extensions: Vec<String>,

    /// Extensions treated as videos (lowercase, no dot)
    pub video_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            image_extensions: ["jpg", "jpeg", "png", "webp", "gif", "tif", "tiff", "bmp"]
                .into_iter()
                .map(String::from)
                .collect(),
            video_extensions: ["mp4", "mov", "m4v", "webm", "mkv", "avi"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of assets processed concurrently
    pub parallel_workers: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 4,
        }
    }
}

/// PNG deflate effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    #[default]
    Best,
}

/// Image recompression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// JPEG recompression quality (0-100)
    pub quality: u8,

    /// WebP sibling (and WebP source) quality (0-100)
    pub webp_quality: u8,

    /// PNG compression effort
    pub png_compression: PngCompression,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            quality: 80,
            webp_quality: 80,
            png_compression: PngCompression::Best,
        }
    }
}

/// Video transcoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Constant rate factor (0-51, lower is better)
    pub crf: u8,

    /// x264 speed/quality preset name
    pub preset: String,

    /// Maximum output width; aspect ratio is preserved
    pub max_width: u32,

    /// Maximum output height; aspect ratio is preserved
    pub max_height: u32,

    /// Also produce a VP9/Opus WebM rendition
    pub webm: bool,

    /// Also produce a three-rung HLS ladder
    pub abr: bool,

    /// Explicit path to the ffmpeg binary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            crf: 28,
            preset: "veryfast".to_string(),
            max_width: 1280,
            max_height: 720,
            webm: false,
            abr: false,
            ffmpeg_path: None,
        }
    }
}

/// Remote lossless/near-lossless compression pass (Tinify API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// API key; the pass is disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// API base URL
    pub endpoint: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries for rate-limit and server errors
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.tinify.com".to_string(),
            timeout_ms: 30_000,
            retry_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl CompressionConfig {
    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
