//! Environment-variable overrides.
//!
//! Every key is optional; unset keys leave the file/default value in place.
//! Parsing is strict so a typo like `VIDEO_CRF=high` fails loudly instead of
//! silently falling back to the default.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

use super::Config;

pub const IMAGE_QUALITY: &str = "IMAGE_QUALITY";
pub const WEBP_QUALITY: &str = "WEBP_QUALITY";
pub const VIDEO_CRF: &str = "VIDEO_CRF";
pub const VIDEO_PRESET: &str = "VIDEO_PRESET";
pub const VIDEO_MAX_WIDTH: &str = "VIDEO_MAX_WIDTH";
pub const VIDEO_MAX_HEIGHT: &str = "VIDEO_MAX_HEIGHT";
pub const VIDEO_WEBM: &str = "VIDEO_WEBM";
pub const VIDEO_ABR: &str = "VIDEO_ABR";
pub const FFMPEG_PATH: &str = "FFMPEG_PATH";
pub const TINIFY_API_KEY: &str = "TINIFY_API_KEY";
pub const MEDIAOPT_WORKERS: &str = "MEDIAOPT_WORKERS";

impl Config {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(IMAGE_QUALITY) {
            self.image.quality = parse_num(IMAGE_QUALITY, &v)?;
        }
        if let Some(v) = get(WEBP_QUALITY) {
            self.image.webp_quality = parse_num(WEBP_QUALITY, &v)?;
        }
        if let Some(v) = get(VIDEO_CRF) {
            self.video.crf = parse_num(VIDEO_CRF, &v)?;
        }
        if let Some(v) = get(VIDEO_PRESET) {
            self.video.preset = v.trim().to_string();
        }
        if let Some(v) = get(VIDEO_MAX_WIDTH) {
            self.video.max_width = parse_num(VIDEO_MAX_WIDTH, &v)?;
        }
        if let Some(v) = get(VIDEO_MAX_HEIGHT) {
            self.video.max_height = parse_num(VIDEO_MAX_HEIGHT, &v)?;
        }
        if let Some(v) = get(VIDEO_WEBM) {
            self.video.webm = parse_bool(VIDEO_WEBM, &v)?;
        }
        if let Some(v) = get(VIDEO_ABR) {
            self.video.abr = parse_bool(VIDEO_ABR, &v)?;
        }
        if let Some(v) = get(FFMPEG_PATH) {
            self.video.ffmpeg_path = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get(TINIFY_API_KEY) {
            self.compression.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = get(MEDIAOPT_WORKERS) {
            self.processing.parallel_workers = parse_num(MEDIAOPT_WORKERS, &v)?;
        }
        Ok(())
    }
}

/// Load `<project_dir>/.env` into the process environment if present.
///
/// Variables that are already set win over the file.
pub fn load_dotenv(project_dir: &Path) {
    let path = project_dir.join(".env");
    if !path.is_file() {
        return;
    }
    match dotenvy::from_path(&path) {
        Ok(()) => tracing::debug!("Loaded environment from {:?}", path),
        Err(e) => tracing::warn!("Ignoring unreadable {:?}: {e}", path),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::EnvVar {
        key: key.to_string(),
        value: value.to_string(),
        expected: "an unsigned integer",
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::EnvVar {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a boolean (1/0, true/false, yes/no, on/off)",
        }),
    }
}
