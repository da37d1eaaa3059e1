//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

/// Preset names accepted by libx264.
pub const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.parallel_workers == 0 {
            return Err(ConfigError::ValidationError(
                "processing.parallel_workers must be > 0".into(),
            ));
        }
        if self.general.source_roots.is_empty() {
            return Err(ConfigError::ValidationError(
                "general.source_roots must name at least one directory".into(),
            ));
        }
        if self.image.quality > 100 {
            return Err(ConfigError::ValidationError(
                "image.quality must be between 0 and 100".into(),
            ));
        }
        if self.image.webp_quality > 100 {
            return Err(ConfigError::ValidationError(
                "image.webp_quality must be between 0 and 100".into(),
            ));
        }
        if self.video.crf > 51 {
            return Err(ConfigError::ValidationError(
                "video.crf must be between 0 and 51".into(),
            ));
        }
        if !X264_PRESETS.contains(&self.video.preset.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "video.preset must be one of {}",
                X264_PRESETS.join(", ")
            )));
        }
        if self.video.max_width == 0 || self.video.max_height == 0 {
            return Err(ConfigError::ValidationError(
                "video.max_width and video.max_height must be > 0".into(),
            ));
        }
        if self.compression.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "compression.timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
