//! Core data types for the mediaopt pipeline.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Media class of a discovered source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Video => write!(f, "video"),
        }
    }
}

/// A source file found under one of the configured roots.
///
/// Immutable for the duration of a run. Content is read on demand so the
/// scanner never holds file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    /// Absolute (or root-joined) path to the source
    pub path: PathBuf,

    /// Path relative to its source root; the cache and output key
    pub relative: PathBuf,

    /// Lowercase extension without the dot
    pub extension: String,

    /// Image or video
    pub kind: AssetKind,
}

impl SourceAsset {
    /// Read the full content of the source.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// File name for log lines.
    pub fn display_name(&self) -> &Path {
        &self.relative
    }
}

/// Counters for one asset kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Assets of this kind handled in the run (including unchanged ones)
    pub processed: u64,

    /// Assets whose derivatives were (re)generated
    pub changed: u64,

    /// Assets skipped because every derivative was current
    pub unchanged: u64,

    /// Assets with at least one failed rendition
    pub failed: u64,
}

/// Video counters, which add the missing-codec bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VideoStats {
    #[serde(flatten)]
    pub counts: KindStats,

    /// Videos left untouched because no transcoder binary was available
    pub skipped_missing_codec: u64,
}

/// Aggregated result of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Regular files encountered below the source roots
    pub files_scanned: u64,

    /// Image counters
    pub images: KindStats,

    /// Video counters
    pub videos: VideoStats,

    /// Files with an extension in neither set
    pub unsupported_skipped: u64,

    /// Entries the scanner could not read (permissions, symlink loops)
    pub scan_errors: u64,

    /// The run was cancelled before every asset was dispatched
    pub interrupted: bool,

    /// Wall-clock duration of the run
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Total assets that changed across kinds.
    pub fn total_changed(&self) -> u64 {
        self.images.changed + self.videos.counts.changed
    }

    /// Total per-asset failures across kinds.
    pub fn total_failed(&self) -> u64 {
        self.images.failed + self.videos.counts.failed
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
