//! Media optimization pipeline components.
//!
//! - **discovery**: Find source assets below the configured roots
//! - **plan**: Derive output paths and cache groups
//! - **hash**: Content fingerprints and sidecar cache records
//! - **image**: Recompress images and produce WebP siblings
//! - **compress**: Optional remote compression pass for images
//! - **video**: MP4, WebM and HLS renditions
//! - **ffmpeg**: Locate and invoke the external transcoder
//! - **orchestrator**: Drives a full run and aggregates the summary

pub mod atomic;
pub mod compress;
pub mod discovery;
pub mod ffmpeg;
pub mod hash;
pub mod image;
pub mod orchestrator;
pub mod plan;
pub mod retry;
pub mod video;

// Re-exports for convenient access
pub use compress::{Compressor, TinifyCompressor};
pub use discovery::{AssetScanner, ScanEntry};
pub use ffmpeg::{Codec, CodecError, FfmpegCodec, FfmpegLocator};
pub use hash::{Fingerprint, HashStore};
pub use self::image::{ImageTranscode, ImageTranscoder};
pub use orchestrator::{AssetOutcome, CancelFlag, Pipeline, PipelineEvent};
pub use plan::{CacheGroup, ImagePlan, OutputClaims, OutputPlanner, Rendition, VideoPlan};
pub use video::{Ladder, Rung, VideoTranscode, VideoTranscoder};
