//! Mediaopt Core - build-time media optimization library.
//!
//! Mediaopt walks a project's static asset roots and produces web-ready
//! derivatives: recompressed images with WebP siblings, MP4 (and optionally
//! WebM and HLS) renditions of videos. Every output group is keyed by a
//! content fingerprint stored in a sidecar file, so repeated runs only touch
//! sources whose bytes changed.
//!
//! # Architecture
//!
//! ```text
//! Scan → Plan outputs → Fingerprint → Stale? → Transcode → Commit sidecar → Summary
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mediaopt_core::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> mediaopt_core::Result<()> {
//!     let config = Config::load()?;
//!     let summary = Pipeline::new(config).run().await?;
//!     println!("{} assets changed", summary.total_changed());
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod types;

// Re-exports for convenient access
pub use config::Config;
pub use error::{ConfigError, MediaError, PipelineError, PipelineResult, Result};
pub use output::{ReportFormat, SummaryWriter};
pub use pipeline::{CancelFlag, Pipeline, PipelineEvent};
pub use types::{AssetKind, KindStats, RunSummary, SourceAsset, VideoStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_pipeline_new_from_defaults() {
        let pipeline = Pipeline::new(Config::default());
        assert_eq!(pipeline.config().processing.parallel_workers, 4);
    }
}
