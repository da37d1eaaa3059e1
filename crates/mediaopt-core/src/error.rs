//! Error types for the mediaopt pipeline.
//!
//! Errors are organized by stage so that log lines carry the source path and
//! the step that failed. Only run-fatal conditions ever leave
//! [`Pipeline::run`](crate::Pipeline::run); everything per-asset is counted.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for mediaopt operations.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// An environment variable holds a value that cannot be parsed
    #[error("Invalid value for {key}: {value:?} ({expected})")]
    EnvVar {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Pipeline processing errors, organized by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Encoding a rendition failed
    #[error("Encode error for {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// Reading a source or writing an output failed
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transcoding subprocess exited unsuccessfully
    #[error("Transcoder failed for {path} ({rendition}): {message}")]
    Codec {
        path: PathBuf,
        rendition: String,
        message: String,
    },

    /// The transcoding binary could not be resolved or spawned
    #[error("Transcoder binary not found while processing {0}")]
    CodecNotFound(PathBuf),

    /// The optional remote compression pass failed
    #[error("Compression pass failed: {message}")]
    Compression {
        message: String,
        status_code: Option<u16>,
    },

    /// Remote compression pass exceeded its timeout
    #[error("Compression pass timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Attempted to commit a cache group whose members are not all on disk
    #[error("Refusing to commit {primary}: missing output {missing}")]
    IncompleteGroup { primary: PathBuf, missing: PathBuf },

    /// An HLS rung playlist references a segment that was not written
    #[error("HLS playlist {playlist} references missing segment {segment}")]
    MissingSegment { playlist: PathBuf, segment: PathBuf },

    /// Two sources plan the same output path within one run
    #[error("{source_path} writes {output}, already claimed by {owner}; skipping")]
    OutputCollision {
        source_path: PathBuf,
        output: PathBuf,
        owner: PathBuf,
    },

    /// The output root could not be created
    #[error("Cannot create output directory {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// None of the configured source roots exist
    #[error("No configured source root exists (checked: {0:?})")]
    NoSourceRoots(Vec<PathBuf>),

    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl PipelineError {
    /// Shorthand for wrapping an `io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stops the whole run rather than a single asset.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::OutputRoot { .. } | Self::NoSourceRoots(_))
    }
}

/// Convenience type alias for mediaopt results.
pub type Result<T> = std::result::Result<T, MediaError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
