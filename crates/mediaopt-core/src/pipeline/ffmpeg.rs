//! The external transcoder binary and how it is located.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Failure of a single codec invocation.
#[derive(Error, Debug)]
pub enum CodecError {
    /// No usable binary could be resolved or spawned
    #[error("transcoder binary not available")]
    NotFound,

    /// The subprocess ran and exited unsuccessfully
    #[error("transcoder exited with {status}")]
    Failed { status: String },
}

/// An executable codec: takes an argument list, succeeds on exit status 0.
#[async_trait]
pub trait Codec: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<(), CodecError>;
}

/// Finds the ffmpeg binary for this run.
#[derive(Debug, Clone)]
pub struct FfmpegLocator {
    configured: Option<PathBuf>,
    project_dir: PathBuf,
}

impl FfmpegLocator {
    pub fn new(configured: Option<PathBuf>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            configured,
            project_dir: project_dir.into(),
        }
    }

    /// Platform binary shipped inside the project, e.g.
    /// `vendor/ffmpeg/linux-x86_64/ffmpeg`.
    pub fn vendored_path(&self) -> PathBuf {
        let platform = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
        let binary = format!("ffmpeg{}", std::env::consts::EXE_SUFFIX);
        self.project_dir
            .join("vendor")
            .join("ffmpeg")
            .join(platform)
            .join(binary)
    }

    /// Resolve the binary: configured path, vendored binary, then `PATH`.
    ///
    /// Returns `None` when nothing usable is found.
    pub async fn resolve(&self) -> Option<PathBuf> {
        if let Some(configured) = &self.configured {
            if configured.is_file() {
                tracing::debug!("Using configured ffmpeg at {:?}", configured);
                return Some(configured.clone());
            }
            tracing::warn!("Configured ffmpeg {:?} does not exist; ignoring", configured);
        }

        let vendored = self.vendored_path();
        if vendored.is_file() {
            tracing::debug!("Using vendored ffmpeg at {:?}", vendored);
            return Some(vendored);
        }

        let on_path = PathBuf::from("ffmpeg");
        if probe(&on_path).await {
            tracing::debug!("Using ffmpeg from PATH");
            return Some(on_path);
        }

        None
    }
}

async fn probe(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// [`Codec`] backed by an ffmpeg subprocess with inherited stdio.
///
/// The binary is resolved on first use and the outcome, including
/// "not found", is reused for every later invocation.
pub struct FfmpegCodec {
    locator: FfmpegLocator,
    binary: OnceCell<Option<PathBuf>>,
}

impl FfmpegCodec {
    pub fn new(locator: FfmpegLocator) -> Self {
        Self {
            locator,
            binary: OnceCell::new(),
        }
    }

    /// The resolved binary, if any.
    pub async fn binary(&self) -> Option<&Path> {
        self.binary
            .get_or_init(|| async {
                let resolved = self.locator.resolve().await;
                if resolved.is_none() {
                    tracing::warn!("ffmpeg not found; videos will be skipped");
                }
                resolved
            })
            .await
            .as_deref()
    }
}

#[async_trait]
impl Codec for FfmpegCodec {
    async fn run(&self, args: &[String]) -> Result<(), CodecError> {
        let binary = self.binary().await.ok_or(CodecError::NotFound)?;
        tracing::debug!("{} {}", binary.display(), args.join(" "));

        let status = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CodecError::NotFound
                } else {
                    CodecError::Failed {
                        status: format!("spawn error: {e}"),
                    }
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CodecError::Failed {
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendored_path_layout() {
        let locator = FfmpegLocator::new(None, "/proj");
        let path = locator.vendored_path();
        assert!(path.starts_with("/proj/vendor/ffmpeg"));
        let platform = path.parent().unwrap().file_name().unwrap().to_string_lossy();
        assert!(platform.contains(std::env::consts::OS));
        assert!(platform.contains(std::env::consts::ARCH));
    }

    #[tokio::test]
    async fn test_configured_path_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, b"").unwrap();

        let locator = FfmpegLocator::new(Some(fake.clone()), dir.path());
        assert_eq!(locator.resolve().await, Some(fake));
    }

    #[tokio::test]
    async fn test_vendored_binary_used_when_configured_missing() {
        let dir = tempfile::tempdir().unwrap();
        let locator = FfmpegLocator::new(Some(dir.path().join("nope")), dir.path());
        let vendored = locator.vendored_path();
        std::fs::create_dir_all(vendored.parent().unwrap()).unwrap();
        std::fs::write(&vendored, b"").unwrap();

        assert_eq!(locator.resolve().await, Some(vendored));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let codec = FfmpegCodec::new(FfmpegLocator::new(Some("/bin/sh".into()), "/"));
        let err = codec
            .run(&["-c".into(), "exit 3".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let codec = FfmpegCodec::new(FfmpegLocator::new(Some("/bin/sh".into()), "/"));
        codec.run(&["-c".into(), "exit 0".into()]).await.unwrap();
        assert_eq!(codec.binary().await, Some(Path::new("/bin/sh")));
    }
}
