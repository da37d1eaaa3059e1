//! Content fingerprints and the sidecar cache that records them.
//!
//! Staleness is decided purely on content: a BLAKE3 digest of the source
//! bytes is stored next to each output group's primary file. Modification
//! times are never consulted because copies and deploys do not preserve them.

use blake3::Hasher as Blake3Hasher;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

use super::atomic::write_atomic_async;
use super::plan::CacheGroup;

/// BLAKE3 digest of a source file's bytes, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an in-memory buffer.
    ///
    /// Used for images, whose bytes are read once and shared between hashing
    /// and encoding.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Blake3Hasher::new();
        hasher.update(data);
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Fingerprint a file by streaming it, without loading it into memory.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Blake3Hasher::new();

        // Use 64KB buffer for efficient reading
        let mut buffer = [0u8; 65536];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// [`Fingerprint::of_file`] on the blocking pool.
    pub async fn of_file_async(path: PathBuf) -> std::io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::of_file(&path))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Parse a stored digest. Returns `None` for anything that is not
    /// 64 hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sidecar-file cache of fingerprints, one record per output group.
///
/// Holds no state of its own: every call reads or writes the single sidecar
/// belonging to the group it is given, so concurrent workers on distinct
/// assets never contend.
#[derive(Debug, Clone, Default)]
pub struct HashStore;

impl HashStore {
    pub fn new() -> Self {
        Self
    }

    /// Sidecar location for a primary output: `<dir>/.<file_name>.hash`.
    pub fn sidecar_path(primary: &Path) -> PathBuf {
        let name = primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        primary.with_file_name(format!(".{name}.hash"))
    }

    /// The fingerprint currently recorded for a group, if any.
    ///
    /// A missing, unreadable or malformed sidecar all read as "no record".
    pub async fn recorded(&self, group: &CacheGroup) -> Option<Fingerprint> {
        let sidecar = Self::sidecar_path(&group.primary);
        let content = tokio::fs::read_to_string(&sidecar).await.ok()?;
        Fingerprint::parse(&content)
    }

    /// Whether a group must be regenerated for the given live fingerprint.
    ///
    /// Stale when there is no record, the record differs, or any member file
    /// is missing (one missing sibling invalidates the whole group).
    pub async fn is_stale(&self, group: &CacheGroup, live: &Fingerprint) -> bool {
        match self.recorded(group).await {
            Some(recorded) if recorded == *live => {}
            _ => return true,
        }
        for member in &group.members {
            if !is_file(member).await {
                tracing::debug!("Cache member missing: {:?}", member);
                return true;
            }
        }
        false
    }

    /// Record `fingerprint` as the source state that produced `group`.
    ///
    /// Refuses when any member is absent so that a record never claims
    /// success for an incomplete group.
    pub async fn commit(&self, group: &CacheGroup, fingerprint: &Fingerprint) -> PipelineResult<()> {
        for member in &group.members {
            if !is_file(member).await {
                return Err(PipelineError::IncompleteGroup {
                    primary: group.primary.clone(),
                    missing: member.clone(),
                });
            }
        }
        let sidecar = Self::sidecar_path(&group.primary);
        write_atomic_async(sidecar.clone(), format!("{fingerprint}\n").into_bytes())
            .await
            .map_err(|e| PipelineError::io(sidecar, e))
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
