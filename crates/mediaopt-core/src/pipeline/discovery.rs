//! Asset discovery: walks the source roots and classifies files by extension.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::types::{AssetKind, SourceAsset};

/// One item produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    /// A file with an image or video extension
    Asset(SourceAsset),
    /// A regular file with an extension in neither set
    Unsupported(PathBuf),
    /// An entry that could not be read (permissions, symlink loop, ...)
    Failed {
        path: Option<PathBuf>,
        message: String,
    },
}

/// Recursively enumerates source assets below a set of roots.
///
/// The reserved output directory is never descended into, so derivatives,
/// cache sidecars and partial encodes are not picked up as sources. Hidden
/// files and directories elsewhere are ordinary sources.
pub struct AssetScanner {
    roots: Vec<PathBuf>,
    output_dir: PathBuf,
    config: ScanConfig,
}

impl AssetScanner {
    /// Create a scanner. Paths are canonicalized when they exist so the
    /// output-directory check is not fooled by `./` or symlinked prefixes.
    pub fn new(roots: Vec<PathBuf>, output_dir: &Path, config: ScanConfig) -> Self {
        Self {
            roots: roots.iter().map(|r| canonical_or_same(r)).collect(),
            output_dir: canonical_or_same(output_dir),
            config,
        }
    }

    /// The roots this scanner walks, after canonicalization.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Start a fresh, lazy walk over every root.
    ///
    /// Each call restarts from the beginning; nothing is cached between calls.
    /// Within a directory, entries are visited in file-name order.
    pub fn scan(&self) -> impl Iterator<Item = ScanEntry> + '_ {
        self.roots
            .iter()
            .filter(|root| root.is_dir())
            .flat_map(move |root| {
                WalkDir::new(root)
                    .follow_links(true)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(move |entry| !self.is_pruned(entry))
                    .filter_map(move |entry| match entry {
                        Ok(entry) => self.classify_entry(root, &entry),
                        Err(e) => {
                            let path = e.path().map(Path::to_path_buf);
                            tracing::warn!("Cannot read {:?}: {}", path, e);
                            Some(ScanEntry::Failed {
                                path,
                                message: e.to_string(),
                            })
                        }
                    })
            })
    }

    /// Classify a path by its extension.
    pub fn classify(&self, path: &Path) -> Option<AssetKind> {
        let ext = lowercase_extension(path)?;
        if self.config.image_extensions.iter().any(|e| *e == ext) {
            Some(AssetKind::Image)
        } else if self.config.video_extensions.iter().any(|e| *e == ext) {
            Some(AssetKind::Video)
        } else {
            None
        }
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0 && entry.path() == self.output_dir
    }

    fn classify_entry(&self, root: &Path, entry: &DirEntry) -> Option<ScanEntry> {
        if !entry.file_type().is_file() {
            return None;
        }
        let path = entry.path();
        let Some(kind) = self.classify(path) else {
            return Some(ScanEntry::Unsupported(path.to_path_buf()));
        };
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        Some(ScanEntry::Asset(SourceAsset {
            path: path.to_path_buf(),
            relative,
            extension: lowercase_extension(path).unwrap_or_default(),
            kind,
        }))
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn canonical_or_same(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
