//! Output path derivation.
//!
//! Every derivative path is a pure function of the output root and the
//! source's relative path, so reruns overwrite in place. Sources that differ
//! only by extension can map onto the same derivative; [`OutputClaims`]
//! settles those within a run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::VideoConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::SourceAsset;

use super::video::Ladder;

/// A kind of derivative artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rendition {
    /// Recompressed image plus its WebP sibling
    Image,
    /// H.264/AAC MP4
    Mp4,
    /// VP9/Opus WebM
    Webm,
    /// HLS ladder: rung playlists, their segments and the master playlist
    Hls,
}

impl std::fmt::Display for Rendition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rendition::Image => "image",
            Rendition::Mp4 => "mp4",
            Rendition::Webm => "webm",
            Rendition::Hls => "hls",
        };
        f.write_str(name)
    }
}

/// Outputs that share one sidecar record and one staleness decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGroup {
    /// Rendition family the group belongs to
    pub rendition: Rendition,
    /// Output the sidecar sits next to
    pub primary: PathBuf,
    /// Every file that must exist for the group to count as current
    pub members: Vec<PathBuf>,
}

/// Planned outputs for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlan {
    /// Recompressed image, same relative path as the source
    pub primary: PathBuf,
    /// WebP sibling; equal to `primary` for WebP sources
    pub webp: PathBuf,
}

impl ImagePlan {
    /// Whether the recompressed output and the WebP sibling are one file.
    pub fn is_single_file(&self) -> bool {
        self.primary == self.webp
    }

    /// The cache group covering both artifacts.
    pub fn group(&self) -> CacheGroup {
        let mut members = vec![self.primary.clone()];
        if !self.is_single_file() {
            members.push(self.webp.clone());
        }
        CacheGroup {
            rendition: Rendition::Image,
            primary: self.primary.clone(),
            members,
        }
    }
}

/// Planned outputs for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPlan {
    pub mp4: PathBuf,
    pub webm: PathBuf,
    /// Directory holding the ladder
    pub hls_dir: PathBuf,
}

impl VideoPlan {
    /// Master playlist path.
    pub fn master_playlist(&self) -> PathBuf {
        self.hls_dir.join("master.m3u8")
    }

    /// Playlist path for one ladder rung.
    pub fn rung_playlist(&self, rung_name: &str) -> PathBuf {
        self.hls_dir.join(rung_name).join("index.m3u8")
    }

    /// Segment filename pattern for one ladder rung.
    pub fn rung_segment_pattern(&self, rung_name: &str) -> PathBuf {
        self.hls_dir.join(rung_name).join("seg_%03d.ts")
    }

    /// Renditions requested by the configuration, in production order.
    ///
    /// MP4 always comes first so it can be committed before the optional
    /// renditions are attempted.
    pub fn renditions(config: &VideoConfig) -> Vec<Rendition> {
        let mut out = vec![Rendition::Mp4];
        if config.webm {
            out.push(Rendition::Webm);
        }
        if config.abr {
            out.push(Rendition::Hls);
        }
        out
    }

    /// Top-level output path of each requested rendition family.
    pub fn outputs(&self, renditions: &[Rendition]) -> Vec<PathBuf> {
        renditions
            .iter()
            .filter_map(|rendition| match rendition {
                Rendition::Mp4 => Some(self.mp4.clone()),
                Rendition::Webm => Some(self.webm.clone()),
                Rendition::Hls => Some(self.hls_dir.clone()),
                Rendition::Image => None,
            })
            .collect()
    }

    /// The cache group for one video rendition family.
    pub fn group(&self, rendition: Rendition, ladder: &Ladder) -> CacheGroup {
        match rendition {
            Rendition::Webm => CacheGroup {
                rendition,
                primary: self.webm.clone(),
                members: vec![self.webm.clone()],
            },
            Rendition::Hls => {
                let master = self.master_playlist();
                let mut members = vec![master.clone()];
                members.extend(ladder.rungs().iter().map(|r| self.rung_playlist(r.name)));
                CacheGroup {
                    rendition,
                    primary: master,
                    members,
                }
            }
            _ => CacheGroup {
                rendition: Rendition::Mp4,
                primary: self.mp4.clone(),
                members: vec![self.mp4.clone()],
            },
        }
    }
}

/// Derives output paths below a single output root.
#[derive(Debug, Clone)]
pub struct OutputPlanner {
    output_root: PathBuf,
}

impl OutputPlanner {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Plan outputs for an image source.
    pub fn image(&self, asset: &SourceAsset) -> ImagePlan {
        let primary = self.output_root.join(&asset.relative);
        let webp = primary.with_extension("webp");
        ImagePlan { primary, webp }
    }

    /// Plan outputs for a video source.
    pub fn video(&self, asset: &SourceAsset) -> VideoPlan {
        let base = self.output_root.join(&asset.relative);
        VideoPlan {
            mp4: base.with_extension("mp4"),
            webm: base.with_extension("webm"),
            hls_dir: base.with_extension("hls"),
        }
    }
}

/// Output paths claimed by sources during one run.
///
/// Claims are made in scan order, so for sources that would overwrite each
/// other (`hero.jpg` and `hero.png` both want `hero.webp`) the first one in
/// file-name order always wins.
#[derive(Debug, Default)]
pub struct OutputClaims {
    owners: HashMap<PathBuf, PathBuf>,
}

impl OutputClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every path in `outputs` for `source`, or none of them.
    pub fn claim(&mut self, source: &Path, outputs: &[PathBuf]) -> PipelineResult<()> {
        for output in outputs {
            if let Some(owner) = self.owners.get(output) {
                if owner != source {
                    return Err(PipelineError::OutputCollision {
                        source_path: source.to_path_buf(),
                        output: output.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }
        for output in outputs {
            self.owners.insert(output.clone(), source.to_path_buf());
        }
        Ok(())
    }
}
