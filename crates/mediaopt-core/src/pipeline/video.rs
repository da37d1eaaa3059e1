//! Video renditions: MP4, WebM and the HLS ladder, each one codec invocation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::VideoConfig;
use crate::error::{PipelineError, PipelineResult};

use super::atomic::write_atomic_async;
use super::ffmpeg::{Codec, CodecError};
use super::plan::{Rendition, VideoPlan};

/// One quality level of the adaptive-bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rung {
    /// Directory and variant name, e.g. `480p`
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl Rung {
    /// Advertised peak bandwidth in bits per second.
    pub fn bandwidth(&self, audio: bool) -> u64 {
        let kbps = if audio {
            self.video_kbps + self.audio_kbps
        } else {
            self.video_kbps
        };
        u64::from(kbps) * 1000
    }
}

/// Ordered set of rungs, ascending quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    rungs: Vec<Rung>,
}

impl Ladder {
    /// 360p, 480p and 720p.
    pub fn standard() -> Self {
        Self {
            rungs: vec![
                Rung {
                    name: "360p",
                    width: 640,
                    height: 360,
                    video_kbps: 800,
                    audio_kbps: 96,
                },
                Rung {
                    name: "480p",
                    width: 854,
                    height: 480,
                    video_kbps: 1400,
                    audio_kbps: 128,
                },
                Rung {
                    name: "720p",
                    width: 1280,
                    height: 720,
                    video_kbps: 2400,
                    audio_kbps: 128,
                },
            ],
        }
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    /// Master playlist text listing every rung in ascending bandwidth order.
    ///
    /// `audio` says whether the rungs carry an audio track, which counts
    /// towards the advertised bandwidth.
    pub fn master_playlist(&self, audio: bool) -> String {
        let mut rungs: Vec<&Rung> = self.rungs.iter().collect();
        rungs.sort_by_key(|r| r.bandwidth(audio));

        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for rung in rungs {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/index.m3u8\n",
                rung.bandwidth(audio),
                rung.width,
                rung.height,
                rung.name
            ));
        }
        out
    }
}

impl Default for Ladder {
    fn default() -> Self {
        Self::standard()
    }
}

/// Bound-and-even scaling shared by the single-file renditions.
fn scale_filter(config: &VideoConfig) -> String {
    format!(
        "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease,\
         scale=trunc(iw/2)*2:trunc(ih/2)*2",
        config.max_width, config.max_height
    )
}

fn common_input(source: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
    ]
}

/// Arguments for the H.264/AAC MP4 rendition.
pub fn mp4_args(source: &Path, output: &Path, config: &VideoConfig) -> Vec<String> {
    let mut args = common_input(source);
    args.extend(
        [
            "-vf",
            scale_filter(config).as_str(),
            "-c:v",
            "libx264",
            "-preset",
            config.preset.as_str(),
            "-crf",
            config.crf.to_string().as_str(),
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Arguments for the VP9/Opus WebM rendition.
pub fn webm_args(source: &Path, output: &Path, config: &VideoConfig) -> Vec<String> {
    let mut args = common_input(source);
    args.extend(
        [
            "-vf",
            scale_filter(config).as_str(),
            "-c:v",
            "libvpx-vp9",
            "-crf",
            config.crf.to_string().as_str(),
            "-b:v",
            "0",
            "-row-mt",
            "1",
            "-c:a",
            "libopus",
            "-b:a",
            "96k",
            "-f",
            "webm",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Arguments that exit successfully only when `source` has an audio stream.
///
/// Maps the first audio stream and encodes zero seconds of it to the null
/// muxer; ffmpeg rejects the map when no such stream exists.
pub fn audio_probe_args(source: &Path) -> Vec<String> {
    [
        "-hide_banner",
        "-nostdin",
        "-v",
        "error",
        "-i",
        &*source.to_string_lossy(),
        "-map",
        "0:a:0",
        "-t",
        "0",
        "-f",
        "null",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Arguments for the whole HLS ladder in one invocation.
///
/// Without `audio` every rung is video-only.
pub fn hls_args(
    source: &Path,
    plan: &VideoPlan,
    ladder: &Ladder,
    config: &VideoConfig,
    audio: bool,
) -> Vec<String> {
    let rungs = ladder.rungs();
    let mut args = common_input(source);

    let mut graph = format!("[0:v]split={}", rungs.len());
    for i in 0..rungs.len() {
        graph.push_str(&format!("[v{i}]"));
    }
    for (i, rung) in rungs.iter().enumerate() {
        graph.push_str(&format!(
            ";[v{i}]scale=w={}:h={}:force_original_aspect_ratio=decrease,\
             scale=trunc(iw/2)*2:trunc(ih/2)*2[v{i}out]",
            rung.width, rung.height
        ));
    }
    args.push("-filter_complex".into());
    args.push(graph);

    for (i, rung) in rungs.iter().enumerate() {
        args.extend([
            "-map".into(),
            format!("[v{i}out]"),
            format!("-c:v:{i}"),
            "libx264".into(),
            format!("-b:v:{i}"),
            format!("{}k", rung.video_kbps),
        ]);
        if audio {
            args.extend([
                "-map".into(),
                "0:a:0".into(),
                format!("-c:a:{i}"),
                "aac".into(),
                format!("-b:a:{i}"),
                format!("{}k", rung.audio_kbps),
            ]);
        }
    }

    let stream_map = rungs
        .iter()
        .enumerate()
        .map(|(i, rung)| {
            if audio {
                format!("v:{i},a:{i},name:{}", rung.name)
            } else {
                format!("v:{i},name:{}", rung.name)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    args.extend([
        "-preset".into(),
        config.preset.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        "6".into(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        plan.rung_segment_pattern("%v").to_string_lossy().into_owned(),
        "-var_stream_map".into(),
        stream_map,
        plan.rung_playlist("%v").to_string_lossy().into_owned(),
    ]);
    args
}

/// Segment URIs listed in a media playlist, in order.
pub fn playlist_segments(playlist: &str) -> Vec<&str> {
    playlist
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Check that every rung playlist exists and every segment it names is on disk.
pub async fn verify_ladder(plan: &VideoPlan, ladder: &Ladder) -> PipelineResult<()> {
    for rung in ladder.rungs() {
        let playlist = plan.rung_playlist(rung.name);
        let text = tokio::fs::read_to_string(&playlist)
            .await
            .map_err(|e| PipelineError::io(&playlist, e))?;

        let dir = playlist.parent().unwrap_or(plan.hls_dir.as_path());
        let segments = playlist_segments(&text);
        if segments.is_empty() {
            return Err(PipelineError::Encode {
                path: playlist.clone(),
                message: "playlist lists no segments".into(),
            });
        }
        for segment in segments {
            let path = dir.join(segment);
            let present = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !present {
                return Err(PipelineError::MissingSegment {
                    playlist: playlist.clone(),
                    segment: path,
                });
            }
        }
    }
    Ok(())
}

/// Produces one rendition of a video.
#[async_trait]
pub trait VideoTranscode: Send + Sync {
    /// Write every file of `rendition` for `source` according to `plan`.
    async fn render(&self, source: &Path, plan: &VideoPlan, rendition: Rendition) -> PipelineResult<()>;
}

/// Video transcoder driving an external [`Codec`].
pub struct VideoTranscoder {
    config: VideoConfig,
    ladder: Ladder,
    codec: Arc<dyn Codec>,
}

impl VideoTranscoder {
    pub fn new(config: VideoConfig, ladder: Ladder, codec: Arc<dyn Codec>) -> Self {
        Self {
            config,
            ladder,
            codec,
        }
    }

    async fn run_codec(&self, source: &Path, rendition: Rendition, args: &[String]) -> PipelineResult<()> {
        self.codec.run(args).await.map_err(|e| match e {
            CodecError::NotFound => PipelineError::CodecNotFound(source.to_path_buf()),
            CodecError::Failed { status } => PipelineError::Codec {
                path: source.to_path_buf(),
                rendition: rendition.to_string(),
                message: status,
            },
        })
    }

    /// Whether `source` has an audio stream to carry into the ladder.
    async fn has_audio(&self, source: &Path) -> PipelineResult<bool> {
        match self.codec.run(&audio_probe_args(source)).await {
            Ok(()) => Ok(true),
            Err(CodecError::Failed { .. }) => Ok(false),
            Err(CodecError::NotFound) => Err(PipelineError::CodecNotFound(source.to_path_buf())),
        }
    }

    /// Encode a single-file rendition to a hidden temp sibling, then rename.
    async fn render_file(
        &self,
        source: &Path,
        output: &Path,
        rendition: Rendition,
    ) -> PipelineResult<()> {
        let partial = partial_path(output);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }

        let args = match rendition {
            Rendition::Webm => webm_args(source, &partial, &self.config),
            _ => mp4_args(source, &partial, &self.config),
        };

        if let Err(e) = self.run_codec(source, rendition, &args).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, output)
            .await
            .map_err(|e| PipelineError::io(output, e))
    }

    async fn render_hls(&self, source: &Path, plan: &VideoPlan) -> PipelineResult<()> {
        for rung in self.ladder.rungs() {
            let dir = plan.hls_dir.join(rung.name);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PipelineError::io(&dir, e))?;
        }

        let audio = self.has_audio(source).await?;
        if !audio {
            tracing::info!("{:?} has no audio stream; building a video-only ladder", source);
        }

        let args = hls_args(source, plan, &self.ladder, &self.config, audio);
        self.run_codec(source, Rendition::Hls, &args).await?;

        verify_ladder(plan, &self.ladder).await?;

        let master = plan.master_playlist();
        write_atomic_async(master.clone(), self.ladder.master_playlist(audio).into_bytes())
            .await
            .map_err(|e| PipelineError::io(master, e))
    }
}

#[async_trait]
impl VideoTranscode for VideoTranscoder {
    async fn render(&self, source: &Path, plan: &VideoPlan, rendition: Rendition) -> PipelineResult<()> {
        tracing::debug!("Rendering {} for {:?}", rendition, source);
        match rendition {
            Rendition::Mp4 => self.render_file(source, &plan.mp4, rendition).await,
            Rendition::Webm => self.render_file(source, &plan.webm, rendition).await,
            Rendition::Hls => self.render_hls(source, plan).await,
            Rendition::Image => Err(PipelineError::Encode {
                path: source.to_path_buf(),
                message: format!("{rendition} is not a video rendition"),
            }),
        }
    }
}

/// `<dir>/.<file_name>.part`, inside the output root the scanner never walks.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{name}.part"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Codec that writes what ffmpeg would and records every invocation.
    #[derive(Default)]
    struct FakeCodec {
        calls: Mutex<Vec<Vec<String>>>,
        fail: bool,
        /// Leave one segment out of the 480p playlist
        drop_segment: bool,
        /// Source has no audio stream
        silent: bool,
    }

    #[async_trait]
    impl Codec for FakeCodec {
        async fn run(&self, args: &[String]) -> Result<(), CodecError> {
            self.calls.lock().unwrap().push(args.to_vec());
            if args.iter().any(|a| a == "null") {
                return if self.silent {
                    Err(CodecError::Failed {
                        status: "exit status: 1".into(),
                    })
                } else {
                    Ok(())
                };
            }
            if self.fail {
                return Err(CodecError::Failed {
                    status: "exit status: 1".into(),
                });
            }
            let output = PathBuf::from(args.last().unwrap());
            if args.iter().any(|a| a == "hls") {
                for name in ["360p", "480p", "720p"] {
                    let playlist = PathBuf::from(output.to_string_lossy().replace("%v", name));
                    let dir = playlist.parent().unwrap();
                    let mut text = String::from("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n");
                    for i in 0..2 {
                        let seg = format!("seg_{i:03}.ts");
                        if !(self.drop_segment && name == "480p" && i == 1) {
                            std::fs::write(dir.join(&seg), b"ts").unwrap();
                        }
                        text.push_str(&format!("#EXTINF:6.0,\n{seg}\n"));
                    }
                    text.push_str("#EXT-X-ENDLIST\n");
                    std::fs::write(&playlist, text).unwrap();
                }
            } else {
                std::fs::write(&output, b"video").unwrap();
            }
            Ok(())
        }
    }

    fn plan(root: &Path) -> VideoPlan {
        VideoPlan {
            mp4: root.join("b.mp4"),
            webm: root.join("b.webm"),
            hls_dir: root.join("b.hls"),
        }
    }

    #[test]
    fn test_ladder_is_ascending() {
        let ladder = Ladder::standard();
        let names: Vec<_> = ladder.rungs().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["360p", "480p", "720p"]);
        assert!(ladder
            .rungs()
            .windows(2)
            .all(|w| w[0].bandwidth(true) < w[1].bandwidth(true)));
    }

    #[test]
    fn test_master_playlist_order() {
        let master = Ladder::standard().master_playlist(true);
        assert!(master.starts_with("#EXTM3U\n"));
        let a = master.find("360p/index.m3u8").unwrap();
        let b = master.find("480p/index.m3u8").unwrap();
        let c = master.find("720p/index.m3u8").unwrap();
        assert!(a < b && b < c);
        assert!(master.contains("BANDWIDTH=896000,RESOLUTION=640x360"));

        let silent = Ladder::standard().master_playlist(false);
        assert!(silent.contains("BANDWIDTH=800000,RESOLUTION=640x360"));
    }

    #[test]
    fn test_mp4_args() {
        let config = VideoConfig::default();
        let args = mp4_args(Path::new("in.mov"), Path::new("out.mp4"), &config);
        let joined = args.join(" ");

        assert!(joined.contains("-c:v libx264 -preset veryfast -crf 28"));
        assert!(joined.contains("min(1280,iw)"));
        assert!(joined.contains("min(720,ih)"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(args.contains(&"-nostdin".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_webm_args() {
        let args = webm_args(Path::new("in.mp4"), Path::new("out.webm"), &VideoConfig::default());
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9 -crf 28 -b:v 0 -row-mt 1"));
        assert!(joined.contains("-c:a libopus -b:a 96k"));
    }

    #[test]
    fn test_hls_args() {
        let root = Path::new("/out");
        let args = hls_args(
            Path::new("in.mp4"),
            &plan(root),
            &Ladder::standard(),
            &VideoConfig::default(),
            true,
        );
        let joined = args.join(" ");

        assert!(joined.contains("split=3[v0][v1][v2]"));
        assert!(joined.contains("v:0,a:0,name:360p v:1,a:1,name:480p v:2,a:2,name:720p"));
        assert!(joined.contains("-b:v:2 2400k"));
        assert!(joined.contains("-hls_time 6 -hls_playlist_type vod"));
        assert_eq!(args.last().unwrap(), "/out/b.hls/%v/index.m3u8");
    }

    #[test]
    fn test_hls_args_without_audio() {
        let args = hls_args(
            Path::new("in.mp4"),
            &plan(Path::new("/out")),
            &Ladder::standard(),
            &VideoConfig::default(),
            false,
        );
        let joined = args.join(" ");

        assert!(!joined.contains("0:a:0"));
        assert!(!joined.contains("-c:a"));
        assert!(joined.contains("v:0,name:360p v:1,name:480p v:2,name:720p"));
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 3);
    }

    #[test]
    fn test_audio_probe_args() {
        let args = audio_probe_args(Path::new("clip.mov"));
        let joined = args.join(" ");
        assert!(joined.contains("-i clip.mov -map 0:a:0 -t 0 -f null -"));
    }

    #[test]
    fn test_playlist_segments_skip_tags() {
        let text = "#EXTM3U\n#EXTINF:6.0,\nseg_000.ts\n\n#EXTINF:2.5,\nseg_001.ts\n#EXT-X-ENDLIST\n";
        assert_eq!(playlist_segments(text), vec!["seg_000.ts", "seg_001.ts"]);
    }

    #[tokio::test]
    async fn test_render_mp4_writes_final_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec::default());
        let transcoder = VideoTranscoder::new(VideoConfig::default(), Ladder::standard(), codec.clone());
        let plan = plan(&dir.path().join("nested"));

        transcoder
            .render(Path::new("in.mp4"), &plan, Rendition::Mp4)
            .await
            .unwrap();

        assert!(plan.mp4.is_file());
        assert!(!partial_path(&plan.mp4).exists());
        assert_eq!(codec.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_maps_to_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            fail: true,
            ..Default::default()
        });
        let transcoder = VideoTranscoder::new(VideoConfig::default(), Ladder::standard(), codec);
        let plan = plan(dir.path());

        let err = transcoder
            .render(Path::new("in.mp4"), &plan, Rendition::Webm)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Codec { ref rendition, .. } if rendition == "webm"));
        assert!(!plan.webm.exists());
    }

    #[tokio::test]
    async fn test_render_hls_writes_master_after_segments() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec::default());
        let transcoder = VideoTranscoder::new(VideoConfig::default(), Ladder::standard(), codec);
        let plan = plan(dir.path());

        transcoder
            .render(Path::new("in.mp4"), &plan, Rendition::Hls)
            .await
            .unwrap();

        let master = std::fs::read_to_string(plan.master_playlist()).unwrap();
        for line in master.lines().filter(|l| !l.starts_with('#')) {
            let rung_playlist = plan.hls_dir.join(line);
            let text = std::fs::read_to_string(&rung_playlist).unwrap();
            for seg in playlist_segments(&text) {
                assert!(rung_playlist.parent().unwrap().join(seg).is_file());
            }
        }
    }

    #[tokio::test]
    async fn test_render_hls_missing_segment_withholds_master() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            drop_segment: true,
            ..Default::default()
        });
        let transcoder = VideoTranscoder::new(VideoConfig::default(), Ladder::standard(), codec);
        let plan = plan(dir.path());

        let err = transcoder
            .render(Path::new("in.mp4"), &plan, Rendition::Hls)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSegment { .. }));
        assert!(!plan.master_playlist().exists());
    }

    #[tokio::test]
    async fn test_render_hls_silent_source_is_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let codec = Arc::new(FakeCodec {
            silent: true,
            ..Default::default()
        });
        let transcoder = VideoTranscoder::new(VideoConfig::default(), Ladder::standard(), codec.clone());
        let plan = plan(dir.path());

        transcoder
            .render(Path::new("muted.mp4"), &plan, Rendition::Hls)
            .await
            .unwrap();

        let calls = codec.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(!calls[1].iter().any(|a| a == "0:a:0"));
        let master = std::fs::read_to_string(plan.master_playlist()).unwrap();
        assert!(master.contains("BANDWIDTH=800000"));
    }
}
