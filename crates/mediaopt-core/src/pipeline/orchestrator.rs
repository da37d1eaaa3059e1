//! Run orchestration: scan, decide, transcode, commit, count.
//!
//! The orchestrator owns no encoding logic. It walks the source roots, asks
//! the [`HashStore`] which cache groups are stale, hands stale assets to the
//! image or video transcoder and commits fingerprints only after every file of
//! a group is on disk. Assets run in parallel on a bounded pool of tokio
//! tasks; the renditions of one asset are produced sequentially inside its
//! task.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{AssetKind, RunSummary, SourceAsset};

use super::compress::{Compressor, TinifyCompressor};
use super::discovery::{AssetScanner, ScanEntry};
use super::ffmpeg::{FfmpegCodec, FfmpegLocator};
use super::hash::{Fingerprint, HashStore};
use super::image::{ImageTranscode, ImageTranscoder};
use super::plan::{CacheGroup, OutputClaims, OutputPlanner, Rendition, VideoPlan};
use super::video::{verify_ladder, Ladder, VideoTranscode, VideoTranscoder};

/// Scan entries buffered between the walker thread and the dispatcher.
const SCAN_BUFFER: usize = 256;

/// Cooperative cancellation shared between the caller and a running pipeline.
///
/// Once set, no new assets are dispatched; assets already in flight finish
/// and commit normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to a single asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetOutcome {
    /// At least one cache group was regenerated and committed
    pub changed: bool,
    /// At least one rendition failed
    pub failed: bool,
    /// The transcoder binary was unavailable
    pub missing_codec: bool,
}

impl AssetOutcome {
    /// Every group was already current.
    pub fn is_unchanged(&self) -> bool {
        !self.changed && !self.failed && !self.missing_codec
    }
}

/// Progress notifications emitted while a run is in progress.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// An asset was handed to a worker
    AssetStarted { relative: PathBuf, kind: AssetKind },
    /// An asset's task finished
    AssetFinished {
        relative: PathBuf,
        kind: AssetKind,
        outcome: AssetOutcome,
    },
}

/// Shared, read-only state every asset task needs.
struct Worker {
    store: HashStore,
    planner: OutputPlanner,
    ladder: Ladder,
    renditions: Vec<Rendition>,
    images: Arc<dyn ImageTranscode>,
    videos: Arc<dyn VideoTranscode>,
}

/// The media optimization pipeline.
pub struct Pipeline {
    config: Config,
    ladder: Ladder,
    images: Arc<dyn ImageTranscode>,
    videos: Arc<dyn VideoTranscode>,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Wire the real transcoders from configuration.
    ///
    /// The remote compression pass is enabled only when an API key is set.
    pub fn new(config: Config) -> Self {
        let ladder = Ladder::standard();

        let compressor = TinifyCompressor::from_config(&config.compression)
            .map(|c| Arc::new(c) as Arc<dyn Compressor>);
        if compressor.is_some() {
            tracing::info!("Remote compression pass enabled");
        }
        let images = ImageTranscoder::new(config.image.clone()).with_compressor(compressor);

        let locator = FfmpegLocator::new(config.video.ffmpeg_path.clone(), config.project_dir());
        let codec = Arc::new(FfmpegCodec::new(locator));
        let videos = VideoTranscoder::new(config.video.clone(), ladder.clone(), codec);

        Self::with_transcoders(config, Arc::new(images), Arc::new(videos))
    }

    /// Build a pipeline around caller-supplied transcoders.
    pub fn with_transcoders(
        config: Config,
        images: Arc<dyn ImageTranscode>,
        videos: Arc<dyn VideoTranscode>,
    ) -> Self {
        Self {
            config,
            ladder: Ladder::standard(),
            images,
            videos,
            cancel: CancelFlag::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for cancelling this pipeline from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run over every configured root and return the aggregated summary.
    pub async fn run(&self) -> PipelineResult<RunSummary> {
        self.run_with_progress(|_| {}).await
    }

    /// Like [`Pipeline::run`], calling `on_event` as assets start and finish.
    ///
    /// Only run-fatal conditions are returned as errors: no configured source
    /// root exists, or the output root cannot be created.
    pub async fn run_with_progress<F>(&self, on_event: F) -> PipelineResult<RunSummary>
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let start = Instant::now();
        let roots = self.config.source_roots();
        let output_dir = self.config.output_dir();

        let existing: Vec<PathBuf> = roots.iter().filter(|r| r.is_dir()).cloned().collect();
        for missing in roots.iter().filter(|r| !r.is_dir()) {
            tracing::warn!("Source root {:?} does not exist; skipping", missing);
        }
        if existing.is_empty() {
            return Err(PipelineError::NoSourceRoots(roots));
        }

        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| PipelineError::OutputRoot {
                path: output_dir.clone(),
                source,
            })?;

        // Built after the output root exists so it canonicalizes to the same
        // form as walked entries.
        let scanner = AssetScanner::new(existing, &output_dir, self.config.scan.clone());
        tracing::info!(
            "Optimizing media under {:?} into {:?}",
            scanner.roots(),
            output_dir
        );

        // The walk does blocking directory reads, so it runs on the blocking
        // pool and feeds the dispatcher through a bounded channel.
        let (entries_tx, mut entries) = mpsc::channel(SCAN_BUFFER);
        let walker = tokio::task::spawn_blocking(move || {
            for entry in scanner.scan() {
                if entries_tx.blocking_send(entry).is_err() {
                    break;
                }
            }
        });

        let worker = Arc::new(Worker {
            store: HashStore::new(),
            planner: OutputPlanner::new(&output_dir),
            ladder: self.ladder.clone(),
            renditions: VideoPlan::renditions(&self.config.video),
            images: self.images.clone(),
            videos: self.videos.clone(),
        });

        let mut summary = RunSummary::default();
        let mut claims = OutputClaims::new();
        let semaphore = Arc::new(Semaphore::new(self.config.processing.parallel_workers));
        let on_event = Arc::new(on_event);
        let mut handles: Vec<(AssetKind, JoinHandle<AssetOutcome>)> = Vec::new();

        while let Some(entry) = entries.recv().await {
            if self.cancel.is_cancelled() {
                tracing::warn!("Cancellation requested; no further assets will be started");
                summary.interrupted = true;
                break;
            }

            let asset = match entry {
                ScanEntry::Asset(asset) => asset,
                ScanEntry::Unsupported(path) => {
                    tracing::debug!("Skipping unsupported file {:?}", path);
                    summary.files_scanned += 1;
                    summary.unsupported_skipped += 1;
                    continue;
                }
                ScanEntry::Failed { .. } => {
                    summary.scan_errors += 1;
                    continue;
                }
            };
            summary.files_scanned += 1;

            if let Err(e) = claims.claim(&asset.path, &worker.outputs(&asset)) {
                tracing::error!("{e}");
                let outcome = AssetOutcome {
                    failed: true,
                    ..Default::default()
                };
                record(&mut summary, asset.kind, &outcome);
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::warn!("Worker semaphore closed unexpectedly; stopping run");
                break;
            };

            let kind = asset.kind;
            on_event(&PipelineEvent::AssetStarted {
                relative: asset.relative.clone(),
                kind,
            });

            let worker = worker.clone();
            let on_event = on_event.clone();
            let handle = tokio::spawn(async move {
                let outcome = match asset.kind {
                    AssetKind::Image => process_image(&worker, &asset).await,
                    AssetKind::Video => process_video(&worker, &asset).await,
                };
                drop(permit);
                on_event(&PipelineEvent::AssetFinished {
                    relative: asset.relative.clone(),
                    kind: asset.kind,
                    outcome: outcome.clone(),
                });
                outcome
            });
            handles.push((kind, handle));

            // Collect whatever has finished so handles don't pile up
            let (finished, pending): (Vec<_>, Vec<_>) =
                handles.into_iter().partition(|(_, h)| h.is_finished());
            handles = pending;
            for (kind, handle) in finished {
                record(&mut summary, kind, &join_outcome(handle).await);
            }
        }

        // Stops the walker if the loop ended early
        drop(entries);
        if let Err(e) = walker.await {
            tracing::error!("Scan task failed: {e}");
        }

        for (kind, handle) in handles {
            record(&mut summary, kind, &join_outcome(handle).await);
        }

        summary.elapsed = start.elapsed();
        tracing::info!(
            "Run finished in {:.1}s: {} changed, {} failed",
            summary.elapsed.as_secs_f64(),
            summary.total_changed(),
            summary.total_failed()
        );
        Ok(summary)
    }
}

impl Worker {
    /// Every path this asset would write, for collision checks.
    fn outputs(&self, asset: &SourceAsset) -> Vec<PathBuf> {
        match asset.kind {
            AssetKind::Image => self.planner.image(asset).group().members,
            AssetKind::Video => self.planner.video(asset).outputs(&self.renditions),
        }
    }

    /// A video group is current when its sidecar matches and, for the HLS
    /// ladder, every segment the rung playlists name is still on disk.
    async fn video_group_is_current(
        &self,
        plan: &VideoPlan,
        group: &CacheGroup,
        fingerprint: &Fingerprint,
    ) -> bool {
        if self.store.is_stale(group, fingerprint).await {
            return false;
        }
        if group.rendition == Rendition::Hls {
            if let Err(e) = verify_ladder(plan, &self.ladder).await {
                tracing::info!("Ladder for {:?} is incomplete: {e}", plan.hls_dir);
                return false;
            }
        }
        true
    }
}

async fn join_outcome(handle: JoinHandle<AssetOutcome>) -> AssetOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Asset task panicked: {e}");
            AssetOutcome {
                failed: true,
                ..Default::default()
            }
        }
    }
}

fn record(summary: &mut RunSummary, kind: AssetKind, outcome: &AssetOutcome) {
    let counts = match kind {
        AssetKind::Image => &mut summary.images,
        AssetKind::Video => &mut summary.videos.counts,
    };
    counts.processed += 1;
    if outcome.changed {
        counts.changed += 1;
    }
    if outcome.failed {
        counts.failed += 1;
    }
    if outcome.is_unchanged() {
        counts.unchanged += 1;
    }
    if outcome.missing_codec && kind == AssetKind::Video {
        summary.videos.skipped_missing_codec += 1;
    }
}

/// Regenerate an image's group if stale. Bytes are read once and shared
/// between fingerprinting and encoding.
async fn process_image(worker: &Worker, asset: &SourceAsset) -> AssetOutcome {
    let mut outcome = AssetOutcome::default();

    let data = match asset.read().await {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("{}", PipelineError::io(&asset.path, e));
            outcome.failed = true;
            return outcome;
        }
    };
    let fingerprint = Fingerprint::of_bytes(&data);
    let plan = worker.planner.image(asset);
    let group = plan.group();

    if !worker.store.is_stale(&group, &fingerprint).await {
        tracing::debug!("Unchanged: {:?}", asset.display_name());
        return outcome;
    }

    let result = match worker.images.transcode(asset, data, &plan).await {
        Ok(()) => worker.store.commit(&group, &fingerprint).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::debug!("Optimized {:?}", asset.display_name());
            outcome.changed = true;
        }
        Err(e) => {
            tracing::error!("Failed to optimize {:?}: {e}", asset.path);
            outcome.failed = true;
        }
    }
    outcome
}

/// Regenerate each stale rendition family of a video, committing each one as
/// soon as it is complete.
async fn process_video(worker: &Worker, asset: &SourceAsset) -> AssetOutcome {
    let mut outcome = AssetOutcome::default();

    let fingerprint = match Fingerprint::of_file_async(asset.path.clone()).await {
        Ok(fp) => fp,
        Err(e) => {
            tracing::error!("{}", PipelineError::io(&asset.path, e));
            outcome.failed = true;
            return outcome;
        }
    };
    let plan = worker.planner.video(asset);

    for &rendition in &worker.renditions {
        let group = plan.group(rendition, &worker.ladder);
        if worker.video_group_is_current(&plan, &group, &fingerprint).await {
            tracing::debug!("Unchanged: {:?} ({rendition})", asset.display_name());
            continue;
        }

        let result = match worker.videos.render(&asset.path, &plan, rendition).await {
            Ok(()) => worker.store.commit(&group, &fingerprint).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::debug!("Transcoded {:?} ({rendition})", asset.display_name());
                outcome.changed = true;
            }
            Err(PipelineError::CodecNotFound(_)) => {
                tracing::warn!(
                    "Skipping {:?}: no video transcoder available",
                    asset.display_name()
                );
                outcome.missing_codec = true;
                break;
            }
            Err(e) => {
                tracing::error!("Failed to transcode {:?} ({rendition}): {e}", asset.path);
                outcome.failed = true;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::plan::ImagePlan;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;

    /// Image transcoder writing placeholder files, optionally failing.
    #[derive(Default)]
    struct FakeImages {
        calls: AtomicU32,
        /// Write the primary, then fail before the WebP sibling
        fail_after_primary: AtomicBool,
    }

    #[async_trait]
    impl ImageTranscode for FakeImages {
        async fn transcode(
            &self,
            _asset: &SourceAsset,
            data: Vec<u8>,
            plan: &ImagePlan,
        ) -> PipelineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(plan.primary.parent().unwrap()).unwrap();
            std::fs::write(&plan.primary, &data).unwrap();
            if self.fail_after_primary.load(Ordering::SeqCst) {
                return Err(PipelineError::Encode {
                    path: plan.webp.clone(),
                    message: "webp encoder failed".into(),
                });
            }
            std::fs::write(&plan.webp, b"webp").unwrap();
            Ok(())
        }
    }

    /// Video transcoder that can be told to fail a rendition or lack a codec.
    #[derive(Default)]
    struct FakeVideos {
        missing_codec: bool,
        fail: Option<Rendition>,
    }

    #[async_trait]
    impl VideoTranscode for FakeVideos {
        async fn render(
            &self,
            source: &Path,
            plan: &VideoPlan,
            rendition: Rendition,
        ) -> PipelineResult<()> {
            if self.missing_codec {
                return Err(PipelineError::CodecNotFound(source.to_path_buf()));
            }
            if self.fail == Some(rendition) {
                return Err(PipelineError::Codec {
                    path: source.to_path_buf(),
                    rendition: rendition.to_string(),
                    message: "exit status: 1".into(),
                });
            }
            let target = match rendition {
                Rendition::Webm => plan.webm.clone(),
                _ => plan.mp4.clone(),
            };
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, b"video").unwrap();
            Ok(())
        }
    }

    fn project(dir: &Path) -> Config {
        let mut config = Config::default();
        config.general.project_dir = dir.to_path_buf();
        std::fs::create_dir_all(dir.join("public")).unwrap();
        config
    }

    #[tokio::test]
    async fn test_image_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/a.png"), b"png").unwrap();

        let images = Arc::new(FakeImages::default());
        let pipeline =
            Pipeline::with_transcoders(config, images.clone(), Arc::new(FakeVideos::default()));

        let first = pipeline.run().await.unwrap();
        assert_eq!(first.images.changed, 1);

        let second = pipeline.run().await.unwrap();
        assert_eq!(second.images.processed, 1);
        assert_eq!(second.images.unchanged, 1);
        assert_eq!(images.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_webp_leaves_group_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/a.jpg"), b"jpg").unwrap();

        let images = Arc::new(FakeImages::default());
        images.fail_after_primary.store(true, Ordering::SeqCst);
        let pipeline =
            Pipeline::with_transcoders(config, images.clone(), Arc::new(FakeVideos::default()));

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.images.failed, 1);
        let out = dir.path().join("public/optimized/a.jpg");
        assert!(out.exists());
        assert!(!HashStore::sidecar_path(&out).exists());

        // Retried on the next run
        images.fail_after_primary.store(false, Ordering::SeqCst);
        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.images.changed, 1);
        assert_eq!(images.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_codec_skips_videos_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/a.png"), b"png").unwrap();
        std::fs::write(dir.path().join("public/b.mp4"), b"mp4").unwrap();

        let videos = Arc::new(FakeVideos {
            missing_codec: true,
            ..Default::default()
        });
        let pipeline = Pipeline::with_transcoders(config, Arc::new(FakeImages::default()), videos);

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.images.changed, 1);
        assert_eq!(summary.videos.counts.processed, 1);
        assert_eq!(summary.videos.skipped_missing_codec, 1);
        assert_eq!(summary.videos.counts.failed, 0);
        assert!(!HashStore::sidecar_path(&dir.path().join("public/optimized/b.mp4")).exists());
    }

    #[tokio::test]
    async fn test_webm_failure_keeps_mp4_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = project(dir.path());
        config.video.webm = true;
        std::fs::write(dir.path().join("public/b.mov"), b"mov").unwrap();

        let videos = Arc::new(FakeVideos {
            fail: Some(Rendition::Webm),
            ..Default::default()
        });
        let pipeline = Pipeline::with_transcoders(config, Arc::new(FakeImages::default()), videos);

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.videos.counts.changed, 1);
        assert_eq!(summary.videos.counts.failed, 1);

        let mp4 = dir.path().join("public/optimized/b.mp4");
        assert!(HashStore::sidecar_path(&mp4).exists());
        assert!(!HashStore::sidecar_path(&dir.path().join("public/optimized/b.webm")).exists());
    }

    #[tokio::test]
    async fn test_no_source_roots_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.project_dir = dir.path().to_path_buf();
        config.general.source_roots = vec![PathBuf::from("missing")];

        let pipeline = Pipeline::with_transcoders(
            config,
            Arc::new(FakeImages::default()),
            Arc::new(FakeVideos::default()),
        );
        let err = pipeline.run().await.unwrap_err();
        assert!(err.is_run_fatal());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/a.png"), b"png").unwrap();

        let images = Arc::new(FakeImages::default());
        let pipeline =
            Pipeline::with_transcoders(config, images.clone(), Arc::new(FakeVideos::default()));
        pipeline.cancel_flag().cancel();

        let summary = pipeline.run().await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_files_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/readme.txt"), b"hi").unwrap();

        let pipeline = Pipeline::with_transcoders(
            config,
            Arc::new(FakeImages::default()),
            Arc::new(FakeVideos::default()),
        );
        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.files_scanned, 1);
        assert_eq!(summary.unsupported_skipped, 1);
    }

    #[tokio::test]
    async fn test_every_asset_counted_with_small_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = project(dir.path());
        config.processing.parallel_workers = 2;
        for i in 0..40 {
            std::fs::write(dir.path().join(format!("public/img{i:02}.png")), [i as u8]).unwrap();
        }

        let images = Arc::new(FakeImages::default());
        let pipeline =
            Pipeline::with_transcoders(config, images.clone(), Arc::new(FakeVideos::default()));

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.files_scanned, 40);
        assert_eq!(summary.images.processed, 40);
        assert_eq!(summary.images.changed, 40);
        assert_eq!(images.calls.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn test_colliding_video_is_counted_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        std::fs::write(dir.path().join("public/b.mov"), b"mov").unwrap();
        std::fs::write(dir.path().join("public/b.mp4"), b"mp4").unwrap();

        let pipeline = Pipeline::with_transcoders(
            config,
            Arc::new(FakeImages::default()),
            Arc::new(FakeVideos::default()),
        );
        let summary = pipeline.run().await.unwrap();

        assert_eq!(summary.videos.counts.processed, 2);
        assert_eq!(summary.videos.counts.changed, 1);
        assert_eq!(summary.videos.counts.failed, 1);
    }
}
