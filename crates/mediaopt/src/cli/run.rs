//! The `mediaopt run` command: one full optimization pass.

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use mediaopt_core::config::load_dotenv;
use mediaopt_core::{
    CancelFlag, Config, Pipeline, PipelineEvent, ReportFormat, RunSummary, SummaryWriter,
};
use std::path::PathBuf;
use std::time::Duration;

/// Summary formats accepted on the command line.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum SummaryFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// Single JSON object
    Json,
}

impl From<SummaryFormat> for ReportFormat {
    fn from(format: SummaryFormat) -> Self {
        match format {
            SummaryFormat::Text => ReportFormat::Text,
            SummaryFormat::Json => ReportFormat::Json,
        }
    }
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Project directory that relative roots and the output dir resolve against
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Source root to scan (repeatable; replaces the configured roots)
    #[arg(long = "root")]
    pub roots: Vec<PathBuf>,

    /// Output directory for derivatives
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Number of assets processed in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Also produce VP9/Opus WebM renditions
    #[arg(long)]
    pub webm: bool,

    /// Also produce the HLS adaptive-bitrate ladder
    #[arg(long)]
    pub abr: bool,

    /// Format of the summary printed on stdout
    #[arg(long, value_enum, default_value = "text")]
    pub summary_format: SummaryFormat,

    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

impl RunArgs {
    /// Layer the command-line flags over the loaded configuration.
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(project) = &self.project {
            config.general.project_dir = project.clone();
            // The project may carry its own .env; existing variables still win
            load_dotenv(&config.project_dir());
            config.apply_env()?;
        }
        if !self.roots.is_empty() {
            config.general.source_roots = self.roots.clone();
        }
        if let Some(out) = &self.out {
            config.general.output_dir = out.clone();
        }
        if let Some(workers) = self.workers {
            config.processing.parallel_workers = workers;
        }
        if self.webm {
            config.video.webm = true;
        }
        if self.abr {
            config.video.abr = true;
        }
        config.validate()?;
        Ok(())
    }
}

/// Execute the run command.
pub async fn execute(args: RunArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config)?;

    let pipeline = Pipeline::new(config);

    // First Ctrl-C stops dispatching new assets; a second one exits.
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match on_interrupt(&cancel) {
                Interrupt::Drain => {
                    tracing::warn!(
                        "Interrupted; finishing assets already in progress (Ctrl-C again to abort)"
                    );
                }
                Interrupt::Abort => {
                    tracing::error!("Aborted; outputs of unfinished assets stay uncommitted");
                    std::process::exit(130);
                }
            }
        }
    });

    let progress = if args.no_progress {
        ProgressBar::hidden()
    } else {
        create_spinner()
    };

    let summary = {
        let progress = progress.clone();
        pipeline
            .run_with_progress(move |event| on_event(&progress, event))
            .await?
    };
    progress.finish_and_clear();

    print_summary(&summary, args.summary_format)?;
    Ok(())
}

/// What a Ctrl-C does at this point of the run.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop dispatching and let in-flight assets finish
    Drain,
    /// Exit immediately
    Abort,
}

fn on_interrupt(cancel: &CancelFlag) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::Abort
    } else {
        cancel.cancel();
        Interrupt::Drain
    }
}

fn on_event(progress: &ProgressBar, event: &PipelineEvent) {
    match event {
        PipelineEvent::AssetStarted { relative, kind } => {
            progress.set_message(format!("{kind}: {}", relative.display()));
        }
        PipelineEvent::AssetFinished { .. } => progress.inc(1),
    }
}

/// Create a spinner; the total is unknown because the scan is lazy.
fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} assets {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("scanning...");
    pb
}

/// Print the run summary to stdout.
fn print_summary(summary: &RunSummary, format: SummaryFormat) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut writer = SummaryWriter::new(stdout.lock(), format.into(), true);
    writer.write(summary)?;
    Ok(())
}
