//! Summary report formatting.
//!
//! A run ends with one report on standard output, either as plain text for
//! people or as a single JSON object for scripts.

use std::io::{self, Write};

use crate::types::RunSummary;

/// Report format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object
    Json,
}

impl ReportFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Writes a [`RunSummary`] in the chosen format.
pub struct SummaryWriter<W: Write> {
    writer: W,
    format: ReportFormat,
    pretty: bool,
}

impl<W: Write> SummaryWriter<W> {
    /// `pretty` only affects JSON output.
    pub fn new(writer: W, format: ReportFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
        }
    }

    pub fn write(&mut self, summary: &RunSummary) -> io::Result<()> {
        match self.format {
            ReportFormat::Text => self.writer.write_all(render_text(summary).as_bytes())?,
            ReportFormat::Json => {
                if self.pretty {
                    serde_json::to_writer_pretty(&mut self.writer, summary)
                        .map_err(io::Error::other)?;
                } else {
                    serde_json::to_writer(&mut self.writer, summary).map_err(io::Error::other)?;
                }
                writeln!(self.writer)?;
            }
        }
        self.writer.flush()
    }

    /// Consume the writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Plain-text summary, one line per counter group.
pub fn render_text(summary: &RunSummary) -> String {
    let images = &summary.images;
    let videos = &summary.videos.counts;

    let mut out = String::new();
    out.push_str(&format!("files scanned: {}\n", summary.files_scanned));
    out.push_str(&format!(
        "images: {} processed, {} changed, {} unchanged, {} failed\n",
        images.processed, images.changed, images.unchanged, images.failed
    ));
    out.push_str(&format!(
        "videos: {} processed, {} changed, {} unchanged, {} failed, {} skipped (no codec)\n",
        videos.processed,
        videos.changed,
        videos.unchanged,
        videos.failed,
        summary.videos.skipped_missing_codec
    ));
    out.push_str(&format!("unsupported files skipped: {}\n", summary.unsupported_skipped));
    if summary.scan_errors > 0 {
        out.push_str(&format!("unreadable entries: {}\n", summary.scan_errors));
    }
    out.push_str(&format!("elapsed: {:.1}s\n", summary.elapsed.as_secs_f64()));
    if summary.interrupted {
        out.push_str("interrupted: run again to finish the remaining assets\n");
    }
    out
}
