use crate::errors::FetchError;
use serde::Deserialize;
use std::path::PathBuf;

/// Outcome of a single URL in a download batch.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Body fetched and stored under the derived file name.
    Downloaded { bytes: u64 },
    /// A file with the derived name was already present; nothing fetched.
    SkippedExisting,
    Failed(FetchError),
}

/// Aggregated counts for a download batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Total bytes written for the downloaded files
    pub bytes: u64,
}

impl DownloadSummary {
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            DownloadOutcome::SkippedExisting => self.skipped += 1,
            DownloadOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

/// Archives processed by one extraction run.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Archives whose entries were all written
    pub extracted: Vec<PathBuf>,
    /// Archives that could not be read, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// What to do when a moved file's base name already exists in the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Leave the source file where it is and report the collision.
    #[default]
    Fail,
    /// Replace the destination file.
    Overwrite,
    /// Keep both, suffixing the incoming file with `-1`, `-2`, ...
    Rename,
}

/// Result of a move-by-extension run.
#[derive(Debug, Default)]
pub struct MoveReport {
    pub moved: usize,
    /// Source files left in place because the destination name was taken
    pub collisions: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Per-source results of a pipeline run.
#[derive(Debug, Default)]
pub struct SourceReport {
    pub name: String,
    pub urls: usize,
    pub downloads: DownloadSummary,
    pub extraction: Option<ExtractionReport>,
    /// Line count of the merged file, `None` when merge is not configured or failed
    pub merged_lines: Option<u64>,
    /// Extension and move results, in configured order
    pub moves: Vec<(String, MoveReport)>,
    /// Stages skipped because shutdown was requested
    pub interrupted: bool,
    /// Why the source's stages did not run, when its directories could not be prepared
    pub setup_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub sources: Vec<SourceReport>,
}

impl PipelineReport {
    /// Sources whose directories could not be prepared.
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.setup_error.is_some())
    }

    pub fn downloads(&self) -> DownloadSummary {
        let mut total = DownloadSummary::default();
        for source in &self.sources {
            total.downloaded += source.downloads.downloaded;
            total.skipped += source.downloads.skipped;
            total.failed += source.downloads.failed;
            total.bytes += source.downloads.bytes;
        }
        total
    }
}
