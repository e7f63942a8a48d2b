use super::fetcher::Fetcher;
use crate::errors::{AppError, AppResult, FetchError, FetchErrorKind};
use crate::models::{DownloadOutcome, DownloadSummary};
use crate::ui;
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Suffix of in-progress downloads. Such files are never treated as artifacts.
pub const PART_SUFFIX: &str = ".part";

/// Temp files untouched for this long belong to a dead run and are swept.
///
/// A live download rewrites its temp file with every chunk, so only a
/// transfer stalled for longer than this, which the request timeout already
/// rules out, could be mistaken for a stale one.
pub const STALE_PART_AGE: Duration = Duration::from_secs(60 * 60);

/// Knobs for [`download_all`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Maximum number of fetches in flight. 1 keeps input order.
    pub concurrency: usize,
    /// Stops dispatching new fetches and abandons in-flight ones when cancelled
    pub shutdown: CancellationToken,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Derives the local artifact name from the final path segment of `url`.
///
/// The segment is percent-decoded. URLs whose path ends in `/` or that
/// decode to something unusable as a file name are rejected.
pub fn file_name_from_url(url: &str) -> Result<String, FetchError> {
    let invalid = |reason: &str| FetchError::new(url, FetchErrorKind::InvalidUrl(reason.into()));

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("URL has no file name in its path"))?;

    let decoded = percent_decode(segment);
    if decoded == "." || decoded == ".." || decoded.contains('/') || decoded.contains('\\') {
        return Err(invalid("URL file name is not a plain file name"));
    }
    Ok(decoded)
}

fn percent_decode(segment: &str) -> String {
    // form decoding treats '+' and '&' specially; path segments keep them literal
    let escaped = format!("n={}", segment.replace('+', "%2B").replace('&', "%26"));
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

/// Downloads every URL into `target_dir`, skipping artifacts that already exist.
///
/// # Behavior
///
/// - **Skip existing**: a URL whose derived file name is present in
///   `target_dir` is counted as skipped and never fetched.
/// - **Atomic writes**: bodies are streamed into a hidden `.part` temp file
///   that is fsynced and renamed onto the final name, so an interrupted run
///   never leaves a file that a rerun would mistake for a finished download.
///   Memory use does not grow with the archive size.
/// - **Stale temp files**: `.part` files older than [`STALE_PART_AGE`] are
///   removed first. Younger ones may belong to another running process and
///   are left alone.
/// - **Non-aborting**: every failure is logged with its URL and counted; the
///   batch always runs to the end.
/// - **Bounded concurrency**: at most `options.concurrency` fetches in flight.
///   URLs mapping to the same file name are serialised, so the later ones
///   see the first one's artifact and are skipped.
/// - **Cancellation**: once `options.shutdown` is cancelled, pending and
///   in-flight URLs are counted as failed with `Cancelled` and nothing is
///   written for them.
///
/// # Errors
///
/// Only returns an error if `target_dir` cannot be created.
pub async fn download_all(
    fetcher: Arc<dyn Fetcher>,
    urls: &[String],
    target_dir: &Path,
    options: &DownloadOptions,
) -> AppResult<DownloadSummary> {
    if !target_dir.exists() {
        fs::create_dir_all(target_dir).await.map_err(|e| {
            AppError::IoError(format!(
                "Failed to create directory {}: {e}",
                target_dir.display()
            ))
        })?;
    }

    sweep_stale_parts(target_dir, STALE_PART_AGE).await;

    let mut summary = DownloadSummary::default();
    if urls.is_empty() {
        info!(directory = %target_dir.display(), "No URLs to download");
        return Ok(summary);
    }

    // One lock per derived file name, shared by every URL mapping to it
    let mut locks: HashMap<String, Arc<Mutex<()>>> = HashMap::new();
    let planned: Vec<(String, Result<(String, Arc<Mutex<()>>), FetchError>)> = urls
        .iter()
        .map(|url| {
            let target = file_name_from_url(url).map(|name| {
                let lock = locks.entry(name.clone()).or_default().clone();
                (name, lock)
            });
            (url.clone(), target)
        })
        .collect();

    info!(
        total = urls.len(),
        directory = %target_dir.display(),
        concurrency = options.concurrency,
        "Starting download"
    );

    let pb = Arc::new(ui::create_progress_bar(urls.len() as u64)?);
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let target_dir = Arc::new(target_dir.to_path_buf());

    let mut handles = Vec::with_capacity(planned.len());
    for (url, target) in planned {
        let (filename, lock) = match target {
            Ok(target) => target,
            Err(e) => {
                let outcome = DownloadOutcome::Failed(e);
                report_outcome(&url, &outcome, &pb);
                summary.record(&outcome);
                continue;
            }
        };

        // Slots are taken here, in input order, so concurrency 1 is sequential
        let permit = tokio::select! {
            biased;
            _ = options.shutdown.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            let outcome =
                DownloadOutcome::Failed(FetchError::new(&url, FetchErrorKind::Cancelled));
            report_outcome(&url, &outcome, &pb);
            summary.record(&outcome);
            continue;
        };

        let fetcher = fetcher.clone();
        let shutdown = options.shutdown.clone();
        let target_dir = target_dir.clone();
        let pb = pb.clone();
        let task_url = url.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _guard = lock.lock().await;
            let outcome = download_one(
                fetcher.as_ref(),
                &task_url,
                &target_dir,
                &filename,
                &shutdown,
                &pb,
            )
            .await;
            report_outcome(&task_url, &outcome, &pb);
            outcome
        });
        handles.push((url, handle));
    }

    for (url, handle) in handles {
        match handle.await {
            Ok(outcome) => summary.record(&outcome),
            Err(e) => {
                warn!(url = %url, error = %e, "Download task failed");
                pb.inc(1);
                summary.failed += 1;
            }
        }
    }

    pb.finish_with_message(format!(
        "Downloaded {}, skipped {}, failed {}",
        summary.downloaded, summary.skipped, summary.failed
    ));

    if summary.failed > 0 {
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Download completed with errors"
        );
    } else {
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            "Download completed"
        );
    }

    Ok(summary)
}

async fn download_one(
    fetcher: &dyn Fetcher,
    url: &str,
    target_dir: &Path,
    filename: &str,
    shutdown: &CancellationToken,
    pb: &ProgressBar,
) -> DownloadOutcome {
    let file_path = target_dir.join(filename);
    if fs::try_exists(&file_path).await.unwrap_or(false) {
        debug!(file = %file_path.display(), "Artifact exists, skipping");
        return DownloadOutcome::SkippedExisting;
    }
    if shutdown.is_cancelled() {
        return DownloadOutcome::Failed(FetchError::new(url, FetchErrorKind::Cancelled));
    }

    pb.set_message(format!("Downloading {filename}..."));
    let io_failure = |e: std::io::Error| {
        DownloadOutcome::Failed(FetchError::new(
            url,
            FetchErrorKind::Io(format!("{}: {e}", file_path.display())),
        ))
    };

    // Dropping `part` on any early return deletes the temp file
    let part = match create_part_file(target_dir, filename) {
        Ok(part) => part,
        Err(e) => return io_failure(e),
    };
    let mut file = match part.as_file().try_clone() {
        Ok(file) => fs::File::from_std(file),
        Err(e) => return io_failure(e),
    };

    let fetched = tokio::select! {
        _ = shutdown.cancelled() => Err(FetchError::new(url, FetchErrorKind::Cancelled)),
        result = fetcher.fetch(url, &mut file) => result,
    };
    let bytes = match fetched {
        Ok(bytes) => bytes,
        Err(e) => return DownloadOutcome::Failed(e),
    };
    if let Err(e) = file.sync_all().await {
        return io_failure(e);
    }
    drop(file);

    let destination = file_path.clone();
    let stored = tokio::task::spawn_blocking(move || persist_part(part, &destination)).await;

    match stored {
        Ok(Ok(true)) => DownloadOutcome::Downloaded { bytes },
        Ok(Ok(false)) => {
            debug!(file = %file_path.display(), "Artifact appeared while downloading, keeping existing");
            DownloadOutcome::SkippedExisting
        }
        Ok(Err(e)) => io_failure(e),
        Err(e) => DownloadOutcome::Failed(FetchError::new(
            url,
            FetchErrorKind::Io(format!("write task failed: {e}")),
        )),
    }
}

/// Opens a hidden `.{filename}.<random>.part` temp file in `dir`.
pub(crate) fn create_part_file(dir: &Path, filename: &str) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!(".{filename}."))
        .suffix(PART_SUFFIX)
        .tempfile_in(dir)
}

/// Renames a finished temp file onto `destination` without replacing an
/// existing file.
///
/// Returns `Ok(false)` if `destination` already existed when the rename happened.
pub(crate) fn persist_part(part: NamedTempFile, destination: &Path) -> std::io::Result<bool> {
    match part.persist_noclobber(destination) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Removes temp files left behind by a killed run (best-effort).
///
/// Only files last modified at least `max_age` ago are removed.
async fn sweep_stale_parts(dir: &Path, max_age: Duration) {
    let now = SystemTime::now();
    let stale: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_part_file(path))
            .filter(|path| {
                std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .map(|age| age >= max_age)
                    .unwrap_or(false)
            })
            .collect(),
        Err(e) => {
            warn!(directory = %dir.display(), error = %e, "Failed to list directory for stale temp files");
            return;
        }
    };

    for path in stale {
        match fs::remove_file(&path).await {
            Ok(()) => debug!(file = %path.display(), "Removed stale temp file"),
            Err(e) => warn!(
                file_path = %path.display(),
                error = %e,
                "Failed to remove stale temp file"
            ),
        }
    }
}

fn is_part_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') && n.ends_with(PART_SUFFIX))
            .unwrap_or(false)
}

fn report_outcome(url: &str, outcome: &DownloadOutcome, pb: &ProgressBar) {
    match outcome {
        DownloadOutcome::Downloaded { bytes } => {
            debug!(url = url, bytes = bytes, "Downloaded");
        }
        DownloadOutcome::SkippedExisting => {}
        DownloadOutcome::Failed(e) => {
            warn!(url = url, error = %e.kind, "Failed to download file");
        }
    }
    pb.inc(1);
}
