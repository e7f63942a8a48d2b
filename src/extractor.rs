use crate::errors::ExtractionError;
use crate::models::ExtractionReport;
use crate::ui;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

const ARCHIVE_EXTENSION: &str = "zip";

/// Extracts every ZIP archive in `directory` into that same directory.
///
/// The scan is non-recursive and archives are processed in file-name order.
/// Entries overwrite files of the same name, so running twice over the same
/// archives leaves the same result. A corrupt archive is logged and recorded
/// in [`ExtractionReport::failed`]; the remaining archives are still processed.
///
/// # Errors
///
/// Returns `MissingDirectory` if `directory` does not exist, or `ReadDir` if it
/// cannot be listed.
pub async fn extract_all(directory: &Path) -> Result<ExtractionReport, ExtractionError> {
    let directory = directory.to_path_buf();
    tokio::task::spawn_blocking(move || extract_all_blocking(&directory))
        .await
        .map_err(|e| ExtractionError::Task(e.to_string()))?
}

/// Synchronous body of [`extract_all`].
pub fn extract_all_blocking(directory: &Path) -> Result<ExtractionReport, ExtractionError> {
    if !directory.is_dir() {
        return Err(ExtractionError::MissingDirectory(directory.to_path_buf()));
    }

    let archives = find_archives(directory)?;
    let mut report = ExtractionReport::default();
    if archives.is_empty() {
        info!(directory = %directory.display(), "No ZIP files to extract");
        return Ok(report);
    }

    info!(
        total = archives.len(),
        directory = %directory.display(),
        "Starting extraction"
    );

    let pb = ui::create_progress_bar(archives.len() as u64).ok();

    for zip_path in archives {
        let filename = zip_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        if let Some(pb) = &pb {
            pb.set_message(format!("Extracting {filename}..."));
        }

        match extract_zip(&zip_path, directory) {
            Ok(entries) => {
                debug!(zip_file = %zip_path.display(), entries = entries, "Extracted");
                report.extracted.push(zip_path);
            }
            Err(e) => {
                warn!(
                    zip_file = %zip_path.display(),
                    error = %e,
                    "Failed to extract ZIP file"
                );
                report.failed.push((zip_path, e.to_string()));
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = &pb {
        pb.finish_with_message(format!("Extracted {} ZIP file(s)", report.extracted.len()));
    }

    if report.failed.is_empty() {
        info!(extracted = report.extracted.len(), "Extraction completed");
    } else {
        info!(
            extracted = report.extracted.len(),
            failed = report.failed.len(),
            "Extraction completed with errors"
        );
    }

    Ok(report)
}

fn find_archives(directory: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let entries = std::fs::read_dir(directory).map_err(|source| ExtractionError::ReadDir {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ExtractionError::ReadDir {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_zip = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
            .unwrap_or(false);
        if is_zip && path.is_file() {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Extracts one archive into `destination`, returning the number of files written.
fn extract_zip(zip_path: &Path, destination: &Path) -> Result<usize, ExtractionError> {
    let file = File::open(zip_path).map_err(|source| ExtractionError::Open {
        path: zip_path.to_path_buf(),
        source,
    })?;

    let mut archive = ZipArchive::new(file).map_err(|e| ExtractionError::Archive {
        path: zip_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ExtractionError::Archive {
            path: zip_path.to_path_buf(),
            message: format!("entry {i}: {e}"),
        })?;

        // Entries escaping the destination (absolute or `..`) are skipped
        let out_path = match entry.enclosed_name() {
            Some(path) => destination.join(path),
            None => {
                warn!(
                    zip_file = %zip_path.display(),
                    entry = entry.name(),
                    "Skipping entry with unsafe path"
                );
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| ExtractionError::Write {
                path: out_path.clone(),
                source,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExtractionError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // File::create truncates, so a second extraction overwrites in place
        let mut out_file =
            std::fs::File::create(&out_path).map_err(|source| ExtractionError::Write {
                path: out_path.clone(),
                source,
            })?;

        std::io::copy(&mut entry, &mut out_file).map_err(|source| ExtractionError::Write {
            path: out_path.clone(),
            source,
        })?;
        written += 1;
    }

    Ok(written)
}
