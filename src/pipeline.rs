use crate::config::{PipelineConfig, SourceConfig};
use crate::consolidator::{merge_by_prefix, move_by_extension};
use crate::downloader::{download_all, DownloadOptions, Fetcher};
use crate::errors::{AppResult, ConfigError, ConsolidationError, ExtractionError};
use crate::extractor::extract_all;
use crate::models::{PipelineReport, SourceReport};
use crate::templates::source_urls;
use crate::utils::{format_duration, format_timestamp, megabytes};
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A source with its URL list resolved.
#[derive(Debug)]
pub struct SourcePlan<'a> {
    pub source: &'a SourceConfig,
    pub urls: Vec<String>,
}

/// Resolves the URL lists of the selected sources.
///
/// Runs before any network activity so a bad template file or unknown
/// category stops the run up front.
pub fn plan_sources<'a>(
    config: &'a PipelineConfig,
    selected: &[String],
) -> Result<Vec<SourcePlan<'a>>, ConfigError> {
    config
        .select_sources(selected)?
        .into_iter()
        .map(|source| -> Result<SourcePlan<'a>, ConfigError> {
            let urls = source_urls(config, source)?;
            info!(
                source = source.name.as_str(),
                urls = urls.len(),
                "URLs generated"
            );
            Ok(SourcePlan { source, urls })
        })
        .collect()
}

/// Runs download, extraction, merge and move for each selected source.
///
/// Item-level failures are logged and counted in the returned report. A
/// source whose directories cannot be prepared is recorded with a
/// `setup_error` and the run moves on to the next source. Only configuration
/// problems are returned as `Err`. Cancelling `shutdown` stops new downloads
/// and skips the remaining stages.
pub async fn run_pipeline(
    config: &PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    selected: &[String],
    concurrency: usize,
    shutdown: CancellationToken,
) -> AppResult<PipelineReport> {
    let started_at = Local::now();
    let clock = Instant::now();
    info!(start = %format_timestamp(started_at), "Process started");

    let plans = plan_sources(config, selected)?;
    let options = DownloadOptions {
        concurrency,
        shutdown: shutdown.clone(),
    };

    let mut report = PipelineReport::default();
    for plan in plans {
        let source_report = run_source(config, &plan, fetcher.clone(), &options).await;
        log_source_summary(&source_report);
        report.sources.push(source_report);
        if shutdown.is_cancelled() {
            warn!("Shutdown requested, skipping remaining sources");
            break;
        }
    }

    let totals = report.downloads();
    let ended_at = Local::now();
    info!(
        sources = report.sources.len(),
        failed_sources = report.failed_sources().count(),
        downloaded = totals.downloaded,
        skipped = totals.skipped,
        failed = totals.failed,
        downloaded_mb = megabytes(totals.bytes),
        "All sources processed"
    );
    info!(
        end = %format_timestamp(ended_at),
        elapsed = %format_duration(clock.elapsed()),
        "Process finished"
    );

    Ok(report)
}

async fn run_source(
    config: &PipelineConfig,
    plan: &SourcePlan<'_>,
    fetcher: Arc<dyn Fetcher>,
    options: &DownloadOptions,
) -> SourceReport {
    let source = plan.source;
    let mut report = SourceReport {
        name: source.name.clone(),
        urls: plan.urls.len(),
        ..Default::default()
    };

    for dir in [&source.download_dir, &source.output_dir] {
        if dir.is_dir() {
            continue;
        }
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(
                source = source.name.as_str(),
                directory = %dir.display(),
                error = %e,
                "Failed to create directory, skipping source"
            );
            report.setup_error = Some(format!(
                "Failed to create directory {}: {e}",
                dir.display()
            ));
            return report;
        }
        info!(directory = %dir.display(), "Directory created");
    }

    info!(
        source = source.name.as_str(),
        directory = %source.download_dir.display(),
        "Downloading"
    );
    match download_all(fetcher, &plan.urls, &source.download_dir, options).await {
        Ok(summary) => report.downloads = summary,
        Err(e) => {
            warn!(
                source = source.name.as_str(),
                directory = %source.download_dir.display(),
                error = %e,
                "Download stage failed, skipping source"
            );
            report.setup_error = Some(e.to_string());
            return report;
        }
    }

    if options.shutdown.is_cancelled() {
        report.interrupted = true;
        return report;
    }

    info!(source = source.name.as_str(), "Starting extraction phase");
    match extract_all(&source.download_dir).await {
        Ok(extraction) => report.extraction = Some(extraction),
        Err(ExtractionError::MissingDirectory(dir)) => {
            warn!(directory = %dir.display(), "Download directory missing, nothing to extract");
        }
        Err(e) => warn!(source = source.name.as_str(), error = %e, "Extraction failed"),
    }

    if let Some(merge) = &source.merge {
        let output_file = config.merge_output_name(merge);
        info!(
            source = source.name.as_str(),
            prefix = merge.prefix.as_str(),
            output = output_file.as_str(),
            "Merging files"
        );
        match merge_by_prefix(
            &source.download_dir,
            &source.output_dir,
            &merge.prefix,
            &output_file,
        ) {
            Ok(lines) => report.merged_lines = Some(lines),
            Err(ConsolidationError::MissingSource(dir)) => {
                warn!(directory = %dir.display(), "Source directory does not exist, nothing merged");
                report.merged_lines = Some(0);
            }
            Err(e) => warn!(source = source.name.as_str(), error = %e, "Merge failed"),
        }
    }

    for extension in &source.move_extensions {
        match move_by_extension(
            &source.download_dir,
            extension,
            &source.output_dir,
            source.on_collision,
        ) {
            Ok(moved) => {
                if !moved.collisions.is_empty() {
                    warn!(
                        source = source.name.as_str(),
                        extension = extension.as_str(),
                        collisions = moved.collisions.len(),
                        "Some files were not moved because the destination name was taken"
                    );
                }
                report.moves.push((extension.clone(), moved));
            }
            Err(e) => warn!(
                source = source.name.as_str(),
                extension = extension.as_str(),
                error = %e,
                "Move failed"
            ),
        }
    }

    report
}

fn log_source_summary(report: &SourceReport) {
    let (extracted, extract_failed) = report
        .extraction
        .as_ref()
        .map(|e| (e.extracted.len(), e.failed.len()))
        .unwrap_or((0, 0));
    let moved: usize = report.moves.iter().map(|(_, m)| m.moved).sum();

    info!(
        source = report.name.as_str(),
        urls = report.urls,
        downloaded = report.downloads.downloaded,
        skipped = report.downloads.skipped,
        failed = report.downloads.failed,
        extracted = extracted,
        extract_failed = extract_failed,
        merged_lines = report.merged_lines.unwrap_or(0),
        moved = moved,
        interrupted = report.interrupted,
        setup_error = report.setup_error.as_deref().unwrap_or(""),
        "Source summary"
    );
}
