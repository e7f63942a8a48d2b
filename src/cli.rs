use crate::config::PipelineConfig;
use crate::downloader::{FetchSettings, HttpFetcher};
use crate::errors::{AppError, AppResult};
use crate::pipeline::{plan_sources, run_pipeline};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// CLI metadata constants
const APP_NAME: &str = "pa-opendata";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
const APP_ABOUT: &str = env!("CARGO_PKG_DESCRIPTION");

fn build_command() -> Command<'static> {
    let config_arg = Arg::new("config")
        .help("Path to the TOML config file")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf));
    let source_arg = Arg::new("source")
        .short('s')
        .long("source")
        .help("Only process the named source (repeatable)")
        .action(ArgAction::Append);

    Command::new(APP_NAME)
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .subcommand(
            Command::new("run")
                .about("Download, extract, merge and move the configured sources")
                .after_help("Example:\n  pa-opendata run config.toml --source anac --concurrency 4")
                .arg(config_arg.clone())
                .arg(source_arg.clone())
                .arg(
                    Arg::new("concurrency")
                        .short('c')
                        .long("concurrency")
                        .help("Simultaneous downloads, overrides concurrent_downloads")
                        .value_parser(clap::value_parser!(u64).range(1..))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("urls")
                .about("Print the URLs a run would download, without downloading")
                .arg(config_arg)
                .arg(source_arg),
        )
}

/// Parses command-line arguments and executes the selected subcommand.
///
/// - `run`: loads the config, builds the HTTP fetcher and drives the
///   pipeline. Ctrl-C cancels in-flight downloads and skips later stages.
/// - `urls`: expands the templates and prints one URL per line.
///
/// Without a subcommand the help text is printed.
///
/// # Errors
///
/// Returns an error for an unreadable or invalid config, an unknown source
/// name, or a failure to build the HTTP clients. Per-file download,
/// extraction and move failures are logged and do not surface here.
pub async fn cli() -> AppResult<()> {
    let cmd = build_command();
    let mut cmd_for_help = cmd.clone();
    let matches = cmd.get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run(sub).await,
        Some(("urls", sub)) => print_urls(sub),
        _ => cmd_for_help
            .print_help()
            .map_err(|e| AppError::IoError(format!("Failed to print help: {e}"))),
    }
}

fn load_config(sub: &ArgMatches) -> AppResult<(PipelineConfig, Vec<String>)> {
    let config_path = sub
        .get_one::<PathBuf>("config")
        .ok_or_else(|| AppError::InvalidInput("config path is required".to_string()))?;
    let config = PipelineConfig::from_toml_file(config_path)?;
    let selected = sub
        .get_many::<String>("source")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    Ok((config, selected))
}

async fn run(sub: &ArgMatches) -> AppResult<()> {
    let (config, selected) = load_config(sub)?;
    let concurrency = sub
        .get_one::<u64>("concurrency")
        .map(|&n| n as usize)
        .unwrap_or(config.concurrent_downloads);

    let fetcher = Arc::new(HttpFetcher::new(&FetchSettings::from_config(&config))?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work and stopping");
            signal_token.cancel();
        }
    });

    let report = run_pipeline(&config, fetcher, &selected, concurrency, shutdown).await?;

    let totals = report.downloads();
    for source in report.failed_sources() {
        warn!(
            source = source.name.as_str(),
            error = source.setup_error.as_deref().unwrap_or(""),
            "Source was not processed"
        );
    }
    if report.sources.iter().any(|s| s.interrupted) {
        warn!(
            downloaded = totals.downloaded,
            failed = totals.failed,
            "Run interrupted"
        );
    } else {
        info!(
            sources = report.sources.len(),
            downloaded = totals.downloaded,
            skipped = totals.skipped,
            failed = totals.failed,
            "All operations completed"
        );
    }
    Ok(())
}

fn print_urls(sub: &ArgMatches) -> AppResult<()> {
    let (config, selected) = load_config(sub)?;
    for plan in plan_sources(&config, &selected)? {
        for url in &plan.urls {
            println!("{url}");
        }
    }
    Ok(())
}
