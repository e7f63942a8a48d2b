//! pa-opendata-cli library
//!
//! This crate provides the acquisition core for the `pa-opendata` binary:
//! it turns URL templates into file downloads and consolidates the results.
//!
//! ## Overview
//!
//! - [`templates`] - Expands URL patterns over years and months and loads template files
//! - [`downloader`] - Fetches URLs over HTTP and writes them to disk, skipping files already present
//! - [`extractor`] - Extracts ZIP archives in place
//! - [`consolidator`] - Merges CSV shards by prefix and moves files by extension
//! - [`pipeline`] - Runs the stages above for each configured source
//! - [`cli`] - Command-line interface
//! - [`config`] - TOML configuration
//! - [`models`] - Outcome and report types
//! - [`errors`] - Error types used throughout the application
//!
//! ## Example Usage
//!
//! ```no_run
//! use pa_opendata_cli::config::PipelineConfig;
//! use pa_opendata_cli::downloader::{FetchSettings, HttpFetcher};
//! use pa_opendata_cli::errors::AppResult;
//! use pa_opendata_cli::pipeline::run_pipeline;
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> AppResult<()> {
//! let config = PipelineConfig::from_toml_file(Path::new("config.toml"))?;
//! let fetcher = Arc::new(HttpFetcher::new(&FetchSettings::from_config(&config))?);
//!
//! let report = run_pipeline(
//!     &config,
//!     fetcher,
//!     &[],
//!     config.concurrent_downloads,
//!     CancellationToken::new(),
//! )
//! .await?;
//! println!("{} files downloaded", report.downloads().downloaded);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod consolidator;
pub mod downloader;
pub mod errors;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod templates;
pub mod ui;
pub mod utils;
