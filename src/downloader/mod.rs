//! Download operations for open-data archives.
//!
//! [`HttpFetcher`] performs the network GET with a per-host TLS policy and
//! [`download_all`] drives a batch of URLs into a directory, skipping files
//! that already exist and writing new ones atomically.

mod fetcher;
mod orchestrator;
pub mod tls;

// Re-export public API
pub use fetcher::{FetchSettings, Fetcher, HttpFetcher};
pub use orchestrator::{
    download_all, file_name_from_url, DownloadOptions, PART_SUFFIX, STALE_PART_AGE,
};
