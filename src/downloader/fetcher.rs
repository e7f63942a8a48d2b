use super::tls;
use crate::config::{PipelineConfig, RetryPolicy};
use crate::errors::{AppError, AppResult, FetchError, FetchErrorKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Streams the body of a URL into `dest` and returns the bytes written.
///
/// `dest` is an already-open temporary file owned by the caller, which
/// decides where the bytes finally land. Implementations truncate `dest`
/// before every attempt, so on `Ok(n)` it holds exactly the `n` body bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &mut File) -> Result<u64, FetchError>;
}

/// HTTP settings for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Hosts served through the TLS compatibility context
    pub compat_hosts: Vec<String>,
}

impl FetchSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            retry: config.retry_policy(),
            compat_hosts: config.tls_compat_hosts.clone(),
        }
    }
}

/// `reqwest`-backed fetcher with per-host TLS policy and retries.
pub struct HttpFetcher {
    standard: reqwest::Client,
    compat: reqwest::Client,
    compat_hosts: HashSet<String>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    /// Builds both HTTP clients.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` if the TLS context or either client cannot be built.
    pub fn new(settings: &FetchSettings) -> AppResult<Self> {
        let standard = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()?;

        // Compatibility mode: restricted cipher list, no certificate or hostname
        // verification. Only reachable for hosts in `compat_hosts`; see `tls`.
        let compat_tls = tls::compat_client_config().map_err(|e| {
            AppError::NetworkError(format!("Failed to build TLS compatibility context: {e}"))
        })?;
        let compat = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .use_preconfigured_tls(compat_tls)
            .build()?;

        Ok(Self {
            standard,
            compat,
            compat_hosts: settings
                .compat_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            retry: settings.retry,
        })
    }

    /// Whether requests to `url` go through the compatibility context.
    pub fn uses_compat_mode(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.compat_hosts.contains(&host.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    async fn fetch_once(&self, url: &Url, dest: &mut File) -> Result<u64, FetchErrorKind> {
        let client = if self.uses_compat_mode(url) {
            &self.compat
        } else {
            &self.standard
        };

        let mut response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchErrorKind::Status(status.as_u16()));
        }

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::Body(error_chain(&e))
            }
        })? {
            dest.write_all(&chunk)
                .await
                .map_err(|e| FetchErrorKind::Io(e.to_string()))?;
            written += chunk.len() as u64;
        }
        dest.flush()
            .await
            .map_err(|e| FetchErrorKind::Io(e.to_string()))?;
        Ok(written)
    }
}

/// Empties `dest` so a retry does not append to a partial body.
async fn truncate(dest: &mut File) -> std::io::Result<()> {
    dest.set_len(0).await?;
    dest.seek(SeekFrom::Start(0)).await?;
    Ok(())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &mut File) -> Result<u64, FetchError> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::new(url, FetchErrorKind::InvalidUrl(e.to_string())))?;

        let mut attempt = 0;
        loop {
            truncate(dest)
                .await
                .map_err(|e| FetchError::new(url, FetchErrorKind::Io(e.to_string())))?;
            match self.fetch_once(&parsed, dest).await {
                Ok(bytes) => {
                    debug!(url = url, bytes = bytes, "Fetched");
                    return Ok(bytes);
                }
                Err(kind) => {
                    if attempt < self.retry.max_retries && kind.is_retryable() {
                        let delay_ms = calculate_backoff(attempt, &self.retry);
                        warn!(
                            url = url,
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_retries + 1,
                            delay_ms = delay_ms,
                            error = %kind,
                            "Retrying download after error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::new(url, kind));
                }
            }
        }
    }
}

/// Calculates exponential backoff delay in milliseconds.
///
/// Formula: `min(initial_delay * 2^attempt, max_delay)`
fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> u64 {
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    policy
        .initial_delay_ms
        .saturating_mul(factor)
        .min(policy.max_delay_ms)
}

fn classify(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if is_tls_failure(err) {
        FetchErrorKind::Tls(error_chain(err))
    } else if err.is_builder() {
        FetchErrorKind::InvalidUrl(error_chain(err))
    } else {
        FetchErrorKind::Connect(error_chain(err))
    }
}

/// Walks the source chain looking for a rustls error, including ones wrapped
/// inside `io::Error`.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.get_ref().map_or(false, |inner| inner.is::<rustls::Error>()) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Joins an error and its sources into one line for logging.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
