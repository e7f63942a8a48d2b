use crate::errors::ConfigError;
use crate::models::CollisionPolicy;
use crate::templates::check_year;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline configuration loaded from a TOML file.
///
/// Constructed once at startup and passed by reference into each stage.
/// Unknown keys are rejected to catch typos. Optional settings fall back
/// to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// First year of the download range (inclusive)
    pub year_start: i32,
    /// Last year of the download range (inclusive)
    pub year_end: i32,
    /// Months to expand, two digits each (defaults to `01`..`12`)
    #[serde(default = "default_months")]
    pub months: Vec<String>,
    /// Day substituted for `{DD}`
    #[serde(default = "default_day")]
    pub day: String,

    // Downloads
    /// Number of concurrent download tasks. 1 keeps the sequential ordering.
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of retry attempts for failed downloads
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial delay in milliseconds before the first retry
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Hosts that only negotiate with the legacy TLS compatibility context
    #[serde(default)]
    pub tls_compat_hosts: Vec<String>,

    /// Datasets to acquire, processed in order
    pub sources: Vec<SourceConfig>,
}

/// One dataset family: where its URLs come from and where its files go.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    /// JSON file mapping a category key to URL templates
    pub templates: PathBuf,
    /// Categories expanded over the year/month range
    #[serde(default)]
    pub dynamic: Vec<String>,
    /// Categories whose URLs are used verbatim
    #[serde(default, rename = "static")]
    pub static_categories: Vec<String>,
    /// Archives and extracted files
    pub download_dir: PathBuf,
    /// Consolidated and moved files
    pub output_dir: PathBuf,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
    /// Extensions moved from `download_dir` to `output_dir` after extraction
    #[serde(default)]
    pub move_extensions: Vec<String>,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// File name prefix of the shards to concatenate
    pub prefix: String,
    /// Output file name, defaults to `{prefix}_{year_start}-{year_end}.csv`
    #[serde(default)]
    pub output_file: Option<String>,
}

/// Retry behaviour for the HTTP fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_retry_initial_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// Relative source paths are resolved against the directory holding the
    /// configuration file, so the pipeline can be started from anywhere.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, the TOML is malformed,
    /// required fields are missing, unknown keys are present, or validation fails.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&contents, base_dir).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses and validates configuration text, resolving relative paths against `base_dir`.
    pub fn from_toml_str(contents: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for source in &mut self.sources {
            source.templates = resolve(base_dir, &source.templates);
            source.download_dir = resolve(base_dir, &source.download_dir);
            source.output_dir = resolve(base_dir, &source.output_dir);
        }
    }

    /// Checks ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_year(self.year_start)?;
        check_year(self.year_end)?;
        if self.year_end < self.year_start {
            return Err(ConfigError::Invalid(format!(
                "year_end ({}) must not be before year_start ({})",
                self.year_end, self.year_start
            )));
        }
        if self.months.is_empty() {
            return Err(ConfigError::Invalid("months must not be empty".into()));
        }
        for month in &self.months {
            parse_two_digit(month, 1..=12, "month")?;
        }
        parse_two_digit(&self.day, 1..=31, "day")?;
        if self.concurrent_downloads == 0 {
            return Err(ConfigError::Invalid(
                "concurrent_downloads must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[sources]] entry is required".into(),
            ));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid("source name must not be empty".into()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            if source.dynamic.is_empty() && source.static_categories.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source '{}' names no dynamic or static URL category",
                    source.name
                )));
            }
            if let Some(merge) = &source.merge {
                if merge.prefix.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "source '{}' has an empty merge prefix",
                        source.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_ms: self.retry_initial_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Sources to run: all of them when `names` is empty, otherwise the named
    /// ones in configuration order.
    pub fn select_sources(&self, names: &[String]) -> Result<Vec<&SourceConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.sources.iter().collect());
        }
        for name in names {
            if !self.sources.iter().any(|s| &s.name == name) {
                return Err(ConfigError::UnknownSource {
                    name: name.clone(),
                    available: self
                        .sources
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }
        Ok(self
            .sources
            .iter()
            .filter(|s| names.contains(&s.name))
            .collect())
    }

    /// Output file name for a source's merge step.
    pub fn merge_output_name(&self, merge: &MergeConfig) -> String {
        merge.output_file.clone().unwrap_or_else(|| {
            format!(
                "{}_{}-{}.csv",
                merge.prefix, self.year_start, self.year_end
            )
        })
    }
}

/// Parses a one- or two-digit number within `range`.
pub(crate) fn parse_two_digit(
    value: &str,
    range: std::ops::RangeInclusive<u32>,
    what: &str,
) -> Result<u32, ConfigError> {
    let trimmed = value.trim();
    let parsed = if trimmed.is_empty() || trimmed.len() > 2 {
        None
    } else {
        trimmed.parse::<u32>().ok()
    };
    match parsed {
        Some(n) if range.contains(&n) => Ok(n),
        _ => Err(ConfigError::Invalid(format!(
            "{what} '{value}' must be a number between {:02} and {:02}",
            range.start(),
            range.end()
        ))),
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn default_months() -> Vec<String> {
    (1..=12).map(|m| format!("{m:02}")).collect()
}

fn default_day() -> String {
    "01".to_string()
}

fn default_concurrent_downloads() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    10000
}
