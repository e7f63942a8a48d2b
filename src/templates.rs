//! URL template expansion.
//!
//! Templates carry `{YYYY}`, `{MM}`, `{DD}` and `{dataset-name}` placeholders
//! and are stored in JSON documents keyed by dataset category:
//!
//! ```json
//! {
//!   "cig": ["https://dati.anticorruzione.it/opendata/download/dataset/{dataset-name}-{YYYY}/filesystem/{dataset-name}_csv_{YYYY}_{MM}.zip"],
//!   "others": ["https://dati.anticorruzione.it/opendata/download/dataset/stazioni-appaltanti/filesystem/stazioni-appaltanti_csv.zip"]
//! }
//! ```

use crate::config::{parse_two_digit, PipelineConfig, SourceConfig};
use crate::errors::ConfigError;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const PLACEHOLDER_PATTERN: &str = r"\{(YYYY|MM|DD|dataset-name)\}";

/// Compiled once, shared by every expansion.
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX
        .get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"))
}

/// Expands URL templates over a year range and month list.
///
/// Produces one URL per (year, month, pattern) combination, iterating years,
/// then months, then patterns. `{YYYY}` becomes the four-digit year, `{MM}`
/// the two-digit month, `{DD}` the two-digit `day`, and `{dataset-name}` the
/// `dataset_key` when one is given. A pattern without placeholders is
/// emitted unchanged for every (year, month) pair.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if a year is outside [`YEAR_RANGE`], if
/// `year_end < year_start`, if `months` or `patterns` is empty, or if a
/// month or the day is not a valid number.
///
/// # Example
///
/// ```
/// use pa_opendata_cli::templates::generate;
///
/// let urls = generate(
///     2021,
///     2021,
///     &["01".to_string()],
///     &["https://x/{dataset-name}-{YYYY}/f_{YYYY}_{MM}.zip".to_string()],
///     Some("cig"),
///     "01",
/// )
/// .unwrap();
/// assert_eq!(urls, vec!["https://x/cig-2021/f_2021_01.zip"]);
/// ```
pub fn generate(
    year_start: i32,
    year_end: i32,
    months: &[String],
    patterns: &[String],
    dataset_key: Option<&str>,
    day: &str,
) -> Result<Vec<String>, ConfigError> {
    for year in [year_start, year_end] {
        check_year(year)?;
    }
    if year_end < year_start {
        return Err(ConfigError::Invalid(format!(
            "year_end ({year_end}) must not be before year_start ({year_start})"
        )));
    }
    if months.is_empty() {
        return Err(ConfigError::Invalid("months must not be empty".into()));
    }
    if patterns.is_empty() {
        return Err(ConfigError::Invalid("patterns must not be empty".into()));
    }

    let months = months
        .iter()
        .map(|m| parse_two_digit(m, 1..=12, "month").map(|n| format!("{n:02}")))
        .collect::<Result<Vec<_>, _>>()?;
    let day = format!("{:02}", parse_two_digit(day, 1..=31, "day")?);

    // bounded by YEAR_RANGE, so the span cannot overflow
    let years = year_end.abs_diff(year_start) as usize + 1;
    let mut urls = Vec::with_capacity(years * months.len() * patterns.len());
    let re = placeholder_regex();

    for year in year_start..=year_end {
        let year = format!("{year:04}");
        for month in &months {
            for pattern in patterns {
                let url = re.replace_all(pattern, |caps: &Captures| match &caps[1] {
                    "YYYY" => year.clone(),
                    "MM" => month.clone(),
                    "DD" => day.clone(),
                    _ => dataset_key
                        .map(str::to_string)
                        .unwrap_or_else(|| caps[0].to_string()),
                });
                urls.push(url.into_owned());
            }
        }
    }

    Ok(urls)
}

/// Years accepted for `{YYYY}`: four digits, no earlier than the first open-data releases.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=9999;

pub(crate) fn check_year(year: i32) -> Result<(), ConfigError> {
    if YEAR_RANGE.contains(&year) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "year {year} is outside {}..={}",
            YEAR_RANGE.start(),
            YEAR_RANGE.end()
        )))
    }
}

/// A parsed URL template document.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    path: PathBuf,
    categories: BTreeMap<String, Vec<String>>,
}

impl TemplateFile {
    /// Reads a template document from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(path, &contents)
    }

    /// Parses a template document. `path` is only used in error messages.
    pub fn from_json_str(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let categories: BTreeMap<String, Vec<String>> =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            categories,
        })
    }

    /// Category keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn category(&self, key: &str) -> Result<&[String], ConfigError> {
        self.categories
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownCategory {
                path: self.path.clone(),
                category: key.to_string(),
            })
    }
}

/// Builds the full URL list for a source: expanded dynamic categories
/// followed by the static ones verbatim.
///
/// Each dynamic category's key doubles as its `{dataset-name}`.
pub fn source_urls(
    config: &PipelineConfig,
    source: &SourceConfig,
) -> Result<Vec<String>, ConfigError> {
    let file = TemplateFile::load(&source.templates)?;
    urls_from_templates(config, source, &file)
}

pub(crate) fn urls_from_templates(
    config: &PipelineConfig,
    source: &SourceConfig,
    file: &TemplateFile,
) -> Result<Vec<String>, ConfigError> {
    let mut urls = Vec::new();
    for key in &source.dynamic {
        let patterns = file.category(key)?;
        if patterns.is_empty() {
            continue;
        }
        urls.extend(generate(
            config.year_start,
            config.year_end,
            &config.months,
            patterns,
            Some(key.as_str()),
            &config.day,
        )?);
    }
    for key in &source.static_categories {
        urls.extend(file.category(key)?.iter().cloned());
    }
    Ok(urls)
}
