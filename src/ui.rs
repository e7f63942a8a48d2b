use crate::errors::{AppError, AppResult};
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar with the standard application styling.
///
/// Used by the download and extraction stages. The bar draws to stderr and
/// stays hidden when stderr is not a terminal, so it does not pollute logs.
///
/// # Example
///
/// ```no_run
/// use pa_opendata_cli::ui;
///
/// # fn main() -> Result<(), pa_opendata_cli::errors::AppError> {
/// let pb = ui::create_progress_bar(12)?;
/// pb.inc(1);
/// pb.finish_with_message("Done");
/// # Ok(())
/// # }
/// ```
pub fn create_progress_bar(total: u64) -> AppResult<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
            )
            .map_err(|e| AppError::IoError(format!("Failed to create progress bar template: {e}")))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
