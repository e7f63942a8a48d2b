//! Consolidation of extracted files.
//!
//! [`merge_by_prefix`] concatenates CSV shards into one file and
//! [`move_by_extension`] gathers files of one type into an output directory.

use crate::errors::ConsolidationError;
use crate::models::{CollisionPolicy, MoveReport};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const TABULAR_EXTENSION: &str = "csv";

/// Concatenates every `{prefix}*.csv` file in `source_dir` into
/// `output_dir/output_file` and returns the line count of the result.
///
/// Shards are read in file-name order and copied byte for byte: no header
/// handling, no delimiter awareness. The output is truncated first. If the
/// output file lives in `source_dir` and matches the prefix, it is not fed
/// back into itself.
///
/// # Errors
///
/// Returns `MissingSource` when `source_dir` does not exist, so callers can
/// tell that case apart from an empty merge. I/O failures return `Io`.
pub fn merge_by_prefix(
    source_dir: &Path,
    output_dir: &Path,
    prefix: &str,
    output_file: &str,
) -> Result<u64, ConsolidationError> {
    if !source_dir.is_dir() {
        return Err(ConsolidationError::MissingSource(source_dir.to_path_buf()));
    }

    let output_path = output_dir.join(output_file);
    let shards = find_shards(source_dir, prefix, &output_path)?;

    fs::create_dir_all(output_dir).map_err(|e| ConsolidationError::io(output_dir, e))?;
    let out = File::create(&output_path).map_err(|e| ConsolidationError::io(&output_path, e))?;
    let mut writer = LineCountingWriter::new(BufWriter::new(out));

    for shard in &shards {
        let mut input = File::open(shard).map_err(|e| ConsolidationError::io(shard, e))?;
        io::copy(&mut input, &mut writer).map_err(|e| ConsolidationError::io(shard, e))?;
        debug!(file = %shard.display(), "Merged");
    }
    writer
        .flush()
        .map_err(|e| ConsolidationError::io(&output_path, e))?;

    let lines = writer.lines();
    info!(
        shards = shards.len(),
        prefix = prefix,
        output = %output_path.display(),
        lines = lines,
        "Merge completed"
    );
    Ok(lines)
}

fn find_shards(
    source_dir: &Path,
    prefix: &str,
    output_path: &Path,
) -> Result<Vec<PathBuf>, ConsolidationError> {
    let output_canonical = fs::canonicalize(output_path).ok();
    let mut shards = Vec::new();

    for entry in fs::read_dir(source_dir).map_err(|e| ConsolidationError::io(source_dir, e))? {
        let entry = entry.map_err(|e| ConsolidationError::io(source_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let matches = name.starts_with(prefix)
            && Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(TABULAR_EXTENSION))
                .unwrap_or(false);
        if !matches {
            continue;
        }
        if output_canonical.is_some() && fs::canonicalize(&path).ok() == output_canonical {
            continue;
        }
        shards.push(path);
    }

    shards.sort();
    Ok(shards)
}

/// Counts lines the way a line iterator would: every `\n`, plus a final
/// unterminated line.
struct LineCountingWriter<W> {
    inner: W,
    newlines: u64,
    last_byte: Option<u8>,
}

impl<W: Write> LineCountingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            newlines: 0,
            last_byte: None,
        }
    }

    fn lines(&self) -> u64 {
        match self.last_byte {
            None => 0,
            Some(b'\n') => self.newlines,
            Some(_) => self.newlines + 1,
        }
    }
}

impl<W: Write> Write for LineCountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        let chunk = &buf[..written];
        self.newlines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
        if let Some(&last) = chunk.last() {
            self.last_byte = Some(last);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Moves every file under `source_dir` (recursively) with `extension` into
/// `dest_dir`, flattened by base name.
///
/// `extension` is matched case-insensitively and may carry a leading dot.
/// When the base name is already taken in `dest_dir`, `on_collision` decides:
/// leave the source in place and report it, overwrite, or pick a free
/// `-N` suffixed name. Per-file failures are logged and reported; they do not
/// stop the remaining moves.
///
/// # Errors
///
/// Returns `MissingSource` when `source_dir` does not exist and `Io` when
/// `dest_dir` cannot be created.
pub fn move_by_extension(
    source_dir: &Path,
    extension: &str,
    dest_dir: &Path,
    on_collision: CollisionPolicy,
) -> Result<MoveReport, ConsolidationError> {
    if !source_dir.is_dir() {
        return Err(ConsolidationError::MissingSource(source_dir.to_path_buf()));
    }
    fs::create_dir_all(dest_dir).map_err(|e| ConsolidationError::io(dest_dir, e))?;

    let extension = extension.trim_start_matches('.');
    let dest_canonical = fs::canonicalize(dest_dir).map_err(|e| ConsolidationError::io(dest_dir, e))?;

    // Collected up front so moving into a nested destination cannot feed the walk
    let candidates: Vec<PathBuf> = WalkDir::new(source_dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .filter(|path| {
            path.parent()
                .and_then(|p| fs::canonicalize(p).ok())
                .map(|p| p != dest_canonical)
                .unwrap_or(true)
        })
        .collect();

    let mut report = MoveReport::default();
    for path in candidates {
        let Some(name) = path.file_name() else {
            continue;
        };
        let mut target = dest_dir.join(name);

        if target.exists() {
            match on_collision {
                CollisionPolicy::Fail => {
                    warn!(
                        file = %path.display(),
                        destination = %target.display(),
                        "Destination already exists, leaving file in place"
                    );
                    report.collisions.push(path);
                    continue;
                }
                CollisionPolicy::Overwrite => {
                    debug!(destination = %target.display(), "Overwriting existing file");
                }
                CollisionPolicy::Rename => {
                    target = free_name(&target);
                }
            }
        }

        match move_file(&path, &target) {
            Ok(()) => {
                debug!(from = %path.display(), to = %target.display(), "Moved");
                report.moved += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to move file");
                report.failed.push((path, e.to_string()));
            }
        }
    }

    info!(
        extension = extension,
        moved = report.moved,
        collisions = report.collisions.len(),
        failed = report.failed.len(),
        destination = %dest_dir.display(),
        "Move completed"
    );
    Ok(report)
}

/// First `stem-N.ext` in the same directory that does not exist yet.
fn free_name(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{stem}-{n}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if let Err(copy_err) = fs::copy(from, to) {
                return Err(io::Error::new(
                    copy_err.kind(),
                    format!("rename failed ({rename_err}), copy failed ({copy_err})"),
                ));
            }
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_counting_writer_counts_unterminated_last_line() {
        let mut writer = LineCountingWriter::new(Vec::new());
        writer.write_all(b"a\nb\nc").unwrap();
        assert_eq!(writer.lines(), 3);

        let mut writer = LineCountingWriter::new(Vec::new());
        writer.write_all(b"a\nb\n").unwrap();
        assert_eq!(writer.lines(), 2);

        let writer = LineCountingWriter::new(Vec::new());
        assert_eq!(writer.lines(), 0);
    }

    #[test]
    fn test_free_name_appends_counter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.csv"), "x").unwrap();
        std::fs::write(dir.path().join("data-1.csv"), "x").unwrap();
        assert_eq!(
            free_name(&dir.path().join("data.csv")),
            dir.path().join("data-2.csv")
        );
    }

    #[test]
    fn test_merge_skips_output_inside_source() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cig_a.csv"), "1\n").unwrap();
        std::fs::write(dir.path().join("cig_all.csv"), "stale\nstale\n").unwrap();

        let lines = merge_by_prefix(dir.path(), dir.path(), "cig_", "cig_all.csv").unwrap();
        assert_eq!(lines, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cig_all.csv")).unwrap(),
            "1\n"
        );
    }

    #[test]
    fn test_merge_ignores_other_extensions_and_prefixes() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(src.path().join("cig_1.csv"), "a\n").unwrap();
        std::fs::write(src.path().join("cig_1.zip"), "zz").unwrap();
        std::fs::write(src.path().join("other.csv"), "b\n").unwrap();

        let lines = merge_by_prefix(src.path(), out.path(), "cig_", "merged.csv").unwrap();
        assert_eq!(lines, 1);
    }
}
