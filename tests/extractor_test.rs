//! Integration tests for extractor module

#[path = "common/mod.rs"]
mod common;

use common::*;
use pa_opendata_cli::errors::ExtractionError;
use pa_opendata_cli::extractor;
use tempfile::TempDir;

#[tokio::test]
async fn test_extract_all_in_place() {
    let temp_dir = TempDir::new().unwrap();
    create_test_zip(
        &temp_dir.path().join("cig_csv_2021_01.zip"),
        &[("cig_csv_2021_01.csv", "a;b\n1;2\n")],
    )
    .unwrap();

    let report = extractor::extract_all(temp_dir.path()).await.unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(
        std::fs::read_to_string(temp_dir.path().join("cig_csv_2021_01.csv")).unwrap(),
        "a;b\n1;2\n"
    );
}

#[tokio::test]
async fn test_extract_twice_gives_same_result() {
    let temp_dir = TempDir::new().unwrap();
    create_test_zip(
        &temp_dir.path().join("data.zip"),
        &[("one.csv", "1\n"), ("two.csv", "2\n")],
    )
    .unwrap();

    extractor::extract_all(temp_dir.path()).await.unwrap();
    std::fs::write(temp_dir.path().join("one.csv"), "edited").unwrap();
    let report = extractor::extract_all(temp_dir.path()).await.unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert_eq!(
        std::fs::read_to_string(temp_dir.path().join("one.csv")).unwrap(),
        "1\n"
    );
    assert_eq!(
        std::fs::read_to_string(temp_dir.path().join("two.csv")).unwrap(),
        "2\n"
    );
    // archive, two extracted files
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 3);
}

#[tokio::test]
async fn test_corrupt_archive_does_not_stop_others() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("a_broken.zip"), "invalid").unwrap();
    create_test_zip(&temp_dir.path().join("b_good.zip"), &[("good.csv", "ok")]).unwrap();

    let report = extractor::extract_all(temp_dir.path()).await.unwrap();

    assert_eq!(report.extracted, vec![temp_dir.path().join("b_good.zip")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, temp_dir.path().join("a_broken.zip"));
    assert!(temp_dir.path().join("good.csv").exists());
}

#[tokio::test]
async fn test_empty_directory_extracts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

    let report = extractor::extract_all(temp_dir.path()).await.unwrap();

    assert!(report.extracted.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_missing_directory_errors() {
    let temp_dir = TempDir::new().unwrap();
    let result = extractor::extract_all(&temp_dir.path().join("nope")).await;
    assert!(matches!(result, Err(ExtractionError::MissingDirectory(_))));
}
