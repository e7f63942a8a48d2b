//! Integration tests for consolidator module

use pa_opendata_cli::consolidator::{merge_by_prefix, move_by_extension};
use pa_opendata_cli::errors::ConsolidationError;
use pa_opendata_cli::models::CollisionPolicy;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_merge_concatenates_in_name_order() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    fs::write(src.path().join("cig_csv_2021_03.csv"), "c1\nc2\n").unwrap();
    fs::write(src.path().join("cig_csv_2021_01.csv"), "a1\na2\n").unwrap();
    fs::write(src.path().join("cig_csv_2021_02.csv"), "b1\nb2\n").unwrap();

    let lines = merge_by_prefix(src.path(), out.path(), "cig_csv", "cig_all.csv").unwrap();

    assert_eq!(lines, 6);
    assert_eq!(
        fs::read_to_string(out.path().join("cig_all.csv")).unwrap(),
        "a1\na2\nb1\nb2\nc1\nc2\n"
    );
}

#[test]
fn test_merge_rerun_truncates_output() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    fs::write(src.path().join("p_1.csv"), "x\n").unwrap();

    merge_by_prefix(src.path(), out.path(), "p_", "all.csv").unwrap();
    let lines = merge_by_prefix(src.path(), out.path(), "p_", "all.csv").unwrap();

    assert_eq!(lines, 1);
    assert_eq!(fs::read_to_string(out.path().join("all.csv")).unwrap(), "x\n");
}

#[test]
fn test_merge_without_matches_writes_empty_file() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let lines = merge_by_prefix(src.path(), out.path(), "cig", "all.csv").unwrap();

    assert_eq!(lines, 0);
    assert_eq!(fs::read(out.path().join("all.csv")).unwrap().len(), 0);
}

#[test]
fn test_merge_missing_source_is_distinguishable() {
    let dir = TempDir::new().unwrap();
    let err = merge_by_prefix(&dir.path().join("gone"), dir.path(), "cig", "all.csv").unwrap_err();
    assert!(matches!(err, ConsolidationError::MissingSource(_)));
}

#[test]
fn test_move_is_recursive_and_flattens() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    fs::create_dir_all(src.path().join("nested/deeper")).unwrap();
    fs::write(src.path().join("top.xlsx"), "1").unwrap();
    fs::write(src.path().join("nested/deeper/low.XLSX"), "2").unwrap();
    fs::write(src.path().join("nested/keep.csv"), "3").unwrap();

    let report = move_by_extension(src.path(), ".xlsx", dest.path(), CollisionPolicy::Fail).unwrap();

    assert_eq!(report.moved, 2);
    assert!(dest.path().join("top.xlsx").exists());
    assert!(dest.path().join("low.XLSX").exists());
    assert!(!src.path().join("top.xlsx").exists());
    assert!(src.path().join("nested/keep.csv").exists());
}

#[test]
fn test_move_collision_fail_leaves_source() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    fs::write(src.path().join("a.csv"), "new").unwrap();
    fs::write(dest.path().join("a.csv"), "old").unwrap();

    let report = move_by_extension(src.path(), "csv", dest.path(), CollisionPolicy::Fail).unwrap();

    assert_eq!(report.moved, 0);
    assert_eq!(report.collisions, vec![src.path().join("a.csv")]);
    assert_eq!(fs::read_to_string(dest.path().join("a.csv")).unwrap(), "old");
    assert!(src.path().join("a.csv").exists());
}

#[test]
fn test_move_collision_overwrite_replaces() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    fs::write(src.path().join("a.csv"), "new").unwrap();
    fs::write(dest.path().join("a.csv"), "old").unwrap();

    let report =
        move_by_extension(src.path(), "csv", dest.path(), CollisionPolicy::Overwrite).unwrap();

    assert_eq!(report.moved, 1);
    assert_eq!(fs::read_to_string(dest.path().join("a.csv")).unwrap(), "new");
    assert!(!src.path().join("a.csv").exists());
}

#[test]
fn test_move_collision_rename_keeps_both() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    fs::write(src.path().join("a.csv"), "new").unwrap();
    fs::write(dest.path().join("a.csv"), "old").unwrap();

    let report =
        move_by_extension(src.path(), "csv", dest.path(), CollisionPolicy::Rename).unwrap();

    assert_eq!(report.moved, 1);
    assert_eq!(fs::read_to_string(dest.path().join("a.csv")).unwrap(), "old");
    assert_eq!(fs::read_to_string(dest.path().join("a-1.csv")).unwrap(), "new");
}

#[test]
fn test_move_into_nested_destination_skips_already_moved() {
    let root = TempDir::new().unwrap();
    let dest = root.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    fs::write(root.path().join("a.csv"), "a").unwrap();
    fs::write(dest.join("b.csv"), "b").unwrap();

    let report = move_by_extension(root.path(), "csv", &dest, CollisionPolicy::Fail).unwrap();

    assert_eq!(report.moved, 1);
    assert!(report.collisions.is_empty());
    assert!(dest.join("a.csv").exists());
    assert!(dest.join("b.csv").exists());
}

#[test]
fn test_move_missing_source_errors() {
    let dir = TempDir::new().unwrap();
    let err = move_by_extension(
        &dir.path().join("gone"),
        "csv",
        dir.path(),
        CollisionPolicy::Fail,
    )
    .unwrap_err();
    assert!(matches!(err, ConsolidationError::MissingSource(_)));
}
