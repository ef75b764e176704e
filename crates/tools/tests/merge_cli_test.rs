mod common;

use assert_cmd::prelude::*;
use common::{AFTER_E4, START};
use lc0_data::features::FeatureVector;
use lc0_data::{DatasetPaths, Sample, read_dataset, write_dataset};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn sample(fen: &str, target: f32) -> Sample {
    Sample {
        features: FeatureVector::from_board_fen(fen).unwrap(),
        target,
    }
}

#[test]
fn merge_directory_into_plain_pair() {
    let tmp = TempDir::new().unwrap();
    write_dataset(&DatasetPaths::with_stem(tmp.path(), "a"), &[sample(START, 0.1), sample(AFTER_E4, 0.2)]).unwrap();
    write_dataset(&DatasetPaths::with_stem(tmp.path(), "b"), &[sample(START, 0.9)]).unwrap();

    Command::cargo_bin("merge_datasets")
        .expect("binary exists")
        .args(["--input-dir", tmp.path().to_str().unwrap(), "--no-progress"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Merge summary"))
        .stderr(predicate::str::contains("Unique samples:      2"));

    let merged = read_dataset(&DatasetPaths::unprefixed(tmp.path())).unwrap();
    assert_eq!(merged.len(), 2);
    let start = FeatureVector::from_board_fen(START).unwrap();
    assert_eq!(merged.iter().find(|s| s.features == start).unwrap().target, 0.1);

    // 出力が既にあれば上書きしない
    Command::cargo_bin("merge_datasets")
        .unwrap()
        .args(["--input-dir", tmp.path().to_str().unwrap(), "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--overwrite"));

    // 上書き時も自分自身の出力は入力に含めない
    Command::cargo_bin("merge_datasets")
        .unwrap()
        .args(["--input-dir", tmp.path().to_str().unwrap(), "--no-progress", "--overwrite"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Found 2 dataset pairs"));
}

#[test]
fn merge_limit_and_named_output() {
    let tmp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_dataset(&DatasetPaths::with_stem(tmp.path(), "a"), &[sample(START, 0.1)]).unwrap();
    write_dataset(&DatasetPaths::with_stem(tmp.path(), "b"), &[sample(AFTER_E4, 0.2)]).unwrap();
    let summary = out.path().join("merge.json");

    Command::cargo_bin("merge_datasets")
        .unwrap()
        .args(["-i", tmp.path().to_str().unwrap(), "-o", out.path().to_str().unwrap()])
        .args(["--name", "first", "--limit", "1", "--no-progress"])
        .args(["--summary", summary.to_str().unwrap()])
        .assert()
        .success();

    let merged = read_dataset(&DatasetPaths::with_stem(out.path(), "first")).unwrap();
    assert_eq!(merged.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["pairs_discovered"], 2);
    assert_eq!(json["pairs_merged"], 1);
}

#[test]
fn merge_unpaired_file_fails() {
    let tmp = TempDir::new().unwrap();
    write_dataset(&DatasetPaths::with_stem(tmp.path(), "a"), &[sample(START, 0.1)]).unwrap();
    fs::write(tmp.path().join("orphan_features.data"), [0u8; 96]).unwrap();

    Command::cargo_bin("merge_datasets")
        .unwrap()
        .args(["--input-dir", tmp.path().to_str().unwrap(), "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("orphan_features.data"));
    assert!(!DatasetPaths::unprefixed(tmp.path()).any_exists());
}

#[test]
fn merge_count_mismatch_fails() {
    let tmp = TempDir::new().unwrap();
    let bad = DatasetPaths::with_stem(tmp.path(), "bad");
    fs::write(&bad.features, [0u8; 96 * 3]).unwrap();
    fs::write(&bad.targets, [0u8; 8]).unwrap();

    Command::cargo_bin("merge_datasets")
        .unwrap()
        .args(["--input-dir", tmp.path().to_str().unwrap(), "--no-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 3, got 2"));
}
