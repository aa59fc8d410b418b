// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Benchmark harness CLI tests.
//!
//! Verifies the output line format, the phase flags, and the exit
//! status for unrecognized flags.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn vebdict() -> Command {
    Command::cargo_bin("vebdict").unwrap()
}

#[test]
fn test_single_step_output_format() {
    vebdict()
        .args(["-k", "512", "--trials", "200"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^9 \d+\.\d{6} \d+\.\d{6} \d+ \d+\n$").unwrap());
}

#[test]
fn test_insert_only_suppresses_search_column() {
    vebdict()
        .args(["-i", "-k", "256", "--trials", "50"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^8 0\.000000 \d+\.\d{6} 0 0\n$").unwrap());
}

#[test]
fn test_search_only_suppresses_insert_column() {
    vebdict()
        .args(["-s", "-k", "256", "--trials", "50"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^8 \d+\.\d{6} 0\.000000 \d+ \d+\n$").unwrap());
}

#[test]
fn test_tree_mode() {
    vebdict()
        .args(["-k", "512", "--trials", "100", "--mode", "tree"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^9 \d+\.\d{6} \d+\.\d{6} \d+ \d+\n$").unwrap());
}

#[test]
fn test_tree_mode_with_backing_file() {
    let dir = tempdir().unwrap();
    let backing = dir.path().join("bench.mmap");

    vebdict()
        .args(["-k", "256", "--trials", "50", "--mode", "tree"])
        .arg("--backing")
        .arg(&backing)
        .assert()
        .success();

    assert!(backing.exists());
    assert!(backing.with_extension("meta").exists());
}

#[test]
fn test_unrecognized_flag_exits_nonzero() {
    vebdict().arg("--definitely-not-a-flag").assert().failure();
}
