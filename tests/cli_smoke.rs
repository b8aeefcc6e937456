//! Smoke tests for the `harp` binary surface.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("harp").expect("binary builds");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("diff"))
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn no_arguments_shows_usage() {
    let mut cmd = Command::cargo_bin("harp").expect("binary builds");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn deploy_without_configuration_fails_with_diagnostic() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::cargo_bin("harp").expect("binary builds");
    cmd.current_dir(scratch.path())
        .env_remove("HARP_APP_NAME")
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
