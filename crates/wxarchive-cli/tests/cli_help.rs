use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("wxarchive")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("--base-path"))
        .stdout(predicate::str::contains("--include-self"));
}

#[test]
fn test_run_help_shows_overrides() {
    cargo_bin_cmd!("wxarchive")
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--base-path"))
        .stdout(predicate::str::contains("--include-self"));
}

#[test]
fn test_unknown_subcommand_fails() {
    cargo_bin_cmd!("wxarchive")
        .arg("archive-everything")
        .assert()
        .failure();
}
