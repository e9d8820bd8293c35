//! The sand-daemon binary's command-line surface.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn sand_daemon() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sand-daemon"));
    cmd.env_remove("SAND_DAEMON_CONFIG");
    cmd.env("RUST_LOG", "error");
    cmd
}

#[test]
fn help_describes_the_daemon() {
    sand_daemon()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Per-host agent"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--listen"));
}

#[test]
fn version_flag_shows_version() {
    sand_daemon()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sand-daemon"));
}

#[test]
fn missing_configuration_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    sand_daemon()
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn configuration_path_is_read_from_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.yaml");
    std::fs::write(&path, "name: st1\nbinaries:\n  - { name: a, path: /bin/a }\n  - { name: a, path: /bin/b }\n")
        .unwrap();
    sand_daemon()
        .env("SAND_DAEMON_CONFIG", &path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate binary name 'a'"));
}
