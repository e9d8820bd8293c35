//! TEST command execution.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::time::Duration;

use sand_common::TestRequest;
use sand_daemon::infra::{TestOutcome, TestRunner};
use tokio_util::sync::CancellationToken;

fn request(line: &str) -> TestRequest {
    TestRequest::parse(line).unwrap()
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn true_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(dir.path().join("result"), CancellationToken::new());
    let outcome = runner.run(&request("COMMAND /bin/true")).await.unwrap();
    assert_eq!(outcome, TestOutcome::Exited(0));
}

#[tokio::test]
async fn output_is_appended_and_script_made_executable() {
    let dir = tempfile::tempdir().unwrap();
    let result = dir.path().join("tests").join("result");
    let script = write_script(dir.path(), "check.sh", "echo \"ran in $(pwd -P)\"\necho oops >&2\nexit 3");
    let runner = TestRunner::new(result.clone(), CancellationToken::new());

    let outcome = runner.run(&request(&format!("COMMAND {script}"))).await.unwrap();
    assert_eq!(outcome, TestOutcome::Exited(3));
    runner.run(&request(&format!("COMMAND {script}"))).await.unwrap();

    let log = std::fs::read_to_string(&result).unwrap();
    let cwd = dir.path().canonicalize().unwrap();
    assert!(log.starts_with('\n'));
    assert_eq!(log.matches(&format!("ran in {}", cwd.display())).count(), 2);
    assert_eq!(log.matches("oops").count(), 2);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700);
    }
}

#[tokio::test]
async fn arguments_are_shell_split() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "args.sh", "[ \"$1\" = 'two words' ] && [ \"$2\" = x ]");
    let runner = TestRunner::new(dir.path().join("result"), CancellationToken::new());
    let outcome = runner
        .run(&request(&format!("COMMAND {script} 'two words' x")))
        .await
        .unwrap();
    assert_eq!(outcome, TestOutcome::Exited(0));
}

#[cfg(unix)]
#[tokio::test]
async fn death_by_signal_is_negative() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "crash.sh", "kill -9 $$");
    let runner = TestRunner::new(dir.path().join("result"), CancellationToken::new());
    let outcome = runner.run(&request(&format!("COMMAND {script}"))).await.unwrap();
    assert_eq!(outcome, TestOutcome::Exited(-9));
}

#[tokio::test]
async fn shutdown_kills_a_running_test() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = TestRunner::new(dir.path().join("result"), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(&request("COMMAND /bin/sleep 30")),
    )
    .await
    .expect("cancelled well before the test ends")
    .unwrap();
    assert_eq!(outcome, TestOutcome::Cancelled);
}

#[tokio::test]
async fn missing_program_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(dir.path().join("result"), CancellationToken::new());
    let err = runner
        .run(&request("COMMAND /nonexistent/test.sh"))
        .await
        .expect_err("spawn fails");
    assert!(err.to_string().contains("/nonexistent/test.sh"));
}

#[cfg(unix)]
#[tokio::test]
async fn owner_bits_are_added_to_the_existing_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "mode.sh", "exit 0");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o640)).unwrap();
    let result = dir.path().join("nested").join("deeper").join("result");
    let runner = TestRunner::new(result.clone(), CancellationToken::new());

    let outcome = runner.run(&request(&format!("COMMAND {script}"))).await.unwrap();

    assert_eq!(outcome, TestOutcome::Exited(0));
    let mode = std::fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o740);
    assert_eq!(std::fs::read_to_string(&result).unwrap(), "\n");
}
