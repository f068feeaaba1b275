//! CLI integration tests using assert_cmd to exercise the actual binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn kettle(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kettle").unwrap();
    cmd.env("HOME", home).env("NO_COLOR", "1");
    cmd
}

/// A project with `./test/math_test.yml` holding one pass and one failure.
fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("test")).unwrap();
    std::fs::write(
        tmp.path().join("test/math_test.yml"),
        r#"
suite: MathTest
tests:
  - name: test_add
    run: "true"
  - name: test_sub
    run: "echo expected 1 got 2; exit 1"
"#,
    )
    .unwrap();
    tmp
}

// ---------------------------------------------------------------------------
// Scripted sessions
// ---------------------------------------------------------------------------

#[test]
fn cli_runs_piped_commands() {
    let tmp = project();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin("all\n!failed\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 tests, 1 passes, 1 failures"))
        .stdout(predicate::str::contains("1 tests, 0 passes, 1 failures"))
        .stdout(predicate::str::contains("MathTest#test_sub [1-2]"))
        .stdout(predicate::str::contains("expected 1 got 2"))
        .stdout(predicate::str::contains("Tests ran in"));
}

#[test]
fn cli_once_runs_trailing_command() {
    let tmp = project();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .args(["--once", "MathTest#test_add"])
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 tests, 1 passes, 0 failures"));
}

#[test]
fn cli_fail_fast_flag_stops_at_first_failure() {
    let tmp = project();
    std::fs::write(
        tmp.path().join("test/more_test.yml"),
        "suite: MoreTest\ntests:\n  - name: test_late\n    run: \"true\"\n",
    )
    .unwrap();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .args(["--fail-fast", "--once", "all"])
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 tests, 1 passes, 1 failures"));
}

#[test]
fn cli_reports_unmatched_globs() {
    let tmp = project();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin("test/nothing/*_test.yml\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("No test files match"));
}

#[test]
fn cli_shell_escape_reports_status() {
    let tmp = project();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin(".exit 4\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Command exited with status code: 4"));
}

// ---------------------------------------------------------------------------
// Startup failures
// ---------------------------------------------------------------------------

#[test]
fn cli_missing_test_dir_exits_one() {
    let tmp = TempDir::new().unwrap();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin("exit\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "Couldn't find test directory `./test`. Exiting.",
        ));
}

#[test]
fn cli_failed_environment_load_exits_one() {
    let tmp = project();
    std::fs::write(
        tmp.path().join(".kettle.yml"),
        "hooks:\n  before_load: \"exit 2\"\n",
    )
    .unwrap();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin("all\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Couldn't load the test environment"));
}

#[test]
fn cli_rejects_invalid_config() {
    let tmp = project();
    std::fs::write(tmp.path().join(".kettle.yml"), "fail_fast: [nope]\n").unwrap();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .write_stdin("exit\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains(".kettle.yml"));
}

#[test]
fn cli_missing_explicit_config_fails() {
    let tmp = project();

    kettle(tmp.path())
        .current_dir(tmp.path())
        .args(["--config", "absent.yml"])
        .write_stdin("exit\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}
