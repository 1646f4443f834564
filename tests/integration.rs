//! Integration tests for the treeval CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the treeval binary.
fn treeval() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("treeval").unwrap();
    cmd.env_remove("TREEVAL_TRANSITION_LOG")
        .env_remove("TREEVAL_LOG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help() {
    treeval()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("eval"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_version() {
    treeval()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_eval_default_tree() {
    treeval()
        .arg("eval")
        .assert()
        .success()
        .stdout(predicate::str::contains("Final result is: 17"));
}

#[test]
fn test_eval_inline_expr() {
    treeval()
        .args(["eval", "--expr", "(* (+ 1 2) (+ 3 4))"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Final result is: 21"));
}

#[test]
fn test_eval_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.json");
    std::fs::write(
        &path,
        r#"{"name": "+", "children": [
            {"name": "*", "children": [{"name": "3"}, {"name": "4"}]},
            {"name": "5"}
        ]}"#,
    )
    .unwrap();

    treeval()
        .arg("eval")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Final result is: 17"));
}

#[test]
fn test_eval_tree_file_with_print_input() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.txt");
    std::fs::write(&path, "+\n2\n*\n2\n3\n0\n4\n0\n5\n0\n").unwrap();

    treeval()
        .arg("eval")
        .arg(&path)
        .arg("--print-input")
        .assert()
        .success()
        .stdout(predicate::str::contains("Input tree:"))
        .stdout(predicate::str::contains("    *"))
        .stdout(predicate::str::contains("Final result is: 17"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_eval_show_tree() {
    treeval()
        .args(["eval", "--expr", "(+ 1 2)", "--show-tree"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Worker tree at readiness (3 processes):"))
        .stdout(predicate::str::contains("└── 2"))
        .stdout(predicate::str::contains("Final result is: 3"));
}

#[test]
fn test_eval_writes_transition_log() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("transitions.jsonl");

    treeval()
        .args(["eval", "--expr", "(+ 1 2)", "--transition-log"])
        .arg(&log)
        .assert()
        .success();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("\"type\":\"observed_ready\""));
    assert!(contents.contains("\"node\":\"controller\""));
    assert_eq!(contents.matches("\"state\":\"created\"").count(), 3);
}

#[test]
fn test_eval_invalid_leaf_fails_in_construction() {
    treeval()
        .args(["eval", "--expr", "(+ 1 two)"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Final result").not())
        .stderr(predicate::str::contains("construction stage"))
        .stderr(predicate::str::contains("'two'"));
}

#[test]
fn test_eval_overflow_reports_stage() {
    treeval()
        .args(["eval", "--expr", "(* 2147483647 2)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("arithmetic stage"));
}

#[test]
fn test_eval_missing_file() {
    treeval()
        .args(["eval", "/nonexistent/tree.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_eval_parse_error_reports_line() {
    treeval()
        .args(["eval", "--expr", "(+ 1\n2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line"));
}

#[test]
fn test_check_prints_local_value() {
    treeval()
        .args(["check", "--expr", "(+ 1 2 3)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(+ 1 2 3) = 6"))
        .stdout(predicate::str::contains("Final result is: 6"));
}

#[test]
fn test_check_rejects_unknown_operator() {
    treeval()
        .args(["check", "--expr", "(- 3 1)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown operator"));
}

#[test]
fn test_quiet_and_verbose_conflict() {
    treeval().args(["-q", "-v", "eval"]).assert().failure();
}

#[test]
fn test_verbose_logs_go_to_stderr() {
    treeval()
        .args(["-v", "--no-color", "eval", "--expr", "(+ 1 2)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Final result is: 3"))
        .stderr(predicate::str::contains("Evaluation complete"));
}
