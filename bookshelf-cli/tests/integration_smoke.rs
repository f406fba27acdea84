//! Smoke tests to verify command wiring

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_top_level_help() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn test_serve_help() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("serve").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Address to bind to"))
        .stdout(predicate::str::contains("--eager"))
        .stdout(predicate::str::contains("--pool-size"));
}

#[test]
fn test_query_help() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("query").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Author to look up"))
        .stdout(predicate::str::contains("skip-and-log"));
}

#[test]
fn test_query_requires_author() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("query");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<AUTHOR>"));
}

#[test]
fn test_blank_author_fails_without_database() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("query")
        .arg("   ")
        .arg("--db-url")
        .arg("postgres://nobody@127.0.0.1:1/books")
        .env_remove("RUST_LOG");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("author cannot be empty"));
}

#[test]
fn test_invalid_pool_size_rejected() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("query").arg("Tolkien").arg("--pool-size").arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("pool size"));
}

#[test]
fn test_pool_timeout_flags_listed() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("serve").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--acquire-timeout-ms"))
        .stdout(predicate::str::contains("--init-timeout-ms"))
        .stdout(predicate::str::contains("DB_INIT_TIMEOUT_MS"));
}

#[test]
fn test_zero_acquire_timeout_rejected() {
    let mut cmd = Command::cargo_bin("bookshelf").unwrap();
    cmd.arg("query")
        .arg("Tolkien")
        .arg("--acquire-timeout-ms")
        .arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("acquire timeout"));
}
