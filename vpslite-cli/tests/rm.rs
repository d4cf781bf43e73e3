use predicates::prelude::*;

mod common;

#[test]
fn test_rm_deletes_and_is_idempotent() {
    let ctx = common::vpslite();
    let id = ctx.create("alice", "ubuntu:22.04");

    ctx.cmd()
        .args(["rm", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id));

    // Deleting again is a successful no-op.
    ctx.cmd()
        .args(["rm", id.as_str()])
        .assert()
        .success()
        .stderr(predicate::str::contains("already deleted"));
}

#[test]
fn test_rm_unknown_id_fails() {
    let ctx = common::vpslite();
    ctx.cmd()
        .args(["rm", "0000aaaa"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_rm_rejects_malformed_id() {
    let ctx = common::vpslite();
    ctx.cmd()
        .args(["rm", "not-an-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not-an-id"));
}

#[test]
fn test_rm_multiple_reports_each_target() {
    let ctx = common::vpslite();
    let a = ctx.create("alice", "ubuntu:22.04");
    let b = ctx.create("alice", "ubuntu:22.04");

    ctx.cmd()
        .args(["rm", a.as_str(), b.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(&a))
        .stdout(predicate::str::contains(&b));
}

#[test]
fn test_rm_continues_past_failures() {
    let ctx = common::vpslite();
    let good = ctx.create("alice", "ubuntu:22.04");

    // One unknown target fails the command but the valid one is deleted.
    ctx.cmd()
        .args(["rm", "0000aaaa", good.as_str()])
        .assert()
        .failure()
        .stdout(predicate::str::contains(&good));

    ctx.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&good).not());
}
