//! Integration tests for the fstrans binary
//!
//! These run the CLI against a real directory tree and check what is left
//! on disk afterwards.

mod common;

use common::*;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_exec_commits_on_success() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &[
            "exec",
            "workdir",
            "--",
            "sh",
            "-c",
            "printf 'This is changed content\\n' > testfile.txt",
        ],
    )
    .success()
    .stderr(predicate::str::contains("Committed"));

    assert_eq!(
        fs::read_to_string(temp.path().join("workdir/testfile.txt")).unwrap(),
        CHANGED
    );
    assert_eq!(list(temp.path()), vec!["workdir"]);
}

#[test]
fn test_exec_rolls_back_and_passes_exit_code() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &[
            "exec",
            "workdir",
            "--",
            "sh",
            "-c",
            "rm testfile.txt && touch other.txt && exit 3",
        ],
    )
    .code(3)
    .stderr(predicate::str::contains("Rolled back"));

    assert_eq!(list(&temp.path().join("workdir")), vec!["testfile.txt"]);
    assert_eq!(
        fs::read_to_string(temp.path().join("workdir/testfile.txt")).unwrap(),
        ORIGINAL
    );
    assert_eq!(list(temp.path()), vec!["workdir"]);
}

#[test]
fn test_exec_exports_tree_paths() {
    let (temp, workdir) = create_workdir();
    let visible = fs::canonicalize(&workdir).unwrap();

    run_fstrans(
        temp.path(),
        &[
            "exec",
            "workdir",
            "--",
            "sh",
            "-c",
            "printf '%s\\n%s\\n' \"$FSTRANS_ROOT\" \"$FSTRANS_TREE\" > env.txt",
        ],
    )
    .success();

    let env = fs::read_to_string(workdir.join("env.txt")).unwrap();
    let lines: Vec<_> = env.lines().collect();
    assert_eq!(
        lines,
        vec![
            visible.with_file_name(".workdir").to_str().unwrap(),
            visible.to_str().unwrap(),
        ]
    );
}

#[test]
fn test_exec_missing_program_rolls_back() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &["exec", "workdir", "--", "definitely-not-a-real-program-4711"],
    )
    .failure()
    .stderr(predicate::str::contains("Failed to run"));

    assert_eq!(list(temp.path()), vec!["workdir"]);
}

#[test]
fn test_exec_snapshot() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &[
            "exec",
            "--snapshot",
            "old-%Y",
            "workdir",
            "--",
            "sh",
            "-c",
            "echo new > added.txt",
        ],
    )
    .success();

    let names = list(temp.path());
    assert_eq!(names.len(), 2);
    let snapshot = names.iter().find(|n| n.starts_with("old-")).unwrap();
    assert_eq!(list(&temp.path().join(snapshot)), vec!["testfile.txt"]);
    assert_eq!(
        list(&temp.path().join("workdir")),
        vec!["added.txt", "testfile.txt"]
    );
}

#[test]
fn test_snapshot_with_slash_is_rejected() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &["exec", "--snapshot", "a/%Y", "workdir", "--", "true"],
    )
    .failure()
    .stderr(predicate::str::contains("slashes"));
}

#[test]
fn test_not_a_directory() {
    let (temp, _workdir) = create_workdir();

    run_fstrans(
        temp.path(),
        &["exec", "workdir/testfile.txt", "--", "true"],
    )
    .failure()
    .stderr(predicate::str::contains("Not a directory"));
}

#[test]
fn test_exec_times_out_on_locked_tree() {
    let (temp, _workdir) = create_workdir();
    fs::create_dir(temp.path().join(".workdir")).unwrap();

    run_fstrans(
        temp.path(),
        &["exec", "--timeout", "0.2", "workdir", "--", "true"],
    )
    .failure()
    .stderr(predicate::str::contains("Cannot lock directory"))
    .stderr(predicate::str::contains("already locked"));
}

#[test]
fn test_put_replaces_file() {
    let (temp, _workdir) = create_workdir();
    fs::write(temp.path().join("newfile.txt"), CHANGED).unwrap();

    run_fstrans(
        temp.path(),
        &["put", "workdir", "docs/copy.txt", "newfile.txt"],
    )
    .success()
    .stderr(predicate::str::contains("Updated"));

    assert_eq!(
        fs::read_to_string(temp.path().join("workdir/docs/copy.txt")).unwrap(),
        CHANGED
    );
    assert_eq!(list(temp.path()), vec!["newfile.txt", "workdir"]);
}

#[test]
fn test_put_outside_tree_fails() {
    let (temp, _workdir) = create_workdir();
    fs::write(temp.path().join("newfile.txt"), CHANGED).unwrap();

    run_fstrans(
        temp.path(),
        &["put", "workdir", "../escaped.txt", "newfile.txt"],
    )
    .failure()
    .stderr(predicate::str::contains("should be inside"));

    assert!(!temp.path().join("escaped.txt").exists());
    assert_eq!(list(temp.path()), vec!["newfile.txt", "workdir"]);
}
