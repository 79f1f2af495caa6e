use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ORIGINAL: &str = "This is test file content\n";
pub const CHANGED: &str = "This is changed content\n";

/// Helper to create `workdir/testfile.txt` inside a fresh temp dir
#[allow(unused)]
pub fn create_workdir() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let workdir = temp.path().join("workdir");
    fs::create_dir(&workdir).unwrap();
    fs::write(workdir.join("testfile.txt"), ORIGINAL).unwrap();
    (temp, workdir)
}

/// Sorted names of the entries in `dir`
#[allow(unused)]
pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Helper to run the fstrans binary
#[allow(unused)]
pub fn run_fstrans(cwd: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("fstrans");
    cmd.args(args).current_dir(cwd).env_remove("RUST_LOG");
    cmd.assert()
}
