//! Copy-on-write edits inside a shadow tree.
//!
//! A freshly cloned shadow tree shares every file with the visible tree
//! through hard links. Writing through such a link would change the visible
//! tree too, so each mutating entry point first breaks the share by
//! replacing the link with an independent copy ([`unshare`]).
//!
//! Functions here take already-resolved paths; containment and state checks
//! are the caller's job (see [`crate::fs::Transaction`]).

use crate::error::{Result, TransactionError};

use std::fmt;
use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::path::Path;
use std::str::FromStr;

use walkdir::WalkDir;

use std::os::unix::fs::MetadataExt;

/// How a file inside the tree is opened.
///
/// Parsed from the usual `fopen(3)` strings: `r`, `w`, `a`, `r+`, `w+`,
/// `a+`. `b` and `t` are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `w`
    Write,
    /// `a`
    Append,
    /// `r+`
    ReadUpdate,
    /// `w+`
    WriteUpdate,
    /// `a+`
    AppendUpdate,
}

impl OpenMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::WriteUpdate => options.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::AppendUpdate => options.read(true).append(true).create(true),
            OpenMode::ReadUpdate => options.read(true).write(true),
        };
        options
    }
}

impl FromStr for OpenMode {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self> {
        let mode: String = s.chars().filter(|c| *c != 'b' && *c != 't').collect();
        match mode.as_str() {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "a" => Ok(OpenMode::Append),
            "r+" => Ok(OpenMode::ReadUpdate),
            "w+" => Ok(OpenMode::WriteUpdate),
            "a+" => Ok(OpenMode::AppendUpdate),
            _ => Err(TransactionError::InvalidArgument(format!(
                "unsupported open mode '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpenMode::Read => "r",
            OpenMode::Write => "w",
            OpenMode::Append => "a",
            OpenMode::ReadUpdate => "r+",
            OpenMode::WriteUpdate => "w+",
            OpenMode::AppendUpdate => "a+",
        })
    }
}

/// Returns true while `path` is still hard-linked to another entry,
/// normally its counterpart in the visible tree.
pub fn is_shared(path: &Path) -> Result<bool> {
    let meta = fs::symlink_metadata(path).map_err(|e| TransactionError::io("stat", path, e))?;
    Ok(meta.nlink() > 1)
}

/// Removes `dest` (if present) and recreates it as an independent copy of
/// `source`, including permission bits and access/modification times.
///
/// `source` is opened before `dest` is unlinked, so `source == dest` is a
/// valid way to turn a shared link into a private copy.
pub fn replace_with_copy(dest: &Path, source: &Path) -> Result<()> {
    let mut input = File::open(source).map_err(|e| TransactionError::io("open", source, e))?;
    let meta = input
        .metadata()
        .map_err(|e| TransactionError::io("stat", source, e))?;
    if !meta.is_file() {
        return Err(TransactionError::io(
            "copy",
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    remove_if_exists(dest)?;

    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| TransactionError::io("create", dest, e))?;
    io::copy(&mut input, &mut output).map_err(|e| TransactionError::io("copy into", dest, e))?;

    output
        .set_permissions(meta.permissions())
        .map_err(|e| TransactionError::io("set permissions on", dest, e))?;
    let times = FileTimes::new()
        .set_accessed(meta.accessed()?)
        .set_modified(meta.modified()?);
    output
        .set_times(times)
        .map_err(|e| TransactionError::io("set times on", dest, e))?;

    Ok(())
}

/// Makes `path` exclusively owned by the working tree, copying its content
/// from `origin`. Does nothing if `path` is not shared.
///
/// Returns whether a copy was made.
pub fn unshare(path: &Path, origin: &Path) -> Result<bool> {
    if !is_shared(path)? {
        return Ok(false);
    }
    log::debug!("Unsharing {} from {}", path.display(), origin.display());
    replace_with_copy(path, origin)?;
    Ok(true)
}

/// Opens `path` in `mode` without ever writing through a shared link.
pub fn open(path: &Path, mode: OpenMode) -> Result<File> {
    match mode {
        OpenMode::Read => {}
        OpenMode::Write | OpenMode::WriteUpdate => remove_if_exists(path)?,
        OpenMode::ReadUpdate => {
            unshare(path, path)?;
        }
        OpenMode::Append | OpenMode::AppendUpdate => {
            if path.exists() {
                unshare(path, path)?;
            }
        }
    }

    mode.options()
        .open(path)
        .map_err(|e| TransactionError::io("open", path, e))
}

/// Replaces `dest` with a copy of `source`, creating parent directories.
pub fn putfile(dest: &Path, source: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| TransactionError::io("create", parent, e))?;
    }
    replace_with_copy(dest, source)
}

/// Unshares `path` by copying its counterpart from the visible tree.
///
/// `shadow_root` and `visible_root` map `path` to that counterpart.
pub fn clonefile(shadow_root: &Path, visible_root: &Path, path: &Path) -> Result<bool> {
    if !is_shared(path)? {
        return Ok(false);
    }
    let relative = path.strip_prefix(shadow_root).map_err(|_| TransactionError::OutsideTree {
        path: path.to_path_buf(),
        root: shadow_root.to_path_buf(),
    })?;
    unshare(path, &visible_root.join(relative))
}

/// Applies [`clonefile`] to every regular file under `dir`.
///
/// Returns the number of files that were actually copied.
pub fn clonetree(shadow_root: &Path, visible_root: &Path, dir: &Path) -> Result<usize> {
    let mut cloned = 0;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            TransactionError::io("walk", &path, io::Error::from(e))
        })?;
        if entry.file_type().is_file() && clonefile(shadow_root, visible_root, entry.path())? {
            cloned += 1;
        }
    }

    log::debug!("Cloned {} file(s) under {}", cloned, dir.display());
    Ok(cloned)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransactionError::io("remove", path, e)),
    }
}
