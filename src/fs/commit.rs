//! Publishing or discarding a shadow tree.
//!
//! Both outcomes go through a scratch directory created next to the tree:
//! whatever must disappear (the old tree on commit, the shadow tree on
//! rollback) is renamed into it, and the scratch directory is removed last.
//! The authoritative tree only ever changes by a single `rename(2)`.
//!
//! Moving a directory to another parent rewrites its `..` entry, so the
//! directory itself must be writable. Read-only trees are given owner
//! access before they are moved into scratch space, and everything in
//! scratch space is unlocked again before it is removed.

use crate::error::{Result, TransactionError};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

const SCRATCH_PREFIX: &str = ".fstrans-";

/// Names of the directories taking part in a commit or rollback.
#[derive(Debug, Clone)]
pub struct TreeLayout {
    pub parent: PathBuf,
    pub visible_name: OsString,
    pub shadow_name: OsString,
}

impl TreeLayout {
    pub fn visible(&self) -> PathBuf {
        self.parent.join(&self.visible_name)
    }

    pub fn shadow(&self) -> PathBuf {
        self.parent.join(&self.shadow_name)
    }
}

/// Checks that `pattern` can be used as a snapshot name format.
pub fn validate_snapshot_pattern(pattern: &str) -> Result<()> {
    if pattern.contains('/') {
        return Err(TransactionError::InvalidArgument(
            "snapshot name cannot contain slashes".to_string(),
        ));
    }
    if pattern.is_empty() {
        return Err(TransactionError::InvalidArgument(
            "snapshot pattern cannot be empty".to_string(),
        ));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(TransactionError::InvalidArgument(format!(
            "invalid snapshot pattern '{}'",
            pattern
        )));
    }
    Ok(())
}

/// Formats `pattern` at `when` into a snapshot directory name.
pub fn snapshot_name<Tz>(pattern: &str, when: &DateTime<Tz>) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut name = String::new();
    write!(name, "{}", when.format(pattern)).map_err(|_| {
        TransactionError::InvalidArgument(format!("invalid snapshot pattern '{}'", pattern))
    })?;

    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(TransactionError::InvalidArgument(format!(
            "snapshot pattern '{}' produced unusable name '{}'",
            pattern, name
        )));
    }
    Ok(name)
}

/// Makes the shadow tree the visible tree.
///
/// The old visible tree is renamed to the formatted `snapshot` name if one
/// is given, otherwise it is moved into scratch space and deleted. If the
/// old tree cannot be moved aside, or the shadow tree cannot be published,
/// the shadow tree is discarded and the visible tree is left (or put back)
/// in place, so the lock is released either way.
pub fn commit(layout: &TreeLayout, snapshot: Option<&str>) -> Result<()> {
    let visible = layout.visible();
    let shadow = layout.shadow();
    let scratch = scratch_dir(&layout.parent)?;

    let retired = match snapshot {
        Some(pattern) => snapshot_name(pattern, &Local::now())
            .map(|name| layout.parent.join(name))
            .and_then(|to| rename(&visible, &to).map(|()| (to, None))),
        None => move_into(&visible, &scratch, &layout.visible_name)
            .map(|(to, mode)| (to, Some(mode))),
    };
    let (retired, retired_mode) = match retired {
        Ok(retired) => retired,
        Err(e) => {
            log::error!("Cannot retire {}: {}", visible.display(), e);
            discard_into(&shadow, &scratch, &layout.visible_name);
            log_cleanup(close_scratch(scratch));
            return Err(e);
        }
    };

    if let Err(e) = rename(&shadow, &visible) {
        log::error!("Cannot publish {}: {}", shadow.display(), e);
        discard_into(&shadow, &scratch, &layout.shadow_name);
        if let Err(restore) = rename(&retired, &visible) {
            // The old tree may live inside the scratch directory; keep it.
            let kept = scratch.keep();
            log::error!(
                "Old tree left at {} (scratch {} kept): {}",
                retired.display(),
                kept.display(),
                restore
            );
            return Err(e);
        }
        if let Some(mode) = retired_mode {
            restore_mode(&visible, mode);
        }
        log_cleanup(close_scratch(scratch));
        return Err(e);
    }

    if snapshot.is_some() {
        log::info!("Committed {}; snapshot kept at {}", visible.display(), retired.display());
    } else {
        log::info!("Committed {}", visible.display());
    }

    close_scratch(scratch)
}

/// Discards the shadow tree, leaving the visible tree untouched.
pub fn rollback(layout: &TreeLayout) -> Result<()> {
    let shadow = layout.shadow();
    let scratch = scratch_dir(&layout.parent)?;

    move_into(&shadow, &scratch, &layout.visible_name)?;
    log::info!("Rolled back {}", layout.visible().display());

    close_scratch(scratch)
}

fn scratch_dir(parent: &Path) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| TransactionError::io("create scratch directory in", parent, e))
}

fn close_scratch(scratch: TempDir) -> Result<()> {
    let path = scratch.path().to_path_buf();
    for entry in WalkDir::new(&path) {
        let dir = match &entry {
            Ok(entry) if entry.file_type().is_dir() => entry.path(),
            Ok(_) => continue,
            Err(e) => match e.path() {
                Some(path) => path,
                None => continue,
            },
        };
        if let Err(e) = unlock_dir(dir) {
            log::debug!("{}", e);
        }
    }
    scratch
        .close()
        .map_err(|source| TransactionError::Cleanup { path, source })
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    log::debug!("Renaming {} → {}", from.display(), to.display());
    fs::rename(from, to).map_err(|e| {
        TransactionError::io(&format!("rename {} to", from.display()), to, e)
    })
}

/// Gives the owner full access to `dir` and returns its previous mode.
fn unlock_dir(dir: &Path) -> Result<Permissions> {
    let before = fs::symlink_metadata(dir)
        .map_err(|e| TransactionError::io("inspect", dir, e))?
        .permissions();
    if before.mode() & 0o700 != 0o700 {
        fs::set_permissions(dir, Permissions::from_mode(before.mode() | 0o700))
            .map_err(|e| TransactionError::io("change mode of", dir, e))?;
    }
    Ok(before)
}

fn restore_mode(dir: &Path, mode: Permissions) {
    if let Err(e) = fs::set_permissions(dir, mode) {
        log::warn!("Cannot restore mode of {}: {}", dir.display(), e);
    }
}

/// Renames `dir` into `scratch` as `name`, returning its new path and the
/// mode it had before it was unlocked.
fn move_into(dir: &Path, scratch: &TempDir, name: &OsStr) -> Result<(PathBuf, Permissions)> {
    let before = unlock_dir(dir)?;
    let to = scratch.path().join(name);
    if let Err(e) = rename(dir, &to) {
        restore_mode(dir, before);
        return Err(e);
    }
    Ok((to, before))
}

/// Logs a cleanup failure that must not replace the error being returned.
pub(crate) fn log_cleanup(result: Result<()>) {
    if let Err(e) = result {
        log::error!("{}", e);
    }
}

/// Best-effort discard used on the commit failure paths, where the
/// original error is the one that gets reported.
fn discard_into(shadow: &Path, scratch: &TempDir, name: &OsStr) {
    if let Err(e) = move_into(shadow, scratch, name) {
        log::error!("Cannot discard {}: {}", shadow.display(), e);
    }
}
