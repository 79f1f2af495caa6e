//! Hard-link clone of a directory tree.
//!
//! The clone shares file content with its source: directories are created
//! fresh, everything else is hard-linked. Setup cost is proportional to the
//! number of entries, not to the amount of data.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Why a clone could not be built.
#[derive(Debug)]
pub enum CloneError {
    /// The destination already exists. Nothing was touched.
    AlreadyLocked,
    /// Any other failure. The partial destination has been removed.
    Failed { path: PathBuf, source: io::Error },
}

/// Builds `new` as a structural mirror of `old`, hard-linking every
/// non-directory entry.
///
/// Creation of the top-level directory is the atomic step: if `new` already
/// exists this returns [`CloneError::AlreadyLocked`] without modifying
/// anything. Directory modes, including the top level, are copied from
/// `old` once the walk has finished, deepest first.
pub fn copy_tree(old: &Path, new: &Path) -> Result<(), CloneError> {
    match fs::create_dir(new) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(CloneError::AlreadyLocked);
        }
        Err(source) => {
            return Err(CloneError::Failed {
                path: new.to_path_buf(),
                source,
            });
        }
    }

    log::debug!("Cloning {} → {}", old.display(), new.display());

    if let Err((path, source)) = populate(old, new) {
        if let Err(e) = fs::remove_dir_all(new) {
            log::error!(
                "Failed to remove partial clone {}: {}",
                new.display(),
                e
            );
        }
        return Err(CloneError::Failed { path, source });
    }

    Ok(())
}

fn populate(old: &Path, new: &Path) -> Result<(), (PathBuf, io::Error)> {
    let mut modes = vec![(new.to_path_buf(), permissions_of(old)?)];

    for entry in WalkDir::new(old).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(old).to_path_buf();
            (path, io::Error::from(e))
        })?;

        let relative = entry
            .path()
            .strip_prefix(old)
            .map_err(|e| (entry.path().to_path_buf(), io::Error::other(e)))?;
        let target = new.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir(&target).map_err(|e| (target.clone(), e))?;
            modes.push((target, permissions_of(entry.path())?));
        } else {
            fs::hard_link(entry.path(), &target).map_err(|e| (target, e))?;
        }
    }

    // Walk order is parent-before-child; apply in reverse so a read-only
    // directory is only locked down after its children exist.
    for (dir, permissions) in modes.into_iter().rev() {
        fs::set_permissions(&dir, permissions).map_err(|e| (dir, e))?;
    }

    Ok(())
}

fn permissions_of(path: &Path) -> Result<fs::Permissions, (PathBuf, io::Error)> {
    fs::symlink_metadata(path)
        .map(|meta| meta.permissions())
        .map_err(|e| (path.to_path_buf(), e))
}
