//! Containment check for path arguments.
//!
//! Every path handed to a transaction is resolved the way `realpath(3)`
//! would resolve it, then compared component-wise against the current root.

use crate::error::{Result, TransactionError};

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolves `path` to an absolute form without requiring it to exist.
///
/// Relative paths are taken relative to `base`. The longest existing
/// ancestor is canonicalized (so symlinks are followed), and the remaining
/// components are appended with `.` and `..` handled lexically. A regular
/// file in the middle of the path ends the existing part the same way a
/// missing entry does.
pub fn resolve(base: &Path, path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut existing = absolute.as_path();
    let mut remainder = Vec::new();
    let mut resolved = loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => break canonical,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                let (Some(parent), Some(last)) =
                    (existing.parent(), existing.components().next_back())
                else {
                    return Err(e);
                };
                remainder.push(last.as_os_str().to_os_string());
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    };

    for part in remainder.iter().rev() {
        match Path::new(part).components().next() {
            Some(Component::CurDir) | None => {}
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(other) => resolved.push(other),
        }
    }

    Ok(resolved)
}

/// Returns true if `path` is `root` or lies underneath it.
///
/// Comparison is by path component, so `/a/bc` is not inside `/a/b`.
pub fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

/// Resolves `path` against `root` and rejects anything outside it.
pub fn check_inside(root: &Path, path: &Path) -> Result<PathBuf> {
    let resolved = resolve(root, path).map_err(|e| TransactionError::io("resolve", path, e))?;

    if !is_within(root, &resolved) {
        log::debug!(
            "Rejected {} (resolved to {}) outside {}",
            path.display(),
            resolved.display(),
            root.display()
        );
        return Err(TransactionError::OutsideTree {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
    }

    Ok(resolved)
}
