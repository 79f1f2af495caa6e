//! Atomic modification of a directory tree.
//!
//! A transaction works on a shadow copy of the tree, created next to it
//! under a dot-prefixed name, and either swaps it in or throws it away.
//!
//! ## Execution Guarantees
//!
//! - **Exclusion**: One open transaction per tree across processes (atomic `mkdir`)
//! - **Atomicity**: The new tree is published by a single `rename(2)`
//! - **Isolation**: The visible tree is never written through; shared files are copied first
//! - **Rollback**: Any error inside the scope discards the shadow tree
//!
//! ## Phases
//!
//! 1. **Enter**: Lock by cloning the tree with hard links into `.NAME`
//! 2. **Edit**: `open`, `putfile`, `clonefile`, `clonetree` inside [`Transaction::root`]
//! 3. **Exit**: Publish `.NAME` as `NAME` (commit) or delete it (rollback)
//!
//! ## Example
//!
//! ```no_run
//! # use fstrans::fs::{OpenMode, Transaction, TransactionOptions};
//! # use std::io::Write;
//! # fn example() -> fstrans::error::Result<()> {
//! let mut txn = Transaction::new("site", TransactionOptions::default())?;
//!
//! txn.run(|txn| {
//!     let mut f = txn.open("index.html", OpenMode::Write)?;
//!     f.write_all(b"<h1>new</h1>")?;
//!     txn.putfile("logo.png", "/tmp/logo.png")?;
//!     Ok::<_, fstrans::TransactionError>(())
//! })?; // Committed here, or rolled back on error
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TransactionError};
use crate::fs::commit::{self, TreeLayout, log_cleanup, validate_snapshot_pattern};
use crate::fs::cow::{self, OpenMode};
use crate::fs::guard;
use crate::fs::lock::{self, LockWaiter, ThreadWaiter};

use std::ffi::OsString;
use std::fs::{self, File};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time to wait for a contended tree.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between lock attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Settings for a [`Transaction`].
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// How long [`Transaction::enter`] retries a locked tree.
    pub timeout: Duration,
    /// Delay between lock attempts.
    pub poll_interval: Duration,
    /// `strftime` pattern; when set, the old tree is kept under the
    /// formatted name on commit instead of being deleted.
    pub snapshot: Option<String>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            snapshot: None,
        }
    }
}

impl TransactionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_snapshot(mut self, pattern: impl Into<String>) -> Self {
        self.snapshot = Some(pattern.into());
        self
    }
}

/// How an open transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Publish the shadow tree.
    Commit,
    /// Discard the shadow tree.
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    /// No shadow tree; `root()` is the visible tree.
    Closed,
    /// We own the shadow tree; `root()` points at it.
    Open,
}

/// Transaction over one directory tree.
///
/// Reusable: after [`exit`](Self::exit) it is closed again and may be
/// entered once more. If dropped while open, the shadow tree is rolled back.
#[must_use = "Transaction does nothing until entered"]
pub struct Transaction {
    layout: TreeLayout,
    options: TransactionOptions,
    state: TransactionState,
    waiter: Box<dyn LockWaiter>,
}

impl Transaction {
    /// Prepares a transaction on the directory at `path`.
    ///
    /// Fails with [`TransactionError::InvalidArgument`] if `path` is not a
    /// directory or the snapshot pattern is unusable. Nothing is locked yet.
    pub fn new(path: impl AsRef<Path>, options: TransactionOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(TransactionError::InvalidArgument(format!(
                "Not a directory: {}",
                path.display()
            )));
        }
        if let Some(pattern) = &options.snapshot {
            validate_snapshot_pattern(pattern)?;
        }

        let canonical = fs::canonicalize(path).map_err(|e| TransactionError::io("resolve", path, e))?;
        let (Some(parent), Some(name)) = (canonical.parent(), canonical.file_name()) else {
            return Err(TransactionError::InvalidArgument(format!(
                "Cannot run a transaction on {}",
                canonical.display()
            )));
        };

        let mut shadow_name = OsString::from(".");
        shadow_name.push(name);

        Ok(Self {
            layout: TreeLayout {
                parent: parent.to_path_buf(),
                visible_name: name.to_os_string(),
                shadow_name,
            },
            options,
            state: TransactionState::Closed,
            waiter: Box::new(ThreadWaiter),
        })
    }

    /// Replaces the clock and wait behavior used while the tree is locked.
    pub fn with_waiter(mut self, waiter: impl LockWaiter + 'static) -> Self {
        self.waiter = Box::new(waiter);
        self
    }

    /// Top of the tree operations act on: the shadow tree while open, the
    /// visible tree otherwise.
    pub fn root(&self) -> PathBuf {
        match self.state {
            TransactionState::Open => self.layout.shadow(),
            TransactionState::Closed => self.layout.visible(),
        }
    }

    /// The visible tree, whatever the state.
    pub fn tree(&self) -> PathBuf {
        self.layout.visible()
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Locks the tree and switches [`root`](Self::root) to a fresh shadow tree.
    ///
    /// Waits up to the configured timeout while another transaction holds
    /// the tree. On failure the transaction stays closed.
    pub fn enter(&mut self) -> Result<()> {
        self.check_closed()?;

        lock::acquire(
            &self.layout.visible(),
            &self.layout.shadow(),
            self.options.timeout,
            self.options.poll_interval,
            self.waiter.as_mut(),
        )?;

        self.state = TransactionState::Open;
        log::debug!("Opened transaction in {}", self.layout.shadow().display());
        Ok(())
    }

    /// Ends the transaction and releases the lock.
    ///
    /// The transaction is closed afterwards even if publishing or cleanup
    /// failed.
    pub fn exit(&mut self, outcome: Outcome) -> Result<()> {
        self.check_open()?;
        self.state = TransactionState::Closed;

        match outcome {
            Outcome::Commit => commit::commit(&self.layout, self.options.snapshot.as_deref()),
            Outcome::Rollback => commit::rollback(&self.layout),
        }
    }

    /// Enters the transaction and returns a guard that rolls back on drop
    /// unless [`OpenTransaction::commit`] is called.
    pub fn begin(&mut self) -> Result<OpenTransaction<'_>> {
        self.enter()?;
        Ok(OpenTransaction {
            txn: self,
            finished: false,
        })
    }

    /// Runs `body` inside the transaction.
    ///
    /// Commits if `body` returns `Ok`. Otherwise rolls back and returns the
    /// error from `body`; a failing rollback is logged, never substituted.
    pub fn run<T, E, F>(&mut self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<TransactionError>,
    {
        let mut guard = self.begin()?;

        match body(&mut *guard) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cleanup) = guard.rollback() {
                    log::error!("Rollback failed after error: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Resolves `path` against [`root`](Self::root) and rejects it if it
    /// lies outside.
    pub fn check_inside(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        guard::check_inside(&self.root(), path.as_ref())
    }

    /// Opens a file inside the shadow tree.
    ///
    /// Write and append modes never modify the visible tree's copy: `w`
    /// unlinks before creating, `a` and `r+` unshare first.
    pub fn open(&self, path: impl AsRef<Path>, mode: OpenMode) -> Result<File> {
        self.check_open()?;
        let path = self.check_inside(path)?;
        log::debug!("Opening {} ({})", path.display(), mode);
        cow::open(&path, mode)
    }

    /// Replaces `dest` with a copy of `source`, content and metadata.
    ///
    /// `dest` must be inside the tree. A relative `source` is taken
    /// relative to [`root`](Self::root); absolute sources may be anywhere.
    pub fn putfile(&self, dest: impl AsRef<Path>, source: impl AsRef<Path>) -> Result<()> {
        self.check_open()?;
        let dest = self.check_inside(dest)?;
        let source = self.root().join(source.as_ref());
        log::debug!("Putting {} → {}", source.display(), dest.display());
        cow::putfile(&dest, &source)
    }

    /// Prepares one file for in-place modification by other means.
    ///
    /// Idempotent: returns `false` if the file was already private.
    pub fn clonefile(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.check_open()?;
        let path = self.check_inside(path)?;
        cow::clonefile(&self.layout.shadow(), &self.layout.visible(), &path)
    }

    /// Prepares every file under a directory for in-place modification.
    ///
    /// Returns how many files were copied.
    pub fn clonetree(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.check_open()?;
        let path = self.check_inside(path)?;
        cow::clonetree(&self.layout.shadow(), &self.layout.visible(), &path)
    }

    /// Returns true while the file still shares content with the visible
    /// tree and must not be modified in place.
    pub fn is_shared(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.check_open()?;
        let path = self.check_inside(path)?;
        cow::is_shared(&path)
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            TransactionState::Closed => Err(TransactionError::NotOpen),
        }
    }

    fn check_closed(&self) -> Result<()> {
        match self.state {
            TransactionState::Closed => Ok(()),
            TransactionState::Open => Err(TransactionError::AlreadyOpen),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            log::warn!(
                "Transaction on {} dropped while open; rolling back",
                self.layout.visible().display()
            );
            log_cleanup(self.exit(Outcome::Rollback));
        }
    }
}

/// Scope guard returned by [`Transaction::begin`].
///
/// Dereferences to the [`Transaction`], so all file operations are
/// available on it. Dropping it without calling [`commit`](Self::commit)
/// rolls back, including when unwinding from a panic.
#[must_use = "OpenTransaction rolls back when dropped"]
pub struct OpenTransaction<'a> {
    txn: &'a mut Transaction,
    finished: bool,
}

impl OpenTransaction<'_> {
    /// Publishes the shadow tree.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.txn.exit(Outcome::Commit)
    }

    /// Discards the shadow tree.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.txn.exit(Outcome::Rollback)
    }
}

impl Deref for OpenTransaction<'_> {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        self.txn
    }
}

impl DerefMut for OpenTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Transaction {
        self.txn
    }
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.txn.is_open() {
            log::warn!(
                "Transaction on {} dropped without commit; rolling back",
                self.txn.tree().display()
            );
            log_cleanup(self.txn.exit(Outcome::Rollback));
        }
    }
}
