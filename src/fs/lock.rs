//! Mutual exclusion through atomic directory creation.
//!
//! Holding the lock on a tree means owning its shadow tree. Acquiring it is
//! a [`copy_tree`] into the shadow path; an existing shadow tree means some
//! other transaction is open, so we wait and retry until the deadline.
//!
//! There is no lock file and no owner bookkeeping. A holder that crashes
//! leaves its shadow tree behind, and every later attempt on that tree
//! times out until someone removes it by hand.

use crate::error::{Result, TransactionError};
use crate::fs::clone::{CloneError, copy_tree};

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Clock and wait behavior used while a tree is contended.
///
/// Implementations must be `Send` so a [`Transaction`](crate::fs::Transaction)
/// can move to another thread.
pub trait LockWaiter: Send {
    /// Current time, used for the deadline.
    fn now(&self) -> Instant;

    /// Called after each attempt that found the tree locked.
    fn contended(&mut self, tree: &Path, attempt: u32);

    /// Blocks until the next attempt.
    fn pause(&mut self, interval: Duration);
}

/// Real clock, real sleeps, and a log notice on the first contended attempt.
#[derive(Debug, Default)]
pub struct ThreadWaiter;

impl LockWaiter for ThreadWaiter {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn contended(&mut self, tree: &Path, attempt: u32) {
        if attempt == 1 {
            log::warn!("Directory {} already locked. Waiting...", tree.display());
        } else {
            log::debug!("Directory {} still locked (attempt {})", tree.display(), attempt);
        }
    }

    fn pause(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

/// Acquires `tree` by cloning it into `shadow`.
///
/// At least one attempt is made even when `timeout` is zero.
pub fn acquire(
    tree: &Path,
    shadow: &Path,
    timeout: Duration,
    poll_interval: Duration,
    waiter: &mut dyn LockWaiter,
) -> Result<()> {
    let deadline = waiter.now() + timeout;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match copy_tree(tree, shadow) {
            Ok(()) => {
                log::debug!(
                    "Locked {} after {} attempt(s)",
                    tree.display(),
                    attempt
                );
                return Ok(());
            }
            Err(CloneError::AlreadyLocked) => {
                waiter.contended(tree, attempt);
            }
            Err(CloneError::Failed { path, source }) => {
                return Err(TransactionError::CloneFailed { path, source });
            }
        }

        if waiter.now() >= deadline {
            return Err(TransactionError::LockTimeout(tree.to_path_buf()));
        }
        waiter.pause(poll_interval);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Virtual clock that only moves when paused.
    pub(crate) struct FakeWaiter {
        start: Instant,
        pub(crate) elapsed: Duration,
        pub(crate) notices: Vec<u32>,
    }

    impl FakeWaiter {
        pub(crate) fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Duration::ZERO,
                notices: Vec::new(),
            }
        }
    }

    impl LockWaiter for FakeWaiter {
        fn now(&self) -> Instant {
            self.start + self.elapsed
        }

        fn contended(&mut self, _tree: &Path, attempt: u32) {
            self.notices.push(attempt);
        }

        fn pause(&mut self, interval: Duration) {
            self.elapsed += interval;
        }
    }

    fn tree(temp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let tree = temp.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("file.txt"), "content").unwrap();
        (tree, temp.path().join(".tree"))
    }

    #[test]
    fn test_acquire_free_tree() {
        let temp = TempDir::new().unwrap();
        let (tree, shadow) = tree(&temp);
        let mut waiter = FakeWaiter::new();

        acquire(
            &tree,
            &shadow,
            Duration::from_secs(5),
            Duration::from_millis(500),
            &mut waiter,
        )
        .unwrap();

        assert!(shadow.join("file.txt").exists());
        assert!(waiter.notices.is_empty());
        assert_eq!(waiter.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_acquire_times_out_on_held_tree() {
        let temp = TempDir::new().unwrap();
        let (tree, shadow) = tree(&temp);
        fs::create_dir(&shadow).unwrap();
        let mut waiter = FakeWaiter::new();

        let result = acquire(
            &tree,
            &shadow,
            Duration::from_secs(2),
            Duration::from_millis(500),
            &mut waiter,
        );

        match result {
            Err(TransactionError::LockTimeout(path)) => assert_eq!(path, tree),
            other => panic!("expected LockTimeout, got {:?}", other),
        }
        assert_eq!(waiter.notices, vec![1, 2, 3, 4, 5]);
        assert_eq!(waiter.elapsed, Duration::from_secs(2));
        // The other holder's shadow tree is untouched.
        assert!(shadow.exists());
        assert!(!shadow.join("file.txt").exists());
    }

    #[test]
    fn test_zero_timeout_still_attempts_once() {
        let temp = TempDir::new().unwrap();
        let (tree, shadow) = tree(&temp);
        let mut waiter = FakeWaiter::new();

        acquire(&tree, &shadow, Duration::ZERO, Duration::from_millis(500), &mut waiter).unwrap();

        assert!(shadow.exists());
    }

    #[test]
    fn test_clone_failure_is_not_contention() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("missing");
        let shadow = temp.path().join(".missing");
        let mut waiter = FakeWaiter::new();

        let result = acquire(
            &tree,
            &shadow,
            Duration::from_secs(5),
            Duration::from_millis(500),
            &mut waiter,
        );

        assert!(matches!(result, Err(TransactionError::CloneFailed { .. })));
        assert!(waiter.notices.is_empty());
    }
}
