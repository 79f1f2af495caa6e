//! File system transactions over a directory tree.
//!
//! Provides a shadow working copy of a tree that is either published
//! atomically or discarded as a unit.

pub mod clone;
pub mod commit;
pub mod cow;
pub mod guard;
pub mod lock;
pub mod transaction;

pub use cow::OpenMode;
pub use lock::{LockWaiter, ThreadWaiter};
pub use transaction::{OpenTransaction, Outcome, Transaction, TransactionOptions};
