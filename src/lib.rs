//! A concurrency-safe, persistent cache for source-control repositories
//! fetched from remote locations, serving a dependency resolver that needs
//! reproducible, shared-by-identity access to package histories.
//!
//! [`RepositoryManager`] is the public façade. It sits between a resolver
//! that asks "give me a handle to repository X" and a pluggable
//! [`RepositoryProvider`] abstracting the underlying VCS. It:
//!
//! - coalesces concurrent lookups for the same specifier into a single
//!   in-flight fetch ([`coordinator`]);
//! - persists a schema-versioned index across restarts ([`store`]);
//! - optionally stages fetches through a shared cross-workspace cache;
//! - reports progress to a non-blocking delegate ([`delegate`]).
//!
//! Concrete VCS drivers, the manifest loader, the dependency resolver
//! proper, and the command-line frontend are all out of scope — this crate
//! only owns the repositories directory tree and its store file.
//!
//! Single-process concurrency only: constructing two [`RepositoryManager`]s
//! over the same root from different processes is not coordinated.

mod coordinator;
mod delegate;
mod error;
mod handle;
mod manager;
mod provider;
mod specifier;
mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use delegate::{FetchDetails, NullDelegate, RepositoryManagerDelegate};
pub use error::{RepoVaultError, Result};
pub use handle::{HandleStatus, RepositoryHandle};
pub use manager::{CacheRootStats, CacheStats, ManagerStats, RepositoryManager, RepositoryManagerConfig};
pub use provider::{ProgressFn, Repository, RepositoryProvider, Revision, WorkingCheckout};
pub use specifier::RepositorySpecifier;
pub use store::{HandleStore, StoredRecord, WarningHandler, SCHEMA_VERSION};
