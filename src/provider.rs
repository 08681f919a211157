//! The pluggable VCS capability set the manager depends on.
//!
//! The manager never assumes a concrete VCS; every fetch/copy/open/checkout
//! operation goes through this trait set, so a real git-shell-out backend
//! and an in-memory test stub are interchangeable.

use crate::error::Result;
use crate::specifier::RepositorySpecifier;
use std::fmt;
use std::path::Path;

/// Progress callback invoked by [`RepositoryProvider::fetch`]. Advisory
/// only — a provider that never calls it is still conformant.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// An opaque revision identifier (commit hash, changelist number, ...)
/// resolved by the underlying VCS. The manager never interprets its
/// contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Revision {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Capability set a VCS backend must implement for the manager to drive it.
///
/// All operations may fail; implementations should prefer
/// [`crate::error::RepoVaultError::FetchFailed`] /
/// [`crate::error::RepoVaultError::UpdateFailed`] for network-shaped
/// failures so [`RepoVaultError::is_retryable`](crate::error::RepoVaultError::is_retryable)
/// stays meaningful to callers.
pub trait RepositoryProvider: Send + Sync {
    /// Populate `destination` (which must not already exist) with a bare
    /// mirror of the repository named by `specifier`.
    fn fetch(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<()>;

    /// Clone the on-disk state of one mirror to another. Used for cache
    /// staging; `destination` must not already exist.
    fn copy(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Whether a valid bare mirror currently lives at `path`.
    fn repository_exists(&self, path: &Path) -> bool;

    /// Open a read-only query interface over an existing mirror.
    fn open(&self, specifier: &RepositorySpecifier, path: &Path) -> Result<Box<dyn Repository>>;

    /// Materialize a working tree at `destination` from the mirror at
    /// `source`. `editable` controls whether the checkout is free to
    /// develop in (vs. a pristine, read-only-by-convention checkout).
    fn create_working_copy(
        &self,
        specifier: &RepositorySpecifier,
        source: &Path,
        destination: &Path,
        editable: bool,
    ) -> Result<Box<dyn WorkingCheckout>>;

    /// Whether a working copy currently exists at `path`.
    fn working_copy_exists(&self, path: &Path) -> bool;

    /// Open an existing working copy.
    fn open_working_copy(&self, path: &Path) -> Result<Box<dyn WorkingCheckout>>;

    /// Whether `path` contains a structurally valid repository directory.
    /// The manager's `available` invariant depends on this returning `true`
    /// for every handle it hands out.
    fn is_valid_directory(&self, path: &Path) -> bool;

    /// Whether `reference` is syntactically valid for this VCS (not
    /// whether it currently resolves to anything).
    fn is_valid_ref_format(&self, reference: &str) -> bool;
}

/// Read-only query interface over an existing repository mirror, and the
/// one operation the manager needs to perform an in-place update:
/// `fetch`, meaning "pull new objects into this existing mirror".
pub trait Repository: Send + Sync {
    /// Path of the mirror this handle queries.
    fn path(&self) -> &Path;

    /// List tags known to the mirror.
    fn tags(&self) -> Result<Vec<String>>;

    /// Resolve a branch/tag/commit-ish string to a concrete revision.
    fn resolve_revision(&self, reference: &str) -> Result<Revision>;

    /// Incrementally update this mirror from its remote. This is what the
    /// manager calls for the "existing available record" path of `lookup`.
    fn fetch(&self) -> Result<()>;
}

/// A materialized working tree at a specific revision.
pub trait WorkingCheckout: Send + Sync {
    /// Path of the working tree.
    fn path(&self) -> &Path;

    /// Whether this checkout was created editable.
    fn is_editable(&self) -> bool;

    /// The revision currently checked out.
    fn current_revision(&self) -> Result<Revision>;

    /// Whether the checkout has commits not present in its source mirror.
    fn has_unpushed_changes(&self) -> Result<bool>;
}
