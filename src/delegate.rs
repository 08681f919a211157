//! Observer interface the manager reports fetch/update progress through.
//!
//! Dispatched via `tokio::spawn` rather than invoked in-line, so a slow or
//! misbehaving delegate can never be invoked while the manager holds its
//! internal store lock (§5: delegate calls must never happen under a held
//! lock).

use crate::specifier::RepositorySpecifier;
use std::sync::Arc;

/// Context passed to [`RepositoryManagerDelegate::did_fetch`] /
/// [`RepositoryManagerDelegate::did_update`] describing how the result was
/// obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDetails {
    /// The mirror was populated by copying from the shared cache rather
    /// than fetching from the remote directly.
    pub from_cache: bool,
    /// The shared cache itself had to be refreshed from the remote to
    /// serve this request.
    pub updated_cache: bool,
}

impl FetchDetails {
    pub(crate) const DIRECT: Self = Self {
        from_cache: false,
        updated_cache: false,
    };

    pub(crate) const fn from_cache(updated_cache: bool) -> Self {
        Self {
            from_cache: true,
            updated_cache,
        }
    }
}

/// Observer for manager lifecycle events. Every method has a no-op default,
/// so implementers only override what they care about.
pub trait RepositoryManagerDelegate: Send + Sync {
    /// A fetch for `specifier` is about to start.
    fn will_fetch(&self, _specifier: &RepositorySpecifier, _details: FetchDetails) {}

    /// A fetch for `specifier` is in progress, `progress`/`total` in
    /// provider-defined units (typically bytes).
    fn fetching(&self, _specifier: &RepositorySpecifier, _progress: u64, _total: Option<u64>) {}

    /// A fetch for `specifier` finished, successfully or not.
    fn did_fetch(
        &self,
        _specifier: &RepositorySpecifier,
        _details: FetchDetails,
        _result: &Result<(), Arc<crate::error::RepoVaultError>>,
    ) {
    }

    /// An incremental update of an existing mirror for `specifier` is about
    /// to start.
    fn will_update(&self, _specifier: &RepositorySpecifier) {}

    /// An incremental update of an existing mirror for `specifier` finished,
    /// successfully or not.
    fn did_update(
        &self,
        _specifier: &RepositorySpecifier,
        _result: &Result<(), Arc<crate::error::RepoVaultError>>,
    ) {
    }
}

/// A delegate that ignores every event. Used as the manager's default when
/// no delegate is configured.
#[derive(Debug, Default)]
pub struct NullDelegate;

impl RepositoryManagerDelegate for NullDelegate {}
