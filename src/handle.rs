//! The value a caller receives naming an on-disk repository mirror and its
//! status.

use crate::error::{RepoVaultError, Result};
use crate::provider::{Repository, RepositoryProvider, WorkingCheckout};
use crate::specifier::RepositorySpecifier;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle status of a [`RepositoryHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStatus {
    /// A record exists; fetch is not yet known successful.
    Pending,
    /// A working clone exists at the stored path and is usable.
    Available,
    /// The last fetch attempt failed; kept for diagnostics only.
    Error,
}

impl HandleStatus {
    /// Parse from the store's on-disk string representation, treating any
    /// unrecognized value as `error` per §4.3.
    #[must_use]
    pub fn from_store_str(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "available" => Self::Available,
            _ => Self::Error,
        }
    }

    /// Render to the store's on-disk string representation.
    #[must_use]
    pub const fn as_store_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Error => "error",
        }
    }
}

/// A value naming (specifier, on-disk absolute path, status), issued by the
/// manager and handed to callers.
#[derive(Clone)]
pub struct RepositoryHandle {
    specifier: RepositorySpecifier,
    path: PathBuf,
    status: HandleStatus,
    provider: Arc<dyn RepositoryProvider>,
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("specifier", &self.specifier.canonical())
            .field("path", &self.path)
            .field("status", &self.status)
            .finish()
    }
}

impl RepositoryHandle {
    pub(crate) fn new(
        specifier: RepositorySpecifier,
        path: PathBuf,
        status: HandleStatus,
        provider: Arc<dyn RepositoryProvider>,
    ) -> Self {
        Self {
            specifier,
            path,
            status,
            provider,
        }
    }

    /// The specifier this handle was issued for.
    #[must_use]
    pub const fn specifier(&self) -> &RepositorySpecifier {
        &self.specifier
    }

    /// Absolute on-disk path of the mirror this handle names.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> HandleStatus {
        self.status
    }

    /// Open a read-only query interface over this handle's mirror.
    ///
    /// # Errors
    /// Returns [`RepoVaultError::NotAvailable`] if this handle is not
    /// `available`, or whatever the provider reports for a structurally
    /// invalid mirror.
    pub fn open(&self) -> Result<Box<dyn Repository>> {
        if self.status != HandleStatus::Available {
            return Err(RepoVaultError::NotAvailable {
                specifier: self.specifier.canonical().to_string(),
            });
        }
        self.provider.open(&self.specifier, &self.path)
    }

    /// Materialize a working tree at `destination` from this handle's
    /// mirror.
    ///
    /// # Errors
    /// Returns [`RepoVaultError::NotAvailable`] if this handle is not
    /// `available`, or whatever the provider reports for the checkout
    /// operation.
    pub fn create_working_copy(
        &self,
        destination: &Path,
        editable: bool,
    ) -> Result<Box<dyn WorkingCheckout>> {
        if self.status != HandleStatus::Available {
            return Err(RepoVaultError::NotAvailable {
                specifier: self.specifier.canonical().to_string(),
            });
        }
        self.provider
            .create_working_copy(&self.specifier, &self.path, destination, editable)
    }
}
