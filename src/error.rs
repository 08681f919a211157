//! Error types for the repository vault, with enough context to decide
//! whether a failure is retryable or fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the repository vault.
///
/// Every variant carries enough context (path, specifier, or reason string)
/// to log or report without re-deriving it from call-site state. Variants
/// are intentionally message-based rather than wrapping boxed source errors
/// so that [`RepoVaultError`] stays cheap to clone — the fetch coordinator
/// fans a single failure out to every waiter joined on the same specifier.
#[derive(Error, Debug, Clone)]
pub enum RepoVaultError {
    /// The specifier could not be canonicalized from the given input.
    #[error("invalid repository specifier '{input}': {reason}")]
    InvalidSpecifier {
        /// The raw input string or path.
        input: String,
        /// Why it could not be canonicalized.
        reason: String,
    },

    /// The provider failed to populate a destination with a repository
    /// mirror.
    #[error("fetch failed for {specifier}: {reason}")]
    FetchFailed {
        /// Canonical location of the repository.
        specifier: String,
        /// Failure reason reported by the provider.
        reason: String,
    },

    /// An incremental update of an existing mirror failed.
    #[error("update failed for {specifier}: {reason}")]
    UpdateFailed {
        /// Canonical location of the repository.
        specifier: String,
        /// Failure reason reported by the provider.
        reason: String,
    },

    /// Staging a fetch through the shared cache failed; callers should treat
    /// this as informational and fall back to a direct fetch, not surface it.
    #[error("cache staging failed for {specifier}: {reason}")]
    CacheStagingFailed {
        /// Canonical location of the repository.
        specifier: String,
        /// Failure reason.
        reason: String,
    },

    /// No usable handle exists for a specifier (e.g. `open` before a
    /// successful `lookup`, or `lookup` of a record left in `error` status).
    #[error("no available repository for {specifier}")]
    NotAvailable {
        /// Canonical location of the repository.
        specifier: String,
    },

    /// A filesystem operation failed.
    #[error("io error at {path}: {message}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying message.
        message: String,
    },

    /// The persisted handle store could not be written; the in-memory state
    /// has been rolled back to the last persisted version.
    #[error("failed to persist repository store at {path}: {message}")]
    StoreWriteFailed {
        /// Store file path.
        path: PathBuf,
        /// Underlying message.
        message: String,
    },

    /// The provider reported a path that does not contain a valid
    /// repository mirror where one was expected.
    #[error("not a valid repository mirror: {path}")]
    InvalidMirror {
        /// Offending path.
        path: PathBuf,
    },
}

impl RepoVaultError {
    /// Create an IO error from a path and [`std::io::Error`].
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the operation that produced this error might
    /// succeed (network-shaped failures), as opposed to a structural
    /// problem (invalid specifier, corrupt store) that will recur.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed { .. } | Self::UpdateFailed { .. } | Self::CacheStagingFailed { .. }
        )
    }

    /// Whether this error means "there is nothing usable at this specifier",
    /// as opposed to a transient or environmental failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotAvailable { .. })
    }
}

impl From<std::io::Error> for RepoVaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

/// Result type for repository vault operations.
pub type Result<T> = std::result::Result<T, RepoVaultError>;
