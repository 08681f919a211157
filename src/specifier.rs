//! Canonicalized repository references and their deterministic on-disk
//! storage path.

use crate::error::{RepoVaultError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Number of hex characters of the BLAKE3 digest appended to a storage
/// path. 16 hex chars (64 bits) keeps directory names short enough to stay
/// readable while making an accidental collision between distinct canonical
/// locations practically impossible.
const HASH_SUFFIX_LEN: usize = 16;

/// An upper bound on the human-readable portion of a storage path, so a
/// very long URL does not produce an unwieldy directory name. The hash
/// suffix is computed from the *untruncated* canonical string, so
/// truncating this part never introduces a collision.
const MAX_ENCODED_LEN: usize = 140;

/// A canonicalized, opaque reference to a remote or local repository.
///
/// Two specifiers built from equal canonical locations compare equal and
/// always produce the same [`storage_path`](Self::storage_path); specifiers
/// built from distinct locations never share a storage path.
#[derive(Debug, Clone)]
pub struct RepositorySpecifier {
    canonical: String,
    storage_path: String,
    local: bool,
}

impl RepositorySpecifier {
    /// Build a specifier from a URL-like remote location string.
    ///
    /// # Errors
    /// Returns an error if `location` is empty or cannot be canonicalized.
    pub fn from_url(location: &str) -> Result<Self> {
        let canonical = canonicalize(location)?;
        Ok(Self {
            storage_path: compute_storage_path(&canonical),
            canonical,
            local: false,
        })
    }

    /// Build a specifier from a local filesystem path.
    ///
    /// # Errors
    /// Returns an error if `path` cannot be canonicalized into a string.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = path.to_str().ok_or_else(|| RepoVaultError::InvalidSpecifier {
            input: path.to_string_lossy().into_owned(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        let canonical = canonicalize(raw)?;
        Ok(Self {
            storage_path: compute_storage_path(&canonical),
            canonical,
            local: true,
        })
    }

    /// The canonical location string this specifier was derived from.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// A deterministic, filesystem-safe relative directory name for this
    /// specifier's on-disk mirror.
    #[must_use]
    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    /// Whether this specifier was built from a local filesystem path rather
    /// than a remote URL. Controls shared-cache eligibility (§4.5).
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.local
    }
}

impl fmt::Display for RepositorySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

impl PartialEq for RepositorySpecifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for RepositorySpecifier {}

impl std::hash::Hash for RepositorySpecifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

/// Canonicalize a raw location string.
///
/// For anything `url::Url` recognizes as an absolute URL (`https://`,
/// `ssh://`, `file://`, ...) we round-trip through it so scheme/host
/// casing and default ports normalize the way the spec requires ("two
/// specifiers considered equal" must produce identical storage paths).
/// scp-like (`git@host:path`) and plain filesystem locations are not valid
/// URLs by that crate's definition, so they fall back to trimmed-string
/// canonicalization.
fn canonicalize(location: &str) -> Result<String> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(RepoVaultError::InvalidSpecifier {
            input: location.to_string(),
            reason: "location is empty".to_string(),
        });
    }

    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() {
        return Err(RepoVaultError::InvalidSpecifier {
            input: location.to_string(),
            reason: "location has no path component".to_string(),
        });
    }

    if let Ok(url) = url::Url::parse(stripped) {
        if !url.cannot_be_a_base() {
            return Ok(url.as_str().trim_end_matches('/').to_string());
        }
    }

    Ok(stripped.to_string())
}

/// Percent-encode every byte that is not alphanumeric, `-`, `_`, or `.`.
/// This is reversible (the original string can be recovered by decoding)
/// and collision-free by construction, independent of the hash suffix.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let is_safe = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.');
        if is_safe {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn compute_storage_path(canonical: &str) -> String {
    let digest = blake3::hash(canonical.as_bytes());
    let suffix = &digest.to_hex()[..HASH_SUFFIX_LEN];

    let mut encoded = percent_encode(canonical);
    if encoded.len() > MAX_ENCODED_LEN {
        // Truncate on a char boundary; the hash suffix (derived from the
        // full canonical string) keeps this collision-free.
        let mut cut = MAX_ENCODED_LEN;
        while !encoded.is_char_boundary(cut) {
            cut -= 1;
        }
        encoded.truncate(cut);
    }

    format!("{encoded}-{suffix}")
}
