//! In-memory [`RepositoryProvider`] stub used to drive the scenario tests
//! in §8 of the specification without touching a real VCS or the network.
//!
//! Modeled on the design note that the in-memory test repository "is
//! modeled with an index into a shared table inside the provider, not
//! back-pointers" — every handle this stub hands out (`InMemoryRepository`,
//! `InMemoryWorkingCheckout`) holds only a path and a clone of the shared
//! `Arc<Mutex<..>>` table, never a reference back to the provider itself.

use crate::error::{RepoVaultError, Result};
use crate::provider::{ProgressFn, Repository, RepositoryProvider, Revision, WorkingCheckout};
use crate::specifier::RepositorySpecifier;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const MIRROR_MARKER: &str = ".repovault-mirror";
const CHECKOUT_MARKER: &str = ".repovault-checkout";

#[derive(Debug, Clone)]
struct SeededRepo {
    tags: Vec<String>,
    fail: bool,
    /// Set by [`InMemoryProvider::fail_next_update`] /
    /// [`InMemoryProvider::corrupt_next_update`] after a repo has already
    /// been successfully fetched once, so only its next incremental
    /// [`Repository::fetch`] call fails, independent of `fail` (which also
    /// governs the initial [`RepositoryProvider::fetch`]).
    fail_next_update: bool,
    /// Whether the failing update above should also poison the mirror path,
    /// simulating the provider detecting corruption as a result of the
    /// failed update rather than an ordinary (non-corrupting) failure.
    corrupt_on_update_failure: bool,
}

#[derive(Debug, Default)]
struct Shared {
    repos: HashMap<String, SeededRepo>,
    /// Paths poisoned by a corrupting update failure (see
    /// `corrupt_on_update_failure`): `is_valid_directory` reports `false`
    /// for these even though the marker file is still present.
    corrupt_paths: HashSet<PathBuf>,
}

/// An in-memory [`RepositoryProvider`] seeded with named repositories.
///
/// Basenames are derived from the last path segment of a specifier's
/// canonical location (with a trailing `.git` stripped), so
/// `https://example.com/x/dummy.git` and `/local/dummy` both resolve to the
/// seeded repo named `"dummy"`.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    shared: Arc<Mutex<Shared>>,
    num_clones: Arc<AtomicU64>,
    num_fetches: Arc<AtomicU64>,
    num_copies: Arc<AtomicU64>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            num_clones: Arc::new(AtomicU64::new(0)),
            num_fetches: Arc::new(AtomicU64::new(0)),
            num_copies: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed a repository that can be successfully fetched.
    #[must_use]
    pub fn with_repo(self, name: impl Into<String>, tags: Vec<String>) -> Self {
        self.shared.lock().unwrap().repos.insert(
            name.into(),
            SeededRepo {
                tags,
                fail: false,
                fail_next_update: false,
                corrupt_on_update_failure: false,
            },
        );
        self
    }

    /// Seed a repository whose `fetch` and `Repository::fetch` always fail.
    #[must_use]
    pub fn with_failing_repo(self, name: impl Into<String>) -> Self {
        self.shared.lock().unwrap().repos.insert(
            name.into(),
            SeededRepo {
                tags: Vec::new(),
                fail: true,
                fail_next_update: false,
                corrupt_on_update_failure: false,
            },
        );
        self
    }

    /// Mark an already-seeded, already-fetched repository so its next
    /// incremental update ([`Repository::fetch`]) fails without leaving the
    /// mirror invalid — the manager should keep the existing handle and
    /// report the failure only through `did_update`.
    pub fn fail_next_update(&self, name: impl Into<String>) {
        if let Some(repo) = self.shared.lock().unwrap().repos.get_mut(&name.into()) {
            repo.fail_next_update = true;
        }
    }

    /// Like [`Self::fail_next_update`], but the failing update also poisons
    /// the mirror directory (as observed through `is_valid_directory`), so
    /// the manager should purge it and transparently re-fetch instead.
    pub fn corrupt_next_update(&self, name: impl Into<String>) {
        if let Some(repo) = self.shared.lock().unwrap().repos.get_mut(&name.into()) {
            repo.fail_next_update = true;
            repo.corrupt_on_update_failure = true;
        }
    }

    /// Number of times [`RepositoryProvider::fetch`] (the initial clone)
    /// has been called.
    #[must_use]
    pub fn num_clones(&self) -> u64 {
        self.num_clones.load(Ordering::SeqCst)
    }

    /// Number of times [`Repository::fetch`] (an incremental update) has
    /// been called.
    #[must_use]
    pub fn num_fetches(&self) -> u64 {
        self.num_fetches.load(Ordering::SeqCst)
    }

    /// Number of times [`RepositoryProvider::copy`] has been called.
    #[must_use]
    pub fn num_copies(&self) -> u64 {
        self.num_copies.load(Ordering::SeqCst)
    }

    fn basename(specifier: &RepositorySpecifier) -> String {
        let canonical = specifier.canonical().trim_end_matches(['/', '\\']);
        let last = canonical.rsplit(['/', '\\']).next().unwrap_or(canonical);
        last.strip_suffix(".git").unwrap_or(last).to_string()
    }

    fn lookup(&self, specifier: &RepositorySpecifier) -> Result<SeededRepo> {
        let name = Self::basename(specifier);
        self.shared
            .lock()
            .unwrap()
            .repos
            .get(&name)
            .cloned()
            .ok_or_else(|| RepoVaultError::FetchFailed {
                specifier: specifier.canonical().to_string(),
                reason: format!("no such repository: {name}"),
            })
    }
}

impl RepositoryProvider for InMemoryProvider {
    fn fetch(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<()> {
        self.num_clones.fetch_add(1, Ordering::SeqCst);
        let repo = self.lookup(specifier)?;
        if repo.fail {
            return Err(RepoVaultError::FetchFailed {
                specifier: specifier.canonical().to_string(),
                reason: "simulated fetch failure".to_string(),
            });
        }

        if let Some(progress) = progress {
            progress(0, Some(1));
        }
        fs::create_dir_all(destination).map_err(|err| RepoVaultError::io(destination, err))?;
        fs::write(destination.join(MIRROR_MARKER), repo.tags.join("\n"))
            .map_err(|err| RepoVaultError::io(destination, err))?;
        if let Some(progress) = progress {
            progress(1, Some(1));
        }
        Ok(())
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        self.num_copies.fetch_add(1, Ordering::SeqCst);
        if !source.exists() {
            return Err(RepoVaultError::CacheStagingFailed {
                specifier: source.display().to_string(),
                reason: "source mirror does not exist".to_string(),
            });
        }
        copy_dir_recursive(source, destination).map_err(|err| RepoVaultError::io(destination, err))
    }

    fn repository_exists(&self, path: &Path) -> bool {
        path.join(MIRROR_MARKER).is_file()
    }

    fn open(&self, specifier: &RepositorySpecifier, path: &Path) -> Result<Box<dyn Repository>> {
        if !self.repository_exists(path) {
            return Err(RepoVaultError::InvalidMirror {
                path: path.to_path_buf(),
            });
        }
        Ok(Box::new(InMemoryRepository {
            path: path.to_path_buf(),
            name: Self::basename(specifier),
            specifier_canonical: specifier.canonical().to_string(),
            shared: Arc::clone(&self.shared),
            num_fetches: Arc::clone(&self.num_fetches),
        }))
    }

    fn create_working_copy(
        &self,
        specifier: &RepositorySpecifier,
        source: &Path,
        destination: &Path,
        editable: bool,
    ) -> Result<Box<dyn WorkingCheckout>> {
        let _ = specifier;
        if !self.repository_exists(source) {
            return Err(RepoVaultError::InvalidMirror {
                path: source.to_path_buf(),
            });
        }
        fs::create_dir_all(destination).map_err(|err| RepoVaultError::io(destination, err))?;
        fs::write(destination.join(CHECKOUT_MARKER), if editable { "editable" } else { "pristine" })
            .map_err(|err| RepoVaultError::io(destination, err))?;
        Ok(Box::new(InMemoryWorkingCheckout {
            path: destination.to_path_buf(),
            editable,
        }))
    }

    fn working_copy_exists(&self, path: &Path) -> bool {
        path.join(CHECKOUT_MARKER).is_file()
    }

    fn open_working_copy(&self, path: &Path) -> Result<Box<dyn WorkingCheckout>> {
        let marker = path.join(CHECKOUT_MARKER);
        let editable = fs::read_to_string(&marker)
            .map(|contents| contents.trim() == "editable")
            .map_err(|err| RepoVaultError::io(&marker, err))?;
        Ok(Box::new(InMemoryWorkingCheckout {
            path: path.to_path_buf(),
            editable,
        }))
    }

    fn is_valid_directory(&self, path: &Path) -> bool {
        if self.shared.lock().unwrap().corrupt_paths.contains(path) {
            return false;
        }
        path.join(MIRROR_MARKER).is_file()
    }

    fn is_valid_ref_format(&self, reference: &str) -> bool {
        !reference.is_empty() && !reference.contains(char::is_whitespace)
    }
}

#[derive(Debug)]
struct InMemoryRepository {
    path: PathBuf,
    name: String,
    specifier_canonical: String,
    shared: Arc<Mutex<Shared>>,
    num_fetches: Arc<AtomicU64>,
}

impl Repository for InMemoryRepository {
    fn path(&self) -> &Path {
        &self.path
    }

    fn tags(&self) -> Result<Vec<String>> {
        let contents = fs::read_to_string(self.path.join(MIRROR_MARKER))
            .map_err(|err| RepoVaultError::io(&self.path, err))?;
        Ok(contents.lines().filter(|line| !line.is_empty()).map(str::to_string).collect())
    }

    fn resolve_revision(&self, reference: &str) -> Result<Revision> {
        Ok(Revision(format!("{}@{reference}", self.name)))
    }

    fn fetch(&self) -> Result<()> {
        self.num_fetches.fetch_add(1, Ordering::SeqCst);
        let mut shared = self.shared.lock().unwrap();
        let Some(repo) = shared.repos.get(&self.name) else {
            return Ok(());
        };
        let fail = repo.fail || repo.fail_next_update;
        let corrupt = repo.corrupt_on_update_failure;
        if fail {
            if corrupt {
                shared.corrupt_paths.insert(self.path.clone());
            }
            return Err(RepoVaultError::UpdateFailed {
                specifier: self.specifier_canonical.clone(),
                reason: "simulated update failure".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryWorkingCheckout {
    path: PathBuf,
    editable: bool,
}

impl WorkingCheckout for InMemoryWorkingCheckout {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_editable(&self) -> bool {
        self.editable
    }

    fn current_revision(&self) -> Result<Revision> {
        Ok(Revision("HEAD".to_string()))
    }

    fn has_unpushed_changes(&self) -> Result<bool> {
        Ok(false)
    }
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let to = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}
