//! The public façade: `lookup` / `remove` / `reset`, orchestrating cache
//! staging, the update-vs-fetch decision, and delegate callbacks on top of
//! the store and coordinator.

use crate::coordinator::FetchCoordinator;
use crate::delegate::{FetchDetails, NullDelegate, RepositoryManagerDelegate};
use crate::error::{RepoVaultError, Result};
use crate::handle::{HandleStatus, RepositoryHandle};
use crate::provider::RepositoryProvider;
use crate::specifier::RepositorySpecifier;
use crate::store::{clean_orphaned_temp, HandleStore, StoredRecord, WarningHandler};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// Default cap on concurrent network fetches a single manager will drive at
/// once. Updates and cache copies are not subject to this limit; only the
/// potentially-unbounded "many specifiers miss at once" fetch fan-out is.
const DEFAULT_MAX_PARALLEL_FETCHES: usize = 8;

/// Configuration for a [`RepositoryManager`].
///
/// Built with the teacher's config-struct-with-setters shape rather than a
/// derive-heavy builder crate, since every field here is required at
/// construction and there is no partial/default state worth modeling.
pub struct RepositoryManagerConfig {
    root: PathBuf,
    provider: Arc<dyn RepositoryProvider>,
    cache_path: Option<PathBuf>,
    cache_local_packages: bool,
    max_parallel_fetches: usize,
    warning_handler: WarningHandler,
    delegate: Arc<dyn RepositoryManagerDelegate>,
}

impl RepositoryManagerConfig {
    /// Start a config pointed at `root` with `provider` as the VCS backend.
    /// Defaults to no shared cache, a delegate that ignores every event, and
    /// a warning handler that logs via `tracing::warn!`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, provider: Arc<dyn RepositoryProvider>) -> Self {
        Self {
            root: root.into(),
            provider,
            cache_path: None,
            cache_local_packages: false,
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            warning_handler: Arc::new(|message: &str| warn!("{message}")),
            delegate: Arc::new(NullDelegate),
        }
    }

    /// Stage fetches through a shared cache directory.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Whether locally-sourced (non-URL) specifiers are also eligible for
    /// cache staging. Defaults to `false`.
    #[must_use]
    pub const fn with_cache_local_packages(mut self, enabled: bool) -> Self {
        self.cache_local_packages = enabled;
        self
    }

    /// Cap on concurrent network fetches this manager will drive at once.
    /// Does not limit in-place updates or cache copies. Defaults to 8.
    ///
    /// # Panics
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn with_max_parallel_fetches(mut self, workers: usize) -> Self {
        assert!(workers > 0, "max_parallel_fetches must be at least 1");
        self.max_parallel_fetches = workers;
        self
    }

    /// Override the warning handler invoked on non-fatal store recovery.
    #[must_use]
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> Self {
        self.warning_handler = handler;
        self
    }

    /// Attach a delegate to observe fetch/update lifecycle events.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn RepositoryManagerDelegate>) -> Self {
        self.delegate = delegate;
        self
    }
}

/// Fetch/update counters, exposed for diagnostics and tests.
#[derive(Debug, Default)]
pub struct ManagerStats {
    pub fetches: u64,
    pub updates: u64,
    pub fetch_errors: u64,
    pub update_errors: u64,
    pub inflight: usize,
}

/// Shared-cache staging counters, exposed for diagnostics and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Disk-usage snapshot of the shared cache root, mirroring the teacher's
/// `VcsManager::cache_stats` report.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheRootStats {
    /// Number of top-level mirror directories staged in the cache root.
    pub mirrors: usize,
    /// Approximate total size in bytes of every file under the cache root.
    pub bytes: u64,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    updates: AtomicU64,
    fetch_errors: AtomicU64,
    update_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_writes: AtomicU64,
}

/// Concurrency-safe, persistent cache of source-control repository mirrors.
///
/// One `RepositoryManager` owns one `root` directory tree and its store
/// file exclusively; constructing a second manager over the same root from
/// within the same process races the first (the spec's concurrency model is
/// single-process; see [`crate`] docs).
pub struct RepositoryManager {
    root: PathBuf,
    provider: Arc<dyn RepositoryProvider>,
    cache_path: Option<PathBuf>,
    cache_local_packages: bool,
    store: HandleStore,
    coordinator: FetchCoordinator,
    delegate: Arc<dyn RepositoryManagerDelegate>,
    counters: Counters,
    fetch_permits: Arc<Semaphore>,
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("root", &self.root)
            .field("cache_path", &self.cache_path)
            .finish_non_exhaustive()
    }
}

impl RepositoryManager {
    /// Open (or create) a manager at `config.root`.
    ///
    /// Performs crash recovery: any `pending` record left over from a
    /// process that died mid-fetch is demoted to `error` and its directory
    /// removed, and any orphaned store temp file is cleaned up, before the
    /// manager accepts lookups.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be created.
    pub fn open(config: RepositoryManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root).map_err(|err| RepoVaultError::io(&config.root, err))?;
        clean_orphaned_temp(&config.root);

        let store = HandleStore::load(
            config.root.join(HandleStore::FILE_NAME),
            &config.warning_handler,
        );

        let manager = Self {
            root: config.root,
            provider: config.provider,
            cache_path: config.cache_path,
            cache_local_packages: config.cache_local_packages,
            store,
            coordinator: FetchCoordinator::new(),
            delegate: config.delegate,
            counters: Counters::default(),
            fetch_permits: Arc::new(Semaphore::new(config.max_parallel_fetches)),
        };

        manager.recover_pending_on_startup();
        manager.recover_orphaned_directories();
        Ok(manager)
    }

    fn recover_pending_on_startup(&self) {
        for (canonical, record) in self.store.all() {
            if record.status() != HandleStatus::Pending {
                continue;
            }
            warn!(specifier = %canonical, "demoting pending record left over from a prior crash");
            let path = self.root.join(&record.subpath);
            if path.exists() {
                if let Err(err) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), %err, "failed to remove stale pending directory");
                }
            }
            let mut demoted = record;
            demoted.status = HandleStatus::Error.as_store_str().to_string();
            if let Err(err) = self.store.put(&canonical, demoted) {
                warn!(specifier = %canonical, %err, "failed to persist demoted record");
            }
        }
    }

    /// Remove any directory directly under `root` that has no matching
    /// store record. These are left behind when a process crashes after
    /// `fetch`/`copy` populated a destination but before the store write
    /// that would have named it — the crash-recovery sweep above only
    /// catches the inverse case (a record with no valid directory).
    fn recover_orphaned_directories(&self) {
        let known: HashSet<String> = self
            .store
            .all()
            .into_iter()
            .map(|(_, record)| record.subpath)
            .collect();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.root.display(), %err, "failed to scan repositories root for orphans");
                return;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if known.contains(name) {
                continue;
            }
            let path = entry.path();
            warn!(path = %path.display(), "removing orphaned repository directory with no store record");
            if let Err(err) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), %err, "failed to remove orphaned directory");
            }
        }
    }

    /// Resolve `specifier` to a handle, fetching or updating as needed.
    ///
    /// If `skip_update` is `true` and an `available` record already exists,
    /// it is returned without contacting the provider at all.
    ///
    /// # Errors
    /// Returns an error if the initial fetch fails, or if an update
    /// triggers corruption recovery and the resulting re-fetch also fails.
    #[instrument(skip(self), fields(specifier = %specifier))]
    pub async fn lookup(
        &self,
        specifier: &RepositorySpecifier,
        skip_update: bool,
    ) -> Result<RepositoryHandle> {
        let canonical = specifier.canonical();
        let destination = self.root.join(specifier.storage_path());

        if let Some(record) = self.store.get(canonical) {
            if record.status() == HandleStatus::Available
                && self.provider.is_valid_directory(&destination)
            {
                if skip_update {
                    return Ok(self.handle_for(specifier, &destination, HandleStatus::Available));
                }
                return self.update_existing(specifier, &destination).await;
            }
        }

        self.fetch_new(specifier, &destination).await
    }

    async fn update_existing(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
    ) -> Result<RepositoryHandle> {
        self.dispatch(specifier.clone(), |delegate, specifier| {
            delegate.will_update(specifier);
        });

        let provider = Arc::clone(&self.provider);
        let specifier_owned = specifier.clone();
        let destination_owned = destination.to_path_buf();
        let update_result: Result<()> = tokio::task::spawn_blocking(move || {
            provider
                .open(&specifier_owned, &destination_owned)?
                .fetch()
        })
        .await
        .map_err(|err| RepoVaultError::UpdateFailed {
            specifier: specifier.canonical().to_string(),
            reason: format!("update task panicked: {err}"),
        })?;

        let reportable = update_result.clone().map_err(Arc::new);
        self.dispatch(specifier.clone(), move |delegate, specifier| {
            delegate.did_update(specifier, &reportable);
        });

        match update_result {
            Ok(()) => {
                self.counters.updates.fetch_add(1, Ordering::Relaxed);
                Ok(self.handle_for(specifier, destination, HandleStatus::Available))
            }
            Err(err) => {
                self.counters.update_errors.fetch_add(1, Ordering::Relaxed);
                if self.provider.is_valid_directory(destination) {
                    // Ordinary failure: the spec's literal phrasing is that
                    // the handle is returned unchanged on a non-corrupting
                    // update failure, with the error reaching the caller
                    // only through `did_update`.
                    warn!(specifier = %specifier, %err, "incremental update failed; keeping existing mirror");
                    Ok(self.handle_for(specifier, destination, HandleStatus::Available))
                } else {
                    warn!(specifier = %specifier, %err, "update left mirror in a corrupt state; purging and re-fetching");
                    if let Err(remove_err) = std::fs::remove_dir_all(destination) {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            return Err(RepoVaultError::io(destination, remove_err));
                        }
                    }
                    self.store.remove(specifier.canonical())?;
                    self.fetch_new(specifier, destination).await
                }
            }
        }
    }

    async fn fetch_new(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
    ) -> Result<RepositoryHandle> {
        let canonical = specifier.canonical().to_string();
        let outcome = self
            .coordinator
            .run(&canonical, || self.run_fetch(specifier, destination))
            .await;

        match outcome {
            Ok(()) => Ok(self.handle_for(specifier, destination, HandleStatus::Available)),
            Err(err) => Err((*err).clone()),
        }
    }

    /// The body of a single-flight fetch: leader-only, never executed more
    /// than once concurrently per specifier.
    async fn run_fetch(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
    ) -> crate::coordinator::FetchOutcome {
        self.dispatch(specifier.clone(), |delegate, specifier| {
            delegate.will_fetch(specifier, FetchDetails::DIRECT);
        });

        if let Err(err) = self.store.put(
            specifier.canonical(),
            StoredRecord::new(
                specifier.storage_path().to_string(),
                HandleStatus::Pending,
            ),
        ) {
            return Err(Arc::new(err));
        }

        if destination.exists() {
            if let Err(err) = std::fs::remove_dir_all(destination) {
                return Err(Arc::new(RepoVaultError::io(destination, err)));
            }
        }

        let result = self.populate(specifier, destination).await;

        let final_record = match &result {
            Ok(details) => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                self.dispatch_fetch_done(specifier.clone(), *details, Ok(()));
                StoredRecord::new(specifier.storage_path().to_string(), HandleStatus::Available)
            }
            Err(err) => {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                if destination.exists() {
                    let _ = std::fs::remove_dir_all(destination);
                }
                self.dispatch_fetch_done(
                    specifier.clone(),
                    FetchDetails::DIRECT,
                    Err(Arc::clone(err)),
                );
                StoredRecord::new(specifier.storage_path().to_string(), HandleStatus::Error)
            }
        };

        if let Err(persist_err) = self.store.put(specifier.canonical(), final_record) {
            return Err(Arc::new(persist_err));
        }

        result.map(|_| ()).map_err(|err| err)
    }

    /// Populate `destination`, either from the shared cache or directly
    /// from the provider, reporting which strategy was used.
    async fn populate(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
    ) -> std::result::Result<FetchDetails, Arc<RepoVaultError>> {
        if let Some(cache_root) = self.cache_eligible_root(specifier) {
            let cache_dest = cache_root.join(specifier.storage_path());
            let provider = Arc::clone(&self.provider);
            let cache_dest_check = cache_dest.clone();
            let exists =
                tokio::task::spawn_blocking(move || provider.repository_exists(&cache_dest_check))
                    .await
                    .unwrap_or(false);

            if exists {
                match self.copy(&cache_dest, destination).await {
                    Ok(()) => {
                        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                        let refreshed = self.refresh_cache_mirror(specifier, &cache_dest).await;
                        return Ok(FetchDetails::from_cache(refreshed));
                    }
                    Err(err) => {
                        warn!(specifier = %specifier, %err, "cache copy failed, falling back to network fetch");
                        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
            } else {
                self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            }

            self.fetch_direct(specifier, destination).await?;
            let updated_cache = self.populate_cache(specifier, destination, &cache_dest).await;
            return Ok(FetchDetails {
                from_cache: false,
                updated_cache,
            });
        }

        self.fetch_direct(specifier, destination).await?;
        Ok(FetchDetails::DIRECT)
    }

    fn cache_eligible_root(&self, specifier: &RepositorySpecifier) -> Option<PathBuf> {
        let cache_root = self.cache_path.as_ref()?;
        let eligible = !specifier.is_local() || self.cache_local_packages;
        eligible.then(|| cache_root.clone())
    }

    async fn fetch_direct(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
    ) -> std::result::Result<(), Arc<RepoVaultError>> {
        // Bound how many network fetches run at once; acquiring before the
        // blocking task keeps a burst of cache misses from starting
        // `max_parallel_fetches + queue depth` OS threads simultaneously.
        let _permit = Arc::clone(&self.fetch_permits).acquire_owned().await.ok();

        let provider = Arc::clone(&self.provider);
        let specifier_owned = specifier.clone();
        let destination_owned = destination.to_path_buf();
        let delegate = Arc::clone(&self.delegate);
        let specifier_for_progress = specifier.clone();
        let handle = tokio::runtime::Handle::current();

        tokio::task::spawn_blocking(move || {
            let progress_delegate = Arc::clone(&delegate);
            let progress_specifier = specifier_for_progress.clone();
            let progress_handle = handle.clone();
            let progress: Box<dyn Fn(u64, Option<u64>) + Send + Sync> =
                Box::new(move |done, total| {
                    let delegate = Arc::clone(&progress_delegate);
                    let specifier = progress_specifier.clone();
                    progress_handle.spawn(async move {
                        delegate.fetching(&specifier, done, total);
                    });
                });
            provider.fetch(&specifier_owned, &destination_owned, Some(progress.as_ref()))
        })
        .await
        .map_err(|err| {
            Arc::new(RepoVaultError::FetchFailed {
                specifier: specifier.canonical().to_string(),
                reason: format!("fetch task panicked: {err}"),
            })
        })?
        .map_err(Arc::new)
    }

    async fn copy(
        &self,
        source: &Path,
        destination: &Path,
    ) -> std::result::Result<(), Arc<RepoVaultError>> {
        let provider = Arc::clone(&self.provider);
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || provider.copy(&source, &destination))
            .await
            .map_err(|err| {
                Arc::new(RepoVaultError::CacheStagingFailed {
                    specifier: destination.display().to_string(),
                    reason: format!("copy task panicked: {err}"),
                })
            })?
            .map_err(Arc::new)
    }

    /// Refresh the shared cache mirror in place so a cache hit does not
    /// keep serving indefinitely stale content. Failure here is
    /// informational: the caller already has a usable copy either way.
    async fn refresh_cache_mirror(&self, specifier: &RepositorySpecifier, cache_dest: &Path) -> bool {
        let provider = Arc::clone(&self.provider);
        let specifier_owned = specifier.clone();
        let cache_dest_owned = cache_dest.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            provider.open(&specifier_owned, &cache_dest_owned)?.fetch()
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.counters.cache_writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(err)) => {
                warn!(specifier = %specifier, %err, "failed to refresh shared cache mirror");
                false
            }
            Err(err) => {
                warn!(specifier = %specifier, %err, "cache refresh task panicked");
                false
            }
        }
    }

    /// Best-effort population of the shared cache from a freshly fetched
    /// destination. Failure is reported as [`RepoVaultError::CacheStagingFailed`]
    /// but never propagated: a cache-write failure must not fail the fetch
    /// the caller is actually waiting on.
    async fn populate_cache(
        &self,
        specifier: &RepositorySpecifier,
        destination: &Path,
        cache_dest: &Path,
    ) -> bool {
        if let Some(parent) = cache_dest.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(specifier = %specifier, %err, "failed to create shared cache directory");
                return false;
            }
        }
        match self.copy(destination, cache_dest).await {
            Ok(()) => {
                self.counters.cache_writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(specifier = %specifier, %err, "failed to populate shared cache");
                false
            }
        }
    }

    fn dispatch_fetch_done(
        &self,
        specifier: RepositorySpecifier,
        details: FetchDetails,
        result: std::result::Result<(), Arc<RepoVaultError>>,
    ) {
        let delegate = Arc::clone(&self.delegate);
        tokio::spawn(async move {
            delegate.did_fetch(&specifier, details, &result);
        });
    }

    fn dispatch(
        &self,
        specifier: RepositorySpecifier,
        f: impl FnOnce(&dyn RepositoryManagerDelegate, &RepositorySpecifier) + Send + 'static,
    ) {
        let delegate = Arc::clone(&self.delegate);
        tokio::spawn(async move {
            f(delegate.as_ref(), &specifier);
        });
    }

    fn handle_for(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
        status: HandleStatus,
    ) -> RepositoryHandle {
        RepositoryHandle::new(
            specifier.clone(),
            path.to_path_buf(),
            status,
            Arc::clone(&self.provider),
        )
    }

    /// Remove the on-disk clone (best effort; absence is not an error) and
    /// its store record.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub fn remove(&self, specifier: &RepositorySpecifier) -> Result<()> {
        let destination = self.root.join(specifier.storage_path());
        if let Err(err) = std::fs::remove_dir_all(&destination) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %destination.display(), %err, "failed to remove repository directory");
            }
        }
        self.store.remove(specifier.canonical())
    }

    /// Remove the entire repositories root and reset the store. Subsequent
    /// lookups re-fetch from scratch.
    ///
    /// # Errors
    /// Returns an error if the store write fails or the root cannot be
    /// recreated.
    pub fn reset(&self) -> Result<()> {
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(RepoVaultError::io(&self.root, err));
            }
        }
        std::fs::create_dir_all(&self.root).map_err(|err| RepoVaultError::io(&self.root, err))?;
        self.store.reset()
    }

    /// Root directory this manager owns.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot of fetch/update counters.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
            update_errors: self.counters.update_errors.load(Ordering::Relaxed),
            inflight: self.coordinator.inflight_count(),
        }
    }

    /// Snapshot of shared-cache staging counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.cache_hits.load(Ordering::Relaxed),
            misses: self.counters.cache_misses.load(Ordering::Relaxed),
            writes: self.counters.cache_writes.load(Ordering::Relaxed),
        }
    }

    /// Disk-usage snapshot of the shared cache root, or `None` if no cache
    /// path is configured. Walks the cache tree synchronously; callers on a
    /// hot path should offload this to a blocking task themselves.
    #[must_use]
    pub fn cache_root_stats(&self) -> Option<CacheRootStats> {
        let cache_root = self.cache_path.as_ref()?;
        let mirrors = std::fs::read_dir(cache_root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
                    .count()
            })
            .unwrap_or(0);

        let bytes = walkdir::WalkDir::new(cache_root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum();

        Some(CacheRootStats { mirrors, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryProvider;
    use tempfile::tempdir;

    fn provider() -> Arc<dyn RepositoryProvider> {
        Arc::new(InMemoryProvider::new().with_repo("dummy", vec!["1.0.0".to_string()]))
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let root = tempdir().unwrap();
        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        let specifier = RepositorySpecifier::from_url("file:///dummy").unwrap();
        manager.lookup(&specifier, false).await.unwrap();

        manager.remove(&specifier).unwrap();
        manager.remove(&specifier).unwrap();
        assert!(!root.path().join(specifier.storage_path()).exists());
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let root = tempdir().unwrap();
        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        let specifier = RepositorySpecifier::from_url("file:///dummy").unwrap();
        manager.lookup(&specifier, false).await.unwrap();

        manager.reset().unwrap();
        manager.reset().unwrap();
        assert_eq!(manager.stats().fetches, 1);
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn remove_of_never_fetched_specifier_is_not_an_error() {
        let root = tempdir().unwrap();
        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        let specifier = RepositorySpecifier::from_url("file:///never-fetched").unwrap();
        manager.remove(&specifier).unwrap();
    }

    #[tokio::test]
    async fn lookup_of_failing_specifier_leaves_error_record_and_no_directory() {
        let root = tempdir().unwrap();
        let provider: Arc<dyn RepositoryProvider> = Arc::new(InMemoryProvider::new().with_failing_repo("ghost"));
        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider)).unwrap();
        let specifier = RepositorySpecifier::from_url("file:///ghost").unwrap();

        assert!(manager.lookup(&specifier, false).await.is_err());
        assert!(!root.path().join(specifier.storage_path()).exists());
        assert_eq!(manager.stats().fetch_errors, 1);
    }

    #[tokio::test]
    async fn restart_demotes_pending_record_and_removes_its_directory() {
        let root = tempdir().unwrap();
        let specifier = RepositorySpecifier::from_url("file:///dummy").unwrap();
        let destination = root.path().join(specifier.storage_path());
        std::fs::create_dir_all(&destination).unwrap();

        {
            let warn_handler: WarningHandler = Arc::new(|_msg: &str| {});
            let store = HandleStore::load(root.path().join(HandleStore::FILE_NAME), &warn_handler);
            store
                .put(
                    specifier.canonical(),
                    StoredRecord::new(specifier.storage_path().to_string(), HandleStatus::Pending),
                )
                .unwrap();
        }

        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        assert!(!destination.exists());
        // A fresh lookup re-fetches rather than trusting the stale pending record.
        let handle = manager.lookup(&specifier, false).await.unwrap();
        assert_eq!(handle.status(), HandleStatus::Available);
    }

    #[tokio::test]
    async fn startup_sweeps_orphaned_directory_with_no_store_record() {
        let root = tempdir().unwrap();
        let orphan = root.path().join("some-orphan-dir");
        std::fs::create_dir_all(&orphan).unwrap();

        let _manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn cache_root_stats_is_none_without_a_configured_cache() {
        let root = tempdir().unwrap();
        let manager = RepositoryManager::open(RepositoryManagerConfig::new(root.path(), provider())).unwrap();
        assert!(manager.cache_root_stats().is_none());
    }

    #[tokio::test]
    async fn cache_root_stats_counts_staged_mirrors() {
        let root = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let manager = RepositoryManager::open(
            RepositoryManagerConfig::new(root.path(), provider()).with_cache_path(cache.path()),
        )
        .unwrap();
        let specifier = RepositorySpecifier::from_url("https://example.com/dummy.git").unwrap();
        manager.lookup(&specifier, true).await.unwrap();

        let stats = manager.cache_root_stats().unwrap();
        assert_eq!(stats.mirrors, 1);
        assert!(stats.bytes > 0);
    }

    #[tokio::test]
    #[should_panic(expected = "max_parallel_fetches must be at least 1")]
    async fn zero_max_parallel_fetches_panics() {
        let _ = RepositoryManagerConfig::new(tempdir().unwrap().path(), provider()).with_max_parallel_fetches(0);
    }

    #[tokio::test]
    async fn ordinary_update_failure_keeps_existing_handle_available() {
        let root = tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::new().with_repo("dummy", vec!["1.0.0".to_string()]));
        let manager =
            RepositoryManager::open(RepositoryManagerConfig::new(root.path(), Arc::clone(&provider) as _))
                .unwrap();
        let specifier = RepositorySpecifier::from_url("file:///dummy").unwrap();

        manager.lookup(&specifier, false).await.unwrap();
        provider.fail_next_update("dummy");

        let handle = manager.lookup(&specifier, false).await.unwrap();
        assert_eq!(handle.status(), HandleStatus::Available);
        assert_eq!(manager.stats().update_errors, 1);
        // The mirror was never touched by the failed update, so no re-fetch
        // happens — only the one initial clone.
        assert_eq!(provider.num_clones(), 1);
    }

    #[tokio::test]
    async fn corrupting_update_failure_triggers_one_transparent_refetch() {
        let root = tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::new().with_repo("dummy", vec!["1.0.0".to_string()]));
        let manager =
            RepositoryManager::open(RepositoryManagerConfig::new(root.path(), Arc::clone(&provider) as _))
                .unwrap();
        let specifier = RepositorySpecifier::from_url("file:///dummy").unwrap();

        manager.lookup(&specifier, false).await.unwrap();
        provider.corrupt_next_update("dummy");

        let handle = manager.lookup(&specifier, false).await.unwrap();
        assert_eq!(handle.status(), HandleStatus::Available);
        assert_eq!(manager.stats().update_errors, 1);
        assert_eq!(
            provider.num_clones(),
            2,
            "a corrupting update failure should purge the mirror and re-fetch exactly once"
        );
    }
}
