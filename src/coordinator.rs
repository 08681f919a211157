//! Single-flight coordination so concurrent `lookup` calls for the same
//! specifier share one in-flight fetch/update instead of racing each other.
//!
//! Uses a sharded map of waiter lists, not a per-specifier lock. Per-
//! specifier locks held across an async fetch are exactly what the
//! deadlock §5 warns about (a waiter blocked on a lock held by a task that
//! never wakes because the executor is pinned waiting on that same lock);
//! a map whose entries are only ever locked for the duration of a plain
//! insert/remove cannot deadlock that way.

use crate::error::RepoVaultError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outcome broadcast to every caller joined on the same in-flight operation.
/// `Arc` keeps fan-out to N waiters cheap regardless of how large the error
/// payload is.
pub type FetchOutcome = Result<(), Arc<RepoVaultError>>;

/// Tracks in-flight operations keyed by canonical specifier string.
#[derive(Debug, Default)]
pub struct FetchCoordinator {
    inflight: DashMap<String, Vec<oneshot::Sender<FetchOutcome>>>,
}

impl FetchCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `operation` for `key`, coalescing concurrent calls.
    ///
    /// The first caller to arrive for a given key actually runs `operation`
    /// and fans its result out to everyone who joined while it was running.
    /// Every other caller receives the same [`FetchOutcome`] without
    /// running `operation` at all.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = FetchOutcome>,
    {
        let (is_leader, rx) = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let (tx, rx) = oneshot::channel();
                entry.get_mut().push(tx);
                (false, Some(rx))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Vec::new());
                (true, None)
            }
        };

        if !is_leader {
            return match rx.unwrap().await {
                Ok(outcome) => outcome,
                // The leader task was dropped (e.g. panicked) before sending.
                Err(_) => Err(Arc::new(RepoVaultError::FetchFailed {
                    specifier: key.to_string(),
                    reason: "coordinating task terminated without a result".to_string(),
                })),
            };
        }

        let outcome = operation().await;

        let waiters = self.inflight.remove(key).map(|(_, v)| v).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    /// Number of keys with an operation currently in flight. Exposed for
    /// diagnostics (`ManagerStats`).
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}
