//! Shared fixtures for the scenario/property tests in this directory.

use repovault::{FetchDetails, RepoVaultError, RepositoryManagerDelegate, RepositorySpecifier};
use std::sync::{Arc, Mutex};

/// One observed delegate callback, in the order it was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    WillFetch,
    DidFetch(bool),
    WillUpdate,
    DidUpdate(bool),
}

/// A delegate that records every callback it receives, for asserting the
/// exact sequences the spec's scenarios name (e.g. `[will_fetch, did_fetch(ok)]`).
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<Event>>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }
}

impl RepositoryManagerDelegate for RecordingDelegate {
    fn will_fetch(&self, _specifier: &RepositorySpecifier, _details: FetchDetails) {
        self.events.lock().unwrap().push(Event::WillFetch);
    }

    fn did_fetch(
        &self,
        _specifier: &RepositorySpecifier,
        _details: FetchDetails,
        result: &Result<(), Arc<RepoVaultError>>,
    ) {
        self.events.lock().unwrap().push(Event::DidFetch(result.is_ok()));
    }

    fn will_update(&self, _specifier: &RepositorySpecifier) {
        self.events.lock().unwrap().push(Event::WillUpdate);
    }

    fn did_update(
        &self,
        _specifier: &RepositorySpecifier,
        result: &Result<(), Arc<RepoVaultError>>,
    ) {
        self.events.lock().unwrap().push(Event::DidUpdate(result.is_ok()));
    }
}

/// Let delegate callbacks (dispatched via `tokio::spawn`) land before we
/// assert on the recording delegate's event log.
pub async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}
