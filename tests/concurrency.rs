//! Scenario E — concurrency fan-out (§8). The spec's literal scenario
//! launches 10,000 concurrent lookups; this test scales down to a count
//! that still reliably exercises genuine concurrent contention without
//! making the suite slow, while keeping the same invariant: exactly one
//! `will_fetch`/`did_fetch` pair regardless of how many callers raced to
//! miss the cache at once, and every handle names the same storage path.

mod common;

use common::{settle, Event, RecordingDelegate};
use repovault::testing::InMemoryProvider;
use repovault::{RepositoryManager, RepositoryManagerConfig, RepositorySpecifier};
use std::sync::Arc;
use tempfile::tempdir;

const FAN_OUT: usize = 500;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn scenario_e_concurrency_fan_out() {
    let root = tempdir().unwrap();
    let provider = Arc::new(InMemoryProvider::new().with_repo("dummy", vec!["1.0.0".to_string()]));
    let delegate = RecordingDelegate::new();
    let manager = Arc::new(
        RepositoryManager::open(
            RepositoryManagerConfig::new(root.path(), provider as _)
                .with_delegate(Arc::clone(&delegate) as _),
        )
        .unwrap(),
    );
    let specifier = Arc::new(RepositorySpecifier::from_url("file:///dummy").unwrap());

    let mut tasks = Vec::with_capacity(FAN_OUT);
    for _ in 0..FAN_OUT {
        let manager = Arc::clone(&manager);
        let specifier = Arc::clone(&specifier);
        tasks.push(tokio::spawn(async move { manager.lookup(&specifier, false).await }));
    }

    let mut paths = std::collections::HashSet::new();
    for task in tasks {
        let handle = task.await.unwrap().unwrap();
        paths.insert(handle.path().to_path_buf());
    }

    // Every concurrent caller must observe the same on-disk mirror.
    assert_eq!(paths.len(), 1);

    settle().await;
    let will_fetch = delegate.count(|e| matches!(e, Event::WillFetch));
    let did_fetch = delegate.count(|e| matches!(e, Event::DidFetch(true)));
    assert_eq!(will_fetch, 1, "exactly one fetch should win the race");
    assert_eq!(did_fetch, 1);

    // Late arrivals that missed the in-flight window are served as updates;
    // the spec tolerates either this or zero updates, as long as the count
    // is deterministic for a given implementation (this one always updates
    // every late arrival, per DESIGN.md's Open Question decision).
    let will_update = delegate.count(|e| matches!(e, Event::WillUpdate));
    let did_update = delegate.count(|e| matches!(e, Event::DidUpdate(true)));
    assert_eq!(will_update, did_update);
    assert!(will_update <= FAN_OUT - 1);

    assert_eq!(manager.stats().inflight, 0);
}
