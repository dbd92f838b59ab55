//! Integration test: lease renewal under backend faults.
//!
//! A holder whose renewals fail or hang must stop claiming the lock before
//! another process can reclaim it, and release must respect its deadline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use certbucket_core::config::LockConfig;
use certbucket_core::context::Context;
use certbucket_core::error::ErrorKind;
use certbucket_core::namespace::Namespace;
use certbucket_core::storage::ObjectBackend;
use certbucket_core::types::LogicalKey;
use certbucket_runtime::{LockManager, LockState};
use certbucket_storage::CloudBackend;

use common::{Fault, FaultyBackend};

const LEASE: Duration = Duration::from_millis(600);

fn config(max_renew_failures: u32) -> LockConfig {
    LockConfig {
        lease_duration: LEASE,
        renew_interval: Duration::from_millis(100),
        poll_interval: Duration::from_millis(20),
        acquire_timeout: Duration::from_secs(5),
        max_renew_failures,
    }
}

/// A manager over a faulty view of `shared`, plus a healthy manager.
fn managers(
    shared: &Arc<dyn ObjectBackend>,
    max_renew_failures: u32,
) -> (LockManager, Arc<FaultyBackend>, LockManager) {
    let faulty = Arc::new(FaultyBackend::new(Arc::clone(shared)));
    let flaky: Arc<dyn ObjectBackend> = faulty.clone();
    let a = LockManager::new(flaky, Namespace::default(), config(max_renew_failures));
    let b = LockManager::new(Arc::clone(shared), Namespace::default(), config(max_renew_failures));
    (a, faulty, b)
}

#[tokio::test]
async fn test_hanging_renewal_gives_up_before_lease_ends() {
    let shared: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
    let (a, faulty, b) = managers(&shared, 3);
    let key = LogicalKey::parse("issue_cert_hang.example").unwrap();

    let started = tokio::time::Instant::now();
    let held = a.acquire(&Context::background(), &key).await.unwrap();
    faulty.set_replace_fault(Fault::Hang);

    let state = tokio::time::timeout(LEASE, held.lost())
        .await
        .expect("holder should give up within one lease");
    assert_eq!(state, LockState::Lost);
    assert!(started.elapsed() < LEASE, "gave up after {:?}", started.elapsed());

    // Once the record expires another process takes over; the old holder
    // no longer claims the lock at that point.
    let other = b
        .acquire(&Context::with_timeout(Duration::from_secs(2)), &key)
        .await
        .unwrap();
    assert!(other.is_held());
    assert!(!held.is_held());

    // Release of the stuck holder is bounded by its context.
    let release_started = tokio::time::Instant::now();
    let result = a
        .release(&Context::with_timeout(Duration::from_millis(200)), held)
        .await;
    assert!(release_started.elapsed() < Duration::from_millis(500));
    if let Err(e) = result {
        assert_eq!(e.kind(), ErrorKind::Timeout);
    }

    let record = b.inspect(&Context::background(), &key).await.unwrap().unwrap();
    assert_eq!(record.owner, *other.owner());
    b.release(&Context::background(), other).await.unwrap();
}

#[tokio::test]
async fn test_release_does_not_wait_for_stuck_renewal() {
    let shared: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
    let (a, faulty, _b) = managers(&shared, 3);
    let key = LogicalKey::parse("stuck").unwrap();

    let held = a.acquire(&Context::background(), &key).await.unwrap();
    faulty.set_replace_fault(Fault::Hang);
    // Let the first renewal start and block.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = tokio::time::Instant::now();
    let result = a
        .release(&Context::with_timeout(Duration::from_millis(200)), held)
        .await;
    assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_consecutive_renewal_failures_lose_the_lease() {
    let shared: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
    let (a, faulty, _b) = managers(&shared, 2);
    let key = LogicalKey::parse("flaky").unwrap();

    let held = a.acquire(&Context::background(), &key).await.unwrap();
    faulty.set_replace_fault(Fault::Fail);
    let started = tokio::time::Instant::now();

    let state = tokio::time::timeout(Duration::from_secs(1), held.lost())
        .await
        .expect("loss should be observed");
    assert_eq!(state, LockState::Lost);
    // Two failures at the renewal interval, well before the lease window
    // would have run out on its own.
    assert!(started.elapsed() < Duration::from_millis(420), "took {:?}", started.elapsed());
    assert_eq!(held.ensure_held().unwrap_err().kind(), ErrorKind::Io);
}

#[tokio::test]
async fn test_isolated_failure_does_not_lose_the_lease() {
    let shared: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
    let (a, faulty, _b) = managers(&shared, 3);
    let key = LogicalKey::parse("blip").unwrap();

    let held = a.acquire(&Context::background(), &key).await.unwrap();
    faulty.set_replace_fault(Fault::Fail);
    tokio::time::sleep(Duration::from_millis(150)).await;
    faulty.set_replace_fault(Fault::None);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(held.is_held());
    a.release(&Context::background(), held).await.unwrap();
}
