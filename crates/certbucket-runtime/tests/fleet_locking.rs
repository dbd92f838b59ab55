//! Integration test: locking across a fleet.
//!
//! Several independent `CertStorage` instances share one bucket, as separate
//! servers would. Each instance has its own lock table and renewal tasks;
//! the lock records in the bucket are the only coordination.

use std::sync::Arc;
use std::time::Duration;

use certbucket_core::config::{LockConfig, StorageConfig};
use certbucket_core::context::Context;
use certbucket_core::error::ErrorKind;
use certbucket_core::namespace::Namespace;
use certbucket_core::storage::ObjectBackend;
use certbucket_core::types::LogicalKey;
use certbucket_runtime::{CertStorage, LockState};
use certbucket_storage::{CloudBackend, LocalBackend};

fn fleet_config() -> StorageConfig {
    let mut config = StorageConfig::new("memory://");
    config.lock = LockConfig {
        lease_duration: Duration::from_millis(800),
        renew_interval: Duration::from_millis(150),
        poll_interval: Duration::from_millis(25),
        acquire_timeout: Duration::from_secs(5),
        max_renew_failures: 3,
    };
    config
}

/// Start `n` instances over one shared backend.
fn fleet(backend: Arc<dyn ObjectBackend>, n: usize) -> Vec<Arc<CertStorage>> {
    let config = fleet_config();
    (0..n)
        .map(|_| {
            Arc::new(CertStorage::with_backend(
                Arc::clone(&backend),
                Namespace::new("caddy"),
                &config,
            ))
        })
        .collect()
}

fn memory_fleet(n: usize) -> Vec<Arc<CertStorage>> {
    fleet(Arc::new(CloudBackend::in_memory("caddy")), n)
}

#[tokio::test]
async fn test_second_instance_waits_for_release() {
    let nodes = memory_fleet(2);
    let ctx = Context::background();
    let key = "issue_cert_example.com";

    nodes[0].lock(&ctx, key).await.unwrap();

    let short = Context::with_timeout(Duration::from_millis(200));
    let err = nodes[1].lock(&short, key).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let waiter = {
        let node = Arc::clone(&nodes[1]);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            node.lock(&Context::with_timeout(Duration::from_secs(3)), key)
                .await
                .map(|()| started.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    nodes[0].unlock(&ctx, key).await.unwrap();

    let waited = waiter.await.expect("waiter should not panic").unwrap();
    assert!(waited >= Duration::from_millis(250));
    nodes[1].unlock(&ctx, key).await.unwrap();
}

#[tokio::test]
async fn test_mutual_exclusion_of_critical_sections() {
    let nodes = memory_fleet(4);
    let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let overlaps = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let tasks: Vec<_> = nodes
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            tokio::spawn(async move {
                let ctx = Context::background();
                for _ in 0..3 {
                    node.lock(&ctx, "renew/example.org").await.unwrap();
                    if inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    node.unlock(&ctx, "renew/example.org").await.unwrap();
                }
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.expect("Task should not panic");
    }
    assert_eq!(overlaps.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_crashed_holder_is_reclaimed_after_lease() {
    let backend: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory("caddy"));
    let nodes = fleet(Arc::clone(&backend), 1);
    let ctx = Context::background();
    let key = LogicalKey::parse("issue_cert_crash.example").unwrap();

    {
        // A holder that dies without unlocking: its instance goes away with
        // the lock record still in the bucket.
        let doomed = fleet(Arc::clone(&backend), 1).remove(0);
        let handle = doomed.lock_manager().acquire(&ctx, &key).await.unwrap();
        drop(handle);
        drop(doomed);
    }

    let started = tokio::time::Instant::now();
    nodes[0]
        .lock(&Context::with_timeout(Duration::from_secs(3)), key.as_str())
        .await
        .unwrap();
    let waited = started.elapsed();
    assert!(waited < Duration::from_millis(800 + 400), "waited {waited:?}");

    let record = nodes[0]
        .lock_manager()
        .inspect(&ctx, &key)
        .await
        .unwrap()
        .expect("lock record should exist");
    assert!(!record.released);
    nodes[0].unlock(&ctx, key.as_str()).await.unwrap();
}

#[tokio::test]
async fn test_held_lock_survives_several_leases() {
    let nodes = memory_fleet(2);
    let ctx = Context::background();
    let key = "long_running_issuance";

    nodes[0].lock(&ctx, key).await.unwrap();
    let state = nodes[0].lock_state(key).await.unwrap();

    // Three lease lengths; renewal must keep the other node out throughout.
    let contender = Context::with_timeout(Duration::from_millis(2400));
    let err = nodes[1].lock(&contender, key).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(*state.borrow(), LockState::Held);

    nodes[0].unlock(&ctx, key).await.unwrap();
    nodes[1]
        .lock(&Context::with_timeout(Duration::from_secs(1)), key)
        .await
        .unwrap();
    nodes[1].unlock(&ctx, key).await.unwrap();
}

#[tokio::test]
async fn test_unlock_from_other_instance_is_noop() {
    let nodes = memory_fleet(2);
    let ctx = Context::background();
    let key = "acme/example.com";

    nodes[0].lock(&ctx, key).await.unwrap();
    nodes[1].unlock(&ctx, key).await.unwrap();

    // Still held by the first instance.
    let short = Context::with_timeout(Duration::from_millis(150));
    assert_eq!(
        nodes[1].lock(&short, key).await.unwrap_err().kind(),
        ErrorKind::Timeout
    );
    nodes[0].unlock(&ctx, key).await.unwrap();
}

#[tokio::test]
async fn test_locks_do_not_collide_with_data() {
    let nodes = memory_fleet(1);
    let ctx = Context::background();

    nodes[0].store(&ctx, "acme/example.com", "data").await.unwrap();
    nodes[0].lock(&ctx, "acme/example.com").await.unwrap();

    assert_eq!(
        nodes[0].load(&ctx, "acme/example.com").await.unwrap(),
        bytes::Bytes::from("data")
    );
    assert_eq!(
        nodes[0].list_all(&ctx, "", true).await.unwrap(),
        vec!["acme/example.com"]
    );
    nodes[0].unlock(&ctx, "acme/example.com").await.unwrap();
}

#[tokio::test]
async fn test_local_fleet_single_winner() {
    let tmp = tempfile::TempDir::new().unwrap();
    let backend: Arc<dyn ObjectBackend> = Arc::new(LocalBackend::new(tmp.path()).await.unwrap());
    let nodes = fleet(backend, 5);
    let key = LogicalKey::parse("issue_cert_local.example").unwrap();

    let attempts: Vec<_> = nodes
        .iter()
        .map(|node| {
            let node = Arc::clone(node);
            let key = key.clone();
            tokio::spawn(async move {
                let ctx = Context::with_timeout(Duration::from_millis(200));
                node.lock_manager().acquire(&ctx, &key).await
            })
        })
        .collect();

    let mut handles = Vec::new();
    for result in futures::future::join_all(attempts).await {
        match result.expect("Task should not panic") {
            Ok(handle) => handles.push(handle),
            Err(e) => assert_eq!(e.kind(), ErrorKind::Timeout),
        }
    }
    assert_eq!(handles.len(), 1, "Expected exactly 1 holder");

    let winner = handles.remove(0);
    assert!(winner.is_held());
    nodes[0]
        .lock_manager()
        .release(&Context::background(), winner)
        .await
        .unwrap();
}
