//! Lease-based distributed locks on top of the object store.
//!
//! A lock is a small JSON record at the key's lock object name. It is
//! created with the store's atomic create-if-absent and taken over only with
//! a conditional replace against the version that was read, so two
//! contenders can never both believe they hold it. Each record carries a
//! lease; a holder that crashes stops renewing and its record becomes
//! reclaimable once the lease has passed.
//!
//! While a lock is held, a background task pushes the lease forward every
//! `renew_interval`. If renewal is refused (another owner took over) or
//! keeps failing, the task publishes [`LockState::Lost`] on the handle's
//! watch channel and stops.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use certbucket_core::config::LockConfig;
use certbucket_core::context::{wait_for_cancel, Context};
use certbucket_core::error::CertStoreError;
use certbucket_core::namespace::Namespace;
use certbucket_core::storage::ObjectBackend;
use certbucket_core::types::{LockOwner, LogicalKey, ObjectVersion};
use certbucket_core::Result;

// ---------------------------------------------------------------------------
// Lock record
// ---------------------------------------------------------------------------

/// The persisted form of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub owner: LockOwner,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set by a clean release. Released records are reclaimable at once.
    #[serde(default)]
    pub released: bool,
}

impl LockRecord {
    fn new(key: &LogicalKey, owner: &LockOwner, lease: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            owner: owner.clone(),
            acquired_at: now,
            expires_at: now + lease_delta(lease),
            released: false,
        }
    }

    /// Whether a new owner may take this record over at `now`.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.released || self.expires_at <= now
    }

    fn renewed(&self, lease: Duration) -> Self {
        Self {
            expires_at: Utc::now() + lease_delta(lease),
            ..self.clone()
        }
    }

    fn tombstone(&self) -> Self {
        Self {
            expires_at: Utc::now(),
            released: true,
            ..self.clone()
        }
    }

    fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CertStoreError::Serialization(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CertStoreError::Serialization(format!("invalid lock record: {e}")))
    }
}

fn lease_delta(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

// ---------------------------------------------------------------------------
// Lock handle
// ---------------------------------------------------------------------------

/// Observable state of a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The lease is being renewed.
    Held,
    /// Renewal failed or another owner took over; exclusivity is gone.
    Lost,
    /// The holder released the lock.
    Released,
}

/// Proof of a held lock, returned by [`LockManager::acquire`].
///
/// Dropping the handle stops lease renewal without releasing the record;
/// the lock then becomes reclaimable when the lease runs out.
#[derive(Debug)]
pub struct LockHandle {
    key: LogicalKey,
    owner: LockOwner,
    state: Arc<watch::Sender<LockState>>,
    stop: watch::Sender<bool>,
    renewal: Option<JoinHandle<()>>,
}

impl LockHandle {
    /// The locked logical key.
    pub fn key(&self) -> &LogicalKey {
        &self.key
    }

    /// This holder's owner token.
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Current lease state.
    pub fn state(&self) -> LockState {
        *self.state.borrow()
    }

    /// Whether the lease is still believed to be held.
    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Fail with `LockLost` unless the lease is still held. Critical
    /// sections should call this before committing work.
    pub fn ensure_held(&self) -> Result<()> {
        if self.is_held() {
            Ok(())
        } else {
            Err(CertStoreError::LockLost {
                key: self.key.to_string(),
            })
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state.subscribe()
    }

    /// Resolve once the lock is no longer held, returning the new state.
    pub async fn lost(&self) -> LockState {
        let mut rx = self.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != LockState::Held {
                return state;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Stop the renewal task without waiting on an in-flight renewal.
    async fn stop_renewal(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.renewal.take() {
            task.abort();
            match task.await {
                Err(e) if e.is_panic() => {
                    warn!(key = %self.key, error = %e, "Lease renewal task panicked");
                }
                _ => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

enum Attempt {
    /// The instant is taken before the winning write was sent, so the
    /// local lease never outlives the stored one.
    Acquired(LockRecord, ObjectVersion, Instant),
    Held { owner: LockOwner },
    Vanished,
}

/// Acquires and releases leases on lock records in the object store.
pub struct LockManager {
    backend: Arc<dyn ObjectBackend>,
    namespace: Namespace,
    config: LockConfig,
}

impl LockManager {
    /// Create a lock manager over `backend`.
    ///
    /// Logs a warning when the backend cannot make conditional replace
    /// atomic across processes: expired-lease takeover is then only
    /// exclusive within this process.
    pub fn new(backend: Arc<dyn ObjectBackend>, namespace: Namespace, config: LockConfig) -> Self {
        let caps = backend.capabilities();
        if !caps.atomic_create || !caps.atomic_replace {
            warn!(
                atomic_create = caps.atomic_create,
                atomic_replace = caps.atomic_replace,
                "Backend lacks store-wide conditional writes; lock exclusivity is degraded"
            );
        }
        Self {
            backend,
            namespace,
            config,
        }
    }

    /// The lease configuration in use.
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire the lock for `key`, waiting while another owner holds a live
    /// lease.
    ///
    /// Bounded by the context deadline, or by `acquire_timeout` when the
    /// context has none; running out of time yields `Timeout`.
    pub async fn acquire(&self, ctx: &Context, key: &LogicalKey) -> Result<LockHandle> {
        let ctx = ctx.or_timeout(self.config.acquire_timeout);
        let lock_id = self.namespace.lock_object_id(key);
        let owner = LockOwner::generate();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let attempt = ctx
                .run("lock acquisition", self.try_acquire(&lock_id, key, &owner))
                .await
                .map_err(|e| timeout_context(e, key, attempts))?;

            match attempt {
                Attempt::Acquired(record, version, sent_at) => {
                    info!(key = %key, owner = %owner, attempts, "Lock acquired");
                    let handle = self.spawn_renewal(key.clone(), lock_id, record, version, sent_at);
                    return Ok(handle);
                }
                Attempt::Vanished => continue,
                Attempt::Held { owner: holder } => {
                    debug!(key = %key, holder = %holder, attempts, "Lock busy, waiting");
                    ctx.sleep("lock acquisition", self.poll_delay())
                        .await
                        .map_err(|e| timeout_context(e, key, attempts))?;
                }
            }
        }
    }

    /// Release a held lock. Stops renewal, then tombstones the record if it
    /// still belongs to this holder. Releasing a lock that has since been
    /// taken over is a no-op.
    pub async fn release(&self, ctx: &Context, mut handle: LockHandle) -> Result<()> {
        handle.stop_renewal().await;
        let result = self.release_by_owner(ctx, &handle.key, &handle.owner).await;
        handle.state.send_replace(LockState::Released);
        result
    }

    /// Release the lock on `key` if `owner` holds it; otherwise do nothing.
    pub async fn release_by_owner(
        &self,
        ctx: &Context,
        key: &LogicalKey,
        owner: &LockOwner,
    ) -> Result<()> {
        let lock_id = self.namespace.lock_object_id(key);
        ctx.run("lock release", async {
            let (data, meta) = match self.backend.get_versioned(&lock_id).await {
                Ok(found) => found,
                Err(e) if e.is_not_found() => {
                    debug!(key = %key, "Release: no lock record");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let existing = match LockRecord::decode(&data) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Release: unreadable lock record left in place");
                    return Ok(());
                }
            };
            if existing.owner != *owner || existing.released {
                debug!(key = %key, holder = %existing.owner, "Release: not the owner, nothing to do");
                return Ok(());
            }

            // The store has no conditional delete; deleting here could remove
            // a successor's record, so the lock is tombstoned instead.
            let tombstone = existing.tombstone().encode()?;
            match self
                .backend
                .put_if_matches(&lock_id, tombstone, &meta.version)
                .await?
            {
                Some(_) => info!(key = %key, owner = %owner, "Lock released"),
                None => debug!(key = %key, "Release: lock changed hands, nothing to do"),
            }
            Ok::<_, CertStoreError>(())
        })
        .await
    }

    /// Read the current lock record for `key`, if any.
    pub async fn inspect(&self, ctx: &Context, key: &LogicalKey) -> Result<Option<LockRecord>> {
        let lock_id = self.namespace.lock_object_id(key);
        ctx.run("lock inspection", async {
            match self.backend.get(&lock_id).await {
                Ok(data) => LockRecord::decode(&data).map(Some),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn try_acquire(
        &self,
        lock_id: &str,
        key: &LogicalKey,
        owner: &LockOwner,
    ) -> Result<Attempt> {
        let lease = self.config.lease_duration;
        let sent_at = Instant::now();
        let record = LockRecord::new(key, owner, lease);
        if let Some(version) = self
            .backend
            .put_if_not_exists(lock_id, record.encode()?)
            .await?
        {
            return Ok(Attempt::Acquired(record, version, sent_at));
        }

        let (data, meta) = match self.backend.get_versioned(lock_id).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Ok(Attempt::Vanished),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let (holder, reclaimable) = match LockRecord::decode(&data) {
            Ok(existing) => {
                let reclaimable = existing.is_reclaimable(now);
                (existing.owner, reclaimable)
            }
            Err(e) => {
                // A record nobody can read is judged by its age alone.
                warn!(key = %key, error = %e, "Unreadable lock record");
                (
                    LockOwner::new("unknown"),
                    meta.last_modified + lease_delta(lease) <= now,
                )
            }
        };
        if !reclaimable {
            return Ok(Attempt::Held { owner: holder });
        }

        let record = LockRecord::new(key, owner, lease);
        match self
            .backend
            .put_if_matches(lock_id, record.encode()?, &meta.version)
            .await?
        {
            Some(version) => {
                info!(key = %key, previous = %holder, "Reclaimed expired lock");
                Ok(Attempt::Acquired(record, version, sent_at))
            }
            None => {
                debug!(key = %key, "Lost reclaim race");
                Ok(Attempt::Held { owner: holder })
            }
        }
    }

    /// Poll interval with ±50% jitter so contenders spread out.
    fn poll_delay(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        self.config.poll_interval.mul_f64(factor)
    }

    fn spawn_renewal(
        &self,
        key: LogicalKey,
        lock_id: String,
        record: LockRecord,
        version: ObjectVersion,
        sent_at: Instant,
    ) -> LockHandle {
        let (state_tx, _) = watch::channel(LockState::Held);
        let state = Arc::new(state_tx);
        let (stop_tx, stop_rx) = watch::channel(false);
        let owner = record.owner.clone();

        let renewer = Renewer {
            backend: Arc::clone(&self.backend),
            lock_id,
            record,
            version,
            held_until: sent_at + self.config.lease_duration,
            config: self.config.clone(),
            state: Arc::clone(&state),
        };
        let renewal = tokio::spawn(renewer.run(stop_rx));

        LockHandle {
            key,
            owner,
            state,
            stop: stop_tx,
            renewal: Some(renewal),
        }
    }
}

fn timeout_context(e: CertStoreError, key: &LogicalKey, attempts: u32) -> CertStoreError {
    match e {
        CertStoreError::Timeout { .. } => CertStoreError::Timeout {
            message: format!("lock on {key} not acquired after {attempts} attempts"),
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Lease renewal
// ---------------------------------------------------------------------------

enum Renewal {
    Renewed(ObjectVersion),
    TakenOver(LockOwner),
    Failed(CertStoreError),
}

/// Background task state for one held lock.
struct Renewer {
    backend: Arc<dyn ObjectBackend>,
    lock_id: String,
    record: LockRecord,
    version: ObjectVersion,
    /// Local, monotonic end of the lease we last confirmed.
    held_until: Instant,
    config: LockConfig,
    state: Arc<watch::Sender<LockState>>,
}

impl Renewer {
    /// The point after which this holder stops claiming the lock. One
    /// renewal interval before the lease ends, so that a contender
    /// reclaiming the expired record never overlaps with us.
    fn give_up_at(&self) -> Instant {
        self.held_until
            .checked_sub(self.config.renew_interval)
            .unwrap_or(self.held_until)
    }

    fn lose(&self, reason: &str) {
        warn!(lock = %self.lock_id, reason, "Lease lost");
        self.state.send_replace(LockState::Lost);
    }

    async fn run(mut self, stop: watch::Receiver<bool>) {
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.renew_interval) => {}
                _ = tokio::time::sleep_until(self.give_up_at()) => {
                    self.lose("lease window elapsed without a successful renewal");
                    return;
                }
                _ = wait_for_cancel(&stop) => {
                    debug!(lock = %self.lock_id, "Lease renewal stopping");
                    return;
                }
            }

            let sent_at = Instant::now();
            let ctx = Context::background().deadline_at(self.give_up_at());
            let outcome = ctx
                .run("lease renewal", async { Ok(self.renew_once().await) })
                .await;

            match outcome {
                Ok(Renewal::Renewed(version)) => {
                    self.version = version;
                    self.held_until = sent_at + self.config.lease_duration;
                    failures = 0;
                    debug!(lock = %self.lock_id, "Lease renewed");
                }
                Ok(Renewal::TakenOver(holder)) => {
                    warn!(lock = %self.lock_id, holder = %holder, "Lease taken over by another owner");
                    self.state.send_replace(LockState::Lost);
                    return;
                }
                Ok(Renewal::Failed(e)) => {
                    failures += 1;
                    warn!(
                        lock = %self.lock_id,
                        error = %e,
                        failures,
                        max = self.config.max_renew_failures,
                        "Lease renewal failed"
                    );
                    if failures >= self.config.max_renew_failures {
                        self.lose("too many consecutive renewal failures");
                        return;
                    }
                }
                Err(e) => {
                    warn!(lock = %self.lock_id, error = %e, "Lease renewal did not finish in time");
                    self.lose("renewal outlived the lease window");
                    return;
                }
            }
        }
    }

    async fn renew_once(&mut self) -> Renewal {
        let renewed = self.record.renewed(self.config.lease_duration);
        let data = match renewed.encode() {
            Ok(data) => data,
            Err(e) => return Renewal::Failed(e),
        };
        match self
            .backend
            .put_if_matches(&self.lock_id, data.clone(), &self.version)
            .await
        {
            Ok(Some(version)) => return Renewal::Renewed(version),
            Ok(None) => {}
            Err(e) => return Renewal::Failed(e),
        }

        // The version moved. If the record is still ours, an earlier
        // renewal landed without its response reaching us; adopt it.
        let (current, meta) = match self.backend.get_versioned(&self.lock_id).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                return Renewal::TakenOver(LockOwner::new("none"));
            }
            Err(e) => return Renewal::Failed(e),
        };
        match LockRecord::decode(&current) {
            Ok(existing) if existing.owner == self.record.owner && !existing.released => {
                match self
                    .backend
                    .put_if_matches(&self.lock_id, data, &meta.version)
                    .await
                {
                    Ok(Some(version)) => Renewal::Renewed(version),
                    Ok(None) => Renewal::Failed(CertStoreError::storage_msg(format!(
                        "lock record {} changed during renewal",
                        self.lock_id
                    ))),
                    Err(e) => Renewal::Failed(e),
                }
            }
            Ok(existing) => Renewal::TakenOver(existing.owner),
            Err(e) => Renewal::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbucket_storage::CloudBackend;

    fn fast_config() -> LockConfig {
        LockConfig {
            lease_duration: Duration::from_millis(600),
            renew_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
            acquire_timeout: Duration::from_secs(5),
            max_renew_failures: 3,
        }
    }

    fn make_manager() -> (LockManager, Arc<dyn ObjectBackend>) {
        let backend: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
        let manager = LockManager::new(Arc::clone(&backend), Namespace::default(), fast_config());
        (manager, backend)
    }

    fn key(s: &str) -> LogicalKey {
        LogicalKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_writes_record() {
        let (manager, backend) = make_manager();
        let k = key("issue_cert_example.com");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();
        assert!(handle.is_held());

        let data = backend.get("_locks/issue_cert_example.com.lock").await.unwrap();
        let record = LockRecord::decode(&data).unwrap();
        assert_eq!(record.owner, *handle.owner());
        assert_eq!(record.key, "issue_cert_example.com");
        assert!(!record.released);
        assert!(record.expires_at > Utc::now());

        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let (manager, _backend) = make_manager();
        let k = key("busy");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(150));
        let err = manager.acquire(&ctx, &k).await.unwrap_err();
        assert!(matches!(err, CertStoreError::Timeout { .. }), "got {err:?}");

        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let (manager, _backend) = make_manager();
        let k = key("cycle");
        let first = manager.acquire(&Context::background(), &k).await.unwrap();
        let first_owner = first.owner().clone();
        manager.release(&Context::background(), first).await.unwrap();

        let record = manager
            .inspect(&Context::background(), &k)
            .await
            .unwrap()
            .unwrap();
        assert!(record.released);

        let ctx = Context::with_timeout(Duration::from_millis(200));
        let second = manager.acquire(&ctx, &k).await.unwrap();
        assert_ne!(second.owner(), &first_owner);
        manager.release(&Context::background(), second).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_record_is_reclaimed() {
        let (manager, backend) = make_manager();
        let k = key("crashed");
        let stale = LockRecord {
            key: "crashed".into(),
            owner: LockOwner::new("dead-process"),
            acquired_at: Utc::now() - chrono::Duration::seconds(120),
            expires_at: Utc::now() - chrono::Duration::seconds(60),
            released: false,
        };
        backend
            .put("_locks/crashed.lock", stale.encode().unwrap())
            .await
            .unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(200));
        let handle = manager.acquire(&ctx, &k).await.unwrap();
        let record = manager.inspect(&ctx, &k).await.unwrap().unwrap();
        assert_eq!(record.owner, *handle.owner());
        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_fresh_record_blocks() {
        let (manager, backend) = make_manager();
        backend
            .put("_locks/garbled.lock", Bytes::from("not json"))
            .await
            .unwrap();
        let ctx = Context::with_timeout(Duration::from_millis(100));
        let err = manager.acquire(&ctx, &key("garbled")).await.unwrap_err();
        assert!(matches!(err, CertStoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_dropped_holder_expires() {
        let (manager, _backend) = make_manager();
        let k = key("abandoned");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();
        // Simulate a crash: renewal stops, nothing is released.
        drop(handle);

        let started = tokio::time::Instant::now();
        let ctx = Context::with_timeout(Duration::from_secs(2));
        let handle = manager.acquire(&ctx, &k).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(600 + 300));
        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_renewal_keeps_lock_past_lease() {
        let (manager, _backend) = make_manager();
        let k = key("long-job");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(handle.is_held());

        let ctx = Context::with_timeout(Duration::from_millis(150));
        assert!(manager.acquire(&ctx, &k).await.is_err());
        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_takeover_is_reported_as_lost() {
        let (manager, backend) = make_manager();
        let k = key("stolen");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();

        let foreign = LockRecord::new(&k, &LockOwner::new("intruder"), Duration::from_secs(60));
        backend
            .put("_locks/stolen.lock", foreign.encode().unwrap())
            .await
            .unwrap();

        let state = tokio::time::timeout(Duration::from_secs(2), handle.lost())
            .await
            .expect("loss should be observed");
        assert_eq!(state, LockState::Lost);
        assert!(matches!(
            handle.ensure_held(),
            Err(CertStoreError::LockLost { .. })
        ));

        // Releasing a lost lock leaves the new owner's record alone.
        manager.release(&Context::background(), handle).await.unwrap();
        let record = manager
            .inspect(&Context::background(), &k)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.owner, LockOwner::new("intruder"));
        assert!(!record.released);
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_noop() {
        let (manager, _backend) = make_manager();
        let k = key("guarded");
        let handle = manager.acquire(&Context::background(), &k).await.unwrap();

        manager
            .release_by_owner(&Context::background(), &k, &LockOwner::new("someone-else"))
            .await
            .unwrap();
        let record = manager
            .inspect(&Context::background(), &k)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.owner, *handle.owner());
        assert!(!record.released);

        manager
            .release_by_owner(&Context::background(), &key("never-locked"), handle.owner())
            .await
            .unwrap();
        manager.release(&Context::background(), handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        use futures::future::join_all;

        let backend: Arc<dyn ObjectBackend> = Arc::new(CloudBackend::in_memory(""));
        let managers: Vec<_> = (0..5)
            .map(|_| {
                Arc::new(LockManager::new(
                    Arc::clone(&backend),
                    Namespace::default(),
                    fast_config(),
                ))
            })
            .collect();

        let tasks: Vec<_> = managers
            .iter()
            .map(|m| {
                let m = Arc::clone(m);
                tokio::spawn(async move {
                    let ctx = Context::with_timeout(Duration::from_millis(300));
                    m.acquire(&ctx, &LogicalKey::parse("contended").unwrap()).await
                })
            })
            .collect();

        let results = join_all(tasks).await;
        let winners: Vec<LockHandle> = results
            .into_iter()
            .map(|r| r.expect("task should not panic"))
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn test_record_reclaimable() {
        let now = Utc::now();
        let mut record = LockRecord::new(&key("k"), &LockOwner::generate(), Duration::from_secs(60));
        assert!(!record.is_reclaimable(now));
        assert!(record.is_reclaimable(now + chrono::Duration::seconds(61)));
        record.released = true;
        assert!(record.is_reclaimable(now));
    }
}
