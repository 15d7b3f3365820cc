//! Existence-based locks.
//!
//! A lock is held while its record exists. Acquisition is a create-if-absent
//! transaction scoped to the namespace, so between any number of contenders
//! exactly one wins. Locks never expire: a holder that dies without
//! releasing leaves the record behind until [`LockFactory::clear_lock`].

use crate::records::LockRecord;
use kvdir_common::{Error, Result, RetryPolicy, now_millis, validate_name};
use kvdir_store::{ChunkStore, RecordKey, RecordKind, StoreError};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Creates and inspects locks of one namespace
#[derive(Clone)]
pub struct LockFactory {
    store: Arc<ChunkStore>,
    namespace: RecordKey,
    retry: RetryPolicy,
}

impl LockFactory {
    pub fn new(store: Arc<ChunkStore>, namespace: RecordKey, retry: RetryPolicy) -> Self {
        Self {
            store,
            namespace,
            retry,
        }
    }

    /// Acquire `name` or fail with `LockObtainFailed`.
    pub fn obtain(&self, name: &str) -> Result<Lock> {
        validate_name(name)?;
        let key = RecordKey::lock(&self.namespace, name);
        let record = LockRecord {
            created_at: now_millis(),
            holder: Uuid::new_v4().to_string(),
        };

        let created = self
            .store
            .run_transaction(&self.namespace, &self.retry, |txn| {
                if txn.exists(&key)? {
                    txn.rollback();
                    return Ok(false);
                }
                txn.put_record(&key, &record)?;
                Ok(true)
            })
            .map_err(|e| match e {
                StoreError::RetriesExhausted { .. } => Error::lock_obtain_failed(name, e.to_string()),
                other => Error::from(other),
            })?;

        if !created {
            debug!("Lock {} is already held", key);
            return Err(Error::lock_obtain_failed(name, "already held"));
        }
        debug!("Obtained lock {}", key);
        Ok(Lock {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            key,
            holder: record.holder,
            retry: self.retry.clone(),
            released: false,
        })
    }

    /// Poll [`Self::obtain`] until it succeeds or `policy` runs out.
    pub fn obtain_with_backoff(&self, name: &str, policy: &RetryPolicy) -> Result<Lock> {
        let attempts = policy.attempts();
        let mut attempt = 0;
        loop {
            match self.obtain(name) {
                Err(Error::LockObtainFailed { .. }) if attempt + 1 < attempts => {
                    let backoff = policy.backoff(attempt);
                    attempt += 1;
                    debug!(
                        "Lock {} busy, retrying in {:?} (attempt {}/{})",
                        name,
                        backoff,
                        attempt + 1,
                        attempts
                    );
                    thread::sleep(backoff);
                }
                result => return result,
            }
        }
    }

    /// Advisory check; may miss a lock obtained moments ago.
    pub fn is_locked(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self
            .store
            .exists_eventual(&RecordKey::lock(&self.namespace, name))?)
    }

    /// Delete `name` regardless of who holds it. Returns whether it existed.
    ///
    /// Meant for clearing a lock left behind by a crashed holder.
    pub fn clear_lock(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let key = RecordKey::lock(&self.namespace, name);
        let existed = self
            .store
            .run_transaction(&self.namespace, &self.retry, |txn| txn.delete(&key))?;
        if existed {
            info!("Cleared lock {}", key);
        }
        Ok(existed)
    }

    /// Release `name` on behalf of the holder that obtained it.
    ///
    /// Returns false if the lock is free or held under another token.
    pub fn release(&self, name: &str, holder: &str) -> Result<bool> {
        validate_name(name)?;
        let key = RecordKey::lock(&self.namespace, name);
        release_record(&self.store, &self.namespace, &key, holder, &self.retry)
    }

    /// Names of every outstanding lock
    pub fn locks(&self) -> Result<Vec<String>> {
        let keys = self.store.ancestor_keys(&self.namespace, RecordKind::Lock)?;
        Ok(keys.iter().map(|k| k.name().to_string()).collect())
    }
}

/// A held lock. Released on [`Lock::release`] or drop.
pub struct Lock {
    store: Arc<ChunkStore>,
    namespace: RecordKey,
    key: RecordKey,
    holder: String,
    retry: RetryPolicy,
    released: bool,
}

impl Lock {
    #[must_use]
    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Token stored in the lock record
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Whether the stored record still carries this handle's token.
    pub fn is_held(&self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        let record = self.store.get_record::<LockRecord>(&self.key)?;
        Ok(record.is_some_and(|r| r.holder == self.holder))
    }

    /// Release the lock. Releasing twice is a no-op.
    ///
    /// A record carrying another holder's token (the lock was cleared and
    /// re-obtained in between) is left in place.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        release_record(
            &self.store,
            &self.namespace,
            &self.key,
            &self.holder,
            &self.retry,
        )?;
        self.released = true;
        Ok(())
    }

    /// Keep the lock held after this handle is gone, returning its token.
    ///
    /// The lock can later be released with [`LockFactory::release`].
    #[must_use]
    pub fn detach(mut self) -> String {
        self.released = true;
        std::mem::take(&mut self.holder)
    }
}

/// Delete `key` if it still carries `holder`. Returns whether it did.
fn release_record(
    store: &ChunkStore,
    namespace: &RecordKey,
    key: &RecordKey,
    holder: &str,
    retry: &RetryPolicy,
) -> Result<bool> {
    let outcome = store.run_transaction(namespace, retry, |txn| {
        match txn.get_record::<LockRecord>(key)? {
            Some(record) if record.holder == holder => {
                txn.delete(key)?;
                Ok(Release::Deleted)
            }
            Some(record) => {
                txn.rollback();
                Ok(Release::HeldByOther(record.holder))
            }
            None => Ok(Release::Free),
        }
    })?;
    match outcome {
        Release::Deleted => {
            debug!("Released lock {}", key);
            Ok(true)
        }
        Release::Free => {
            debug!("Lock {} was already free at release", key);
            Ok(false)
        }
        Release::HeldByOther(other) => {
            warn!(
                "Lock {} is held by {}, not {}; leaving it in place",
                key, other, holder
            );
            Ok(false)
        }
    }
}

enum Release {
    Deleted,
    Free,
    HeldByOther(String),
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock {} on drop: {}", self.key, e);
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key.to_string())
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdir_common::StoreConfig;
    use kvdir_store::register_schema;
    use std::sync::Barrier;
    use std::time::Duration;

    fn factory() -> LockFactory {
        register_schema();
        let store = Arc::new(ChunkStore::in_memory(&StoreConfig::default()).unwrap());
        LockFactory::new(store, RecordKey::namespace("idx"), RetryPolicy::no_retry())
    }

    #[test]
    fn test_obtain_is_exclusive() {
        let locks = factory();
        let mut lock = locks.obtain("writer-lock").unwrap();
        assert!(lock.is_held().unwrap());

        let err = locks.obtain("writer-lock").unwrap_err();
        assert!(matches!(err, Error::LockObtainFailed { .. }));

        lock.release().unwrap();
        assert!(!lock.is_held().unwrap());
        assert!(locks.obtain("writer-lock").is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let locks = factory();
        let mut lock = locks.obtain("writer-lock").unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!locks.is_locked("writer-lock").unwrap());
    }

    #[test]
    fn test_drop_releases() {
        let locks = factory();
        {
            let _lock = locks.obtain("writer-lock").unwrap();
            assert!(locks.is_locked("writer-lock").unwrap());
        }
        assert!(!locks.is_locked("writer-lock").unwrap());
    }

    #[test]
    fn test_release_leaves_foreign_record() {
        let locks = factory();
        let mut stale = locks.obtain("writer-lock").unwrap();
        assert!(locks.clear_lock("writer-lock").unwrap());
        let fresh = locks.obtain("writer-lock").unwrap();

        assert!(!stale.is_held().unwrap());
        stale.release().unwrap();
        assert!(fresh.is_held().unwrap());
        assert!(locks.is_locked("writer-lock").unwrap());
    }

    #[test]
    fn test_detach_keeps_lock() {
        let locks = factory();
        let holder = locks.obtain("writer-lock").unwrap().detach();
        assert!(locks.is_locked("writer-lock").unwrap());

        assert!(!locks.release("writer-lock", "someone-else").unwrap());
        assert!(locks.is_locked("writer-lock").unwrap());
        assert!(locks.release("writer-lock", &holder).unwrap());
        assert!(!locks.is_locked("writer-lock").unwrap());
    }

    #[test]
    fn test_release_of_free_lock_is_noop() {
        let locks = factory();
        assert!(!locks.release("writer-lock", "token").unwrap());

        let mut lock = locks.obtain("writer-lock").unwrap();
        assert!(locks.clear_lock("writer-lock").unwrap());
        lock.release().unwrap();
        assert!(!lock.is_held().unwrap());
        assert!(locks.obtain("writer-lock").is_ok());
    }

    #[test]
    fn test_clear_missing_lock() {
        let locks = factory();
        assert!(!locks.clear_lock("writer-lock").unwrap());
    }

    #[test]
    fn test_locks_lists_outstanding() {
        let locks = factory();
        let _a = locks.obtain("a.lock").unwrap();
        let mut b = locks.obtain("b.lock").unwrap();
        b.release().unwrap();

        assert_eq!(locks.locks().unwrap(), vec!["a.lock".to_string()]);
    }

    #[test]
    fn test_invalid_name() {
        let locks = factory();
        assert!(matches!(
            locks.obtain(""),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn test_two_threads_contend() {
        let locks = factory();
        let start = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let locks = locks.clone();
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let result = locks.obtain("writer-lock");
                    // Hold the winner until both attempts are done
                    thread::sleep(Duration::from_millis(50));
                    result.map(|lock| lock.holder().to_string())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(Error::LockObtainFailed { .. })))
        );

        // The winner's handle was dropped with its thread
        assert!(locks.obtain("writer-lock").is_ok());
    }

    #[test]
    fn test_obtain_with_backoff_waits_for_release() {
        let locks = factory();
        let lock = locks.obtain("writer-lock").unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(lock);
        });

        let policy = RetryPolicy::with_retries(20, Duration::from_millis(5));
        let lock = locks.obtain_with_backoff("writer-lock", &policy).unwrap();
        assert!(lock.is_held().unwrap());
        releaser.join().unwrap();
    }

    #[test]
    fn test_obtain_with_backoff_gives_up() {
        let locks = factory();
        let _held = locks.obtain("writer-lock").unwrap();
        let policy = RetryPolicy::with_retries(2, Duration::from_millis(1));
        assert!(matches!(
            locks.obtain_with_backoff("writer-lock", &policy),
            Err(Error::LockObtainFailed { .. })
        ));
    }
}
