//! Transactional chunk store backed by redb.
//!
//! Provides keyed get/put/delete, deferred saves with a barrier, bounded
//! retry transactions scoped to one entity group, and key queries with an
//! explicit consistency guarantee:
//!
//! | query | consistency |
//! |---|---|
//! | [`Query::Ancestor`] | strong: drains deferred saves, reads one snapshot |
//! | [`Query::Kind`] | eventual: reads without draining, may miss queued saves |

use crate::deferred::{DeferredTicket, DeferredWriter};
use crate::error::{StoreError, StoreResult};
use crate::key::{RecordKey, RecordKind};
use crate::schema::registered_schema;
use kvdir_common::{RetryPolicy, StoreConfig};
use redb::{Database, ReadableTable, StorageBackend, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Consistency guarantee of a read path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Observes every save acknowledged before the read started
    Strong,
    /// May miss saves still sitting in the deferred queue
    Eventual,
}

/// A key query
#[derive(Clone, Copy, Debug)]
pub enum Query<'a> {
    /// Every `kind` record below `scope`
    Ancestor {
        scope: &'a RecordKey,
        kind: RecordKind,
    },
    /// Every `kind` record in the store
    Kind(RecordKind),
}

impl Query<'_> {
    /// Guarantee this query is served with
    #[must_use]
    pub const fn consistency(&self) -> Consistency {
        match self {
            Self::Ancestor { .. } => Consistency::Strong,
            Self::Kind(_) => Consistency::Eventual,
        }
    }
}

/// Transactional key-value record store
pub struct ChunkStore {
    db: Arc<Database>,
    deferred: DeferredWriter,
    max_record_size: usize,
}

impl ChunkStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let store = Self::with_database(db, config)?;
        info!("Opened chunk store at {:?}", path);
        Ok(store)
    }

    /// Create a store that lives only in memory.
    pub fn in_memory(config: &StoreConfig) -> StoreResult<Self> {
        Self::with_backend(redb::backends::InMemoryBackend::new(), config)
    }

    /// Create a store on a caller-supplied redb storage backend.
    pub fn with_backend(backend: impl StorageBackend, config: &StoreConfig) -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(backend)?;
        Self::with_database(db, config)
    }

    fn with_database(db: Database, config: &StoreConfig) -> StoreResult<Self> {
        let schema = registered_schema().ok_or(StoreError::SchemaNotRegistered)?;
        schema.create_tables(&db)?;

        let db = Arc::new(db);
        let deferred = DeferredWriter::spawn(Arc::clone(&db), config.deferred_queue_depth)?;
        Ok(Self {
            db,
            deferred,
            max_record_size: config.max_record_size,
        })
    }

    /// Per-record size ceiling
    #[must_use]
    pub const fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    // ---- Point reads (strong) ----

    /// Load the raw bytes of a record.
    pub fn get(&self, key: &RecordKey) -> StoreResult<Option<Vec<u8>>> {
        self.drain()?;
        self.get_committed(key)
    }

    /// Load and decode a record.
    pub fn get_record<T: DeserializeOwned>(&self, key: &RecordKey) -> StoreResult<Option<T>> {
        decode(self.get(key)?)
    }

    /// Load the raw bytes of a record without waiting on deferred saves.
    ///
    /// Sees every record committed through a transaction or a barrier.
    pub fn get_committed(&self, key: &RecordKey) -> StoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(key.kind().table())?;
        Ok(table.get(key.path())?.map(|v| v.value().to_vec()))
    }

    /// Load and decode a record without waiting on deferred saves.
    pub fn get_committed_record<T: DeserializeOwned>(
        &self,
        key: &RecordKey,
    ) -> StoreResult<Option<T>> {
        decode(self.get_committed(key)?)
    }

    // ---- Writes ----

    /// Save a record in its own transaction.
    pub fn put_record<T: Serialize>(&self, key: &RecordKey, value: &T) -> StoreResult<()> {
        let bytes = self.encode(key, value)?;
        write_batch(&self.db, &[(key.clone(), bytes)])
    }

    /// Delete records in one transaction. Returns how many existed.
    pub fn delete(&self, keys: &[RecordKey]) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let mut removed = 0;
        for key in keys {
            let mut table = write_txn.open_table(key.kind().table())?;
            if table.remove(key.path())?.is_some() {
                removed += 1;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// Queue a save on the deferred writer. Visible once its ticket
    /// resolves, or after [`Self::barrier`].
    pub fn put_deferred<T: Serialize>(
        &self,
        key: &RecordKey,
        value: &T,
    ) -> StoreResult<DeferredTicket> {
        let bytes = self.encode(key, value)?;
        self.deferred.submit(key.clone(), bytes)
    }

    /// Block until every deferred save issued so far is applied.
    ///
    /// Reports the first deferred save failure since the previous barrier.
    /// Submitters learn about their own failures through their tickets
    /// whether or not a barrier reported them.
    pub fn barrier(&self) -> StoreResult<()> {
        self.deferred.barrier()
    }

    /// Block until every deferred save issued so far is applied, leaving
    /// any failure to its submitter.
    pub fn drain(&self) -> StoreResult<()> {
        self.deferred.drain()
    }

    /// Deferred saves not yet applied
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.deferred.pending()
    }

    fn encode<T: Serialize>(&self, key: &RecordKey, value: &T) -> StoreResult<Vec<u8>> {
        encode_record(key, value, self.max_record_size)
    }

    // ---- Transactions ----

    /// Run `f` in a write transaction scoped to the entity group of `scope`.
    ///
    /// Retryable failures (contention, transient I/O) re-run `f` after the
    /// policy's backoff until its budget is spent; then the failure surfaces
    /// as [`StoreError::RetriesExhausted`]. Any other error aborts at once.
    /// A closure that calls [`Txn::rollback`] returns its value without
    /// committing.
    pub fn run_transaction<T, F>(
        &self,
        scope: &RecordKey,
        policy: &RetryPolicy,
        mut f: F,
    ) -> StoreResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> StoreResult<T>,
    {
        self.drain()?;

        let attempts = policy.attempts();
        let mut attempt = 0;
        loop {
            match self.attempt_transaction(scope, &mut f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= attempts {
                        warn!(
                            "Transaction on {} failed after {} attempts: {}",
                            scope, attempt, e
                        );
                        return Err(StoreError::RetriesExhausted {
                            scope: scope.to_string(),
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let backoff = policy.backoff(attempt - 1);
                    debug!(
                        "Retrying transaction on {} in {:?} (attempt {}/{}): {}",
                        scope,
                        backoff,
                        attempt + 1,
                        attempts,
                        e
                    );
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt_transaction<T, F>(&self, scope: &RecordKey, f: &mut F) -> StoreResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> StoreResult<T>,
    {
        let mut txn = Txn {
            inner: self.db.begin_write()?,
            scope,
            max_record_size: self.max_record_size,
            rollback: false,
        };
        match f(&mut txn) {
            Ok(value) => {
                let Txn {
                    inner, rollback, ..
                } = txn;
                if rollback {
                    inner.abort()?;
                } else {
                    inner.commit()?;
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.inner.abort() {
                    warn!("Abort of transaction on {} failed: {}", scope, abort_err);
                }
                Err(e)
            }
        }
    }

    // ---- Queries ----

    /// Keys matching `query`, served with [`Query::consistency`].
    pub fn keys(&self, query: Query<'_>) -> StoreResult<Vec<RecordKey>> {
        if query.consistency() == Consistency::Strong {
            self.drain()?;
        }
        let read_txn = self.db.begin_read()?;
        match query {
            Query::Ancestor { scope, kind } => {
                let table = read_txn.open_table(kind.table())?;
                scan_descendants(&table, kind, scope)
            }
            Query::Kind(kind) => {
                let table = read_txn.open_table(kind.table())?;
                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let entry = entry?;
                    keys.push(RecordKey::from_raw(kind, entry.0.value().to_string()));
                }
                Ok(keys)
            }
        }
    }

    /// Strongly consistent: every `kind` record below `scope`.
    pub fn ancestor_keys(&self, scope: &RecordKey, kind: RecordKind) -> StoreResult<Vec<RecordKey>> {
        self.keys(Query::Ancestor { scope, kind })
    }

    /// Eventually consistent: every `kind` record in the store.
    pub fn kind_keys(&self, kind: RecordKind) -> StoreResult<Vec<RecordKey>> {
        self.keys(Query::Kind(kind))
    }

    /// Eventually consistent existence check. Advisory only.
    pub fn exists_eventual(&self, key: &RecordKey) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(key.kind().table())?;
        Ok(table.get(key.path())?.is_some())
    }
}

/// A write transaction scoped to one entity group
pub struct Txn<'a> {
    inner: WriteTransaction,
    scope: &'a RecordKey,
    max_record_size: usize,
    rollback: bool,
}

impl Txn<'_> {
    /// Key this transaction is scoped to
    #[must_use]
    pub fn scope(&self) -> &RecordKey {
        self.scope
    }

    /// Abort instead of committing once the closure returns.
    pub fn rollback(&mut self) {
        self.rollback = true;
    }

    fn check_scope(&self, key: &RecordKey) -> StoreResult<()> {
        if key.group() == self.scope.group() {
            Ok(())
        } else {
            Err(StoreError::CrossGroup {
                key: key.to_string(),
                scope: self.scope.to_string(),
            })
        }
    }

    /// Load the raw bytes of a record.
    pub fn get(&self, key: &RecordKey) -> StoreResult<Option<Vec<u8>>> {
        self.check_scope(key)?;
        let table = self.inner.open_table(key.kind().table())?;
        Ok(table.get(key.path())?.map(|v| v.value().to_vec()))
    }

    /// Load and decode a record.
    pub fn get_record<T: DeserializeOwned>(&self, key: &RecordKey) -> StoreResult<Option<T>> {
        decode(self.get(key)?)
    }

    /// Whether a record exists.
    pub fn exists(&self, key: &RecordKey) -> StoreResult<bool> {
        self.check_scope(key)?;
        let table = self.inner.open_table(key.kind().table())?;
        Ok(table.get(key.path())?.is_some())
    }

    /// Save a record.
    pub fn put_record<T: Serialize>(&mut self, key: &RecordKey, value: &T) -> StoreResult<()> {
        self.check_scope(key)?;
        let bytes = encode_record(key, value, self.max_record_size)?;
        let mut table = self.inner.open_table(key.kind().table())?;
        table.insert(key.path(), bytes.as_slice())?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&mut self, key: &RecordKey) -> StoreResult<bool> {
        self.check_scope(key)?;
        let mut table = self.inner.open_table(key.kind().table())?;
        let existed = table.remove(key.path())?.is_some();
        Ok(existed)
    }

    /// Every `kind` record below `ancestor`, read inside this transaction.
    pub fn ancestor_keys(
        &self,
        ancestor: &RecordKey,
        kind: RecordKind,
    ) -> StoreResult<Vec<RecordKey>> {
        self.check_scope(ancestor)?;
        let table = self.inner.open_table(kind.table())?;
        scan_descendants(&table, kind, ancestor)
    }
}

fn scan_descendants<T>(table: &T, kind: RecordKind, scope: &RecordKey) -> StoreResult<Vec<RecordKey>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let (lower, upper) = scope.descendant_range();
    let mut keys = Vec::new();
    for entry in table.range(lower.as_str()..upper.as_str())? {
        let entry = entry?;
        keys.push(RecordKey::from_raw(kind, entry.0.value().to_string()));
    }
    Ok(keys)
}

fn decode<T: DeserializeOwned>(bytes: Option<Vec<u8>>) -> StoreResult<Option<T>> {
    match bytes {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn encode_record<T: Serialize>(
    key: &RecordKey,
    value: &T,
    max_record_size: usize,
) -> StoreResult<Vec<u8>> {
    let bytes = bincode::serialize(value)?;
    if bytes.len() > max_record_size {
        return Err(StoreError::RecordTooLarge {
            key: key.to_string(),
            size: bytes.len(),
            limit: max_record_size,
        });
    }
    Ok(bytes)
}

/// Write a batch of encoded records in one transaction.
pub(crate) fn write_batch(db: &Database, batch: &[(RecordKey, Vec<u8>)]) -> StoreResult<()> {
    let write_txn = db.begin_write()?;
    for (key, bytes) in batch {
        let mut table = write_txn.open_table(key.kind().table())?;
        table.insert(key.path(), bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}
