//! Directory facade over the chunk store.
//!
//! One [`ChunkedDirectory`] serves one namespace (index). The namespace
//! record is created on first open and fixes the hunk size for every file
//! written to the index afterwards.

use crate::api::Directory;
use crate::lock::{Lock, LockFactory};
use crate::reader::SegmentReader;
use crate::records::{NamespaceRecord, SegmentRecord};
use crate::segment::{Segment, SegmentInfo};
use crate::writer::SegmentWriter;
use kvdir_common::{
    DirectoryConfig, Error, Result, RetryPolicy, max_hunk_size, now_millis, validate_name,
};
use kvdir_store::{ChunkStore, RecordKey, RecordKind};
use std::sync::Arc;
use tracing::{debug, info};

/// A flat file directory stored as chunked records
pub struct ChunkedDirectory {
    store: Arc<ChunkStore>,
    namespace: RecordKey,
    hunk_size: usize,
    retry: RetryPolicy,
    delete_batch_size: usize,
    locks: LockFactory,
}

impl ChunkedDirectory {
    /// Open index `name`, creating it if it does not exist.
    pub fn open(
        store: Arc<ChunkStore>,
        name: &str,
        config: &DirectoryConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        validate_name(name)?;
        config.validate(store.max_record_size())?;

        let namespace = RecordKey::namespace(name);
        let fresh = NamespaceRecord {
            name: name.to_string(),
            hunk_size: config.hunk_size as u64,
            created_at: now_millis(),
        };
        let (record, created) = store.run_transaction(&namespace, &retry, |txn| {
            if let Some(existing) = txn.get_record::<NamespaceRecord>(&namespace)? {
                txn.rollback();
                return Ok((existing, false));
            }
            txn.put_record(&namespace, &fresh)?;
            Ok((fresh.clone(), true))
        })?;

        let hunk_size = usize::try_from(record.hunk_size).unwrap_or(usize::MAX);
        let limit = max_hunk_size(store.max_record_size());
        if hunk_size == 0 || hunk_size > limit {
            return Err(Error::configuration(format!(
                "index '{}' uses hunks of {} bytes; this store allows 1..={}",
                name, record.hunk_size, limit
            )));
        }
        if created {
            info!("Created index '{}' with {} byte hunks", name, hunk_size);
        } else {
            debug!("Opened index '{}' ({} byte hunks)", name, hunk_size);
        }

        let locks = LockFactory::new(Arc::clone(&store), namespace.clone(), retry.clone());
        Ok(Self {
            store,
            namespace,
            hunk_size,
            retry,
            delete_batch_size: config.delete_batch_size,
            locks,
        })
    }

    /// Open the configured default index.
    pub fn open_default(
        store: Arc<ChunkStore>,
        config: &DirectoryConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::open(store, &config.default_index, config, retry)
    }

    /// Every index in the store, sorted by name.
    ///
    /// Served by an eventually consistent scan, so an index created moments
    /// ago may be missing.
    pub fn list_namespaces(store: &ChunkStore) -> Result<Vec<NamespaceRecord>> {
        let mut namespaces = Vec::new();
        for key in store.kind_keys(RecordKind::Namespace)? {
            if let Some(record) = store.get_record::<NamespaceRecord>(&key)? {
                namespaces.push(record);
            }
        }
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    /// Index name
    #[must_use]
    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    /// Hunk size fixed for this index
    #[must_use]
    pub const fn hunk_size(&self) -> usize {
        self.hunk_size
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    #[must_use]
    pub const fn lock_factory(&self) -> &LockFactory {
        &self.locks
    }

    // ---- Files ----

    /// Names of every file, in no particular order
    pub fn list_all(&self) -> Result<Vec<String>> {
        let keys = self
            .store
            .ancestor_keys(&self.namespace, RecordKind::Segment)?;
        Ok(keys.iter().map(|k| k.name().to_string()).collect())
    }

    pub fn file_exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let key = RecordKey::segment(&self.namespace, name);
        Ok(self.store.get(&key)?.is_some())
    }

    /// Committed length of `name`
    pub fn file_length(&self, name: &str) -> Result<u64> {
        Ok(self.load(name)?.length())
    }

    /// Delete `name` and all of its hunks in one transaction.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let key = RecordKey::segment(&self.namespace, name);
        let hunks = self
            .store
            .run_transaction(&self.namespace, &self.retry, |txn| {
                let Some(record) = txn.get_record::<SegmentRecord>(&key)? else {
                    txn.rollback();
                    return Ok(None);
                };
                for id in 1..=record.hunk_count {
                    txn.delete(&RecordKey::hunk(&key, id))?;
                }
                txn.delete(&key)?;
                Ok(Some(record.hunk_count))
            })?;

        match hunks {
            Some(count) => {
                debug!("Deleted segment {} with {} hunks", key, count);
                Ok(())
            }
            None => Err(Error::file_not_found(name)),
        }
    }

    /// Open `name` for reading at its currently committed state.
    pub fn open_input(&self, name: &str) -> Result<SegmentReader> {
        self.store.drain()?;
        let segment = self.load(name)?;
        Ok(SegmentReader::new(Arc::clone(&self.store), segment))
    }

    /// Create `name` empty, replacing any existing file.
    pub fn create_output(&self, name: &str) -> Result<SegmentWriter> {
        validate_name(name)?;
        let segment = Segment::create(
            &self.store,
            &self.namespace,
            name,
            self.hunk_size,
            &self.retry,
        )?;
        Ok(SegmentWriter::create(
            Arc::clone(&self.store),
            segment,
            self.retry.clone(),
        ))
    }

    /// Continue writing after the last committed byte of `name`.
    pub fn append_output(&self, name: &str) -> Result<SegmentWriter> {
        let segment = self.load(name)?;
        SegmentWriter::append(Arc::clone(&self.store), segment, self.retry.clone())
    }

    /// Per-hunk layout of `name`
    pub fn describe(&self, name: &str) -> Result<SegmentInfo> {
        self.load(name)?.describe(&self.store)
    }

    /// Committed metadata of `name`, without touching its hunks
    pub fn segment(&self, name: &str) -> Result<Segment> {
        self.load(name)
    }

    fn load(&self, name: &str) -> Result<Segment> {
        validate_name(name)?;
        Segment::load(&self.store, &self.namespace, name, self.hunk_size)
    }

    /// Block until every pending hunk save is applied.
    ///
    /// Durability is store wide, so the names only serve the log.
    pub fn sync(&self, names: &[&str]) -> Result<()> {
        self.store.barrier()?;
        debug!("Synced {} files in index '{}'", names.len(), self.name());
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.store.barrier()?;
        debug!("Closed index '{}'", self.name());
        Ok(())
    }

    // ---- Locks ----

    pub fn obtain_lock(&self, name: &str) -> Result<Lock> {
        self.locks.obtain(name)
    }

    // ---- Index ----

    /// Delete the whole index: every file, every lock and the index record.
    ///
    /// Each file goes in its own transaction and locks go in batches, so a
    /// failure part way leaves a smaller but still consistent index.
    pub fn delete(self) -> Result<()> {
        let files = self.list_all()?;
        for name in &files {
            match self.delete_file(name) {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }

        let locks: Vec<RecordKey> = self
            .locks
            .locks()?
            .iter()
            .map(|name| RecordKey::lock(&self.namespace, name))
            .collect();
        self.delete_batches(&locks)?;

        // Hunks left behind by writers that never closed
        let orphans = self
            .store
            .ancestor_keys(&self.namespace, RecordKind::Hunk)?;
        self.delete_batches(&orphans)?;

        self.store
            .run_transaction(&self.namespace, &self.retry, |txn| {
                txn.delete(&self.namespace)
            })?;
        info!(
            "Deleted index '{}': {} files, {} locks, {} orphan hunks",
            self.name(),
            files.len(),
            locks.len(),
            orphans.len()
        );
        Ok(())
    }

    fn delete_batches(&self, keys: &[RecordKey]) -> Result<()> {
        for batch in keys.chunks(self.delete_batch_size) {
            self.store
                .run_transaction(&self.namespace, &self.retry, |txn| {
                    for key in batch {
                        txn.delete(key)?;
                    }
                    Ok(())
                })?;
        }
        Ok(())
    }
}

impl Directory for ChunkedDirectory {
    type Input = SegmentReader;
    type Output = SegmentWriter;
    type Lock = Lock;

    fn list_all(&self) -> Result<Vec<String>> {
        Self::list_all(self)
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        Self::file_exists(self, name)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        Self::file_length(self, name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        Self::delete_file(self, name)
    }

    fn open_input(&self, name: &str) -> Result<SegmentReader> {
        Self::open_input(self, name)
    }

    fn create_output(&self, name: &str) -> Result<SegmentWriter> {
        Self::create_output(self, name)
    }

    fn sync(&self, names: &[&str]) -> Result<()> {
        Self::sync(self, names)
    }

    fn obtain_lock(&self, name: &str) -> Result<Lock> {
        Self::obtain_lock(self, name)
    }

    fn close(&self) -> Result<()> {
        Self::close(self)
    }
}
