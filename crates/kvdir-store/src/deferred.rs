//! Deferred (asynchronous) saves.
//!
//! Saves submitted here are applied by a background thread in submission
//! order, coalescing whatever is queued into one write transaction. Each
//! save hands back a [`DeferredTicket`] that resolves to the outcome of the
//! transaction it landed in, so a failure always reaches its submitter.
//!
//! Markers are pushed through the same queue: once the thread reaches one,
//! everything submitted before it has been applied. A barrier marker also
//! reports the first failure since the previous barrier; a drain marker
//! only waits.

use crate::error::{StoreError, StoreResult};
use crate::key::RecordKey;
use crate::store::write_batch;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use redb::Database;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error};

/// Most puts coalesced into a single write transaction
const MAX_BATCH: usize = 64;

enum Command {
    Put {
        key: RecordKey,
        bytes: Vec<u8>,
        ack: Sender<StoreResult<()>>,
    },
    Barrier(Sender<StoreResult<()>>),
    Drain(Sender<()>),
    Shutdown,
}

/// Completion handle for one deferred save
#[derive(Debug)]
pub struct DeferredTicket {
    key: RecordKey,
    rx: Receiver<StoreResult<()>>,
}

impl DeferredTicket {
    /// Key the save was issued for
    #[must_use]
    pub const fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Block until the save is applied.
    pub fn wait(self) -> StoreResult<()> {
        self.rx.recv().map_err(|_| StoreError::WriterStopped)?
    }

    /// Outcome of the save if it has been applied, `None` while queued.
    #[must_use]
    pub fn try_result(&self) -> Option<StoreResult<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::WriterStopped)),
        }
    }
}

pub(crate) struct DeferredWriter {
    tx: Sender<Command>,
    pending: Arc<AtomicUsize>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DeferredWriter {
    pub(crate) fn spawn(db: Arc<Database>, queue_depth: usize) -> StoreResult<Self> {
        let (tx, rx) = bounded(queue_depth);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            db,
            rx,
            pending: Arc::clone(&pending),
            failure: None,
        };
        let handle = thread::Builder::new()
            .name("kvdir-deferred".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            pending,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a save. Blocks while the queue is full.
    pub(crate) fn submit(&self, key: RecordKey, bytes: Vec<u8>) -> StoreResult<DeferredTicket> {
        let (ack, rx) = bounded(1);
        let ticket = DeferredTicket {
            key: key.clone(),
            rx,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Command::Put { key, bytes, ack }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::WriterStopped);
        }
        Ok(ticket)
    }

    /// Saves submitted but not yet applied
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Block until every save submitted before this call is applied,
    /// reporting the first failure since the previous barrier.
    pub(crate) fn barrier(&self) -> StoreResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(Command::Barrier(ack_tx))
            .map_err(|_| StoreError::WriterStopped)?;
        ack_rx.recv().map_err(|_| StoreError::WriterStopped)?
    }

    /// Block until every save submitted before this call is applied.
    ///
    /// Failures stay with their tickets and the next barrier.
    pub(crate) fn drain(&self) -> StoreResult<()> {
        if self.pending() == 0 {
            return Ok(());
        }
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(Command::Drain(ack_tx))
            .map_err(|_| StoreError::WriterStopped)?;
        ack_rx.recv().map_err(|_| StoreError::WriterStopped)
    }
}

impl Drop for DeferredWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            error!("Deferred writer thread panicked");
        }
    }
}

type Ack = Sender<StoreResult<()>>;

struct Worker {
    db: Arc<Database>,
    rx: Receiver<Command>,
    pending: Arc<AtomicUsize>,
    /// First failure since the last barrier
    failure: Option<String>,
}

impl Worker {
    fn run(mut self) {
        let mut next = None;
        loop {
            let cmd = match next.take() {
                Some(cmd) => cmd,
                None => match self.rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };
            match cmd {
                Command::Put { key, bytes, ack } => {
                    let mut batch = vec![(key, bytes)];
                    let mut acks = vec![ack];
                    while batch.len() < MAX_BATCH {
                        match self.rx.try_recv() {
                            Ok(Command::Put { key, bytes, ack }) => {
                                batch.push((key, bytes));
                                acks.push(ack);
                            }
                            Ok(other) => {
                                next = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    self.apply(&batch, acks);
                }
                Command::Barrier(ack) => {
                    let result = match self.failure.take() {
                        Some(msg) => Err(StoreError::DeferredWrite(msg)),
                        None => Ok(()),
                    };
                    let _ = ack.send(result);
                }
                Command::Drain(ack) => {
                    let _ = ack.send(());
                }
                Command::Shutdown => break,
            }
        }
        debug!("Deferred writer stopped");
    }

    fn apply(&mut self, batch: &[(RecordKey, Vec<u8>)], acks: Vec<Ack>) {
        match write_batch(&self.db, batch) {
            Ok(()) => {
                debug!("Applied {} deferred records", batch.len());
                for ack in acks {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                let msg = e.to_string();
                error!("Deferred write of {} records failed: {}", batch.len(), msg);
                for ack in acks {
                    let _ = ack.send(Err(StoreError::DeferredWrite(msg.clone())));
                }
                self.failure.get_or_insert(msg);
            }
        }
        self.pending.fetch_sub(batch.len(), Ordering::SeqCst);
    }
}
