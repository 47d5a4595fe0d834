use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

use crate::backing::{BackingStore, EmptyStore};
use crate::config::{EngineConfig, ReadBound};
use crate::error::{Error, Result};
use crate::gc::{GcRegistry, GcStats};
use crate::op_log::{LogRecord, OpType, OperationLog};
use crate::outcome::{TxOutcome, TxState};
use crate::transaction::{PendingOp, Transaction, TransactionId, TransactionKind};
use crate::version_index::{MvccRecord, OperationReference, VersionIndex};

/// Maps a key to the 64-bit hash of its version chain. Collisions are
/// allowed; reads disambiguate against the logged key.
pub type KeyHasher = fn(&[u8]) -> u64;

fn default_hasher(key: &[u8]) -> u64 {
    xxh3_64(key)
}

/// Point-in-time counters, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub global_snapshot: TransactionId,
    pub write_snapshot: TransactionId,
    pub records: usize,
    pub versions: usize,
    pub log_records: usize,
    pub gc_entries: usize,
    pub gc_passes: u64,
}

enum Resolution {
    Found(Option<Vec<u8>>),
    Miss,
    /// A chosen version was unlinked by a concurrent GC pass.
    Retry,
}

/// The MVCC coordinator.
///
/// Thread-safe without a global lock: snapshot ids come from two atomic
/// counters, versions live in concurrent maps, and the only blocking point
/// is a reader waiting for an in-flight writer to finalize. Construct one
/// engine per storage instance and share it behind an `Arc`.
pub struct MvccEngine {
    config: EngineConfig,
    hasher: KeyHasher,
    global_snapshot: AtomicU64,
    write_snapshot: AtomicU64,
    index: VersionIndex,
    log: OperationLog,
    gc: GcRegistry,
    backing: Arc<dyn BackingStore>,
}

impl Default for MvccEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Arc::new(EmptyStore))
    }
}

impl MvccEngine {
    pub fn new(config: EngineConfig, backing: Arc<dyn BackingStore>) -> Self {
        Self::with_hasher(config, backing, default_hasher)
    }

    pub fn with_hasher(
        config: EngineConfig,
        backing: Arc<dyn BackingStore>,
        hasher: KeyHasher,
    ) -> Self {
        Self {
            config,
            hasher,
            global_snapshot: AtomicU64::new(0),
            write_snapshot: AtomicU64::new(0),
            index: VersionIndex::new(),
            log: OperationLog::new(),
            gc: GcRegistry::new(),
            backing,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    // -----------------------------------------------------------------------
    // Transaction lifecycle
    // -----------------------------------------------------------------------

    pub fn start_read_transaction(&self) -> Transaction {
        self.start_transaction(TransactionKind::Read)
    }

    pub fn start_write_transaction(&self) -> Transaction {
        self.start_transaction(TransactionKind::Write)
    }

    /// Readers take the current global snapshot; writers take a fresh id
    /// from the write counter.
    pub fn start_transaction(&self, kind: TransactionKind) -> Transaction {
        let _start = self.gc.begin_start();
        let snapshot_id = match kind {
            TransactionKind::Read => self.global_snapshot.load(Ordering::SeqCst),
            TransactionKind::Write => self.write_snapshot.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let outcome = Arc::new(TxOutcome::new());
        self.gc.register(snapshot_id, Arc::clone(&outcome));
        tracing::trace!(snapshot_id, ?kind, "transaction started");
        Transaction::new(snapshot_id, kind, outcome)
    }

    /// Buffer a put. Nothing becomes visible to other transactions until
    /// commit.
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        self.buffer(txn, key, value.to_vec(), OpType::Put)
    }

    /// Buffer a tombstone for `key`.
    pub fn remove(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        self.buffer(txn, key, Vec::new(), OpType::Remove)
    }

    fn buffer(&self, txn: &mut Transaction, key: &[u8], value: Vec<u8>, op: OpType) -> Result<()> {
        if txn.is_read_only() {
            return Err(Error::ReadOnlyTransaction(txn.snapshot_id()));
        }
        let address = self.log.append(LogRecord::Write {
            tx_id: txn.snapshot_id(),
            key: key.to_vec(),
            value,
            op,
        });
        txn.push(PendingOp {
            address,
            key_hash: (self.hasher)(key),
        });
        Ok(())
    }

    /// Link the transaction's writes into the version index.
    ///
    /// Keys are checked and linked one at a time in buffer order. On a
    /// write-write conflict the transaction is reverted and
    /// [`Error::WriteConflict`] is returned; writes linked before the
    /// conflicting key stay in their chains, marked reverted, until GC.
    pub fn commit(&self, txn: Transaction) -> Result<()> {
        if txn.is_read_only() || txn.operations().is_empty() {
            txn.outcome().finish(TxState::Committed);
            return Ok(());
        }

        let snapshot_id = txn.snapshot_id();
        let outcome = txn.outcome();
        outcome.select_wait_mode(txn.operations().len() > self.config.latch_threshold);

        for op in txn.operations() {
            let record = self.index.get_or_create(op.key_hash);
            let watermark = record.bump_max(snapshot_id);
            if snapshot_id < watermark {
                tracing::debug!(
                    snapshot_id,
                    key_hash = op.key_hash,
                    watermark,
                    "write-write conflict, reverting transaction"
                );
                self.finalize(&txn, TxState::Reverted);
                return Err(Error::WriteConflict {
                    snapshot_id,
                    key_hash: op.key_hash,
                    watermark,
                });
            }
            record.link(Arc::new(OperationReference {
                address: op.address,
                tx_id: snapshot_id,
                key_hash: op.key_hash,
                outcome: Arc::clone(outcome),
            }));
            self.global_snapshot.fetch_max(snapshot_id, Ordering::SeqCst);
        }

        self.finalize(&txn, TxState::Committed);
        self.maybe_collect();
        Ok(())
    }

    /// Discard a transaction. Buffered writes never become visible.
    pub fn rollback(&self, txn: Transaction) {
        if txn.is_read_only() || txn.operations().is_empty() {
            txn.outcome().finish(TxState::Reverted);
            return;
        }
        tracing::debug!(snapshot_id = txn.snapshot_id(), "transaction rolled back");
        self.finalize(&txn, TxState::Reverted);
    }

    fn finalize(&self, txn: &Transaction, state: TxState) {
        if txn.outcome().finish(state) {
            self.log.append(LogRecord::Completion {
                tx_id: txn.snapshot_id(),
                reverted: state == TxState::Reverted,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Resolve the value of `key` visible to `txn`.
    ///
    /// Every read first raises the key's watermark to the reader's snapshot,
    /// so older writers of the key can no longer commit. A transaction then
    /// sees its own buffered writes. Otherwise the newest non-reverted
    /// version within the read bound wins, waiting for in-flight writers as
    /// needed; a tombstone yields `None`. With no candidate version the
    /// backing store answers.
    pub fn read(&self, txn: &Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_hash = (self.hasher)(key);
        let record = self.index.get_or_create(key_hash);
        let watermark = record.bump_max(txn.snapshot_id());

        if let Some(own) = self.read_own_write(txn, key_hash, key)? {
            return Ok(own);
        }
        let bound = match self.config.read_bound {
            ReadBound::Watermark => watermark,
            ReadBound::Snapshot => txn.snapshot_id(),
        };

        loop {
            match self.resolve(&record, bound, key)? {
                Resolution::Found(value) => return Ok(value),
                Resolution::Miss => return self.backing.search(key),
                Resolution::Retry => continue,
            }
        }
    }

    fn read_own_write(
        &self,
        txn: &Transaction,
        key_hash: u64,
        key: &[u8],
    ) -> Result<Option<Option<Vec<u8>>>> {
        for op in txn.operations().iter().rev() {
            if op.key_hash != key_hash {
                continue;
            }
            let record = self.log.get(op.address).ok_or_else(|| {
                tracing::error!(address = op.address, "buffered write missing from log");
                Error::MissingLogRecord(op.address)
            })?;
            match record.as_ref() {
                LogRecord::Write {
                    key: logged,
                    value,
                    op: kind,
                    ..
                } if logged.as_slice() == key => {
                    return Ok(Some(match kind {
                        OpType::Put => Some(value.clone()),
                        OpType::Remove => None,
                    }));
                }
                LogRecord::Write { .. } => {}
                LogRecord::Completion { .. } => return Err(Error::CorruptLogRecord(op.address)),
            }
        }
        Ok(None)
    }

    fn resolve(&self, record: &MvccRecord, bound: TransactionId, key: &[u8]) -> Result<Resolution> {
        for entry in record.versions_up_to(bound) {
            let version = entry.value();
            if version.outcome.wait() == TxState::Reverted {
                continue;
            }
            let Some(logged) = self.log.get(version.address) else {
                if record.contains(entry.key()) {
                    tracing::error!(address = version.address, "linked version missing from log");
                    return Err(Error::MissingLogRecord(version.address));
                }
                return Ok(Resolution::Retry);
            };
            match logged.as_ref() {
                LogRecord::Write {
                    key: logged_key,
                    value,
                    op,
                    ..
                } => {
                    // Hash collision with a different key: keep looking.
                    if logged_key.as_slice() != key {
                        continue;
                    }
                    return Ok(Resolution::Found(match op {
                        OpType::Put => Some(value.clone()),
                        OpType::Remove => None,
                    }));
                }
                LogRecord::Completion { .. } => {
                    tracing::error!(address = version.address, "version points at a completion record");
                    return Err(Error::CorruptLogRecord(version.address));
                }
            }
        }
        Ok(Resolution::Miss)
    }

    // -----------------------------------------------------------------------
    // Garbage collection and introspection
    // -----------------------------------------------------------------------

    /// Run a collection pass now. Returns `None` if another pass is running
    /// or a transaction start is in flight.
    pub fn collect_garbage(&self) -> Option<GcStats> {
        self.gc.collect(&self.index, &self.log, &self.global_snapshot)
    }

    /// Auto pass after a commit. Skipped while a long-lived transaction
    /// pins the watermark where the last pass left it.
    fn maybe_collect(&self) {
        if self.config.auto_gc
            && self.gc.len() > self.config.gc_threshold
            && self.gc.watermark_moved(self.global_snapshot())
        {
            self.collect_garbage();
        }
    }

    pub fn global_snapshot(&self) -> TransactionId {
        self.global_snapshot.load(Ordering::SeqCst)
    }

    /// Number of versions linked for the bucket `key` hashes to, including
    /// reverted ones not yet collected.
    pub fn version_count(&self, key: &[u8]) -> usize {
        self.index
            .get((self.hasher)(key))
            .map_or(0, |record| record.len())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            global_snapshot: self.global_snapshot.load(Ordering::SeqCst),
            write_snapshot: self.write_snapshot.load(Ordering::SeqCst),
            records: self.index.len(),
            versions: self.index.version_count(),
            log_records: self.log.len(),
            gc_entries: self.gc.len(),
            gc_passes: self.gc.passes(),
        }
    }
}
