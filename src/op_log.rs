use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;

use crate::transaction::TransactionId;

/// Kind of key mutation carried by a write record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Put,
    Remove,
}

/// An immutable entry in the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Write {
        tx_id: TransactionId,
        key: Vec<u8>,
        value: Vec<u8>,
        op: OpType,
    },
    /// Appended once when a transaction with buffered writes finalizes.
    Completion { tx_id: TransactionId, reverted: bool },
}

impl LogRecord {
    pub fn tx_id(&self) -> TransactionId {
        match self {
            LogRecord::Write { tx_id, .. } => *tx_id,
            LogRecord::Completion { tx_id, .. } => *tx_id,
        }
    }
}

/// Append-only, address-ordered record store.
///
/// Addresses are handed out by an atomic counter and never reused, so the
/// log gives a total order over every write and completion ever appended.
/// Only the collector removes records.
pub struct OperationLog {
    records: SkipMap<u64, Arc<LogRecord>>,
    next_address: AtomicU64,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            records: SkipMap::new(),
            next_address: AtomicU64::new(0),
        }
    }

    /// Append a record and return its address.
    pub fn append(&self, record: LogRecord) -> u64 {
        let address = self.next_address.fetch_add(1, Ordering::SeqCst);
        self.records.insert(address, Arc::new(record));
        address
    }

    pub fn get(&self, address: u64) -> Option<Arc<LogRecord>> {
        self.records
            .get(&address)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Address the next append will receive.
    pub fn next_address(&self) -> u64 {
        self.next_address.load(Ordering::SeqCst)
    }

    /// Records at or after `address`, in address order. Used for audit and
    /// replay.
    pub fn records_from(
        &self,
        address: u64,
    ) -> impl DoubleEndedIterator<Item = Entry<'_, u64, Arc<LogRecord>>> + '_ {
        self.records.range(address..)
    }

    /// Drop every record for which `keep` returns false; returns how many
    /// were removed.
    pub fn retain(&self, mut keep: impl FnMut(u64, &LogRecord) -> bool) -> usize {
        let mut removed = 0;
        for entry in self.records.iter() {
            if !keep(*entry.key(), entry.value().as_ref()) && entry.remove() {
                removed += 1;
            }
        }
        removed
    }
}
