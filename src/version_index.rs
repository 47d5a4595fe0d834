use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;
use dashmap::DashMap;

use crate::outcome::TxOutcome;
use crate::transaction::TransactionId;

/// Position of a version inside its chain. Ordered by owning transaction,
/// then by log address, so the last write of a transaction sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionKey {
    pub tx_id: TransactionId,
    pub address: u64,
}

/// A committed-or-committing write linked into a version chain.
pub struct OperationReference {
    pub address: u64,
    pub tx_id: TransactionId,
    pub key_hash: u64,
    pub outcome: Arc<TxOutcome>,
}

impl OperationReference {
    pub fn version_key(&self) -> VersionKey {
        VersionKey {
            tx_id: self.tx_id,
            address: self.address,
        }
    }
}

/// Per key-hash metadata: the highest snapshot id that touched the bucket
/// and every version ever linked for it.
///
/// `max_transaction_id >= tx_id` holds for every linked version because
/// writers bump the watermark before linking.
#[derive(Default)]
pub struct MvccRecord {
    max_transaction_id: AtomicU64,
    versions: SkipMap<VersionKey, Arc<OperationReference>>,
}

impl MvccRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_transaction_id(&self) -> TransactionId {
        self.max_transaction_id.load(Ordering::SeqCst)
    }

    /// Raise the watermark to at least `candidate`; returns the watermark
    /// after the bump.
    pub fn bump_max(&self, candidate: TransactionId) -> TransactionId {
        let previous = self.max_transaction_id.fetch_max(candidate, Ordering::SeqCst);
        previous.max(candidate)
    }

    pub fn link(&self, version: Arc<OperationReference>) {
        self.versions.insert(version.version_key(), version);
    }

    pub fn contains(&self, key: &VersionKey) -> bool {
        self.versions.contains_key(key)
    }

    /// Versions with `tx_id <= bound`, newest first.
    pub fn versions_up_to(
        &self,
        bound: TransactionId,
    ) -> impl Iterator<Item = Entry<'_, VersionKey, Arc<OperationReference>>> + '_ {
        let upper = VersionKey {
            tx_id: bound,
            address: u64::MAX,
        };
        self.versions.range(..=upper).rev()
    }

    /// All versions, newest first.
    pub fn versions_newest_first(
        &self,
    ) -> impl Iterator<Item = Entry<'_, VersionKey, Arc<OperationReference>>> + '_ {
        self.versions.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Concurrent map from key hash to [`MvccRecord`].
///
/// Records are never removed: dropping one would also drop its watermark,
/// and a thread may still hold the `Arc` it got from `get_or_create`.
#[derive(Default)]
pub struct VersionIndex {
    records: DashMap<u64, Arc<MvccRecord>>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the record for `key_hash`, creating an empty one if needed. The
    /// returned `Arc` is detached from the map's shard lock.
    pub fn get_or_create(&self, key_hash: u64) -> Arc<MvccRecord> {
        if let Some(record) = self.records.get(&key_hash) {
            return Arc::clone(record.value());
        }
        Arc::clone(self.records.entry(key_hash).or_default().value())
    }

    pub fn get(&self, key_hash: u64) -> Option<Arc<MvccRecord>> {
        self.records
            .get(&key_hash)
            .map(|record| Arc::clone(record.value()))
    }

    pub fn bump_max(&self, key_hash: u64, candidate: TransactionId) -> TransactionId {
        self.get_or_create(key_hash).bump_max(candidate)
    }

    /// Point-in-time list of every record, for the collector.
    pub fn records(&self) -> Vec<Arc<MvccRecord>> {
        self.records
            .iter()
            .map(|record| Arc::clone(record.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total linked versions across all records.
    pub fn version_count(&self) -> usize {
        self.records.iter().map(|record| record.value().len()).sum()
    }
}
