use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::op_log::{LogRecord, OperationLog};
use crate::outcome::{TxOutcome, TxState};
use crate::transaction::TransactionId;
use crate::version_index::{MvccRecord, VersionIndex};

/// GC-entry key. Read transactions share snapshot ids with each other and
/// with writers, so a registration sequence number disambiguates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GcKey {
    pub snapshot_id: TransactionId,
    pub seq: u64,
}

/// Result of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub watermark: TransactionId,
    pub versions_removed: usize,
    pub log_records_removed: usize,
    pub gc_entries_removed: usize,
}

impl GcStats {
    pub fn reclaimed_anything(&self) -> bool {
        self.versions_removed + self.log_records_removed + self.gc_entries_removed > 0
    }
}

/// Marks a transaction as being between snapshot capture and GC
/// registration. A pass that observes one in flight is skipped.
pub struct StartGuard<'a> {
    pending: &'a AtomicU64,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

const NO_PASS: TransactionId = TransactionId::MAX;

/// Per-snapshot outcome bookkeeping and the version collector.
pub struct GcRegistry {
    entries: SkipMap<GcKey, Arc<TxOutcome>>,
    next_seq: AtomicU64,
    pending_starts: AtomicU64,
    /// Total starts ever begun. A pass compares it before and after taking
    /// its watermark to detect a start that came and went in between.
    starts_begun: AtomicU64,
    last_watermark: AtomicU64,
    passes: AtomicU64,
    pass_lock: Mutex<()>,
}

impl Default for GcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GcRegistry {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            next_seq: AtomicU64::new(0),
            pending_starts: AtomicU64::new(0),
            starts_begun: AtomicU64::new(0),
            last_watermark: AtomicU64::new(NO_PASS),
            passes: AtomicU64::new(0),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn begin_start(&self) -> StartGuard<'_> {
        self.pending_starts.fetch_add(1, Ordering::SeqCst);
        self.starts_begun.fetch_add(1, Ordering::SeqCst);
        StartGuard {
            pending: &self.pending_starts,
        }
    }

    pub fn register(&self, snapshot_id: TransactionId, outcome: Arc<TxOutcome>) {
        let key = GcKey {
            snapshot_id,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        self.entries.insert(key, outcome);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of passes that ran to completion.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Smallest snapshot id still in progress, capped at `global + 1` so that
    /// with no open transactions everything already committed lies below it.
    pub fn watermark(&self, global_snapshot: TransactionId) -> TransactionId {
        let ceiling = global_snapshot.saturating_add(1);
        self.entries
            .iter()
            .filter(|entry| entry.value().is_in_progress())
            .map(|entry| entry.key().snapshot_id)
            .next()
            .map_or(ceiling, |oldest| oldest.min(ceiling))
    }

    /// Whether the watermark differs from the one the last completed pass
    /// used. With an unchanged watermark a pass can only reclaim reverted
    /// versions.
    pub fn watermark_moved(&self, global_snapshot: TransactionId) -> bool {
        self.watermark(global_snapshot) != self.last_watermark.load(Ordering::SeqCst)
    }

    /// Run one collection pass. Returns `None` without doing anything when
    /// another pass holds the lock or a transaction start overlaps the
    /// watermark computation.
    ///
    /// Below the watermark every version is final and every possible reader
    /// resolves to the newest committed version of its key, so older
    /// committed versions are superseded. Reverted versions are dropped
    /// regardless of the watermark. Log records of unlinked versions, of
    /// writes that were never linked, and completion markers below the
    /// watermark are pruned afterwards.
    pub fn collect(
        &self,
        index: &VersionIndex,
        log: &OperationLog,
        global_snapshot: &AtomicU64,
    ) -> Option<GcStats> {
        self.collect_with(index, log, global_snapshot, || {})
    }

    /// `collect`, calling `after_watermark` once the watermark is fixed and
    /// before the pass checks for overlapping starts.
    fn collect_with(
        &self,
        index: &VersionIndex,
        log: &OperationLog,
        global_snapshot: &AtomicU64,
        after_watermark: impl FnOnce(),
    ) -> Option<GcStats> {
        let Some(_pass) = self.pass_lock.try_lock() else {
            tracing::debug!("gc pass already running, skipping");
            return None;
        };

        let begun = self.starts_begun.load(Ordering::SeqCst);
        if self.pending_starts.load(Ordering::SeqCst) > 0 {
            tracing::debug!("transaction start in flight, skipping gc pass");
            return None;
        }
        let watermark = self.watermark(global_snapshot.load(Ordering::SeqCst));
        after_watermark();
        if self.pending_starts.load(Ordering::SeqCst) > 0
            || self.starts_begun.load(Ordering::SeqCst) != begun
        {
            tracing::debug!("transaction start overlapped watermark, skipping gc pass");
            return None;
        }

        let mut stats = GcStats {
            watermark,
            ..GcStats::default()
        };
        let mut live = HashSet::new();
        for record in index.records() {
            stats.versions_removed += prune_record(&record, log, watermark, &mut live);
        }

        for entry in self.entries.range(
            ..GcKey {
                snapshot_id: watermark,
                seq: 0,
            },
        ) {
            if !entry.value().is_in_progress() && entry.remove() {
                stats.gc_entries_removed += 1;
            }
        }

        stats.log_records_removed = log.retain(|address, record| match record {
            LogRecord::Write { tx_id, .. } => *tx_id >= watermark || live.contains(&address),
            LogRecord::Completion { tx_id, .. } => *tx_id >= watermark,
        });

        self.last_watermark.store(watermark, Ordering::SeqCst);
        self.passes.fetch_add(1, Ordering::SeqCst);
        if stats.reclaimed_anything() {
            tracing::info!(
                watermark = stats.watermark,
                versions_removed = stats.versions_removed,
                log_records_removed = stats.log_records_removed,
                gc_entries_removed = stats.gc_entries_removed,
                "gc pass complete"
            );
        }
        Some(stats)
    }
}

/// Unlink reclaimable versions from one record. Addresses of surviving
/// versions below the watermark are added to `live`.
fn prune_record(
    record: &MvccRecord,
    log: &OperationLog,
    watermark: TransactionId,
    live: &mut HashSet<u64>,
) -> usize {
    let mut removed = 0;
    // One bucket can hold several distinct keys that share a hash.
    let mut newest_seen: HashSet<Vec<u8>> = HashSet::new();

    for entry in record.versions_newest_first() {
        let version = entry.value();
        match version.outcome.state() {
            TxState::Reverted => {
                if entry.remove() {
                    removed += 1;
                }
            }
            TxState::Committed if version.tx_id < watermark => {
                let Some(log_record) = log.get(version.address) else {
                    continue;
                };
                let LogRecord::Write { key, .. } = log_record.as_ref() else {
                    live.insert(version.address);
                    continue;
                };
                if newest_seen.contains(key) {
                    if entry.remove() {
                        removed += 1;
                    }
                } else {
                    newest_seen.insert(key.clone());
                    live.insert(version.address);
                }
            }
            _ => {}
        }
    }
    removed
}
