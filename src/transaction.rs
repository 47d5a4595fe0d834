use std::sync::Arc;

use crate::outcome::{TxOutcome, TxState};

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

/// A buffered write: where its record lives in the operation log and which
/// version chain it will join at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOp {
    pub address: u64,
    pub key_hash: u64,
}

/// A client-side transaction handle.
///
/// Owned by the thread that started it. Writes are buffered in `operations`
/// and stay invisible to every other transaction until
/// [`MvccEngine::commit`](crate::MvccEngine::commit) links them into the
/// version index. Dropping a handle that was never committed or rolled back
/// reverts it.
pub struct Transaction {
    snapshot_id: TransactionId,
    kind: TransactionKind,
    operations: Vec<PendingOp>,
    outcome: Arc<TxOutcome>,
}

impl Transaction {
    pub(crate) fn new(
        snapshot_id: TransactionId,
        kind: TransactionKind,
        outcome: Arc<TxOutcome>,
    ) -> Self {
        Self {
            snapshot_id,
            kind,
            operations: Vec::new(),
            outcome,
        }
    }

    pub fn snapshot_id(&self) -> TransactionId {
        self.snapshot_id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.kind == TransactionKind::Read
    }

    pub fn operations(&self) -> &[PendingOp] {
        &self.operations
    }

    pub fn state(&self) -> TxState {
        self.outcome.state()
    }

    pub(crate) fn push(&mut self, op: PendingOp) {
        self.operations.push(op);
    }

    pub(crate) fn outcome(&self) -> &Arc<TxOutcome> {
        &self.outcome
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.outcome.finish(TxState::Reverted) {
            tracing::trace!(snapshot_id = self.snapshot_id, "abandoned transaction reverted");
        }
    }
}
