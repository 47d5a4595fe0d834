use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A transaction with a newer snapshot already touched a key this
    /// transaction is committing. The transaction has been reverted; retry
    /// with a fresh one.
    #[error(
        "write-write conflict: transaction {snapshot_id} lost key hash {key_hash:#018x} to watermark {watermark}"
    )]
    WriteConflict {
        snapshot_id: u64,
        key_hash: u64,
        watermark: u64,
    },

    #[error("operation log has no record at address {0}")]
    MissingLogRecord(u64),

    #[error("operation log record at address {0} is not a write")]
    CorruptLogRecord(u64),

    #[error("transaction {0} is read-only")]
    ReadOnlyTransaction(u64),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backing store error: {0}")]
    Backing(String),
}

impl Error {
    /// Only write-write conflicts may be retried with a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
