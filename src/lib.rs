pub mod backing;
pub mod config;
pub mod engine;
pub mod error;
pub mod gc;
pub mod op_log;
pub mod outcome;
pub mod transaction;
pub mod version_index;

pub use backing::{BackingStore, EmptyStore, MemoryStore};
pub use config::{EngineConfig, ReadBound};
pub use engine::{EngineStats, KeyHasher, MvccEngine};
pub use error::{Error, Result};
pub use gc::GcStats;
pub use op_log::{LogRecord, OpType};
pub use outcome::TxState;
pub use transaction::{Transaction, TransactionId, TransactionKind};
