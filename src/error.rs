//! Error kinds surfaced by the engine.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Every failure the engine can surface to a caller.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A fixed-size allocator region is full, or a pool cannot grow.
    #[error("allocation failed: region exhausted")]
    BadAlloc,
    /// The backing device ran out of space while paging in a mapped region.
    #[error("out of space on backing device")]
    OutOfSpace,
    /// A log call would overflow the transaction's journal extent.
    #[error("transaction journal extent exhausted")]
    OutOfJournalSpace,
    /// A lock acquisition exceeded its bounded attempt count.
    #[error("lock acquisition timed out")]
    LockTimeout,
    /// A mutation was attempted on a read-only open, or recovery found
    /// active transactions while opening read-only.
    #[error("graph is read-only")]
    ReadOnly,
    /// File creation, sizing, or mapping failed.
    #[error("open failed: {context}: {source}")]
    OpenFailed {
        /// What was being opened or mapped.
        context: String,
        /// The underlying OS error.
        source: io::Error,
    },
    /// Configuration constraints were violated.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A string exceeded the interned-string length limit, or an id was
    /// otherwise out of range.
    #[error("invalid id: {0}")]
    InvalidID(&'static str),
    /// A typed property accessor was called on a value of another type.
    #[error("property type mismatch")]
    PropertyTypeMismatch,
    /// `get_property` was called for an id the entity does not carry.
    #[error("property not found")]
    PropertyNotFound,
    /// An exhausted iterator was dereferenced.
    #[error("null iterator")]
    NullIterator,
    /// An iterator whose current target was removed was dereferenced.
    #[error("vacant iterator")]
    VacantIterator,
    /// The on-media version does not match this build.
    #[error("version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version recorded in the graph header.
        found: u64,
        /// Version this build writes.
        expected: u64,
    },
    /// A reserved operation was invoked.
    #[error("not implemented")]
    NotImplemented,
    /// A component was entered with no active transaction on this thread.
    #[error("no active transaction")]
    NoTransaction,
    /// The persistent transaction table has no free slot.
    #[error("transaction table full")]
    OutOfTransactions,
}

impl GraphError {
    pub(crate) fn open_failed(context: impl Into<String>, source: io::Error) -> Self {
        GraphError::OpenFailed {
            context: context.into(),
            source,
        }
    }
}
