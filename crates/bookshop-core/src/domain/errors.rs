//! Errors and their classification.
//!
//! Three sources of failure reach the coordinator:
//! - store conflicts (retryable codes, e.g. write conflict)
//! - other store errors (connection lost, duplicate key, bad arguments, ...)
//! - business errors raised by a workflow itself (not found, stock)
//!
//! Which store codes count as retryable is decided by
//! [`ErrorClassifier`](crate::app::ErrorClassifier), never here.

use thiserror::Error;

use super::ids::BookId;

/// Store-native error codes (MySQL/TiDB numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// Write-write conflict between concurrent transactions.
    WriteConflict,
    /// The table schema changed while the transaction was running.
    InfoSchemaChanged,
    /// A `SELECT ... FOR UPDATE` conflicted at commit.
    ForUpdateCantRetry,
    /// Commit failed and the transaction has been rolled back.
    TxnRetryable,
    DuplicateEntry,
    LockWaitTimeout,
    WrongArguments,
    IncorrectValue,
    ConnectionLost,
    Other(u16),
}

impl StoreErrorCode {
    pub const fn number(self) -> u16 {
        match self {
            StoreErrorCode::WriteConflict => 9007,
            StoreErrorCode::InfoSchemaChanged => 8028,
            StoreErrorCode::ForUpdateCantRetry => 8002,
            StoreErrorCode::TxnRetryable => 8022,
            StoreErrorCode::DuplicateEntry => 1062,
            StoreErrorCode::LockWaitTimeout => 1205,
            StoreErrorCode::WrongArguments => 1210,
            StoreErrorCode::IncorrectValue => 1366,
            StoreErrorCode::ConnectionLost => 2013,
            StoreErrorCode::Other(n) => n,
        }
    }

    pub const fn from_number(number: u16) -> Self {
        match number {
            9007 => StoreErrorCode::WriteConflict,
            8028 => StoreErrorCode::InfoSchemaChanged,
            8002 => StoreErrorCode::ForUpdateCantRetry,
            8022 => StoreErrorCode::TxnRetryable,
            1062 => StoreErrorCode::DuplicateEntry,
            1205 => StoreErrorCode::LockWaitTimeout,
            1210 => StoreErrorCode::WrongArguments,
            1366 => StoreErrorCode::IncorrectValue,
            2013 => StoreErrorCode::ConnectionLost,
            n => StoreErrorCode::Other(n),
        }
    }
}

/// An error reported by the store on begin/execute/commit/rollback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error {}: {message}", .code.number())]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn write_conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::WriteConflict, message)
    }

    pub fn wrong_arguments(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::WrongArguments, message)
    }

    pub fn incorrect_value(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::IncorrectValue, message)
    }
}

/// Conditions detected by a workflow. Always final, even when they stem
/// from contention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("book ID not exist: {0}")]
    BookNotFound(BookId),

    /// The optimistic snapshot already shows too few copies.
    #[error("book not enough: {book_id} has {available}, requested {requested}")]
    InsufficientStock {
        book_id: BookId,
        requested: u32,
        available: u32,
    },

    /// The guarded stock decrement matched no row.
    #[error("stock not enough, rollback: {book_id}, requested {requested}")]
    StockNotEnough { book_id: BookId, requested: u32 },

    #[error("order amount overflows: {book_id} x {quantity}")]
    AmountOverflow { book_id: BookId, quantity: u32 },
}

/// Failure of a unit of work or of its commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Business(#[from] BusinessError),
}

impl TxnError {
    pub fn store_code(&self) -> Option<StoreErrorCode> {
        match self {
            TxnError::Store(err) => Some(err.code),
            TxnError::Business(_) => None,
        }
    }

    pub fn as_business(&self) -> Option<&BusinessError> {
        match self {
            TxnError::Business(err) => Some(err),
            TxnError::Store(_) => None,
        }
    }
}

/// Whether automatic re-attempt is appropriate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Retryable,
    Fatal,
}

/// Taxonomy of a failure from the coordinator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Store-detected conflict in the retryable set.
    StoreConflict,
    /// Any other store error.
    StoreFatal,
    /// Raised by the workflow.
    BusinessFatal,
}

impl FailureClass {
    pub const fn kind(self) -> ErrorKind {
        match self {
            FailureClass::StoreConflict => ErrorKind::Retryable,
            FailureClass::StoreFatal | FailureClass::BusinessFatal => ErrorKind::Fatal,
        }
    }
}
