//! Error classifier: decides whether a failure may be retried.
//!
//! Only store-native codes are consulted. Errors raised by a workflow are
//! always fatal here, even the ones caused by contention ("stock not
//! enough"): business-detected contention is a final outcome.

use std::collections::BTreeSet;

use crate::domain::{ErrorKind, FailureClass, StoreErrorCode, TxnError};

/// Codes retried by default: write conflict, schema changed, `SELECT ...
/// FOR UPDATE` commit conflict, retryable commit failure.
pub const DEFAULT_RETRYABLE_CODES: [StoreErrorCode; 4] = [
    StoreErrorCode::WriteConflict,
    StoreErrorCode::InfoSchemaChanged,
    StoreErrorCode::ForUpdateCantRetry,
    StoreErrorCode::TxnRetryable,
];

/// Immutable set of retryable store error numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    retryable: BTreeSet<u16>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRYABLE_CODES.iter().map(|code| code.number()))
    }
}

impl ErrorClassifier {
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            retryable: codes.into_iter().collect(),
        }
    }

    pub fn classify(&self, error: &TxnError) -> FailureClass {
        match error {
            TxnError::Store(err) if self.retryable.contains(&err.code.number()) => {
                FailureClass::StoreConflict
            }
            TxnError::Store(_) => FailureClass::StoreFatal,
            TxnError::Business(_) => FailureClass::BusinessFatal,
        }
    }

    pub fn kind(&self, error: &TxnError) -> ErrorKind {
        self.classify(error).kind()
    }

    pub fn retryable_codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.retryable.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookId, BusinessError, StoreError};
    use rstest::rstest;

    fn store(code: StoreErrorCode) -> TxnError {
        TxnError::Store(StoreError::new(code, "test"))
    }

    #[rstest]
    #[case(StoreErrorCode::WriteConflict)]
    #[case(StoreErrorCode::InfoSchemaChanged)]
    #[case(StoreErrorCode::ForUpdateCantRetry)]
    #[case(StoreErrorCode::TxnRetryable)]
    fn conflict_codes_are_retryable(#[case] code: StoreErrorCode) {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify(&store(code)), FailureClass::StoreConflict);
        assert_eq!(classifier.kind(&store(code)), ErrorKind::Retryable);
    }

    #[rstest]
    #[case(StoreErrorCode::DuplicateEntry)]
    #[case(StoreErrorCode::LockWaitTimeout)]
    #[case(StoreErrorCode::ConnectionLost)]
    #[case(StoreErrorCode::WrongArguments)]
    #[case(StoreErrorCode::Other(1064))]
    fn other_store_codes_are_fatal(#[case] code: StoreErrorCode) {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify(&store(code)), FailureClass::StoreFatal);
        assert_eq!(classifier.kind(&store(code)), ErrorKind::Fatal);
    }

    #[test]
    fn business_errors_are_never_retryable() {
        let classifier = ErrorClassifier::default();
        let err = TxnError::from(BusinessError::StockNotEnough {
            book_id: BookId::new(1),
            requested: 6,
        });
        assert_eq!(classifier.classify(&err), FailureClass::BusinessFatal);
        assert_eq!(classifier.kind(&err), ErrorKind::Fatal);
    }

    #[test]
    fn custom_set_replaces_the_default() {
        let classifier = ErrorClassifier::new([1205]);
        assert_eq!(
            classifier.kind(&store(StoreErrorCode::LockWaitTimeout)),
            ErrorKind::Retryable
        );
        assert_eq!(
            classifier.kind(&store(StoreErrorCode::WriteConflict)),
            ErrorKind::Fatal
        );
        assert_eq!(classifier.retryable_codes().collect::<Vec<_>>(), vec![1205]);
    }
}
