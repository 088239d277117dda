//! Attempt state machine for one coordinator call.

use serde::{Deserialize, Serialize};

/// State of one transaction attempt.
///
/// State transitions:
/// - Begin -> Running -> CommitSucceeded
/// - Begin -> Running -> RolledBackFatal
/// - Begin -> Running -> RetryScheduled -> (next attempt) Begin
/// - Begin -> RolledBackFatal (the store refused to begin)
///
/// `RetryScheduled` only happens in optimistic mode while budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptState {
    /// Transaction requested from the store.
    Begin,

    /// Unit of work (or its commit) in progress.
    Running,

    /// Committed. Terminal.
    CommitSucceeded,

    /// Rolled back with a final error. Terminal.
    RolledBackFatal,

    /// Rolled back with a retryable error; a fresh attempt follows.
    RetryScheduled,
}

impl AttemptState {
    /// Is this a terminal state for the whole call?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::CommitSucceeded | AttemptState::RolledBackFatal
        )
    }

    /// Has this attempt finished (terminal or handed over to a retry)?
    pub fn is_finished(self) -> bool {
        self.is_terminal() || self == AttemptState::RetryScheduled
    }
}
