//! Attempt records: what happened on each transaction attempt of a call.

use std::time::{Duration, Instant};

use super::errors::{FailureClass, TxnError};
use super::ids::CallId;
use super::mode::ConcurrencyMode;
use super::state::AttemptState;

/// One underlying transaction attempt.
///
/// All state transitions happen through the methods below.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-indexed.
    pub attempt: u32,
    pub mode: ConcurrencyMode,
    pub state: AttemptState,

    /// Failure that ended this attempt (if any).
    pub error: Option<TxnError>,
    pub failure_class: Option<FailureClass>,

    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

impl AttemptRecord {
    pub fn begin(attempt: u32, mode: ConcurrencyMode) -> Self {
        Self {
            attempt,
            mode,
            state: AttemptState::Begin,
            error: None,
            failure_class: None,
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    pub fn start_running(&mut self) {
        self.state = AttemptState::Running;
    }

    pub fn mark_committed(&mut self) {
        self.state = AttemptState::CommitSucceeded;
        self.finished_at = Some(Instant::now());
    }

    pub fn mark_fatal(&mut self, error: TxnError, class: FailureClass) {
        self.state = AttemptState::RolledBackFatal;
        self.error = Some(error);
        self.failure_class = Some(class);
        self.finished_at = Some(Instant::now());
    }

    pub fn schedule_retry(&mut self, error: TxnError, class: FailureClass) {
        self.state = AttemptState::RetryScheduled;
        self.error = Some(error);
        self.failure_class = Some(class);
        self.finished_at = Some(Instant::now());
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at.map(|end| end.duration_since(self.started_at))
    }
}

/// Everything a logical call did: its attempts and its final result.
#[derive(Debug)]
pub struct CallReport<T> {
    pub call_id: CallId,
    pub mode: ConcurrencyMode,
    pub attempts: Vec<AttemptRecord>,
    pub result: Result<T, TxnError>,
}

impl<T> CallReport<T> {
    /// Number of underlying transactions that were begun (or attempted).
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn retries(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.state == AttemptState::RetryScheduled)
            .count()
    }

    pub fn is_committed(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, TxnError> {
        self.result
    }
}
