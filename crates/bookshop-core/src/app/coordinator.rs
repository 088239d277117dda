//! Transactional retry coordinator.
//!
//! Runs a [`UnitOfWork`] inside a transaction of the requested mode:
//!
//! 1. begin a transaction tagged with the mode (a begin failure is final)
//! 2. run the unit of work against it
//! 3. on failure: roll back (best-effort), then retry if the mode is
//!    optimistic, budget remains and the classifier says retryable
//! 4. on success: commit; a retryable commit failure retries the whole
//!    attempt with a fresh unit-of-work run
//!
//! A call commits at most one transaction and makes at most
//! `max_retries + 1` attempts. Pessimistic calls are never retried.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::classifier::ErrorClassifier;
use super::retry::RetryPolicy;
use super::unit_of_work::UnitOfWork;
use crate::domain::{AttemptRecord, CallReport, ConcurrencyMode, FailureClass, TxnError};
use crate::ports::{IdGenerator, SystemClock, TransactionalStore, UlidGenerator};

pub struct TxnCoordinator {
    store: Arc<dyn TransactionalStore>,
    classifier: ErrorClassifier,
    retry_policy: RetryPolicy,
    ids: Arc<dyn IdGenerator>,
}

impl TxnCoordinator {
    /// Coordinator with the default retryable set and immediate retries.
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self {
            store,
            classifier: ErrorClassifier::default(),
            retry_policy: RetryPolicy::default(),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<dyn TransactionalStore> {
        &self.store
    }

    /// Run `work` and return its output or the final error.
    pub async fn run<W: UnitOfWork>(
        &self,
        mode: ConcurrencyMode,
        max_retries: u32,
        work: &W,
    ) -> Result<W::Output, TxnError> {
        self.run_traced(mode, max_retries, work).await.into_result()
    }

    /// Like [`run`](Self::run), but also reports every attempt.
    pub async fn run_traced<W: UnitOfWork>(
        &self,
        mode: ConcurrencyMode,
        max_retries: u32,
        work: &W,
    ) -> CallReport<W::Output> {
        let call_id = self.ids.generate_call_id();
        let mut attempts = Vec::new();
        let mut remaining = max_retries;
        let mut attempt_no: u32 = 0;

        loop {
            attempt_no += 1;
            let mut record = AttemptRecord::begin(attempt_no, mode);
            info!(
                call = %call_id,
                attempt = attempt_no,
                "begin a txn with '{}'",
                mode.begin_statement()
            );

            let mut txn = match self.store.begin(mode).await {
                Ok(txn) => txn,
                // begin は接続エラーのみ: リトライしない
                Err(err) => {
                    let failure = TxnError::from(err);
                    warn!(call = %call_id, attempt = attempt_no, error = %failure, "failed to begin");
                    let class = self.classifier.classify(&failure);
                    record.mark_fatal(failure.clone(), class);
                    attempts.push(record);
                    return CallReport {
                        call_id,
                        mode,
                        attempts,
                        result: Err(failure),
                    };
                }
            };

            record.start_running();
            let failure = match work.run(txn.as_mut()).await {
                Ok(output) => match txn.commit().await {
                    Ok(()) => {
                        info!(call = %call_id, attempt = attempt_no, "commit success");
                        record.mark_committed();
                        attempts.push(record);
                        return CallReport {
                            call_id,
                            mode,
                            attempts,
                            result: Ok(output),
                        };
                    }
                    // The store has already discarded the transaction.
                    Err(err) => TxnError::from(err),
                },
                Err(err) => {
                    if let Err(rollback_err) = txn.rollback().await {
                        debug!(call = %call_id, error = %rollback_err, "rollback failed");
                    }
                    err
                }
            };

            let class = self.classifier.classify(&failure);
            if Self::should_retry(mode, remaining, class) {
                remaining -= 1;
                warn!(
                    call = %call_id,
                    attempt = attempt_no,
                    rest = remaining,
                    error = %failure,
                    "got a retryable error"
                );
                record.schedule_retry(failure, class);
                attempts.push(record);

                let delay = self.retry_policy.next_delay(attempt_no);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            warn!(call = %call_id, attempt = attempt_no, error = %failure, "got an error, rollback");
            record.mark_fatal(failure.clone(), class);
            attempts.push(record);
            return CallReport {
                call_id,
                mode,
                attempts,
                result: Err(failure),
            };
        }
    }

    fn should_retry(mode: ConcurrencyMode, remaining: u32, class: FailureClass) -> bool {
        mode.allows_retry() && remaining > 0 && class == FailureClass::StoreConflict
    }
}
