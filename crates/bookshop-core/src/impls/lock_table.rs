//! Exclusive row locks for pessimistic transactions.
//!
//! Only ownership is tracked here. Waiting happens in the store: a blocked
//! transaction parks on a `Notify` and retries `try_acquire` after every
//! release.

use std::collections::HashMap;

use super::versions::RowKey;

/// Store-internal transaction number.
pub(crate) type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockAttempt {
    Granted,
    Held(TxnId),
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    owners: HashMap<RowKey, TxnId>,
}

impl LockTable {
    /// Take the lock on `key` for `txn`. Re-entrant for the owner.
    pub(crate) fn try_acquire(&mut self, key: RowKey, txn: TxnId) -> LockAttempt {
        match self.owners.get(&key) {
            Some(&holder) if holder != txn => LockAttempt::Held(holder),
            _ => {
                self.owners.insert(key, txn);
                LockAttempt::Granted
            }
        }
    }

    pub(crate) fn holder(&self, key: &RowKey) -> Option<TxnId> {
        self.owners.get(key).copied()
    }

    /// Release every lock owned by `txn`. Returns how many were held.
    pub(crate) fn release_all(&mut self, txn: TxnId) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, holder| *holder != txn);
        before - self.owners.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}
