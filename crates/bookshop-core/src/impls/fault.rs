//! Fault injection for the in-memory store.
//!
//! Tests queue store errors at a given point; each queued error is returned
//! exactly once, in FIFO order.

use std::collections::{HashMap, VecDeque};

use crate::domain::StoreError;
use crate::ports::Statement;

/// Where an injected error surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Execute(Statement),
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pending: HashMap<FaultPoint, VecDeque<StoreError>>,
}

impl FaultPlan {
    pub(crate) fn inject(&mut self, point: FaultPoint, error: StoreError, times: usize) {
        let queue = self.pending.entry(point).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub(crate) fn take(&mut self, point: FaultPoint) -> Option<StoreError> {
        self.pending.get_mut(&point).and_then(VecDeque::pop_front)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
