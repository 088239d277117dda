//! Multi-version rows for the in-memory store.
//!
//! Every committed write appends a version tagged with its commit
//! timestamp. Nothing is ever deleted in this store.

use std::fmt;

use crate::domain::{Book, BookId, Order, OrderId, User, UserId};

/// Logical commit timestamp.
pub(crate) type Ts = u64;

/// Which committed version a read sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadView {
    /// Newest committed version ("current read").
    Latest,
    /// Newest version committed at or before the timestamp.
    Snapshot(Ts),
}

/// Versions of one row, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct VersionChain<T> {
    versions: Vec<(Ts, T)>,
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
        }
    }
}

impl<T> VersionChain<T> {
    pub(crate) fn push(&mut self, ts: Ts, value: T) {
        self.versions.push((ts, value));
    }

    pub(crate) fn latest(&self) -> Option<&T> {
        self.versions.last().map(|(_, v)| v)
    }

    pub(crate) fn latest_ts(&self) -> Option<Ts> {
        self.versions.last().map(|(ts, _)| *ts)
    }

    pub(crate) fn read(&self, view: ReadView) -> Option<&T> {
        match view {
            ReadView::Latest => self.latest(),
            ReadView::Snapshot(at) => self
                .versions
                .iter()
                .rev()
                .find(|(ts, _)| *ts <= at)
                .map(|(_, v)| v),
        }
    }
}

/// Primary key of any row, used for locks and write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum RowKey {
    Book(BookId),
    User(UserId),
    Order(OrderId),
}

impl RowKey {
    pub(crate) fn table(self) -> &'static str {
        match self {
            RowKey::Book(_) => "books",
            RowKey::User(_) => "users",
            RowKey::Order(_) => "orders",
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Book(id) => write!(f, "{id}"),
            RowKey::User(id) => write!(f, "{id}"),
            RowKey::Order(id) => write!(f, "{id}"),
        }
    }
}

/// A buffered, not yet committed row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingRow {
    Book(Book),
    User(User),
    Order(Order),
}

impl PendingRow {
    pub(crate) fn key(&self) -> RowKey {
        match self {
            PendingRow::Book(b) => RowKey::Book(b.id),
            PendingRow::User(u) => RowKey::User(u.id),
            PendingRow::Order(o) => RowKey::Order(o.id),
        }
    }
}
