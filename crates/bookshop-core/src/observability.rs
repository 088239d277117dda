use serde::{Deserialize, Serialize};

use crate::domain::{Book, BookId, Order, User, UserId};

/// Transaction counters of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub begun: u64,
    pub committed: u64,
    /// Explicit rollbacks, failed commits and dropped transactions.
    pub rolled_back: u64,
    /// Commits refused with a write conflict.
    pub conflicts: u64,
}

/// Copy of every committed row, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub books: Vec<Book>,
    pub users: Vec<User>,
    pub orders: Vec<Order>,
}

impl StoreSnapshot {
    pub fn book(&self, id: BookId) -> Option<&Book> {
        self.books.iter().find(|b| b.id == id)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Copies sold of `book_id` across all committed orders.
    pub fn sold(&self, book_id: BookId) -> u64 {
        self.orders
            .iter()
            .filter(|o| o.book_id == book_id)
            .map(|o| u64::from(o.quantity))
            .sum()
    }
}
