//! Rows of the three relations: books, users, orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BookId, OrderId, UserId};
use super::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub price: Money,
    /// Never negative at any committed state.
    pub stock: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    /// No floor is enforced: purchases debit without a sufficiency check.
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub quantity: u32,
}
