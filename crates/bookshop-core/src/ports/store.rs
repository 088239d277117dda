//! TransactionalStore port - the data store this crate runs transactions on.
//!
//! The store itself (ACID transactions, row locks, conflict detection) is an
//! external collaborator. This module only fixes the capability surface:
//! begin a transaction in a mode, execute statements with positional
//! parameters, commit or roll back. Every call may fail with a
//! [`StoreError`] carrying a store-native code.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BookId, ConcurrencyMode, Money, OrderId, StoreError, UserId};

/// The statements this system issues.
///
/// Positional parameters per statement:
/// - `InsertBook`: id, title, category, published_at, price, stock
/// - `InsertUser`: id, nickname, balance
/// - `SelectBookPriceForUpdate`: id → rows of `[price]`
/// - `SelectBookPriceAndStock`: id → rows of `[price, stock]`
/// - `DecrementStock`: amount, id, amount
/// - `InsertOrder`: id, book_id, user_id, quantity
/// - `DebitBalance`: amount, user_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    InsertBook,
    InsertUser,
    SelectBookPriceForUpdate,
    SelectBookPriceAndStock,
    DecrementStock,
    InsertOrder,
    DebitBalance,
}

impl Statement {
    pub const fn sql(self) -> &'static str {
        match self {
            Statement::InsertBook => {
                "INSERT INTO `books` (`id`, `title`, `type`, `published_at`, `price`, `stock`) VALUES (?, ?, ?, ?, ?, ?)"
            }
            Statement::InsertUser => {
                "INSERT INTO `users` (`id`, `nickname`, `balance`) VALUES (?, ?, ?)"
            }
            Statement::SelectBookPriceForUpdate => {
                "SELECT `price` FROM `books` WHERE `id` = ? FOR UPDATE"
            }
            Statement::SelectBookPriceAndStock => {
                "SELECT `price`, `stock` FROM `books` WHERE `id` = ?"
            }
            Statement::DecrementStock => {
                "UPDATE `books` SET `stock` = `stock` - ? WHERE `id` = ? AND `stock` - ? >= 0"
            }
            Statement::InsertOrder => {
                "INSERT INTO `orders` (`id`, `book_id`, `user_id`, `quantity`) VALUES (?, ?, ?, ?)"
            }
            Statement::DebitBalance => {
                "UPDATE `users` SET `balance` = `balance` - ? WHERE `id` = ?"
            }
        }
    }

    /// Does this statement take a row lock in pessimistic mode?
    pub const fn is_locking(self) -> bool {
        !matches!(self, Statement::SelectBookPriceAndStock)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// A positional parameter or a column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    UInt(u64),
    Text(String),
    Money(Money),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_money(&self) -> Option<Money> {
        match self {
            Value::Money(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Money> for Value {
    fn from(v: Money) -> Self {
        Value::Money(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<BookId> for Value {
    fn from(v: BookId) -> Self {
        Value::UInt(v.get())
    }
}

impl From<UserId> for Value {
    fn from(v: UserId) -> Self {
        Value::UInt(v.get())
    }
}

impl From<OrderId> for Value {
    fn from(v: OrderId) -> Self {
        Value::UInt(v.get())
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn column(&self, index: usize) -> Result<&Value, StoreError> {
        self.0
            .get(index)
            .ok_or_else(|| StoreError::incorrect_value(format!("no column at index {index}")))
    }

    pub fn money(&self, index: usize) -> Result<Money, StoreError> {
        self.column(index)?.as_money().ok_or_else(|| {
            StoreError::incorrect_value(format!("column {index} is not a decimal"))
        })
    }

    pub fn uint(&self, index: usize) -> Result<u64, StoreError> {
        self.column(index)?.as_uint().ok_or_else(|| {
            StoreError::incorrect_value(format!("column {index} is not an unsigned integer"))
        })
    }
}

/// Result of `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Affected(u64),
    Rows(Vec<Row>),
}

impl ExecOutcome {
    pub fn rows_affected(&self) -> u64 {
        match self {
            ExecOutcome::Affected(n) => *n,
            ExecOutcome::Rows(_) => 0,
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            ExecOutcome::Rows(rows) => rows,
            ExecOutcome::Affected(_) => Vec::new(),
        }
    }
}

/// An open transaction.
///
/// `commit` and `rollback` consume the handle, so a finished transaction
/// cannot be used again.
#[async_trait]
pub trait Transaction: Send {
    fn mode(&self) -> ConcurrencyMode;

    async fn execute(
        &mut self,
        statement: Statement,
        params: &[Value],
    ) -> Result<ExecOutcome, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Store capability: hands out transactions.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Begin a transaction tagged with `mode`.
    ///
    /// Fails with a connection/protocol error only.
    async fn begin(&self, mode: ConcurrencyMode) -> Result<Box<dyn Transaction>, StoreError>;
}
