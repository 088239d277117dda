//! Initial catalog and users.
//!
//! Seeding runs once, in a single transaction, with no retry. Running it
//! again over existing ids fails with a duplicate-key error.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::coordinator::TxnCoordinator;
use super::unit_of_work::UnitOfWork;
use crate::domain::{Book, BookId, ConcurrencyMode, Money, TxnError, User, UserId};
use crate::ports::{Statement, Transaction, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixtures {
    pub books: Vec<Book>,
    pub users: Vec<User>,
}

impl Default for Fixtures {
    fn default() -> Self {
        Self {
            books: vec![Book {
                id: BookId::new(1),
                title: "Designing Data-Intensive Application".to_string(),
                category: "Science & Technology".to_string(),
                published_at: Utc
                    .with_ymd_and_hms(2018, 9, 1, 0, 0, 0)
                    .single()
                    .unwrap_or_default(),
                price: Money::from_units(100),
                stock: 10,
            }],
            users: vec![
                User {
                    id: UserId::new(1),
                    nickname: "Bob".to_string(),
                    balance: Money::from_units(10_000),
                },
                User {
                    id: UserId::new(2),
                    nickname: "Alice".to_string(),
                    balance: Money::from_units(10_000),
                },
            ],
        }
    }
}

struct SeedFixtures<'a> {
    fixtures: &'a Fixtures,
}

#[async_trait]
impl UnitOfWork for SeedFixtures<'_> {
    type Output = ();

    async fn run(&self, txn: &mut dyn Transaction) -> Result<(), TxnError> {
        for book in &self.fixtures.books {
            let params: [Value; 6] = [
                book.id.into(),
                book.title.as_str().into(),
                book.category.as_str().into(),
                book.published_at.into(),
                book.price.into(),
                book.stock.into(),
            ];
            txn.execute(Statement::InsertBook, &params).await?;
        }
        for user in &self.fixtures.users {
            let params: [Value; 3] = [
                user.id.into(),
                user.nickname.as_str().into(),
                user.balance.into(),
            ];
            txn.execute(Statement::InsertUser, &params).await?;
        }
        Ok(())
    }
}

/// Insert `fixtures` in one transaction. Any failure is final.
pub async fn seed_catalog_and_users(
    coordinator: &TxnCoordinator,
    fixtures: &Fixtures,
) -> Result<(), TxnError> {
    coordinator
        .run(ConcurrencyMode::Pessimistic, 0, &SeedFixtures { fixtures })
        .await?;
    info!(
        books = fixtures.books.len(),
        users = fixtures.users.len(),
        "catalog and users seeded"
    );
    Ok(())
}
