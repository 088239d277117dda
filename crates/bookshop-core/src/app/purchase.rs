//! Purchase workflows.
//!
//! Both variants run the same five steps inside one transaction:
//!
//! 1. read the book's price (pessimistic: locking read; optimistic:
//!    snapshot read of price and stock, plus an explicit stock check)
//! 2. fail with "book not found" if there is no row
//! 3. guarded stock decrement; zero rows affected means "stock not enough"
//! 4. insert the order
//! 5. debit `price * quantity` from the user (no balance check)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::coordinator::TxnCoordinator;
use super::unit_of_work::UnitOfWork;
use crate::domain::{
    BookId, BusinessError, CallReport, ConcurrencyMode, Money, OrderId, TxnError, UserId,
};
use crate::ports::{ExecOutcome, Statement, Transaction, Value};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_THINK_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub order_id: OrderId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub quantity: u32,
}

/// What a committed purchase wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub order_id: OrderId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub quantity: u32,
    /// Amount debited from the user.
    pub total: Money,
}

async fn exec(
    txn: &mut dyn Transaction,
    statement: Statement,
    params: &[Value],
) -> Result<ExecOutcome, TxnError> {
    let outcome = txn.execute(statement, params).await?;
    debug!(sql = statement.sql(), "statement executed");
    Ok(outcome)
}

/// Steps 3 to 5, shared by both variants.
async fn settle(
    txn: &mut dyn Transaction,
    request: &PurchaseRequest,
    price: Money,
) -> Result<PurchaseReceipt, TxnError> {
    let PurchaseRequest {
        order_id,
        book_id,
        user_id,
        quantity,
    } = *request;

    let decremented = exec(
        txn,
        Statement::DecrementStock,
        &[quantity.into(), book_id.into(), quantity.into()],
    )
    .await?;
    if decremented.rows_affected() == 0 {
        return Err(BusinessError::StockNotEnough {
            book_id,
            requested: quantity,
        }
        .into());
    }

    exec(
        txn,
        Statement::InsertOrder,
        &[
            order_id.into(),
            book_id.into(),
            user_id.into(),
            quantity.into(),
        ],
    )
    .await?;

    let total = price
        .checked_mul(quantity)
        .ok_or(BusinessError::AmountOverflow { book_id, quantity })?;
    exec(txn, Statement::DebitBalance, &[total.into(), user_id.into()]).await?;

    Ok(PurchaseReceipt {
        order_id,
        book_id,
        user_id,
        quantity,
        total,
    })
}

async fn think(think_time: Duration) {
    if !think_time.is_zero() {
        tokio::time::sleep(think_time).await;
    }
}

/// Purchase under a pessimistic transaction: the book row stays locked
/// from the price read until the end of the transaction.
#[derive(Debug, Clone)]
pub struct PessimisticPurchase {
    pub request: PurchaseRequest,
    pub think_time: Duration,
}

#[async_trait]
impl UnitOfWork for PessimisticPurchase {
    type Output = PurchaseReceipt;

    async fn run(&self, txn: &mut dyn Transaction) -> Result<PurchaseReceipt, TxnError> {
        think(self.think_time).await;

        let book_id = self.request.book_id;
        let rows = exec(txn, Statement::SelectBookPriceForUpdate, &[book_id.into()])
            .await?
            .into_rows();
        let row = rows.first().ok_or(BusinessError::BookNotFound(book_id))?;
        let price = row.money(0)?;

        settle(txn, &self.request, price).await
    }
}

/// Purchase under an optimistic transaction: nothing is locked, a racing
/// writer is detected by the store at the decrement or at commit.
#[derive(Debug, Clone)]
pub struct OptimisticPurchase {
    pub request: PurchaseRequest,
    pub think_time: Duration,
}

#[async_trait]
impl UnitOfWork for OptimisticPurchase {
    type Output = PurchaseReceipt;

    async fn run(&self, txn: &mut dyn Transaction) -> Result<PurchaseReceipt, TxnError> {
        think(self.think_time).await;

        let book_id = self.request.book_id;
        let rows = exec(txn, Statement::SelectBookPriceAndStock, &[book_id.into()])
            .await?
            .into_rows();
        let row = rows.first().ok_or(BusinessError::BookNotFound(book_id))?;
        let price = row.money(0)?;
        let stock = row.uint(1)?;

        if stock < u64::from(self.request.quantity) {
            return Err(BusinessError::InsufficientStock {
                book_id,
                requested: self.request.quantity,
                available: u32::try_from(stock).unwrap_or(u32::MAX),
            }
            .into());
        }

        settle(txn, &self.request, price).await
    }
}

/// Runs purchases through a shared coordinator.
#[derive(Clone)]
pub struct PurchaseService {
    coordinator: Arc<TxnCoordinator>,
    max_retries: u32,
    think_time: Duration,
}

impl PurchaseService {
    pub fn new(coordinator: Arc<TxnCoordinator>) -> Self {
        Self {
            coordinator,
            max_retries: DEFAULT_MAX_RETRIES,
            think_time: DEFAULT_THINK_TIME,
        }
    }

    /// Retry budget of optimistic purchases.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay injected at the start of every attempt, before any statement.
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn coordinator(&self) -> &Arc<TxnCoordinator> {
        &self.coordinator
    }

    pub async fn run_purchase(
        &self,
        mode: ConcurrencyMode,
        request: PurchaseRequest,
    ) -> Result<PurchaseReceipt, TxnError> {
        self.run_purchase_traced(mode, request).await.into_result()
    }

    pub async fn run_purchase_traced(
        &self,
        mode: ConcurrencyMode,
        request: PurchaseRequest,
    ) -> CallReport<PurchaseReceipt> {
        let think_time = self.think_time;
        match mode {
            ConcurrencyMode::Pessimistic => {
                let work = PessimisticPurchase {
                    request,
                    think_time,
                };
                self.coordinator
                    .run_traced(mode, self.max_retries, &work)
                    .await
            }
            ConcurrencyMode::Optimistic => {
                let work = OptimisticPurchase {
                    request,
                    think_time,
                };
                self.coordinator
                    .run_traced(mode, self.max_retries, &work)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::app::seed::{Fixtures, seed_catalog_and_users};
    use crate::domain::{AttemptState, StoreErrorCode};
    use crate::impls::{FaultPoint, InMemoryStore};

    async fn seeded() -> (InMemoryStore, PurchaseService) {
        let store = InMemoryStore::new();
        let coordinator = Arc::new(TxnCoordinator::new(Arc::new(store.clone())));
        seed_catalog_and_users(&coordinator, &Fixtures::default())
            .await
            .unwrap();
        let service = PurchaseService::new(coordinator).with_think_time(Duration::ZERO);
        (store, service)
    }

    fn request(order_id: u64, user_id: u64, quantity: u32) -> PurchaseRequest {
        PurchaseRequest {
            order_id: OrderId::new(order_id),
            book_id: BookId::new(1),
            user_id: UserId::new(user_id),
            quantity,
        }
    }

    #[rstest]
    #[case(ConcurrencyMode::Pessimistic)]
    #[case(ConcurrencyMode::Optimistic)]
    #[tokio::test]
    async fn purchase_writes_stock_order_and_debit(#[case] mode: ConcurrencyMode) {
        let (store, service) = seeded().await;

        let receipt = service.run_purchase(mode, request(1000, 1, 4)).await.unwrap();

        assert_eq!(receipt.total, Money::from_units(400));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.book(BookId::new(1)).unwrap().stock, 6);
        assert_eq!(snapshot.orders.len(), 1);
        assert_eq!(snapshot.orders[0].quantity, 4);
        assert_eq!(
            snapshot.user(UserId::new(1)).unwrap().balance,
            Money::from_units(9600)
        );
    }

    #[tokio::test]
    async fn pessimistic_overdraw_of_stock_is_final() {
        let (store, service) = seeded().await;
        let before = store.snapshot();
        let begun_before = store.counts().begun;

        let report = service
            .run_purchase_traced(ConcurrencyMode::Pessimistic, request(1000, 1, 11))
            .await;

        assert_eq!(report.attempt_count(), 1);
        assert_eq!(store.counts().begun - begun_before, 1);
        assert!(matches!(
            report.result,
            Err(TxnError::Business(BusinessError::StockNotEnough { requested: 11, .. }))
        ));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn optimistic_snapshot_check_rejects_overdraw() {
        let (store, service) = seeded().await;

        let result = service
            .run_purchase(ConcurrencyMode::Optimistic, request(1000, 1, 11))
            .await;

        assert_eq!(
            result.unwrap_err().as_business(),
            Some(&BusinessError::InsufficientStock {
                book_id: BookId::new(1),
                requested: 11,
                available: 10,
            })
        );
        assert_eq!(store.book(BookId::new(1)).unwrap().stock, 10);
    }

    #[rstest]
    #[case(ConcurrencyMode::Pessimistic)]
    #[case(ConcurrencyMode::Optimistic)]
    #[tokio::test]
    async fn unknown_book_is_not_found(#[case] mode: ConcurrencyMode) {
        let (store, service) = seeded().await;
        let before = store.snapshot();
        let mut req = request(1000, 1, 1);
        req.book_id = BookId::new(404);

        let report = service.run_purchase_traced(mode, req).await;

        assert_eq!(report.attempt_count(), 1);
        assert!(matches!(
            report.result,
            Err(TxnError::Business(BusinessError::BookNotFound(id))) if id == BookId::new(404)
        ));
        assert_eq!(store.snapshot(), before);
    }

    #[rstest]
    #[case(ConcurrencyMode::Pessimistic, Statement::InsertOrder)]
    #[case(ConcurrencyMode::Pessimistic, Statement::DebitBalance)]
    #[case(ConcurrencyMode::Optimistic, Statement::InsertOrder)]
    #[case(ConcurrencyMode::Optimistic, Statement::DebitBalance)]
    #[tokio::test]
    async fn failed_purchase_leaves_no_partial_writes(
        #[case] mode: ConcurrencyMode,
        #[case] failing: Statement,
    ) {
        let (store, service) = seeded().await;
        let before = store.snapshot();
        store.inject_fault(FaultPoint::Execute(failing), StoreErrorCode::ConnectionLost, 1);

        let result = service.run_purchase(mode, request(1000, 1, 3)).await;

        assert_eq!(
            result.unwrap_err().store_code(),
            Some(StoreErrorCode::ConnectionLost)
        );
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn optimistic_purchase_rereads_after_conflict() {
        let (store, service) = seeded().await;
        store.inject_fault(
            FaultPoint::Execute(Statement::DecrementStock),
            StoreErrorCode::WriteConflict,
            1,
        );

        let report = service
            .run_purchase_traced(ConcurrencyMode::Optimistic, request(1000, 2, 6))
            .await;

        assert!(report.is_committed());
        assert_eq!(report.attempts[0].state, AttemptState::RetryScheduled);
        assert_eq!(report.attempts[1].state, AttemptState::CommitSucceeded);
        assert_eq!(store.book(BookId::new(1)).unwrap().stock, 4);
        assert_eq!(store.snapshot().orders.len(), 1);
    }

    #[tokio::test]
    async fn balance_may_go_negative() {
        // Known gap: the debit does not check the balance.
        let (store, service) = seeded().await;
        let coordinator = Arc::clone(service.coordinator());
        let pricey = crate::app::seed::Fixtures {
            books: vec![crate::domain::Book {
                id: BookId::new(2),
                title: "Expensive".to_string(),
                category: "Art".to_string(),
                published_at: Fixtures::default().books[0].published_at,
                price: Money::from_units(20_000),
                stock: 5,
            }],
            users: Vec::new(),
        };
        seed_catalog_and_users(&coordinator, &pricey).await.unwrap();
        let mut req = request(1000, 1, 1);
        req.book_id = BookId::new(2);

        service
            .run_purchase(ConcurrencyMode::Pessimistic, req)
            .await
            .unwrap();

        let balance = store.user(UserId::new(1)).unwrap().balance;
        assert_eq!(balance, Money::from_units(-10_000));
        assert!(balance.is_negative());
    }
}
