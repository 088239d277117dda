//! Concurrent purchase scenarios against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use bookshop_core::app::{Fixtures, PurchaseService, TxnCoordinator, seed_catalog_and_users};
use bookshop_core::domain::{
    BookId, BusinessError, ConcurrencyMode, Money, OrderId, StoreErrorCode, TxnError, UserId,
};
use bookshop_core::impls::{FaultPoint, InMemoryStore, StoreConfig};
use bookshop_core::{PurchaseRequest, ShopConfig};

async fn seeded_with(store: InMemoryStore, think_time: Duration) -> PurchaseService {
    let coordinator = Arc::new(TxnCoordinator::new(Arc::new(store)));
    seed_catalog_and_users(&coordinator, &Fixtures::default())
        .await
        .unwrap();
    PurchaseService::new(coordinator).with_think_time(think_time)
}

fn request(order_id: u64, user_id: u64, quantity: u32) -> PurchaseRequest {
    PurchaseRequest {
        order_id: OrderId::new(order_id),
        book_id: BookId::new(1),
        user_id: UserId::new(user_id),
        quantity,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_optimistic_buyers_of_six_commit_exactly_once() {
    let store = InMemoryStore::new();
    let service = seeded_with(store.clone(), Duration::from_millis(20)).await;

    let bob = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .run_purchase_traced(ConcurrencyMode::Optimistic, request(1000, 1, 6))
                .await
        }
    });
    let alice = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .run_purchase_traced(ConcurrencyMode::Optimistic, request(1001, 2, 6))
                .await
        }
    });
    let reports = [bob.await.unwrap(), alice.await.unwrap()];

    assert_eq!(reports.iter().filter(|r| r.is_committed()).count(), 1);
    let loser = reports.iter().find(|r| !r.is_committed()).unwrap();
    assert!(loser.attempt_count() <= 6);
    assert!(matches!(
        loser.result,
        Err(TxnError::Business(BusinessError::InsufficientStock { .. }))
            | Err(TxnError::Business(BusinessError::StockNotEnough { .. }))
            | Err(TxnError::Store(_))
    ));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.book(BookId::new(1)).unwrap().stock, 4);
    assert_eq!(snapshot.orders.len(), 1);
    let buyer = snapshot.orders[0].user_id;
    let other = if buyer == UserId::new(1) {
        UserId::new(2)
    } else {
        UserId::new(1)
    };
    assert_eq!(snapshot.user(buyer).unwrap().balance, Money::from_units(9_400));
    assert_eq!(snapshot.user(other).unwrap().balance, Money::from_units(10_000));
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_pessimistic_buyers_serialize_on_the_book() {
    let store = InMemoryStore::new();
    let service = seeded_with(store.clone(), Duration::from_millis(20)).await;

    let handles: Vec<_> = [(1000, 1, 6), (1001, 2, 6)]
        .into_iter()
        .map(|(order, user, qty)| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .run_purchase_traced(ConcurrencyMode::Pessimistic, request(order, user, qty))
                    .await
            })
        })
        .collect();
    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap());
    }

    // 悲観モードはリトライしない
    assert!(reports.iter().all(|r| r.attempt_count() == 1));
    assert_eq!(reports.iter().filter(|r| r.is_committed()).count(), 1);
    let loser = reports.iter().find(|r| !r.is_committed()).unwrap();
    assert!(matches!(
        loser.result,
        Err(TxnError::Business(BusinessError::StockNotEnough { requested: 6, .. }))
    ));
    assert_eq!(store.book(BookId::new(1)).unwrap().stock, 4);
}

#[rstest]
#[case(ConcurrencyMode::Pessimistic)]
#[case(ConcurrencyMode::Optimistic)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stock_never_goes_below_zero(#[case] mode: ConcurrencyMode) {
    let store = InMemoryStore::new();
    let service = seeded_with(store.clone(), Duration::from_millis(1))
        .await
        .with_max_retries(20);

    let quantities = [3u32, 1, 4, 1, 5, 2, 6, 1];
    let handles: Vec<_> = quantities
        .iter()
        .enumerate()
        .map(|(i, &qty)| {
            let service = service.clone();
            let user = 1 + (i as u64 % 2);
            tokio::spawn(async move {
                service
                    .run_purchase(mode, request(2000 + i as u64, user, qty))
                    .await
            })
        })
        .collect();

    let mut committed = 0u32;
    for handle in handles {
        if let Ok(receipt) = handle.await.unwrap() {
            committed += receipt.quantity;
        }
    }

    let snapshot = store.snapshot();
    let stock = snapshot.book(BookId::new(1)).unwrap().stock;
    assert_eq!(u64::from(stock), 10 - u64::from(committed));
    assert_eq!(snapshot.sold(BookId::new(1)), u64::from(committed));
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test]
async fn optimistic_retry_budget_bounds_attempts() {
    let store = InMemoryStore::new();
    let service = seeded_with(store.clone(), Duration::ZERO)
        .await
        .with_max_retries(3);
    store.inject_fault(FaultPoint::Commit, StoreErrorCode::InfoSchemaChanged, 10);
    let before = store.snapshot();
    let begun = store.counts().begun;

    let report = service
        .run_purchase_traced(ConcurrencyMode::Optimistic, request(1000, 1, 1))
        .await;

    assert_eq!(report.attempt_count(), 4);
    assert_eq!(store.counts().begun - begun, 4);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn schema_change_mid_flight_is_retried() {
    let store = InMemoryStore::new();
    let service = seeded_with(store.clone(), Duration::from_millis(50)).await;

    let buyer = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .run_purchase_traced(ConcurrencyMode::Optimistic, request(1000, 1, 2))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.alter_schema();
    let report = buyer.await.unwrap();

    assert!(report.is_committed());
    assert_eq!(report.attempt_count(), 2);
    assert_eq!(
        report.attempts[0].error.as_ref().and_then(TxnError::store_code),
        Some(StoreErrorCode::InfoSchemaChanged)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_wait_timeout_fails_the_waiting_buyer() {
    let store = InMemoryStore::with_config(StoreConfig {
        lock_wait_timeout: Some(Duration::from_millis(20)),
    });
    let service = seeded_with(store.clone(), Duration::ZERO).await;

    // 200ms の間、本の行ロックを握り続ける
    let holder = {
        let store = store.clone();
        tokio::spawn(async move {
            use bookshop_core::ports::{Statement, TransactionalStore};
            let mut txn = store.begin(ConcurrencyMode::Pessimistic).await.unwrap();
            txn.execute(Statement::SelectBookPriceForUpdate, &[BookId::new(1).into()])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            txn.rollback().await.unwrap();
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = service
        .run_purchase(ConcurrencyMode::Pessimistic, request(1000, 1, 1))
        .await;
    holder.await.unwrap();

    assert_eq!(
        result.unwrap_err().store_code(),
        Some(StoreErrorCode::LockWaitTimeout)
    );
    assert_eq!(store.book(BookId::new(1)).unwrap().stock, 10);
}

#[tokio::test]
async fn config_wires_classifier_and_budget() {
    let config = ShopConfig::from_json_str(r#"{"max_retries": 1, "think_time_ms": 0}"#).unwrap();
    let store = InMemoryStore::with_config(config.store_config());
    let coordinator = Arc::new(
        TxnCoordinator::new(Arc::new(store.clone()))
            .with_classifier(config.classifier())
            .with_retry_policy(config.retry_policy()),
    );
    seed_catalog_and_users(&coordinator, &Fixtures::default())
        .await
        .unwrap();
    let service = PurchaseService::new(coordinator)
        .with_max_retries(config.max_retries)
        .with_think_time(config.think_time());
    store.inject_fault(FaultPoint::Commit, StoreErrorCode::WriteConflict, 5);

    let report = service
        .run_purchase_traced(ConcurrencyMode::Optimistic, request(1000, 1, 1))
        .await;

    assert_eq!(report.attempt_count(), 2);
    assert!(!report.is_committed());
}
