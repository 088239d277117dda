//! bookshop-core
//!
//! Transactions with bounded retry over a store that supports pessimistic
//! and optimistic concurrency, and the bookshop purchase workflows built on
//! them.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, money, model, mode, errors, state, attempt）
//! - **ports**: 抽象化レイヤー（TransactionalStore, Transaction, Clock, IdGenerator）
//! - **app**: コーディネータ、エラー分類、購入ワークフロー、シード、設定
//! - **impls**: 実装（InMemoryStore: 行ロック + MVCC のインメモリストア）
//! - **observability**: ストアのカウンタとスナップショット

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{
    ErrorClassifier, Fixtures, PurchaseReceipt, PurchaseRequest, PurchaseService, RetryPolicy,
    ShopConfig, TxnCoordinator, UnitOfWork, seed_catalog_and_users,
};
pub use domain::{ConcurrencyMode, TxnError};
pub use impls::InMemoryStore;
