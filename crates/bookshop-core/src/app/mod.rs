//! App - アプリケーション層
//!
//! ports を組み合わせてトランザクションの実行とワークフローを実装します。
//!
//! # 主要コンポーネント
//! - **TxnCoordinator**: begin → unit of work → commit/rollback、楽観モードでの有界リトライ
//! - **ErrorClassifier**: ストアのエラーコードから Retryable / Fatal を判定
//! - **PurchaseService**: 悲観 / 楽観の購入ワークフロー
//! - **seed_catalog_and_users**: 初期データ投入（リトライなし）
//! - **ShopConfig**: JSON 設定

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod purchase;
pub mod retry;
pub mod seed;
pub mod unit_of_work;

// 主要な型を再エクスポート
pub use self::classifier::{DEFAULT_RETRYABLE_CODES, ErrorClassifier};
pub use self::config::{ConfigError, ShopConfig};
pub use self::coordinator::TxnCoordinator;
pub use self::purchase::{
    OptimisticPurchase, PessimisticPurchase, PurchaseReceipt, PurchaseRequest, PurchaseService,
};
pub use self::retry::RetryPolicy;
pub use self::seed::{Fixtures, seed_catalog_and_users};
pub use self::unit_of_work::UnitOfWork;
