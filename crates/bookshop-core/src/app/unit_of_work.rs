//! Unit of work: the caller-supplied body of a transaction.

use async_trait::async_trait;

use crate::domain::TxnError;
use crate::ports::Transaction;

/// Business logic run inside one open transaction.
///
/// The coordinator owns begin/commit/rollback and retries; the unit of work
/// only issues statements. It may be run several times for one call (each
/// time against a new transaction), so it must not carry state from a
/// failed run into the next one.
///
/// # 使用例
/// ```ignore
/// struct Touch(BookId);
///
/// #[async_trait]
/// impl UnitOfWork for Touch {
///     type Output = ();
///
///     async fn run(&self, txn: &mut dyn Transaction) -> Result<(), TxnError> {
///         txn.execute(Statement::SelectBookPriceAndStock, &[self.0.into()]).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    async fn run(&self, txn: &mut dyn Transaction) -> Result<Self::Output, TxnError>;
}
