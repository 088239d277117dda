//! In-memory transactional store.
//!
//! Implements [`TransactionalStore`] with both concurrency modes:
//!
//! - **Pessimistic**: locking reads and every write take an exclusive row
//!   lock held until commit/rollback, and see the latest committed version.
//! - **Optimistic**: no locks. Reads and guarded updates see the snapshot
//!   taken at `begin` plus the transaction's own writes. Commit validates
//!   every written row and refuses with a write conflict (9007) if another
//!   transaction committed it after our snapshot or holds its lock.
//!
//! Writes are buffered per transaction and applied under one mutex at
//! commit, so a commit is atomic. The mutex is never held across an await.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::fault::{FaultPlan, FaultPoint};
use super::lock_table::{LockAttempt, LockTable, TxnId};
use super::versions::{PendingRow, ReadView, RowKey, Ts, VersionChain};
use crate::domain::{
    Book, BookId, ConcurrencyMode, Money, Order, OrderId, StoreError, StoreErrorCode, User, UserId,
};
use crate::observability::{StoreCounts, StoreSnapshot};
use crate::ports::{ExecOutcome, Row, Statement, Transaction, TransactionalStore, Value};

/// Store behaviour knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long a pessimistic transaction waits for a row lock before
    /// failing with `LockWaitTimeout` (1205). `None` waits forever.
    pub lock_wait_timeout: Option<Duration>,
}

struct StoreState {
    books: BTreeMap<BookId, VersionChain<Book>>,
    users: BTreeMap<UserId, VersionChain<User>>,
    orders: BTreeMap<OrderId, VersionChain<Order>>,

    locks: LockTable,

    /// Timestamp of the newest commit; new snapshots start here.
    last_commit_ts: Ts,
    schema_version: u64,
    next_txn_id: TxnId,

    counts: StoreCounts,
    faults: FaultPlan,
}

impl StoreState {
    fn new() -> Self {
        Self {
            books: BTreeMap::new(),
            users: BTreeMap::new(),
            orders: BTreeMap::new(),
            locks: LockTable::default(),
            last_commit_ts: 0,
            schema_version: 1,
            next_txn_id: 1,
            counts: StoreCounts::default(),
            faults: FaultPlan::default(),
        }
    }

    fn latest_ts(&self, key: &RowKey) -> Option<Ts> {
        match key {
            RowKey::Book(id) => self.books.get(id).and_then(VersionChain::latest_ts),
            RowKey::User(id) => self.users.get(id).and_then(VersionChain::latest_ts),
            RowKey::Order(id) => self.orders.get(id).and_then(VersionChain::latest_ts),
        }
    }

    fn exists(&self, key: &RowKey) -> bool {
        self.latest_ts(key).is_some()
    }

    fn apply(&mut self, ts: Ts, row: PendingRow) {
        match row {
            PendingRow::Book(book) => self.books.entry(book.id).or_default().push(ts, book),
            PendingRow::User(user) => self.users.entry(user.id).or_default().push(ts, user),
            PendingRow::Order(order) => self.orders.entry(order.id).or_default().push(ts, order),
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            books: self.books.values().filter_map(|c| c.latest().cloned()).collect(),
            users: self.users.values().filter_map(|c| c.latest().cloned()).collect(),
            orders: self.orders.values().filter_map(|c| c.latest().cloned()).collect(),
        }
    }
}

struct Shared {
    state: Mutex<StoreState>,
    /// Woken whenever a transaction releases its locks.
    released: Notify,
    config: StoreConfig,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the guard cannot leave a half-applied
        // commit behind (commits mutate only after validation), so the
        // poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory implementation of the store capability.
///
/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::new()),
                released: Notify::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.shared.config
    }

    pub fn counts(&self) -> StoreCounts {
        self.shared.state().counts
    }

    /// Latest committed rows.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.shared.state().snapshot()
    }

    pub fn book(&self, id: BookId) -> Option<Book> {
        self.shared
            .state()
            .books
            .get(&id)
            .and_then(VersionChain::latest)
            .cloned()
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.shared
            .state()
            .users
            .get(&id)
            .and_then(VersionChain::latest)
            .cloned()
    }

    /// Number of row locks currently held.
    pub fn held_locks(&self) -> usize {
        self.shared.state().locks.len()
    }

    /// Queue `times` errors with `code` at `point`.
    pub fn inject_fault(&self, point: FaultPoint, code: StoreErrorCode, times: usize) {
        let error = StoreError::new(code, format!("injected fault at {point:?}"));
        self.shared.state().faults.inject(point, error, times);
    }

    pub fn clear_faults(&self) {
        self.shared.state().faults.clear();
    }

    /// Simulate a DDL change: transactions begun before it fail at commit
    /// with `InfoSchemaChanged` (8028).
    pub fn alter_schema(&self) {
        self.shared.state().schema_version += 1;
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn begin(&self, mode: ConcurrencyMode) -> Result<Box<dyn Transaction>, StoreError> {
        let mut state = self.shared.state();
        if let Some(err) = state.faults.take(FaultPoint::Begin) {
            return Err(err);
        }

        let id = state.next_txn_id;
        state.next_txn_id += 1;
        state.counts.begun += 1;

        let txn = MemoryTransaction {
            id,
            mode,
            start_ts: state.last_commit_ts,
            schema_version: state.schema_version,
            writes: BTreeMap::new(),
            inserts: BTreeSet::new(),
            shared: Arc::clone(&self.shared),
            finished: false,
        };
        drop(state);

        debug!(txn = id, statement = mode.begin_statement(), "transaction begun");
        Ok(Box::new(txn))
    }
}

/// Transaction handle of [`InMemoryStore`].
///
/// Dropping an unfinished handle rolls it back.
pub struct MemoryTransaction {
    id: TxnId,
    mode: ConcurrencyMode,
    start_ts: Ts,
    schema_version: u64,

    /// Buffered row images, applied at commit.
    writes: BTreeMap<RowKey, PendingRow>,
    /// Keys created by this transaction (re-checked for duplicates at commit).
    inserts: BTreeSet<RowKey>,

    shared: Arc<Shared>,
    finished: bool,
}

impl MemoryTransaction {
    /// View used by locking reads and guarded writes.
    fn current_view(&self) -> ReadView {
        match self.mode {
            ConcurrencyMode::Pessimistic => ReadView::Latest,
            ConcurrencyMode::Optimistic => ReadView::Snapshot(self.start_ts),
        }
    }

    fn snapshot_view(&self) -> ReadView {
        ReadView::Snapshot(self.start_ts)
    }

    fn book(&self, state: &StoreState, id: BookId, view: ReadView) -> Option<Book> {
        if let Some(PendingRow::Book(book)) = self.writes.get(&RowKey::Book(id)) {
            return Some(book.clone());
        }
        state.books.get(&id).and_then(|c| c.read(view)).cloned()
    }

    fn user(&self, state: &StoreState, id: UserId, view: ReadView) -> Option<User> {
        if let Some(PendingRow::User(user)) = self.writes.get(&RowKey::User(id)) {
            return Some(user.clone());
        }
        state.users.get(&id).and_then(|c| c.read(view)).cloned()
    }

    /// Take the row lock (pessimistic only), waiting for the holder to finish.
    async fn lock_row(&self, key: RowKey) -> Result<(), StoreError> {
        if self.mode == ConcurrencyMode::Optimistic {
            return Ok(());
        }

        let deadline = self
            .shared
            .config
            .lock_wait_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            // notified() を先に作る: release がチェックとの間に来ても取りこぼさない
            let released = self.shared.released.notified();

            let holder = {
                let mut state = self.shared.state();
                match state.locks.try_acquire(key, self.id) {
                    LockAttempt::Granted => return Ok(()),
                    LockAttempt::Held(holder) => holder,
                }
            };

            debug!(txn = self.id, row = %key, holder, "waiting for row lock");

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        return Err(StoreError::new(
                            StoreErrorCode::LockWaitTimeout,
                            format!("Lock wait timeout exceeded on {key}; try restarting transaction"),
                        ));
                    }
                }
                None => released.await,
            }
        }
    }

    async fn insert(&mut self, row: PendingRow) -> Result<ExecOutcome, StoreError> {
        let key = row.key();
        self.lock_row(key).await?;

        let duplicate = self.writes.contains_key(&key) || self.shared.state().exists(&key);
        if duplicate {
            return Err(duplicate_entry(key));
        }

        self.writes.insert(key, row);
        self.inserts.insert(key);
        Ok(ExecOutcome::Affected(1))
    }

    async fn select_book(
        &self,
        id: BookId,
        view: ReadView,
        columns: fn(&Book) -> Row,
    ) -> Result<ExecOutcome, StoreError> {
        let book = {
            let state = self.shared.state();
            self.book(&state, id, view)
        };
        Ok(ExecOutcome::Rows(book.iter().map(columns).collect()))
    }

    async fn decrement_stock(
        &mut self,
        id: BookId,
        amount: u32,
        guard: u32,
    ) -> Result<ExecOutcome, StoreError> {
        self.lock_row(RowKey::Book(id)).await?;

        let updated = {
            let state = self.shared.state();
            self.book(&state, id, self.current_view())
        }
        .and_then(|mut book| {
            // WHERE stock - guard >= 0
            book.stock.checked_sub(guard)?;
            book.stock = book.stock.checked_sub(amount)?;
            Some(book)
        });

        match updated {
            Some(book) => {
                self.writes.insert(RowKey::Book(id), PendingRow::Book(book));
                Ok(ExecOutcome::Affected(1))
            }
            None => Ok(ExecOutcome::Affected(0)),
        }
    }

    async fn debit_balance(&mut self, id: UserId, amount: Money) -> Result<ExecOutcome, StoreError> {
        self.lock_row(RowKey::User(id)).await?;

        let user = {
            let state = self.shared.state();
            self.user(&state, id, self.current_view())
        };

        match user {
            Some(mut user) => {
                user.balance = user.balance - amount;
                self.writes.insert(RowKey::User(id), PendingRow::User(user));
                Ok(ExecOutcome::Affected(1))
            }
            None => Ok(ExecOutcome::Affected(0)),
        }
    }

    /// Commit-time checks and application. Runs under the store mutex.
    fn validate_and_apply(&mut self, state: &mut StoreState) -> Result<(), StoreError> {
        if let Some(err) = state.faults.take(FaultPoint::Commit) {
            return Err(err);
        }

        if state.schema_version != self.schema_version {
            return Err(StoreError::new(
                StoreErrorCode::InfoSchemaChanged,
                "Information schema is changed during the execution of the statement",
            ));
        }

        if let Some(key) = self.inserts.iter().find(|key| state.exists(key)) {
            return Err(duplicate_entry(*key));
        }

        if self.mode == ConcurrencyMode::Optimistic {
            for key in self.writes.keys() {
                let committed_after_snapshot = state
                    .latest_ts(key)
                    .is_some_and(|ts| ts > self.start_ts);
                let locked_by_other = state
                    .locks
                    .holder(key)
                    .is_some_and(|holder| holder != self.id);

                if committed_after_snapshot || locked_by_other {
                    state.counts.conflicts += 1;
                    return Err(StoreError::write_conflict(format!(
                        "Write conflict, txnStartTS={}, conflictKey={}.{key}",
                        self.start_ts,
                        key.table()
                    )));
                }
            }
        }

        if self.writes.is_empty() {
            return Ok(());
        }

        let commit_ts = state.last_commit_ts + 1;
        for row in std::mem::take(&mut self.writes).into_values() {
            state.apply(commit_ts, row);
        }
        state.last_commit_ts = commit_ts;
        Ok(())
    }

    /// Discard buffered writes and release locks. Idempotent.
    fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.writes.clear();
        self.inserts.clear();
        {
            let mut state = self.shared.state();
            state.locks.release_all(self.id);
            state.counts.rolled_back += 1;
        }
        self.shared.released.notify_waiters();
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    async fn execute(
        &mut self,
        statement: Statement,
        params: &[Value],
    ) -> Result<ExecOutcome, StoreError> {
        let fault = self.shared.state().faults.take(FaultPoint::Execute(statement));
        if let Some(err) = fault {
            return Err(err);
        }

        let args = Params::new(statement, params);
        match statement {
            Statement::InsertBook => {
                let book = Book {
                    id: BookId::new(args.uint(0)?),
                    title: args.text(1)?,
                    category: args.text(2)?,
                    published_at: args.timestamp(3)?,
                    price: args.money(4)?,
                    stock: args.count(5)?,
                };
                self.insert(PendingRow::Book(book)).await
            }
            Statement::InsertUser => {
                let user = User {
                    id: UserId::new(args.uint(0)?),
                    nickname: args.text(1)?,
                    balance: args.money(2)?,
                };
                self.insert(PendingRow::User(user)).await
            }
            Statement::InsertOrder => {
                let order = Order {
                    id: OrderId::new(args.uint(0)?),
                    book_id: BookId::new(args.uint(1)?),
                    user_id: UserId::new(args.uint(2)?),
                    quantity: args.count(3)?,
                };
                self.insert(PendingRow::Order(order)).await
            }
            Statement::SelectBookPriceForUpdate => {
                let id = BookId::new(args.uint(0)?);
                self.lock_row(RowKey::Book(id)).await?;
                self.select_book(id, self.current_view(), |b| Row::new(vec![b.price.into()]))
                    .await
            }
            Statement::SelectBookPriceAndStock => {
                let id = BookId::new(args.uint(0)?);
                self.select_book(id, self.snapshot_view(), |b| {
                    Row::new(vec![b.price.into(), b.stock.into()])
                })
                .await
            }
            Statement::DecrementStock => {
                let amount = args.count(0)?;
                let id = BookId::new(args.uint(1)?);
                let guard = args.count(2)?;
                self.decrement_stock(id, amount, guard).await
            }
            Statement::DebitBalance => {
                let amount = args.money(0)?;
                let id = UserId::new(args.uint(1)?);
                self.debit_balance(id, amount).await
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.shared);
        let result = {
            let mut state = shared.state();
            let result = self.validate_and_apply(&mut state);
            state.locks.release_all(self.id);
            match &result {
                Ok(()) => state.counts.committed += 1,
                Err(_) => state.counts.rolled_back += 1,
            }
            result
        };
        self.finished = true;
        shared.released.notify_waiters();

        match &result {
            Ok(()) => debug!(txn = self.id, "transaction committed"),
            Err(err) => debug!(txn = self.id, error = %err, "commit refused"),
        }
        result
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let fault = self.shared.state().faults.take(FaultPoint::Rollback);
        // Locks are released even when the rollback reports an error.
        self.abort();
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.abort();
    }
}

fn duplicate_entry(key: RowKey) -> StoreError {
    StoreError::new(
        StoreErrorCode::DuplicateEntry,
        format!("Duplicate entry '{key}' for key '{}.PRIMARY'", key.table()),
    )
}

/// Typed access to positional parameters.
struct Params<'a> {
    statement: Statement,
    values: &'a [Value],
}

impl<'a> Params<'a> {
    fn new(statement: Statement, values: &'a [Value]) -> Self {
        Self { statement, values }
    }

    fn get(&self, index: usize) -> Result<&'a Value, StoreError> {
        self.values.get(index).ok_or_else(|| {
            StoreError::wrong_arguments(format!(
                "missing parameter {index} for `{}`",
                self.statement.sql()
            ))
        })
    }

    fn mismatch(&self, index: usize, expected: &str) -> StoreError {
        StoreError::wrong_arguments(format!(
            "parameter {index} of `{}` must be {expected}",
            self.statement.sql()
        ))
    }

    fn uint(&self, index: usize) -> Result<u64, StoreError> {
        self.get(index)?
            .as_uint()
            .ok_or_else(|| self.mismatch(index, "an unsigned integer"))
    }

    fn count(&self, index: usize) -> Result<u32, StoreError> {
        u32::try_from(self.uint(index)?).map_err(|_| self.mismatch(index, "a 32-bit count"))
    }

    fn text(&self, index: usize) -> Result<String, StoreError> {
        self.get(index)?
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(index, "text"))
    }

    fn money(&self, index: usize) -> Result<Money, StoreError> {
        self.get(index)?
            .as_money()
            .ok_or_else(|| self.mismatch(index, "a decimal"))
    }

    fn timestamp(&self, index: usize) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
        self.get(index)?
            .as_timestamp()
            .ok_or_else(|| self.mismatch(index, "a timestamp"))
    }
}
