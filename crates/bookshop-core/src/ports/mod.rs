//! Ports - 抽象化レイヤー
//!
//! The traits here are the seams to the outside world: the transactional
//! store, time, and identifier generation. The coordinator depends only on
//! these, so it can run against the in-memory store or a fake.

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{ExecOutcome, Row, Statement, Transaction, TransactionalStore, Value};
