//! Domain model (IDs, money, rows, modes, errors, attempt records).

pub mod attempt;
pub mod errors;
pub mod ids;
pub mod mode;
pub mod model;
pub mod money;
pub mod state;

pub use attempt::{AttemptRecord, CallReport};
pub use errors::{
    BusinessError, ErrorKind, FailureClass, StoreError, StoreErrorCode, TxnError,
};
pub use ids::{BookId, CallId, OrderId, UserId};
pub use mode::{ConcurrencyMode, ParseModeError};
pub use model::{Book, Order, User};
pub use money::Money;
pub use state::AttemptState;
