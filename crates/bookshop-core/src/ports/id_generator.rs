//! IdGenerator port - call ID 生成の抽象化
//!
//! Row identities (book/user/order) are chosen by the caller; only the
//! per-call trace identifier is generated here.

use crate::domain::CallId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates identifiers for logical coordinator calls.
///
/// `Send + Sync` so one generator can be shared by concurrent buyers.
pub trait IdGenerator: Send + Sync {
    fn generate_call_id(&self) -> CallId;
}

/// ULID based generator.
///
/// The timestamp part comes from the injected `Clock`, so a `FixedClock`
/// yields IDs with a deterministic time prefix.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_call_id(&self) -> CallId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CallId::from(ulid)
    }
}
