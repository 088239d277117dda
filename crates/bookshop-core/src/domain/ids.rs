//! Domain identifiers (strongly-typed IDs).
//!
//! Row identities (`BookId`, `UserId`, `OrderId`) share one generic `Id<T>`
//! over `u64`. `T` is a zero-sized marker type: it costs nothing at runtime
//! but a `BookId` can never be passed where a `UserId` is expected.
//!
//! `CallId` is different: it is a ULID minted per logical coordinator call
//! so that trace lines of the retries of one purchase can be grouped.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each row-id type.
///
/// Provides the prefix used by `Display` ("book-", "user-", "order-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic row identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: u64,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn get(self) -> u64 {
        self.value
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// Serialized as the bare integer: the marker is a compile-time concept only.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::new)
    }
}

// ========================================
// Marker types
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Book {}

impl IdMarker for Book {
    fn prefix() -> &'static str {
        "book-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Order {}

impl IdMarker for Order {
    fn prefix() -> &'static str {
        "order-"
    }
}

/// Identifier of a Book row.
pub type BookId = Id<Book>;

/// Identifier of a User row.
pub type UserId = Id<User>;

/// Identifier of an Order row.
pub type OrderId = Id<Order>;

/// Identifier of one logical coordinator call (spanning all of its attempts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Ulid);

impl CallId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for CallId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_their_prefix() {
        assert_eq!(BookId::new(1).to_string(), "book-1");
        assert_eq!(UserId::new(2).to_string(), "user-2");
        assert_eq!(OrderId::new(1000).to_string(), "order-1000");

        // let _: BookId = UserId::new(2); // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let s = serde_json::to_string(&BookId::new(42)).unwrap();
        assert_eq!(s, "42");

        let back: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(back, UserId::new(7));
    }

    #[test]
    fn marker_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<BookId>(), size_of::<u64>());
        assert_eq!(size_of::<OrderId>(), size_of::<u64>());
    }

    #[test]
    fn call_ids_are_sortable_by_creation_time() {
        let id1 = CallId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = CallId::from_ulid(Ulid::new());

        assert!(id1 < id2);
        assert!(id1.to_string().starts_with("call-"));
    }
}
