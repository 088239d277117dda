//! Concurrency-control mode of a transaction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selects the store's locking discipline for a whole transaction and
/// whether the coordinator may retry it.
///
/// - `Pessimistic`: row locks are taken eagerly on locking reads and writes.
///   Never retried automatically.
/// - `Optimistic`: no locks; conflicts are detected at commit. Retried on
///   store-detected conflicts while budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    Pessimistic,
    Optimistic,
}

impl ConcurrencyMode {
    pub const fn begin_statement(self) -> &'static str {
        match self {
            ConcurrencyMode::Pessimistic => "BEGIN PESSIMISTIC",
            ConcurrencyMode::Optimistic => "BEGIN OPTIMISTIC",
        }
    }

    pub const fn allows_retry(self) -> bool {
        matches!(self, ConcurrencyMode::Optimistic)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ConcurrencyMode::Pessimistic => "pessimistic",
            ConcurrencyMode::Optimistic => "optimistic",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown concurrency mode '{0}' (expected 'pessimistic' or 'optimistic')")]
pub struct ParseModeError(String);

impl FromStr for ConcurrencyMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pessimistic" => Ok(ConcurrencyMode::Pessimistic),
            "optimistic" => Ok(ConcurrencyMode::Optimistic),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}
