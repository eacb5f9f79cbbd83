//! # Sync Tokens
//!
//! Completion tracking for asynchronous GPU work.
//!
//! ```text
//!   Producer A ──┐  issue()                 advance(max token of set)
//!   Producer B ──┼──────────> [ TokenLedger ] <────────────── Streamer
//!   Producer C ──┘                 │
//!                                  └──> wait(t) / is_completed(t)
//! ```
//!
//! A token is a plain integer. Holding one costs nothing and it may be
//! copied to any thread. Completion is answered by comparing it against a
//! single monotonic counter, so tokens always complete in issuance order.

mod ledger;

pub use ledger::{TokenLedger, DEFAULT_RETAINED_FAILURES};

use std::fmt;
use thiserror::Error;

/// Handle for one unit of queued GPU work.
///
/// Tokens are handed out in strictly increasing order. The zero token
/// ([`SyncToken::NONE`]) is never issued and is always complete, which makes
/// it the natural value for work that finished synchronously.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncToken(u64);

impl SyncToken {
    /// The token that is complete before anything is issued.
    pub const NONE: Self = Self(0);

    /// Wraps a raw counter value.
    #[inline]
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns true for [`SyncToken::NONE`].
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

impl From<SyncToken> for u64 {
    fn from(token: SyncToken) -> Self {
        token.0
    }
}

/// Errors reported by [`TokenLedger`] waits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The token was never handed out, so waiting on it would never return.
    #[error("{token} was never issued (last issued: {last_issued})")]
    NotIssued {
        /// The token that was waited on.
        token: SyncToken,
        /// Highest token issued at the time of the wait.
        last_issued: SyncToken,
    },

    /// The token retired, but its work was dropped.
    #[error("{token} failed: {reason}")]
    Failed {
        /// The failed token.
        token: SyncToken,
        /// Why the work was dropped.
        reason: String,
    },

    /// The ledger stopped making progress for good.
    #[error("ledger poisoned: {0}")]
    Poisoned(String),
}

/// Result type for ledger waits.
pub type LedgerResult<T> = Result<T, LedgerError>;
