//! # STREAMLINE Core
//!
//! Bookkeeping primitives shared by the resource streaming engine:
//! - A bounds-checked byte arena that tracks staging ring occupancy
//! - A sync token ledger that hands out monotonically increasing tokens
//!   and lets any thread poll or block on their completion
//!
//! ## Architecture Rules
//!
//! 1. **No GPU types** - the arena tracks offsets, never pointers
//! 2. **Monotonic progress** - the completed counter never moves backwards
//! 3. **Waiters never spin** - blocking waits park on a condition variable
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamline_core::{StagingArena, TokenLedger};
//!
//! let mut arena = StagingArena::new(256);
//! let slice = arena.try_alloc(64, 16).expect("fits");
//!
//! let ledger = TokenLedger::new();
//! let token = ledger.issue();
//! ledger.advance(token);
//! assert!(ledger.is_completed(token));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod memory;
pub mod sync;

pub use memory::{ArenaSlice, StagingArena};
pub use sync::{LedgerError, LedgerResult, SyncToken, TokenLedger, DEFAULT_RETAINED_FAILURES};
