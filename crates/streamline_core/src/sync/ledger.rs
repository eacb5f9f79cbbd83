//! Issued/completed counters with blocking waiters.

use super::{LedgerError, LedgerResult, SyncToken};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Failure records kept for tokens that have already retired.
pub const DEFAULT_RETAINED_FAILURES: usize = 1024;

/// State that waiters inspect under the lock.
#[derive(Debug)]
struct LedgerState {
    /// Tokens that retired without their work being applied.
    failures: BTreeMap<u64, String>,
    /// Most retired failures kept before the oldest are forgotten.
    retained_failures: usize,
    /// Set once progress has stopped for good.
    poisoned: Option<String>,
}

impl LedgerState {
    /// Forgets the oldest retired failures beyond the retention limit.
    ///
    /// Failures of tokens that have not completed yet are never dropped.
    fn prune_failures(&mut self, completed: u64) {
        let retired = self.failures.range(..=completed).count();
        let excess = retired.saturating_sub(self.retained_failures);
        for _ in 0..excess {
            self.failures.pop_first();
        }
    }
}

/// Hands out sync tokens and tracks how far completion has progressed.
///
/// Two counters carry the whole state:
/// - `issued` is bumped by producers, one per logical request
/// - `completed` is raised by the single consumer once the GPU has retired
///   every token up to that value
///
/// Polling is a single atomic load. Blocking waits park on a condition
/// variable that is notified on every [`TokenLedger::advance`], so a wait
/// on a token the consumer has not even dequeued yet still wakes up as
/// soon as it is covered.
///
/// Failure records are kept for the most recent retired failures only
/// (see [`TokenLedger::with_retained_failures`]). Waiting on a failed
/// token that has been forgotten reports success.
#[derive(Debug)]
pub struct TokenLedger {
    /// Highest token handed out.
    issued: AtomicU64,
    /// Highest token known to be complete.
    completed: AtomicU64,
    /// Failure records and poison flag.
    state: Mutex<LedgerState>,
    /// Notified on progress and on poisoning.
    progressed: Condvar,
}

impl Default for TokenLedger {
    fn default() -> Self {
        Self::with_retained_failures(DEFAULT_RETAINED_FAILURES)
    }
}

impl TokenLedger {
    /// Creates a ledger with nothing issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that keeps at most `retained` failure records for
    /// tokens that have already completed.
    #[must_use]
    pub fn with_retained_failures(retained: usize) -> Self {
        Self {
            issued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            state: Mutex::new(LedgerState {
                failures: BTreeMap::new(),
                retained_failures: retained,
                poisoned: None,
            }),
            progressed: Condvar::new(),
        }
    }

    /// Issues the next token.
    ///
    /// Callers that need queue order to match token order must issue while
    /// holding the queue lock.
    #[inline]
    pub fn issue(&self) -> SyncToken {
        SyncToken(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Returns the highest token issued so far.
    #[inline]
    #[must_use]
    pub fn last_issued(&self) -> SyncToken {
        SyncToken(self.issued.load(Ordering::Acquire))
    }

    /// Returns the highest token known to be complete.
    #[inline]
    #[must_use]
    pub fn last_completed(&self) -> SyncToken {
        SyncToken(self.completed.load(Ordering::Acquire))
    }

    /// Non-blocking completion check.
    ///
    /// A token that retired as failed also counts as completed.
    #[inline]
    #[must_use]
    pub fn is_completed(&self, token: SyncToken) -> bool {
        token.0 <= self.completed.load(Ordering::Acquire)
    }

    /// Returns true when every issued token is complete.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.is_completed(self.last_issued())
    }

    /// Marks every token up to and including `to` as complete.
    ///
    /// The counter never moves backwards; advancing to an older token is a
    /// no-op apart from waking waiters.
    pub fn advance(&self, to: SyncToken) {
        {
            let mut state = self.state.lock();
            let previous = self.completed.fetch_max(to.0, Ordering::AcqRel);
            state.prune_failures(previous.max(to.0));
        }
        self.progressed.notify_all();
    }

    /// Records that `token` will retire without its work applied.
    ///
    /// The token still completes in order once the consumer advances past
    /// it; waiting on it then reports [`LedgerError::Failed`].
    pub fn record_failure(&self, token: SyncToken, reason: impl Into<String>) {
        if token.is_none() {
            return;
        }
        self.state.lock().failures.insert(token.0, reason.into());
    }

    /// Returns the failure reason recorded for `token`, if any.
    #[must_use]
    pub fn failure(&self, token: SyncToken) -> Option<String> {
        self.state.lock().failures.get(&token.0).cloned()
    }

    /// Stops the ledger for good and wakes every waiter.
    ///
    /// Tokens that already completed keep reporting success. Everything
    /// else fails with [`LedgerError::Poisoned`]. Only the first reason is
    /// kept.
    pub fn poison(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock();
            if state.poisoned.is_none() {
                state.poisoned = Some(reason.into());
            }
        }
        self.progressed.notify_all();
    }

    /// Returns the poison reason if the ledger has been poisoned.
    #[must_use]
    pub fn poison_reason(&self) -> Option<String> {
        self.state.lock().poisoned.clone()
    }

    /// Returns true if the ledger has been poisoned.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    /// Blocks until `token` is complete.
    ///
    /// Returns immediately for tokens that are already complete.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotIssued`] if `token` was never handed out
    /// - [`LedgerError::Failed`] if the token retired as failed
    /// - [`LedgerError::Poisoned`] if the ledger stopped before `token`
    ///   completed
    pub fn wait(&self, token: SyncToken) -> LedgerResult<()> {
        self.check_issued(token)?;
        let state = self.park(token)?;
        Self::outcome(&state, token)
    }

    /// Like [`TokenLedger::wait`], giving up after `timeout`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    ///
    /// # Errors
    ///
    /// Same as [`TokenLedger::wait`].
    pub fn wait_timeout(&self, token: SyncToken, timeout: Duration) -> LedgerResult<bool> {
        self.check_issued(token)?;
        let deadline = Instant::now() + timeout;
        match self.park_until(token, deadline)? {
            Some(state) => Self::outcome(&state, token).map(|()| true),
            None => Ok(false),
        }
    }

    /// Waits for the highest token issued at the time of the call.
    ///
    /// Tokens issued concurrently while waiting are not covered. Individual
    /// failed tokens do not fail this wait; only poisoning does.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Poisoned`] if the ledger stopped before the snapshot
    /// token completed.
    pub fn wait_all(&self) -> LedgerResult<()> {
        let snapshot = self.last_issued();
        self.park(snapshot).map(drop)
    }

    fn check_issued(&self, token: SyncToken) -> LedgerResult<()> {
        let last_issued = self.last_issued();
        if token > last_issued {
            return Err(LedgerError::NotIssued { token, last_issued });
        }
        Ok(())
    }

    /// Parks until `token` is covered by the completed counter.
    fn park(&self, token: SyncToken) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        let mut state = self.state.lock();
        loop {
            if self.is_completed(token) {
                return Ok(state);
            }
            if let Some(reason) = &state.poisoned {
                return Err(LedgerError::Poisoned(reason.clone()));
            }
            self.progressed.wait(&mut state);
        }
    }

    /// Like [`TokenLedger::park`], returning `None` once `deadline` passes.
    fn park_until(
        &self,
        token: SyncToken,
        deadline: Instant,
    ) -> LedgerResult<Option<MutexGuard<'_, LedgerState>>> {
        let mut state = self.state.lock();
        loop {
            if self.is_completed(token) {
                return Ok(Some(state));
            }
            if let Some(reason) = &state.poisoned {
                return Err(LedgerError::Poisoned(reason.clone()));
            }
            if self.progressed.wait_until(&mut state, deadline).timed_out()
                && !self.is_completed(token)
                && state.poisoned.is_none()
            {
                return Ok(None);
            }
        }
    }

    fn outcome(state: &LedgerState, token: SyncToken) -> LedgerResult<()> {
        match state.failures.get(&token.0) {
            Some(reason) => Err(LedgerError::Failed {
                token,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}
