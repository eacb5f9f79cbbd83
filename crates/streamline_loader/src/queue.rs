//! # Request Queue
//!
//! Many producers, one consumer:
//!
//! ```text
//!   Thread 1 ──┐  push_with (token issued under the lock)
//!   Thread 2 ──┼──> [Mutex<VecDeque>] ──pop_all──> Streamer
//!   Thread N ──┘        + Condvar
//! ```
//!
//! Issuing the token while holding the queue lock makes queue order and
//! token order identical, which is what lets the ledger complete tokens
//! with a single counter.

use crate::error::{LoaderError, LoaderResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;
use streamline_core::{SyncToken, TokenLedger};

/// Result of a consumer-side pop.
#[derive(Debug)]
pub(crate) enum Pop<T> {
    /// Everything that was queued, oldest first.
    Batch(Vec<T>),
    /// The timeout elapsed with nothing queued.
    TimedOut,
    /// The queue is closed and empty.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO of pending requests.
pub(crate) struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

impl<T> RequestQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Issues a token, builds the item from it and appends it.
    ///
    /// Returns [`LoaderError::ShutDown`] once the queue is closed; no token
    /// is issued in that case.
    pub(crate) fn push_with(
        &self,
        ledger: &TokenLedger,
        build: impl FnOnce(SyncToken) -> T,
    ) -> LoaderResult<SyncToken> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LoaderError::ShutDown);
        }
        let token = ledger.issue();
        state.items.push_back(build(token));
        drop(state);

        self.not_empty.notify_one();
        Ok(token)
    }

    /// Takes every queued item, blocking while the queue is empty.
    ///
    /// With a timeout, gives up after it elapses. Items queued before
    /// [`RequestQueue::close`] are still returned after it.
    pub(crate) fn pop_all(&self, timeout: Option<Duration>) -> Pop<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() {
            if state.closed {
                return Pop::Closed;
            }
            match timeout {
                Some(timeout) => {
                    if self.not_empty.wait_for(&mut state, timeout).timed_out()
                        && state.items.is_empty()
                    {
                        return if state.closed { Pop::Closed } else { Pop::TimedOut };
                    }
                }
                None => self.not_empty.wait(&mut state),
            }
        }
        Pop::Batch(state.items.drain(..).collect())
    }

    /// Refuses further pushes and wakes the consumer.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Number of requests waiting for the streamer.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_order_matches_tokens() {
        let queue = Arc::new(RequestQueue::new());
        let ledger = Arc::new(TokenLedger::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..250 {
                        queue.push_with(&ledger, |token| token).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 1000);
        let Pop::Batch(tokens) = queue.pop_all(None) else {
            panic!("expected a batch");
        };
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tokens.last().copied(), Some(ledger.last_issued()));
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        assert!(matches!(
            queue.pop_all(Some(Duration::from_millis(5))),
            Pop::TimedOut
        ));
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(RequestQueue::new());
        let ledger = TokenLedger::new();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_all(None))
        };
        thread::sleep(Duration::from_millis(10));
        queue.push_with(&ledger, |_| 7u32).unwrap();

        assert!(matches!(consumer.join().unwrap(), Pop::Batch(items) if items == vec![7]));
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let queue = RequestQueue::new();
        let ledger = TokenLedger::new();
        queue.push_with(&ledger, |_| 1u32).unwrap();
        queue.close();

        assert_eq!(queue.push_with(&ledger, |_| 2u32), Err(LoaderError::ShutDown));
        assert_eq!(ledger.last_issued().value(), 1);
        assert!(matches!(queue.pop_all(None), Pop::Batch(items) if items == vec![1]));
        assert!(matches!(queue.pop_all(None), Pop::Closed));
    }
}
