//! Waiting on a promise from the outside.
//!
//! A [`Promise`](crate::Promise) never blocks. Code that does want to wait
//! asks it for a [`Settled`] handle, which can be `.await`ed or blocked on.
//!
//! ```
//! use promise_pool::{BoxError, Promise};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let promise = Promise::<u32, BoxError>::new();
//! let settled = promise.settled();
//!
//! let producer = promise.clone();
//! let task = thread::spawn(move || producer.succeed(7));
//!
//! let outcome = block_on(settled).unwrap();
//! assert_eq!(outcome.value(), Some(&7));
//! task.join().expect("The producer thread has panicked");
//! ```
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::{BoxError, Error, Outcome};

struct Slot<T, E> {
    state: Mutex<SlotState<T, E>>,
    condvar: Condvar,
}

struct SlotState<T, E> {
    outcome: Option<Outcome<T, E>>,
    // Set once the notifier is gone, with or without an outcome.
    closed: bool,
    waker: Option<Waker>,
}

impl<T, E> SlotState<T, E> {
    fn ready(&self) -> Option<Result<Outcome<T, E>, Error>> {
        match &self.outcome {
            Some(outcome) => Some(Ok(outcome.clone())),
            None if self.closed => Some(Err(Error::Abandoned)),
            None => None,
        }
    }
}

impl<T, E> Slot<T, E> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected pair of [`Notifier`] and [`Settled`].
pub(crate) fn pair<T, E>() -> (Notifier<T, E>, Settled<T, E>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            outcome: None,
            closed: false,
            waker: None,
        }),
        condvar: Condvar::new(),
    });
    (
        Notifier {
            slot: Arc::clone(&slot),
        },
        Settled { slot },
    )
}

pub(crate) struct Notifier<T, E> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Notifier<T, E> {
    pub(crate) fn notify(self, outcome: Outcome<T, E>) {
        self.slot.lock().outcome = Some(outcome);
        // Waking happens on drop.
    }
}

impl<T, E> Drop for Notifier<T, E> {
    /// Wakes the waiter. Without an outcome it sees [`Error::Abandoned`].
    fn drop(&mut self) {
        let waker = {
            let mut state = self.slot.lock();
            state.closed = true;
            state.waker.take()
        };
        self.slot.condvar.notify_all();
        if let Some(waker) = waker {
            waker.wake()
        }
    }
}

/// Resolves to the [`Outcome`] of the promise it was taken from.
///
/// Resolves to [`Error::Abandoned`] if every handle to that promise was
/// dropped while it was still unsettled.
pub struct Settled<T, E = BoxError> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T, E> Settled<T, E> {
    /// Whether waiting would return immediately.
    pub fn is_settled(&self) -> bool {
        self.slot.lock().ready().is_some()
    }

    /// Blocks the calling thread until the promise settles.
    pub fn wait(self) -> Result<Outcome<T, E>, Error> {
        let mut state = self.slot.lock();
        loop {
            if let Some(ready) = state.ready() {
                return ready;
            }
            state = self
                .slot
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`. Returns `None` if the promise is still
    /// unsettled by then; the caller decides whether to cancel it.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<Outcome<T, E>, Error>> {
        let state = self.slot.lock();
        let (state, _) = self
            .slot
            .condvar
            .wait_timeout_while(state, timeout, |state| state.ready().is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.ready()
    }
}

impl<T, E> Future for Settled<T, E> {
    type Output = Result<Outcome<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.lock();
        match state.ready() {
            Some(ready) => Poll::Ready(ready),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
