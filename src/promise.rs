//! The promise state machine.
//!
//! A [`Promise`] starts out [`State::Pending`], may be moved to
//! [`State::Running`] by whoever executes the work, and settles exactly once
//! into one of the terminal states. Listeners can be registered at any time;
//! a listener registered after its terminal state was reached is delivered
//! during registration.
//!
//! ```
//! use promise_pool::{BoxError, Promise};
//! use std::sync::{Arc, Mutex};
//!
//! let promise = Promise::<String, BoxError>::new();
//! promise.succeed("x".to_owned());
//!
//! let seen = Arc::new(Mutex::new(None));
//! let sink = seen.clone();
//! promise.on_complete(move |value| *sink.lock().unwrap() = Some(value.clone()));
//! assert_eq!(seen.lock().unwrap().as_deref(), Some("x"));
//! ```
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, error, trace};

use crate::settled::{self, Settled};
use crate::{BoxError, DispatchContext, Error, Job};

/// Lifecycle of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl State {
    /// Succeeded, Failed and Cancelled are terminal; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Succeeded | State::Failed | State::Cancelled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Succeeded => "succeeded",
            State::Failed => "failed",
            State::Cancelled => "cancelled",
        })
    }
}

/// The terminal outcome of a [`Promise`].
#[derive(Debug)]
pub enum Outcome<T, E = BoxError> {
    Succeeded(Arc<T>),
    Failed(Arc<E>),
    Cancelled,
}

impl<T, E> Clone for Outcome<T, E> {
    fn clone(&self) -> Self {
        match self {
            Outcome::Succeeded(value) => Outcome::Succeeded(Arc::clone(value)),
            Outcome::Failed(error) => Outcome::Failed(Arc::clone(error)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

impl<T, E> Outcome<T, E> {
    pub fn state(&self) -> State {
        match self {
            Outcome::Succeeded(_) => State::Succeeded,
            Outcome::Failed(_) => State::Failed,
            Outcome::Cancelled => State::Cancelled,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Succeeded(value) => Some(value.as_ref()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Outcome::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// What became of a value or error handed to a producer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The promise settled with it.
    Settled,
    /// The promise had already been cancelled; the value was dropped.
    Discarded,
}

enum Listener<T, E> {
    Complete(Box<dyn FnOnce(&T) + Send>),
    Fail(Box<dyn FnOnce(&E) + Send>),
    Cancel(Job),
    // Sees every outcome and always runs inline.
    Observe(Box<dyn FnOnce(Outcome<T, E>) + Send>),
}

struct Inner<T, E> {
    state: State,
    result: Option<Arc<T>>,
    error: Option<Arc<E>>,
    listeners: Vec<Listener<T, E>>,
    // Thread currently handing out listeners after settlement. Late
    // registrants from other threads queue behind it.
    delivering: Option<ThreadId>,
}

impl<T, E> Inner<T, E> {
    fn outcome(&self) -> Option<Outcome<T, E>> {
        match self.state {
            State::Succeeded => self.result.clone().map(Outcome::Succeeded),
            State::Failed => self.error.clone().map(Outcome::Failed),
            State::Cancelled => Some(Outcome::Cancelled),
            State::Pending | State::Running => None,
        }
    }

    fn record(&mut self, outcome: &Outcome<T, E>) {
        match outcome {
            Outcome::Succeeded(value) => self.result = Some(Arc::clone(value)),
            Outcome::Failed(error) => self.error = Some(Arc::clone(error)),
            Outcome::Cancelled => {}
        }
        self.state = outcome.state();
    }
}

/// A shared handle to the eventual outcome of one unit of work.
///
/// Clones refer to the same promise. The producer side ([`succeed`],
/// [`fail`], [`cancel`]) and the consumer side ([`on_complete`],
/// [`on_fail`], [`on_cancel`] and the status queries) may be used from any
/// number of threads at once.
///
/// Listeners run on the configured [`DispatchContext`], or inline on the
/// thread that caused the delivery when there is none. They never run while
/// the promise's lock is held, so a listener may call back into the promise.
/// Listeners are handed out in registration order, one delivering thread at a
/// time. A listener that panics is logged and does not stop the others.
///
/// [`succeed`]: Promise::succeed
/// [`fail`]: Promise::fail
/// [`cancel`]: Promise::cancel
/// [`on_complete`]: Promise::on_complete
/// [`on_fail`]: Promise::on_fail
/// [`on_cancel`]: Promise::on_cancel
pub struct Promise<T, E = BoxError> {
    inner: Arc<Mutex<Inner<T, E>>>,
    dispatch: Option<Arc<dyn DispatchContext>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .field("dispatched", &self.dispatch.is_some())
            .finish()
    }
}

impl<T, E> Default for Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// A pending promise whose listeners run inline.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A pending promise whose listeners are all posted to `dispatch`.
    pub fn with_dispatch<D>(dispatch: D) -> Self
    where
        D: DispatchContext + 'static,
    {
        Self::build(Some(Arc::new(dispatch)))
    }

    fn build(dispatch: Option<Arc<dyn DispatchContext>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                result: None,
                error: None,
                listeners: Vec::new(),
                delivering: None,
            })),
            dispatch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a pending promise to [`State::Running`].
    ///
    /// Returns `false` and changes nothing if the promise was not pending.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != State::Pending {
            return false;
        }
        inner.state = State::Running;
        true
    }

    /// Settles the promise with `value` and notifies the complete listeners.
    ///
    /// If the promise was cancelled first the value is dropped and
    /// [`Resolution::Discarded`] is returned.
    ///
    /// # Panics
    ///
    /// Panics if the promise already succeeded or failed.
    #[track_caller]
    pub fn succeed(&self, value: T) -> Resolution {
        match self.try_succeed(value) {
            Ok(resolution) => resolution,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`succeed`](Self::succeed), but reports a double settlement as
    /// [`Error::AlreadySettled`] instead of panicking.
    pub fn try_succeed(&self, value: T) -> Result<Resolution, Error> {
        self.settle(Outcome::Succeeded(Arc::new(value)))
    }

    /// Settles the promise with `error` and notifies the fail listeners.
    ///
    /// Same rules as [`succeed`](Self::succeed).
    ///
    /// # Panics
    ///
    /// Panics if the promise already succeeded or failed.
    #[track_caller]
    pub fn fail(&self, error: E) -> Resolution {
        match self.try_fail(error) {
            Ok(resolution) => resolution,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_fail(&self, error: E) -> Result<Resolution, Error> {
        self.settle(Outcome::Failed(Arc::new(error)))
    }

    /// Cancels the promise unless it already reached a terminal state.
    ///
    /// Returns `true` only for the call that actually cancelled. A result
    /// that already landed is never replaced.
    pub fn cancel(&self) -> bool {
        let listeners = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                debug!(state = %inner.state, "ignoring cancel request");
                return false;
            }
            inner.record(&Outcome::Cancelled);
            inner.delivering = Some(thread::current().id());
            mem::take(&mut inner.listeners)
        };
        debug!(listeners = listeners.len(), "promise cancelled");
        self.deliver(&Outcome::Cancelled, listeners);
        true
    }

    fn settle(&self, outcome: Outcome<T, E>) -> Result<Resolution, Error> {
        let listeners = {
            let mut inner = self.lock();
            match inner.state {
                State::Cancelled => {
                    debug!(outcome = %outcome.state(), "promise already cancelled; discarding");
                    return Ok(Resolution::Discarded);
                }
                state @ (State::Succeeded | State::Failed) => {
                    return Err(Error::AlreadySettled(state));
                }
                State::Pending | State::Running => {}
            }
            inner.record(&outcome);
            inner.delivering = Some(thread::current().id());
            mem::take(&mut inner.listeners)
        };
        debug!(state = %outcome.state(), listeners = listeners.len(), "promise settled");
        self.deliver(&outcome, listeners);
        Ok(Resolution::Settled)
    }

    /// Registers a listener for success.
    ///
    /// Fires immediately if the promise already succeeded; never fires if it
    /// failed or was cancelled.
    pub fn on_complete<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(Listener::Complete(Box::new(listener)))
    }

    /// Registers a listener for failure.
    pub fn on_fail<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.register(Listener::Fail(Box::new(listener)))
    }

    /// Registers a listener for cancellation.
    pub fn on_cancel<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(Listener::Cancel(Box::new(listener)))
    }

    /// A handle that can be awaited or blocked on until the promise settles.
    pub fn settled(&self) -> Settled<T, E> {
        let (notifier, settled) = settled::pair();
        self.register(Listener::Observe(Box::new(move |outcome: Outcome<T, E>| {
            notifier.notify(outcome)
        })));
        settled
    }

    fn register(&self, listener: Listener<T, E>) -> &Self {
        let current = thread::current().id();
        let (outcome, nested) = {
            let mut inner = self.lock();
            let Some(outcome) = inner.outcome() else {
                inner.listeners.push(listener);
                return self;
            };
            match inner.delivering {
                // Observers never wait behind user listeners.
                _ if matches!(listener, Listener::Observe(_)) => (outcome, true),
                // Registered from inside a listener of this promise.
                Some(owner) if owner == current => (outcome, true),
                Some(_) => {
                    inner.listeners.push(listener);
                    return self;
                }
                None => {
                    inner.delivering = Some(current);
                    (outcome, false)
                }
            }
        };
        if nested {
            self.fire(&outcome, listener);
        } else {
            self.deliver(&outcome, vec![listener]);
        }
        self
    }

    /// Hands out `listeners`, then whatever other threads queued meanwhile,
    /// until nothing is left.
    fn deliver(&self, outcome: &Outcome<T, E>, mut listeners: Vec<Listener<T, E>>) {
        loop {
            for listener in listeners {
                self.fire(outcome, listener);
            }
            let mut inner = self.lock();
            if inner.listeners.is_empty() {
                inner.delivering = None;
                return;
            }
            listeners = mem::take(&mut inner.listeners);
        }
    }

    fn fire(&self, outcome: &Outcome<T, E>, listener: Listener<T, E>) {
        let fired = panic::catch_unwind(AssertUnwindSafe(|| self.invoke(outcome, listener)));
        if let Err(payload) = fired {
            error!(err = %Error::from_panic(payload), "promise listener panicked");
        }
    }

    fn invoke(&self, outcome: &Outcome<T, E>, listener: Listener<T, E>) {
        match (listener, outcome) {
            (Listener::Complete(listener), Outcome::Succeeded(value)) => {
                let value = Arc::clone(value);
                self.dispatch(Box::new(move || listener(&value)));
            }
            (Listener::Fail(listener), Outcome::Failed(error)) => {
                let error = Arc::clone(error);
                self.dispatch(Box::new(move || listener(&error)));
            }
            (Listener::Cancel(listener), Outcome::Cancelled) => self.dispatch(listener),
            (Listener::Observe(observer), outcome) => observer(outcome.clone()),
            // Listener for an outcome that can no longer happen.
            _ => {}
        }
    }

    fn dispatch(&self, job: Job) {
        match &self.dispatch {
            Some(dispatch) => {
                trace!("posting listener to dispatch context");
                dispatch.post(job);
            }
            None => job(),
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    /// True for every terminal state.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// True only if the promise reached [`State::Succeeded`], whatever the value.
    pub fn succeeded(&self) -> bool {
        self.state() == State::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.state() == State::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == State::Cancelled
    }

    pub fn result(&self) -> Option<Arc<T>> {
        self.lock().result.clone()
    }

    pub fn error(&self) -> Option<Arc<E>> {
        self.lock().error.clone()
    }

    pub fn outcome(&self) -> Option<Outcome<T, E>> {
        self.lock().outcome()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::*;

    static_assertions::assert_impl_all!(Promise<String>: Send, Sync, Clone);
    static_assertions::assert_impl_all!(Outcome<String>: Send, Sync, Clone);

    type TestPromise = Promise<String, String>;

    #[derive(Default)]
    struct Queue(Mutex<Vec<Job>>);

    impl Queue {
        fn run_all(&self) -> usize {
            let jobs = mem::take(&mut *self.0.lock().unwrap());
            let count = jobs.len();
            for job in jobs {
                job();
            }
            count
        }
    }

    impl DispatchContext for Queue {
        fn post(&self, callback: Job) {
            self.0.lock().unwrap().push(callback);
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = {
            let count = count.clone();
            move || count.load(Ordering::SeqCst)
        };
        (count, read)
    }

    #[test]
    fn starts_pending_and_runs() {
        let promise = TestPromise::new();
        assert_eq!(promise.state(), State::Pending);
        assert!(!promise.is_done());

        assert!(promise.start());
        assert!(promise.is_running());
        assert!(!promise.start());
        assert!(!promise.is_done());
    }

    #[test]
    fn succeed_notifies_registered_listener() {
        let promise = TestPromise::new();
        let (tx, rx) = mpsc::channel();
        promise.on_complete(move |value| tx.send(value.clone()).unwrap());

        assert_eq!(promise.succeed("x".into()), Resolution::Settled);
        assert_eq!(rx.try_recv().unwrap(), "x");
        assert!(promise.is_done());
        assert!(promise.succeeded());
        assert!(!promise.is_failed());
        assert!(!promise.is_cancelled());
        assert_eq!(promise.result().as_deref().map(String::as_str), Some("x"));
    }

    #[test]
    fn late_listener_fires_during_registration() {
        let promise = TestPromise::new();
        promise.succeed("x".into());

        let (tx, rx) = mpsc::channel();
        promise.on_complete(move |value| tx.send(value.clone()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), "x");
    }

    #[test]
    fn fail_notifies_fail_listener_only() {
        let promise = TestPromise::new();
        let (completes, read_completes) = counter();
        let (tx, rx) = mpsc::channel();
        promise
            .on_complete(move |_| {
                completes.fetch_add(1, Ordering::SeqCst);
            })
            .on_fail(move |err| tx.send(err.clone()).unwrap());

        assert_eq!(promise.fail("broken".into()), Resolution::Settled);
        assert_eq!(rx.try_recv().unwrap(), "broken");
        assert_eq!(read_completes(), 0);
        assert!(promise.is_failed());
        assert!(promise.is_done());
        assert!(!promise.succeeded());
        assert_eq!(promise.error().as_deref().map(String::as_str), Some("broken"));
    }

    #[test]
    fn cancel_after_success_is_ignored() {
        let promise = TestPromise::new();
        let (cancels, read_cancels) = counter();
        promise.on_cancel(move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        promise.succeed("kept".into());
        assert!(!promise.cancel());
        assert!(!promise.is_cancelled());
        assert!(promise.succeeded());
        assert_eq!(read_cancels(), 0);
        assert_eq!(promise.result().as_deref().map(String::as_str), Some("kept"));
    }

    #[test]
    fn cancel_after_failure_is_ignored() {
        let promise = TestPromise::new();
        promise.fail("first".into());
        assert!(!promise.cancel());
        assert!(promise.is_failed());
        assert_eq!(promise.error().as_deref().map(String::as_str), Some("first"));
    }

    #[test]
    fn settling_after_cancel_is_discarded() {
        let promise = TestPromise::new();
        let (completes, read_completes) = counter();
        let (fails, read_fails) = counter();
        promise
            .on_complete(move |_| {
                completes.fetch_add(1, Ordering::SeqCst);
            })
            .on_fail(move |_| {
                fails.fetch_add(1, Ordering::SeqCst);
            });

        assert!(promise.cancel());
        assert_eq!(promise.succeed("late".into()), Resolution::Discarded);
        assert_eq!(promise.fail("late".into()), Resolution::Discarded);

        assert!(promise.is_cancelled());
        assert!(!promise.succeeded());
        assert!(!promise.is_failed());
        assert!(promise.result().is_none());
        assert_eq!(read_completes(), 0);
        assert_eq!(read_fails(), 0);
    }

    #[test]
    fn second_cancel_is_a_no_op() {
        let promise = TestPromise::new();
        let (cancels, read_cancels) = counter();
        promise.on_cancel(move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        assert!(promise.cancel());
        assert!(!promise.cancel());
        assert_eq!(read_cancels(), 1);
    }

    #[test]
    #[should_panic(expected = "promise already settled as succeeded")]
    fn double_success_panics() {
        let promise = TestPromise::new();
        promise.succeed("once".into());
        let _ = promise.succeed("twice".into());
    }

    #[test]
    #[should_panic(expected = "promise already settled as failed")]
    fn success_after_failure_panics() {
        let promise = TestPromise::new();
        promise.fail("once".into());
        let _ = promise.succeed("twice".into());
    }

    #[test]
    fn try_variants_report_protocol_errors() {
        let promise = TestPromise::new();
        promise.succeed("once".into());

        let err = promise.try_fail("twice".into()).unwrap_err();
        assert!(matches!(err, Error::AlreadySettled(State::Succeeded)));
        assert!(err.is_protocol());
        assert_eq!(promise.result().as_deref().map(String::as_str), Some("once"));
    }

    #[test]
    fn unit_results_still_count_as_success() {
        let promise = Promise::<(), String>::new();
        promise.succeed(());
        assert!(promise.succeeded());
    }

    #[test]
    fn listeners_fan_out_in_registration_order() {
        let promise = TestPromise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            promise.on_complete(move |_| order.lock().unwrap().push(n));
        }

        promise.succeed("x".into());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn listeners_for_other_outcomes_are_dropped() {
        let promise = TestPromise::new();
        let token = Arc::new(());
        let held = token.clone();
        promise.on_fail(move |_| drop(held));
        assert_eq!(Arc::strong_count(&token), 2);

        promise.succeed("x".into());
        assert_eq!(Arc::strong_count(&token), 1);

        let held = token.clone();
        promise.on_cancel(move || drop(held));
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn listener_may_cancel_its_own_promise() {
        let promise = TestPromise::new();
        let (cancels, read_cancels) = counter();
        let inner = promise.clone();
        promise
            .on_complete(move |_| assert!(!inner.cancel()))
            .on_cancel(move || {
                cancels.fetch_add(1, Ordering::SeqCst);
            });

        promise.succeed("x".into());
        assert!(promise.succeeded());
        assert_eq!(read_cancels(), 0);
    }

    #[test]
    fn panicking_listener_does_not_starve_the_others() {
        let promise = TestPromise::new();
        let (completes, read_completes) = counter();
        promise
            .on_complete(|_| panic::resume_unwind(Box::new("listener failed")))
            .on_complete(move |_| {
                completes.fetch_add(1, Ordering::SeqCst);
            });
        let settled = promise.settled();

        assert_eq!(promise.succeed("x".into()), Resolution::Settled);
        assert_eq!(read_completes(), 1);
        assert!(matches!(settled.wait(), Ok(Outcome::Succeeded(_))));

        promise.on_complete(|_| panic::resume_unwind(Box::new("late listener failed")));
        assert!(promise.succeeded());
    }

    #[test]
    fn nested_registration_fires_before_returning() {
        let promise = TestPromise::new();
        let (tx, rx) = mpsc::channel();
        let inner = promise.clone();
        promise.on_complete(move |_| {
            let (nested_tx, nested_rx) = mpsc::channel();
            inner.on_complete(move |value| nested_tx.send(value.clone()).unwrap());
            let waited = inner.settled().wait().is_ok();
            tx.send((nested_rx.try_recv().ok(), waited)).unwrap();
        });

        promise.succeed("x".into());
        assert_eq!(rx.try_recv().unwrap(), (Some(String::from("x")), true));
    }

    #[test]
    fn late_registrant_waits_for_listeners_pending_at_settlement() {
        let promise = TestPromise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        {
            let order = order.clone();
            promise.on_complete(move |_| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                order.lock().unwrap().push(1);
            });
        }
        {
            let order = order.clone();
            promise.on_complete(move |_| order.lock().unwrap().push(2));
        }

        let producer = promise.clone();
        let settling = thread::spawn(move || producer.succeed("x".into()));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Settled, but the first listener is still running on the producer.
        let late = order.clone();
        promise.on_complete(move |_| late.lock().unwrap().push(3));
        release_tx.send(()).unwrap();
        settling.join().expect("The producer thread has panicked");

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn dispatch_context_receives_every_listener() {
        let queue = Arc::new(Queue::default());
        let promise = TestPromise::with_dispatch(queue.clone());
        let (tx, rx) = mpsc::channel();
        let late_tx = tx.clone();
        promise.on_complete(move |value| tx.send(value.clone()).unwrap());

        promise.succeed("x".into());
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.run_all(), 1);
        assert_eq!(rx.try_recv().unwrap(), "x");

        promise.on_complete(move |value| late_tx.send(format!("late {value}")).unwrap());
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.run_all(), 1);
        assert_eq!(rx.try_recv().unwrap(), "late x");
    }

    #[test]
    fn outcome_reflects_terminal_state() {
        let promise = TestPromise::new();
        assert!(promise.outcome().is_none());
        promise.cancel();
        let outcome = promise.outcome().unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.state(), State::Cancelled);
        assert!(outcome.value().is_none());
    }

    #[test]
    fn racing_producers_deliver_exactly_one_notification() {
        for _ in 0..200 {
            let promise = TestPromise::new();
            let (fired, read_fired) = counter();
            {
                let (a, b, c) = (fired.clone(), fired.clone(), fired);
                promise
                    .on_complete(move |_| {
                        a.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_fail(move |_| {
                        b.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_cancel(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    });
            }

            let barrier = Arc::new(Barrier::new(3));
            let succeed = {
                let (promise, barrier) = (promise.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    promise.try_succeed("value".into())
                })
            };
            let fail = {
                let (promise, barrier) = (promise.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    promise.try_fail("error".into())
                })
            };
            let cancel = {
                let promise = promise.clone();
                thread::spawn(move || {
                    barrier.wait();
                    promise.cancel()
                })
            };

            let succeeded = succeed.join().unwrap();
            let failed = fail.join().unwrap();
            let cancelled = cancel.join().unwrap();

            assert_eq!(read_fired(), 1);
            assert!(promise.is_done());
            match promise.state() {
                State::Cancelled => {
                    assert!(cancelled);
                    assert!(matches!(succeeded, Ok(Resolution::Discarded)));
                    assert!(matches!(failed, Ok(Resolution::Discarded)));
                }
                State::Succeeded => {
                    assert!(!cancelled);
                    assert!(matches!(succeeded, Ok(Resolution::Settled)));
                    assert!(failed.is_err());
                }
                State::Failed => {
                    assert!(!cancelled);
                    assert!(matches!(failed, Ok(Resolution::Settled)));
                    assert!(succeeded.is_err());
                }
                state => panic!("unexpected state {state}"),
            }
        }
    }

    #[test]
    fn registration_racing_settlement_fires_exactly_once() {
        for _ in 0..200 {
            let promise = TestPromise::new();
            let (fired, read_fired) = counter();
            let barrier = Arc::new(Barrier::new(2));

            let register = {
                let (promise, barrier) = (promise.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    promise.on_complete(move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    });
                })
            };
            let settle = {
                let promise = promise.clone();
                thread::spawn(move || {
                    barrier.wait();
                    promise.succeed("x".into())
                })
            };

            register.join().unwrap();
            assert_eq!(settle.join().unwrap(), Resolution::Settled);
            assert_eq!(read_fired(), 1);
        }
    }
}
