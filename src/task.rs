//! Adapting a plain computation into something an [`Executor`] can run and a
//! consumer can cancel.
//!
//! [`Executor`]: crate::Executor
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, warn};

use crate::{BoxError, DispatchContext, Error, Promise, Resolution, Settled, State};

type Work<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send>;
type AbortHook = Box<dyn FnOnce() + Send>;

struct TaskInner<T, E> {
    promise: Promise<T, E>,
    work: Mutex<Option<Work<T, E>>>,
    abort: Mutex<Option<AbortHook>>,
    cancel_requested: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A unit of work bound to the [`Promise`] that reports its outcome.
///
/// Clones share the same work and promise, so one clone can be handed to an
/// executor while another is kept for cancellation and listeners.
///
/// # Examples
///
/// ```
/// use promise_pool::{BoxError, Task};
/// use std::thread;
///
/// let task = Task::new(|| Ok::<_, BoxError>("Hi"));
/// let runner = task.clone();
/// thread::spawn(move || runner.run()).join().expect("The runner thread has panicked");
///
/// assert!(task.succeeded());
/// ```
pub struct Task<T, E = BoxError> {
    inner: Arc<TaskInner<T, E>>,
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("promise", &self.inner.promise)
            .field(
                "cancel_requested",
                &self.inner.cancel_requested.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

impl<T, E> Task<T, E>
where
    T: Send + Sync + 'static,
    E: From<Error> + Send + Sync + 'static,
{
    /// A task whose listeners run inline on the settling thread.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Self::with_promise(Promise::new(), work)
    }

    /// A task whose listeners are delivered through `dispatch`.
    pub fn with_dispatch<F, D>(work: F, dispatch: D) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        D: DispatchContext + 'static,
    {
        Self::with_promise(Promise::with_dispatch(dispatch), work)
    }

    fn with_promise<F>(promise: Promise<T, E>, work: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                promise,
                work: Mutex::new(Some(Box::new(work))),
                abort: Mutex::new(None),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Sets the best-effort interruption hook run by the first [`cancel`](Self::cancel).
    pub fn on_abort<H>(self, hook: H) -> Self
    where
        H: FnOnce() + Send + 'static,
    {
        *lock(&self.inner.abort) = Some(Box::new(hook));
        self
    }

    /// Runs the work and feeds its outcome into the promise.
    ///
    /// Only the first call does anything. Work that was cancelled before it
    /// started is skipped; a result that arrives after a cancellation is
    /// dropped. A panic in the work fails the promise with
    /// [`Error::Panicked`].
    pub fn run(&self) {
        let Some(work) = lock(&self.inner.work).take() else {
            warn!("task already ran; ignoring");
            return;
        };

        let promise = &self.inner.promise;
        if !promise.start() {
            debug!(state = %promise.state(), "task settled before it started; skipping work");
            return;
        }

        let resolution = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => promise.try_succeed(value),
            Ok(Err(err)) => promise.try_fail(err),
            Err(payload) => {
                let err = Error::from_panic(payload);
                error!(%err, "task work panicked");
                promise.try_fail(E::from(err))
            }
        };

        match resolution {
            Ok(Resolution::Settled) => {}
            Ok(Resolution::Discarded) => debug!("task cancelled while running; outcome discarded"),
            Err(err) => warn!(%err, "task promise was settled from outside; outcome dropped"),
        }
    }

    /// Requests cancellation.
    ///
    /// The first call runs the abort hook (unless the task already finished)
    /// and then cancels the promise. Returns `true` only if this call
    /// cancelled the promise.
    pub fn cancel(&self) -> bool {
        if self.inner.cancel_requested.swap(true, Ordering::AcqRel) {
            return false;
        }

        let promise = &self.inner.promise;
        if promise.is_done() {
            debug!(state = %promise.state(), "task already finished; not aborting");
            return false;
        }

        let hook = lock(&self.inner.abort).take();
        if let Some(hook) = hook {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                error!(err = %Error::from_panic(payload), "abort hook panicked");
            }
        }

        promise.cancel()
    }

    /// The promise this task reports into.
    ///
    /// Settling it belongs to [`run`](Self::run) and [`cancel`](Self::cancel).
    /// If it is settled from outside anyway, the work's own outcome is
    /// dropped with a warning.
    pub fn promise(&self) -> &Promise<T, E> {
        &self.inner.promise
    }

    pub fn on_complete<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.inner.promise.on_complete(listener);
        self
    }

    pub fn on_fail<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.inner.promise.on_fail(listener);
        self
    }

    pub fn on_cancel<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.promise.on_cancel(listener);
        self
    }

    pub fn settled(&self) -> Settled<T, E> {
        self.inner.promise.settled()
    }

    pub fn state(&self) -> State {
        self.inner.promise.state()
    }

    pub fn is_done(&self) -> bool {
        self.inner.promise.is_done()
    }

    pub fn is_running(&self) -> bool {
        self.inner.promise.is_running()
    }

    pub fn succeeded(&self) -> bool {
        self.inner.promise.succeeded()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.promise.is_failed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.promise.is_cancelled()
    }
}
