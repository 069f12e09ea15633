//! Listener-based promises for running work off a single foreground thread.
//!
//! A [`Promise`] represents the eventual outcome of one unit of work. It
//! settles exactly once, as succeeded, failed or cancelled, and notifies the
//! listeners registered for that outcome, including the ones registered after
//! the fact. Cancellation wins over a result that has not landed yet, but never
//! replaces one that has.
//!
//! A [`Task`] wraps a plain computation so it can be handed to an
//! [`Executor`] such as the [`WorkerPool`] and cancelled from elsewhere.
//! Listener delivery can be pinned to one thread, typically a [`Looper`],
//! through a [`DispatchContext`].
//!
//! ```
//! use promise_pool::{BoxError, ExecutorExt, Looper, Task, WorkerPool};
//! use std::sync::mpsc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let pool = WorkerPool::builder().pool_size(2).build()?;
//! let ui = Looper::spawn("ui")?;
//!
//! let task = Task::with_dispatch(
//!     || {
//!         thread::sleep(Duration::from_millis(10));
//!         Ok::<_, BoxError>(true)
//!     },
//!     ui.handle(),
//! );
//! let (tx, rx) = mpsc::channel();
//! let handle = ui.handle();
//! task.on_complete(move |value| {
//!     handle.assert_current();
//!     tx.send(*value).unwrap();
//! });
//! pool.submit(&task);
//!
//! assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
//! assert!(task.succeeded());
//! # Ok::<(), promise_pool::Error>(())
//! ```
mod error;
mod executor;
mod looper;
mod pool;
mod promise;
mod settled;
mod task;
mod worker;

pub use error::{BoxError, Error};
pub use executor::{DispatchContext, Executor, ExecutorExt, Inline, Job};
pub use looper::{Looper, LooperHandle};
pub use pool::{
    PoolBuilder, PoolConfig, WorkerPool, DEFAULT_THREAD_PREFIX, POOL_SIZE_VAR, PRIORITY_VAR,
    THREAD_PREFIX_VAR,
};
pub use promise::{Outcome, Promise, Resolution, State};
pub use settled::Settled;
pub use task::Task;
pub use worker::ThreadPriority;
