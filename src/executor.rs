//! The two capabilities the promise machinery consumes from its surroundings:
//! something that runs work ([`Executor`]) and something that delivers
//! listener callbacks on a chosen thread ([`DispatchContext`]).
use std::sync::Arc;

use crate::{Error, Task};

/// A unit of work or a listener callback, ready to run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs on some thread, at some later time, at most once.
///
/// No ordering is promised between different jobs.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs listener callbacks on one designated logical thread.
///
/// Implementations may run the callback inline when `post` is called from
/// that thread already.
pub trait DispatchContext: Send + Sync {
    fn post(&self, callback: Job);
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

impl<X: Executor + ?Sized> Executor for &X {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

impl<X: DispatchContext + ?Sized> DispatchContext for Arc<X> {
    fn post(&self, callback: Job) {
        (**self).post(callback)
    }
}

impl<X: DispatchContext + ?Sized> DispatchContext for &X {
    fn post(&self, callback: Job) {
        (**self).post(callback)
    }
}

/// Task submission helpers available on every [`Executor`].
pub trait ExecutorExt: Executor {
    /// Schedules `task` to run on this executor.
    fn submit<T, E>(&self, task: &Task<T, E>)
    where
        T: Send + Sync + 'static,
        E: From<Error> + Send + Sync + 'static,
    {
        let task = task.clone();
        self.execute(Box::new(move || task.run()));
    }

    /// Wraps `work` in a [`Task`], schedules it and hands the task back.
    fn spawn<F, T, E>(&self, work: F) -> Task<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: From<Error> + Send + Sync + 'static,
    {
        let task = Task::new(work);
        self.submit(&task);
        task
    }
}

impl<X: Executor + ?Sized> ExecutorExt for X {}

/// Runs everything immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job()
    }
}

impl DispatchContext for Inline {
    fn post(&self, callback: Job) {
        callback()
    }
}
