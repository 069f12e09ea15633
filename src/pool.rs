//! A fixed-size pool of worker threads.
//!
//! The pool is an ordinary value: build it once with the configuration you
//! want and pass it (or an `Arc` of it) to whoever submits work.
//!
//! ```
//! use promise_pool::{BoxError, ExecutorExt, ThreadPriority, WorkerPool};
//!
//! let pool = WorkerPool::builder()
//!     .pool_size(2)
//!     .thread_name_prefix("Loader")
//!     .priority(ThreadPriority::Low)
//!     .build()?;
//!
//! let task = pool.spawn(|| Ok::<_, BoxError>(6 * 7));
//! let outcome = task.settled().wait()?;
//! assert_eq!(outcome.value(), Some(&42));
//! # Ok::<(), promise_pool::Error>(())
//! ```
use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::worker::{worker_loop, ThreadFactory};
use crate::{DispatchContext, Error, Executor, Job, ThreadPriority};

pub const DEFAULT_THREAD_PREFIX: &str = "AsyncWorker";

pub const POOL_SIZE_VAR: &str = "PROMISE_POOL_SIZE";
pub const THREAD_PREFIX_VAR: &str = "PROMISE_POOL_THREAD_PREFIX";
pub const PRIORITY_VAR: &str = "PROMISE_POOL_PRIORITY";

const NO_POOL_ERROR: &str = "Tried to execute a job while the pool is not available";

/// Construction-time settings of a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers. `None` picks one less than the available
    /// parallelism, but at least one.
    pub pool_size: Option<NonZeroUsize>,
    /// Workers are named `"{prefix}[{n}]"`.
    pub thread_name_prefix: String,
    pub priority: ThreadPriority,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_owned(),
            priority: ThreadPriority::default(),
        }
    }
}

impl PoolConfig {
    /// Reads [`POOL_SIZE_VAR`], [`THREAD_PREFIX_VAR`] and [`PRIORITY_VAR`].
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(value) = lookup(POOL_SIZE_VAR) {
            let size = value.trim().parse::<usize>().map_err(|_| Error::InvalidConfig {
                key: POOL_SIZE_VAR,
                value: value.clone(),
            })?;
            config.pool_size = NonZeroUsize::new(size);
        }
        if let Some(prefix) = lookup(THREAD_PREFIX_VAR) {
            config.thread_name_prefix = prefix;
        }
        if let Some(value) = lookup(PRIORITY_VAR) {
            config.priority = value.parse().map_err(|_| Error::InvalidConfig {
                key: PRIORITY_VAR,
                value: value.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn resolved_pool_size(&self) -> NonZeroUsize {
        self.pool_size.unwrap_or_else(default_pool_size)
    }
}

fn default_pool_size() -> NonZeroUsize {
    let cpus = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    NonZeroUsize::new(cpus.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
}

/// Builder for configuring and creating a [`WorkerPool`].
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Overrides the number of workers. `0` means "no override".
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = NonZeroUsize::new(size);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn build(self) -> Result<WorkerPool, Error> {
        WorkerPool::new(self.config)
    }
}

/// Runs submitted jobs on a fixed set of worker threads.
///
/// Dropping the pool (or calling [`shutdown`](WorkerPool::shutdown)) lets the
/// workers finish every job already queued and then joins them.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("workers", &self.workers.len())
            .field("queued", &self.sender.as_ref().map_or(0, Sender::len))
            .finish()
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        let size = config.resolved_pool_size().get();
        let factory = ThreadFactory::new(config.thread_name_prefix.as_str(), config.priority);
        let (sender, receiver) = crossbeam_channel::unbounded();

        // Built up in place so a failed spawn still shuts down the workers
        // that did start.
        let mut pool = WorkerPool {
            sender: Some(sender),
            workers: Vec::with_capacity(size),
            config,
        };
        for _ in 0..size {
            let receiver = receiver.clone();
            pool.workers.push(factory.spawn(move || worker_loop(receiver))?);
        }

        debug!(
            size,
            prefix = %pool.config.thread_name_prefix,
            priority = ?pool.config.priority,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(PoolConfig::default())
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Runs every queued job, then joins the workers.
    pub fn shutdown(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        drop(self.sender.take());

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("<unnamed>").to_owned();
            if worker.thread().id() == current {
                debug!(worker = %name, "pool dropped on its own worker; not joining it");
                continue;
            }
            info!(worker = %name, "shutting down worker");
            if worker.join().is_err() {
                error!(worker = %name, "worker thread panicked");
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        match &self.sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    error!("{NO_POOL_ERROR}");
                }
            }
            None => error!("{NO_POOL_ERROR}"),
        }
    }
}

impl DispatchContext for WorkerPool {
    fn post(&self, callback: Job) {
        self.execute(callback)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_workers();
    }
}
