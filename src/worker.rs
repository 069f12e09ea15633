use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, error, trace};

use crate::{Error, Job};

/// Scheduling priority requested for worker threads.
///
/// On Linux this becomes the thread's nice value; other platforms ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl ThreadPriority {
    pub fn nice(self) -> i32 {
        match self {
            ThreadPriority::Low => 10,
            ThreadPriority::Normal => 0,
            ThreadPriority::High => -10,
        }
    }
}

impl FromStr for ThreadPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "min" => Ok(ThreadPriority::Low),
            "normal" | "norm" => Ok(ThreadPriority::Normal),
            "high" | "max" => Ok(ThreadPriority::High),
            _ => Err(Error::InvalidConfig {
                key: "priority",
                value: s.to_owned(),
            }),
        }
    }
}

pub(crate) fn worker_name(prefix: &str, number: usize) -> String {
    format!("{prefix}[{number}]")
}

/// Spawns consistently named threads at a fixed priority.
#[derive(Debug)]
pub(crate) struct ThreadFactory {
    prefix: String,
    priority: ThreadPriority,
    counter: AtomicUsize,
}

impl ThreadFactory {
    pub(crate) fn new(prefix: impl Into<String>, priority: ThreadPriority) -> Self {
        Self {
            prefix: prefix.into(),
            priority,
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn spawn<F>(&self, body: F) -> Result<JoinHandle<()>, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = worker_name(&self.prefix, self.counter.fetch_add(1, Ordering::Relaxed));
        let priority = self.priority;
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                apply_priority(priority);
                body()
            })
            .map_err(|source| Error::Spawn { name, source })
    }
}

#[cfg(target_os = "linux")]
fn apply_priority(priority: ThreadPriority) {
    use tracing::warn;

    if priority == ThreadPriority::Normal {
        return;
    }
    let nice = priority.nice();
    // SAFETY: both calls only read or change the scheduling attributes of the
    // calling thread.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, nice)
    };
    if rc != 0 {
        warn!(
            ?priority,
            nice,
            err = %std::io::Error::last_os_error(),
            "failed to apply worker thread priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(priority: ThreadPriority) {
    if priority != ThreadPriority::Normal {
        debug!(?priority, "thread priority is not supported on this platform; ignoring");
    }
}

/// Pulls jobs until every sender is gone. A panicking job is logged and the
/// worker carries on.
pub(crate) fn worker_loop(receiver: Receiver<Job>) {
    let current = thread::current();
    let name = current.name().unwrap_or("<unnamed>");
    debug!(worker = name, "worker thread started");

    for job in receiver.iter() {
        trace!(worker = name, "worker got a job; executing");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(worker = name, err = %Error::from_panic(payload), "job panicked");
        }
    }

    debug!(worker = name, "worker disconnected; shutting down");
}
