//! A designated thread that runs posted callbacks in order.
//!
//! This is the foreground ("UI") thread of an application: work runs on a
//! [`WorkerPool`](crate::WorkerPool), and promises created with a
//! [`LooperHandle`] as their dispatch context deliver every listener here.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use crate::{DispatchContext, Error, Executor, Job};

enum Message {
    Run(Job),
    Quit,
}

/// Owns the designated thread. Dropping it stops the thread once every
/// callback queued so far has run.
pub struct Looper {
    handle: LooperHandle,
    thread: Option<JoinHandle<()>>,
}

/// A clonable way to post callbacks to a [`Looper`].
#[derive(Clone)]
pub struct LooperHandle {
    sender: Sender<Message>,
    thread_id: ThreadId,
    name: Arc<str>,
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("name", &self.handle.name)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl fmt::Debug for LooperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperHandle")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl Looper {
    pub fn spawn(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(receiver))
            .map_err(|source| Error::Spawn {
                name: name.clone(),
                source,
            })?;

        let handle = LooperHandle {
            sender,
            thread_id: thread.thread().id(),
            name: name.into(),
        };
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn is_current(&self) -> bool {
        self.handle.is_current()
    }

    #[track_caller]
    pub fn assert_current(&self) {
        self.handle.assert_current()
    }

    #[track_caller]
    pub fn assert_not_current(&self) {
        self.handle.assert_not_current()
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        if self.handle.sender.send(Message::Quit).is_err() {
            debug!(looper = %self.handle.name, "looper already stopped");
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.is_current() {
            debug!(looper = %self.handle.name, "looper dropped on its own thread; not joining");
            return;
        }
        if thread.join().is_err() {
            error!(looper = %self.handle.name, "looper thread panicked");
        }
    }
}

impl LooperHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is the looper thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// # Panics
    ///
    /// Panics unless called on the looper thread.
    #[track_caller]
    pub fn assert_current(&self) {
        assert!(
            self.is_current(),
            "This method should be called from the {} thread.",
            self.name
        );
    }

    /// # Panics
    ///
    /// Panics if called on the looper thread.
    #[track_caller]
    pub fn assert_not_current(&self) {
        assert!(
            !self.is_current(),
            "This method should not be called from the {} thread.",
            self.name
        );
    }

    fn enqueue(&self, job: Job) {
        if self.is_current() {
            job();
        } else if self.sender.send(Message::Run(job)).is_err() {
            warn!(looper = %self.name, "looper has stopped; dropping callback");
        }
    }
}

impl DispatchContext for LooperHandle {
    fn post(&self, callback: Job) {
        self.enqueue(callback)
    }
}

impl Executor for LooperHandle {
    fn execute(&self, job: Job) {
        self.enqueue(job)
    }
}

fn run_loop(receiver: Receiver<Message>) {
    let current = thread::current();
    let name = current.name().unwrap_or("<unnamed>");
    debug!(looper = name, "looper started");

    for message in receiver.iter() {
        match message {
            Message::Run(callback) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    error!(looper = name, err = %Error::from_panic(payload), "callback panicked");
                }
            }
            Message::Quit => break,
        }
    }

    debug!(looper = name, "looper exiting");
}
