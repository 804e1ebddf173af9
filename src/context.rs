//! Delivery contexts: where subscriber callbacks run
//!
//! The bus never invokes a callback on the posting thread. Fan-out hands
//! each delivery to the subscription's [`DeliveryContext`], which runs
//! jobs one at a time in the order they were scheduled. That gives every
//! subscriber a single-threaded view of its own callbacks while producers
//! post from any thread.
//!
//! ```text
//! post() ──► fan-out (under bus lock) ──► schedule(job)
//!                                            │
//!            ┌───────────────────────────────┼──────────────────────┐
//!            ▼                               ▼                      ▼
//!     TaskContext                     ThreadContext           ManualContext
//!   (tokio task, FIFO)           (dedicated OS thread)   (queue drained by owner
//!                                                          via run_pending())
//! ```

use crate::error::{EventError, Result};
use crate::types::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// A unit of delivery work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for subscriber callbacks
///
/// Implementations must run jobs in scheduling order and never two at
/// once. `schedule` must not run the job synchronously: the bus calls it
/// while holding its lock.
pub trait DeliveryContext: Send + Sync {
    /// Context name, used in logs
    fn name(&self) -> &str;

    /// Queue `job` for execution
    fn schedule(&self, job: Job) -> Result<()>;
}

impl<C: DeliveryContext + ?Sized> DeliveryContext for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn schedule(&self, job: Job) -> Result<()> {
        (**self).schedule(job)
    }
}

/// Runs jobs on a single tokio task
///
/// Callbacks execute inside the runtime, so they should stay short and
/// non-blocking.
pub struct TaskContext {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskContext {
    /// Spawn the worker task on the current runtime
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let handle = Handle::try_current().map_err(|e| {
            EventError::Context(format!(
                "Task context '{}' needs a running tokio runtime: {}",
                name, e
            ))
        })?;
        Ok(Self::spawn_on(name, &handle))
    }

    /// Spawn the worker task on `handle`
    pub fn spawn_on(name: impl Into<String>, handle: &Handle) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker = name.clone();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            tracing::debug!(context = %worker, "Task context drained");
        });

        Self { name, tx }
    }
}

impl DeliveryContext for TaskContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| EventError::Context(format!("Task context '{}' has stopped", self.name)))
    }
}

/// Runs jobs on a dedicated OS thread
///
/// The counterpart of a UI main thread: every callback bound to this
/// context executes on the same thread, identified by [`thread_id`].
/// The thread exits once the context is dropped and its queue drained.
///
/// [`thread_id`]: ThreadContext::thread_id
pub struct ThreadContext {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

impl ThreadContext {
    /// Start the named delivery thread
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                tracing::debug!(context = %worker, "Thread context drained");
            })
            .map_err(|e| {
                EventError::Context(format!(
                    "Failed to start delivery thread '{}': {}",
                    name, e
                ))
            })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            name,
            tx,
        })
    }

    /// Id of the delivery thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

impl DeliveryContext for ThreadContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| {
            EventError::Context(format!("Delivery thread '{}' has exited", self.name))
        })
    }
}

/// Queues jobs until the owner pumps them with [`run_pending`]
///
/// Models an event loop the application drives itself. Jobs run on
/// whichever thread calls `run_pending`.
///
/// [`run_pending`]: ManualContext::run_pending
pub struct ManualContext {
    name: String,
    queue: Mutex<VecDeque<Job>>,
}

impl ManualContext {
    /// Create an empty context
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of queued jobs
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run queued jobs until the queue is empty, returning how many ran
    ///
    /// Jobs scheduled by a running job are picked up in the same call.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = lock(&self.queue).pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for ManualContext {
    fn default() -> Self {
        Self::new("manual")
    }
}

impl DeliveryContext for ManualContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, job: Job) -> Result<()> {
        lock(&self.queue).push_back(job);
        Ok(())
    }
}

/// Runs jobs immediately on the scheduling thread
///
/// Only for deliveries that never call back into the bus, since the job
/// runs while the bus lock is held.
pub(crate) struct InlineContext;

impl DeliveryContext for InlineContext {
    fn name(&self) -> &str {
        "inline"
    }

    fn schedule(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}
