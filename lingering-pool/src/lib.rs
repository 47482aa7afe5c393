//! A fixed-size pool of named worker threads sharing one job queue.
//!
//! Workers are long-lived: every job submitted to a [`WorkerPool`] runs on one
//! of the same `size` threads, which is exactly what makes per-thread storage
//! outlive the jobs that populated it. Jobs are picked up roughly in
//! submission order, but no ordering is guaranteed across workers.
//!
//! ```rust
//! use lingering_pool::WorkerPool;
//!
//! let pool = WorkerPool::new(2).unwrap();
//! pool.execute(|| println!("hello from a worker")).unwrap();
//! pool.wait_idle();
//! assert_eq!(pool.completed(), 1);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;
type StartHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Errors returned by [`WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool was requested with zero workers.
    #[error("a worker pool needs at least one worker")]
    NoWorkers,
    /// The operating system refused to spawn a worker thread.
    #[error("error spawning worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The pool no longer accepts jobs.
    #[error("the worker pool has shut down")]
    ShutDown,
}

/// Configures and spawns a [`WorkerPool`].
#[must_use]
pub struct PoolBuilder {
    size: usize,
    name_prefix: String,
    on_thread_start: Option<StartHook>,
}

impl PoolBuilder {
    /// Returns a builder for a pool of `size` workers.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            name_prefix: String::from("pool"),
            on_thread_start: None,
        }
    }

    /// Sets the prefix of worker thread names. Workers are named
    /// `<prefix>-<index>`, starting at 1.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Installs a callback that each worker invokes once, before it accepts
    /// its first job.
    pub fn on_thread_start<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(hook));
        self
    }

    /// Spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoWorkers`] if the size is zero, or
    /// [`PoolError::Spawn`] if a worker thread could not be started.
    pub fn build(self) -> Result<WorkerPool, PoolError> {
        if self.size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (sender, receiver) = flume::unbounded::<Job>();
        let state = Arc::new(PoolState::default());
        let mut workers = Vec::with_capacity(self.size);
        for index in 1..=self.size {
            let receiver = receiver.clone();
            let state = state.clone();
            let hook = self.on_thread_start.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.name_prefix))
                .spawn(move || {
                    if let Some(hook) = hook {
                        hook();
                    }
                    run_worker(&receiver, &state);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Closing the queue lets the workers spawned so far exit.
                    drop(sender);
                    for worker in workers {
                        let _result = worker.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        tracing::debug!(size = self.size, prefix = %self.name_prefix, "worker pool started");
        Ok(WorkerPool {
            sender: Some(sender),
            workers,
            state,
        })
    }
}

#[derive(Default)]
struct PoolState {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl PoolState {
    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::Acquire) == 0 && self.active.load(Ordering::Acquire) == 0
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }
}

fn run_worker(receiver: &Receiver<Job>, state: &PoolState) {
    while let Ok(job) = receiver.recv() {
        // Mark the job active before it leaves the queue count so that the
        // pool never appears idle while a job is being picked up.
        state.active.fetch_add(1, Ordering::AcqRel);
        state.queued.fetch_sub(1, Ordering::AcqRel);

        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            state.panicked.fetch_add(1, Ordering::AcqRel);
            tracing::error!(
                thread = thread::current().name().unwrap_or("<unnamed>"),
                message = panic_message(&*panic),
                "job panicked"
            );
        }

        state.completed.fetch_add(1, Ordering::AcqRel);
        state.active.fetch_sub(1, Ordering::AcqRel);
        state.notify_if_idle();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// A fixed set of reusable worker threads consuming one shared queue.
///
/// Dropping the pool closes the queue, lets already-queued jobs finish, and
/// joins every worker.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Spawns a pool of `size` workers with the default settings.
    ///
    /// # Errors
    ///
    /// See [`PoolBuilder::build`].
    pub fn new(size: usize) -> Result<Self, PoolError> {
        PoolBuilder::new(size).build()
    }

    /// Returns a [`PoolBuilder`] for a pool of `size` workers.
    pub fn builder(size: usize) -> PoolBuilder {
        PoolBuilder::new(size)
    }

    /// Enqueues `job` for execution on one of the workers.
    ///
    /// A panic inside `job` is caught and logged; the worker survives.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutDown`] after [`WorkerPool::shutdown`].
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::ShutDown)?;
        self.state.queued.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.state.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::ShutDown);
        }
        Ok(())
    }

    /// The number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// The number of jobs waiting to be picked up.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Acquire)
    }

    /// The number of jobs currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    /// The number of jobs that have finished, including ones that panicked.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::Acquire)
    }

    /// The number of jobs that panicked.
    #[must_use]
    pub fn panicked(&self) -> usize {
        self.state.panicked.load(Ordering::Acquire)
    }

    /// Blocks until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut guard = self.state.idle_lock.lock();
        while !self.state.is_idle() {
            self.state.idle.wait(&mut guard);
        }
    }

    /// Blocks until no job is queued or running, or until `timeout` elapses.
    /// Returns true if the pool became idle.
    #[must_use]
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.idle_lock.lock();
        while !self.state.is_idle() {
            if self.state.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.state.is_idle();
            }
        }
        true
    }

    /// Stops accepting jobs, lets queued jobs finish, and joins every worker.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }
        tracing::debug!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
