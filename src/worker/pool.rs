//! Bounded pool of OS threads for synchronous pipeline execution.
//!
//! # Responsibilities
//! - Keep `core_pool_size` long-lived workers pulling from a bounded queue
//! - Add transient workers up to `max_pool_size` when the queue is full
//! - Reject immediately once both the queue and the worker budget are exhausted
//! - Return each job's result (or its panic) to the async caller
//!
//! # Design Decisions
//! - Workers share one receiver behind a mutex; whoever holds it takes the next job
//! - A transient worker only waits for more work if no other worker is waiting
//! - I/O tasks never block: `submit` is a non-blocking `try_send` plus an await

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::ExecutorConfig;
use crate::error::PoolError;
use crate::observability::metrics;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<Receiver<Job>>,
    threads: AtomicUsize,
    busy: AtomicUsize,
    max_threads: usize,
    keep_alive: Duration,
}

pub struct WorkerPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    shared: Arc<Shared>,
    core: Mutex<Vec<JoinHandle<()>>>,
    rejected: AtomicUsize,
}

impl WorkerPool {
    /// Start the core workers.
    pub fn new(config: &ExecutorConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Job>(config.queue_depth);
        let shared = Arc::new(Shared {
            queue: Mutex::new(rx),
            threads: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            max_threads: config.max_pool_size.max(config.core_pool_size),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
        });

        let mut core = Vec::with_capacity(config.core_pool_size);
        for worker_id in 0..config.core_pool_size {
            let shared_clone = Arc::clone(&shared);
            shared.threads.fetch_add(1, Ordering::AcqRel);
            let handle = thread::Builder::new()
                .name(format!("microweb-worker-{worker_id}"))
                .spawn(move || core_loop(worker_id, &shared_clone))
                .inspect_err(|_| {
                    shared.threads.fetch_sub(1, Ordering::AcqRel);
                })?;
            core.push(handle);
        }

        tracing::info!(
            core = config.core_pool_size,
            max = shared.max_threads,
            queue_depth = config.queue_depth,
            "Worker pool started"
        );

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            shared,
            core: Mutex::new(core),
            rejected: AtomicUsize::new(0),
        })
    }

    /// Run `job` on a worker thread and await its result.
    pub async fn submit<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(outcome);
        });

        self.enqueue(wrapped)?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic_message = %message, "Worker job panicked");
                Err(PoolError::Panicked(message))
            }
            // The job was dropped without running: the pool shut down under it.
            Err(_) => Err(PoolError::ShutDown),
        }
    }

    fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        let sender = {
            let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            guard.clone().ok_or(PoolError::ShutDown)?
        };

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::ShutDown),
            Err(TrySendError::Full(job)) => self.spawn_transient(job),
        }
    }

    fn spawn_transient(&self, job: Job) -> Result<(), PoolError> {
        let reserved = self
            .shared
            .threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.shared.max_threads).then_some(n + 1)
            });
        if reserved.is_err() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_rejected("overload");
            tracing::warn!(
                threads = self.shared.max_threads,
                "Worker pool saturated; rejecting request"
            );
            return Err(PoolError::Saturated);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("microweb-worker-transient".to_string())
            .spawn(move || transient_loop(job, &shared));
        if let Err(e) = spawned {
            self.shared.threads.fetch_sub(1, Ordering::AcqRel);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_rejected("spawn_failed");
            tracing::error!(error = %e, "Failed to spawn transient worker");
            return Err(PoolError::Saturated);
        }
        tracing::debug!("Queue full; started transient worker");
        Ok(())
    }

    /// Live worker threads, core and transient.
    pub fn threads(&self) -> usize {
        self.shared.threads.load(Ordering::Acquire)
    }

    /// Workers currently running a job.
    pub fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, let queued jobs finish, and join the core workers.
    ///
    /// Blocks; call from a blocking context.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<_> = self
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread exited abnormally");
            }
        }
        tracing::info!("Worker pool drained");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnect so core workers exit; joining is left to `shutdown`.
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("busy", &self.busy())
            .field("max_threads", &self.shared.max_threads)
            .finish()
    }
}

fn core_loop(worker_id: usize, shared: &Shared) {
    tracing::trace!(worker_id, "Worker started");
    loop {
        let next = shared.queue.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(job) => run(job, shared),
            Err(_) => break,
        }
    }
    shared.threads.fetch_sub(1, Ordering::AcqRel);
    tracing::trace!(worker_id, "Worker exiting");
}

fn transient_loop(first: Job, shared: &Shared) {
    run(first, shared);
    loop {
        // A held lock means another worker is already waiting on an empty queue.
        let next = match shared.queue.try_lock() {
            Ok(queue) => queue.recv_timeout(shared.keep_alive).ok(),
            Err(_) => None,
        };
        match next {
            Some(job) => run(job, shared),
            None => break,
        }
    }
    shared.threads.fetch_sub(1, Ordering::AcqRel);
}

fn run(job: Job, shared: &Shared) {
    shared.busy.fetch_add(1, Ordering::AcqRel);
    job();
    shared.busy.fetch_sub(1, Ordering::AcqRel);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
