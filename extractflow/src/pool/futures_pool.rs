//! A bounded worker pool for deferred tasks.

use super::metrics::PoolMetrics;
use crate::config::ExtractConfig;
use crate::errors::ExtractError;
use crate::items::{Deferred, DeferredResult};
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// A finished deferred task together with the context it was submitted with.
pub struct Resolved<T, C> {
    /// Context passed to `submit`.
    pub context: C,
    /// The task result.
    pub result: DeferredResult<T>,
}

/// Outcome of a blocking wait on the pool.
pub enum PoolPoll<T, C> {
    /// A task finished.
    Ready(Resolved<T, C>),
    /// Nothing is in flight.
    Idle,
    /// Tasks are running but none finished within the timeout.
    TimedOut,
}

struct PoolState<T, C> {
    running: HashMap<u64, AbortHandle>,
    ready: VecDeque<Resolved<T, C>>,
    closed: bool,
}

struct Shared<T, C> {
    state: Mutex<PoolState<T, C>>,
    changed: Condvar,
    metrics: PoolMetrics,
}

impl<T, C> Shared<T, C> {
    fn finish(&self, id: u64, context: C, result: DeferredResult<T>) {
        let mut state = self.state.lock();
        // Absent when the task was aborted by close; the result is dropped.
        if state.running.remove(&id).is_none() {
            return;
        }
        self.metrics.record_completion(result.is_err());
        state.ready.push_back(Resolved { context, result });
        drop(state);
        self.changed.notify_all();
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!(panic = %message, "Deferred task panicked");
    anyhow::anyhow!("task panicked: {message}")
}

/// Runs deferred tasks off the scheduler thread.
///
/// Blocking tasks go to the blocking threads and futures to the async workers
/// of a private tokio runtime, built on first submit. At most
/// `max_parallel_items` tasks run at once; `submit` blocks the caller until a
/// slot frees up. Finished tasks wait in a ready queue, which does not count
/// against the limit, until the scheduler resolves them.
pub struct FuturesPool<T, C> {
    shared: Arc<Shared<T, C>>,
    runtime: Option<Runtime>,
    workers: usize,
    max_parallel_items: usize,
    poll_interval: Duration,
    next_id: u64,
}

impl<T, C> FuturesPool<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    /// Creates a new pool; no threads are started until the first submit.
    #[must_use]
    pub fn new(workers: usize, poll_interval: Duration, max_parallel_items: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    running: HashMap::new(),
                    ready: VecDeque::new(),
                    closed: false,
                }),
                changed: Condvar::new(),
                metrics: PoolMetrics::default(),
            }),
            runtime: None,
            workers: workers.max(1),
            max_parallel_items: max_parallel_items.max(1),
            poll_interval,
            next_id: 0,
        }
    }

    /// Creates a pool sized from the extraction config.
    #[must_use]
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(config.workers, config.poll_interval(), config.max_parallel_items)
    }

    fn handle(&mut self) -> Result<Handle, ExtractError> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.handle().clone());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .max_blocking_threads(self.workers)
            .thread_name("extract-worker")
            .enable_all()
            .build()?;
        debug!(workers = self.workers, "Started worker runtime");
        let handle = runtime.handle().clone();
        self.runtime = Some(runtime);
        Ok(handle)
    }

    /// Schedules a deferred task.
    ///
    /// Blocks while `max_parallel_items` tasks are running.
    pub fn submit(&mut self, task: Deferred<T>, context: C) -> Result<(), ExtractError> {
        if self.is_closed() {
            return Err(ExtractError::Closed);
        }
        let handle = self.handle()?;
        let mut state = self.shared.state.lock();
        while !state.closed && state.running.len() >= self.max_parallel_items {
            trace!(in_flight = state.running.len(), "Pool full, waiting for a free slot");
            self.shared.changed.wait(&mut state);
        }
        if state.closed {
            return Err(ExtractError::Closed);
        }

        let id = self.next_id;
        self.next_id += 1;
        let shared = Arc::clone(&self.shared);

        // Spawned under the lock so the task cannot finish before it is tracked.
        let abort = match task {
            Deferred::Blocking(task) => handle
                .spawn_blocking(move || {
                    let result = catch_unwind(AssertUnwindSafe(task))
                        .unwrap_or_else(|payload| Err(panic_error(&*payload)));
                    shared.finish(id, context, result);
                })
                .abort_handle(),
            Deferred::Future(future) => handle
                .spawn(async move {
                    let result = AssertUnwindSafe(future)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(panic_error(&*payload)));
                    shared.finish(id, context, result);
                })
                .abort_handle(),
        };
        state.running.insert(id, abort);
        self.shared.metrics.record_submit(state.running.len());
        Ok(())
    }

    /// Returns a finished task if one is ready.
    pub fn resolve_next_future_no_wait(&mut self) -> Option<Resolved<T, C>> {
        self.shared.state.lock().ready.pop_front()
    }

    /// Waits up to `timeout` (the poll interval when `None`) for a finished task.
    pub fn resolve_next_future(&mut self, timeout: Option<Duration>) -> PoolPoll<T, C> {
        let deadline = Instant::now() + timeout.unwrap_or(self.poll_interval);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(resolved) = state.ready.pop_front() {
                return PoolPoll::Ready(resolved);
            }
            if state.running.is_empty() {
                return PoolPoll::Idle;
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return state
                    .ready
                    .pop_front()
                    .map_or(PoolPoll::TimedOut, PoolPoll::Ready);
            }
        }
    }
}

impl<T, C> FuturesPool<T, C> {
    /// Returns true if nothing is running and nothing waits to be resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.running.is_empty() && state.ready.is_empty()
    }

    /// Returns the number of running tasks.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Returns the number of finished tasks waiting to be resolved.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.shared.state.lock().ready.len()
    }

    /// Returns the configured poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Sleeps for the poll interval.
    pub fn sleep(&self) {
        std::thread::sleep(self.poll_interval);
    }

    /// Returns the pool metrics.
    #[must_use]
    pub fn metrics(&self) -> &PoolMetrics {
        &self.shared.metrics
    }

    /// Returns true once the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Aborts running tasks, drops unresolved results and stops the workers.
    ///
    /// Idempotent. The runtime is shut down in the background, so closing is
    /// safe from within an async context.
    pub fn close(&mut self) {
        let (cancelled, dropped) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let cancelled = state.running.len();
            for (_, abort) in state.running.drain() {
                abort.abort();
            }
            let dropped = state.ready.len();
            state.ready.clear();
            (cancelled, dropped)
        };
        self.shared.changed.notify_all();
        self.shared.metrics.record_cancelled(cancelled);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        debug!(cancelled, dropped, "Closed futures pool");
    }
}

impl<T, C> Drop for FuturesPool<T, C> {
    fn drop(&mut self) {
        self.close();
    }
}
