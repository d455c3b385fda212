//! Scheduler - throttled FIFO dispatch for control-plane calls
//!
//! Submitters queue a ticket and wait for the dispatch loop to hand them a
//! slot. The loop runs at a fixed cadence, grants at most one slot per tick
//! while the in-flight count is under the ceiling, and goes idle once the
//! queue drains. The next submission restarts it.
//!
//! The in-flight ceiling is a semaphore. Each dispatched submitter receives
//! an owned permit and holds it for the whole retry envelope of one
//! operation; a permit sent to a cancelled submitter comes back and is
//! dropped, so capacity never leaks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gs_common::{RemoteError, RemoteResult};
use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::retry::RetryPolicy;

/// Configuration for a scheduler instance
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Dispatch loop cadence, also the minimum delay between dispatch starts
    pub interval: Duration,
    /// Maximum operations in flight at once
    pub concurrency: u32,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub concurrency: u32,
    pub in_flight: u32,
    pub queue_size: u32,
    pub dispatched_total: u64,
    pub dispatching: bool,
}

struct QueueState {
    queue: VecDeque<oneshot::Sender<OwnedSemaphorePermit>>,
    /// True while a dispatch loop task is alive
    dispatching: bool,
    last_dispatch: Option<Instant>,
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<QueueState>,
    semaphore: Arc<Semaphore>,
    dispatched: AtomicU64,
}

impl Shared {
    fn in_flight(&self) -> u32 {
        let available = self.semaphore.available_permits() as u32;
        self.config.concurrency.saturating_sub(available)
    }
}

/// Throttled, retrying dispatcher. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            shared: Arc::new(Shared {
                config: SchedulerConfig { concurrency, ..config },
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dispatching: false,
                    last_dispatch: None,
                }),
                semaphore: Arc::new(Semaphore::new(concurrency as usize)),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queue `operation` and run it under the retry policy once dispatched.
    ///
    /// `operation` is called once per attempt.
    pub async fn submit<F, Fut, T>(&self, name: &str, operation: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let permit = self.acquire(name).await?;

        let start = std::time::Instant::now();
        let result = self.shared.config.retry.run(operation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        metrics::histogram!("gatesync_remote_call_duration_ms").record(duration_ms as f64);
        debug!(
            operation = name,
            duration_ms = duration_ms,
            success = result.is_ok(),
            "Remote call completed"
        );

        drop(permit);
        metrics::gauge!("gatesync_scheduler_in_flight").set(self.shared.in_flight() as f64);
        result
    }

    async fn acquire(&self, name: &str) -> RemoteResult<OwnedSemaphorePermit> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            state.queue.push_back(tx);
            metrics::gauge!("gatesync_scheduler_queue_size").set(state.queue.len() as f64);
            trace!(operation = name, queue_size = state.queue.len(), "Queued remote call");

            if !state.dispatching {
                state.dispatching = true;
                tokio::spawn(Self::dispatch_loop(self.shared.clone()));
            }
        }

        rx.await
            .map_err(|_| RemoteError::other(name, "Scheduler dropped the request before dispatch"))
    }

    async fn dispatch_loop(shared: Arc<Shared>) {
        debug!("Dispatch loop started");

        loop {
            let wait = {
                let mut state = shared.state.lock();
                let now = Instant::now();

                let ready_at = state
                    .last_dispatch
                    .map(|last| last + shared.config.interval)
                    .unwrap_or(now);

                if ready_at > now {
                    ready_at - now
                } else {
                    Self::dispatch_head(&shared, &mut state, now);

                    if state.queue.is_empty() {
                        state.dispatching = false;
                        debug!("Queue drained, dispatch loop idle");
                        return;
                    }
                    shared.config.interval
                }
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Hand a permit to the oldest live submitter, skipping cancelled ones.
    /// Does nothing while every permit is out.
    fn dispatch_head(shared: &Arc<Shared>, state: &mut QueueState, now: Instant) {
        while !state.queue.is_empty() {
            let Ok(permit) = shared.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some(tx) = state.queue.pop_front() else {
                break;
            };

            // A closed receiver hands the permit back; dropping it releases it
            if tx.send(permit).is_ok() {
                state.last_dispatch = Some(now);
                shared.dispatched.fetch_add(1, Ordering::SeqCst);
                metrics::counter!("gatesync_scheduler_dispatched_total").increment(1);
                metrics::gauge!("gatesync_scheduler_in_flight").set(shared.in_flight() as f64);
                break;
            }
        }
        metrics::gauge!("gatesync_scheduler_queue_size").set(state.queue.len() as f64);
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            concurrency: self.shared.config.concurrency,
            in_flight: self.shared.in_flight(),
            queue_size: state.queue.len() as u32,
            dispatched_total: self.shared.dispatched.load(Ordering::SeqCst),
            dispatching: state.dispatching,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
