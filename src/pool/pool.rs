//! Fixed-size worker pool with FIFO dispatch.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigTrait};
use crate::error::Error;

use super::counters::Counters;
use super::handle::TaskHandle;
use super::queue::{Task, TaskQueue};
use super::telemetry;
use super::worker::{self, Outcome, Response, Worker};

/// Snapshot of pool state and task outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured worker count, fixed for the pool's lifetime.
    pub pool_size: usize,
    /// Workers not yet terminated.
    pub active_workers: usize,
    /// Workers currently running a task.
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub completed: u64,
    pub failed: u64,
    pub faulted: u64,
    pub rejected: u64,
}

struct State<T> {
    workers: Vec<Worker<T>>,
    queue: TaskQueue<T>,
    next_id: u64,
    terminated: bool,
}

impl<T> State<T> {
    fn alive(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Hands queued tasks to idle workers, lowest index first, head of queue first.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.workers.iter_mut().find(|w| w.is_idle()) else {
                return;
            };
            let Some(task) = self.queue.pop() else {
                return;
            };
            let Task {
                id,
                payload,
                resolver,
            } = task;
            if let Err((payload, resolver)) = worker.run(id, payload, resolver) {
                // The thread is gone without reporting; retire it and keep the task at the head.
                warn!(component = "pool", worker = worker.id(), "worker unreachable, retiring");
                worker.terminate();
                self.queue.requeue_front(Task::new(id, payload, resolver));
            }
        }
    }
}

pub(crate) struct Shared<T> {
    name: String,
    size: usize,
    state: Mutex<State<T>>,
    counters: Counters,
    token: CancellationToken,
}

impl<T> Shared<T> {
    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            pool_size: self.size,
            active_workers: state.alive(),
            busy_workers: state.workers.iter().filter(|w| !w.is_idle() && w.is_alive()).count(),
            queued_tasks: state.queue.len(),
            completed: Counters::load(&self.counters.completed),
            failed: Counters::load(&self.counters.failed),
            faulted: Counters::load(&self.counters.faulted),
            rejected: Counters::load(&self.counters.rejected),
        }
    }

    /// Handles one worker response: settle its task, then feed the worker the queue head.
    fn settle(&self, resp: Response<T>) {
        let mut state = self.state.lock();

        let Some(worker) = state.workers.get_mut(resp.worker) else {
            return;
        };
        match resp.outcome {
            Outcome::Completed(value) => {
                if let Some(running) = worker.settle(resp.id) {
                    Counters::inc(&self.counters.completed);
                    let _ = running.resolver.send(Ok(value));
                }
            }
            Outcome::Failed(err) => {
                if let Some(running) = worker.settle(resp.id) {
                    Counters::inc(&self.counters.failed);
                    let _ = running.resolver.send(Err(Error::producer(err)));
                }
            }
            Outcome::Faulted(reason) => {
                let running = worker.terminate();
                error!(
                    component = "pool",
                    event = "worker_faulted",
                    pool = %self.name,
                    worker = resp.worker,
                    task = resp.id,
                    reason = %reason,
                    "worker died, retired from pool"
                );
                if let Some(running) = running.filter(|r| r.id == resp.id) {
                    Counters::inc(&self.counters.faulted);
                    let _ = running
                        .resolver
                        .send(Err(worker::fault(resp.worker, resp.id, reason)));
                }
            }
        }

        if state.terminated {
            return;
        }
        state.pump();

        if state.alive() == 0 {
            drop(state);
            error!(
                component = "pool",
                event = "no_workers_left",
                pool = %self.name,
                "every worker has faulted, terminating pool"
            );
            self.terminate("no workers left");
        }
    }

    /// Terminates every worker and rejects all outstanding tasks. Idempotent.
    fn terminate(&self, reason: &str) {
        let (queued, in_flight) = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            // Workers check the token before starting anything already in their channel.
            self.token.cancel();

            let mut queued = 0u64;
            for task in state.queue.drain() {
                let _ = task.resolver.send(Err(Error::PoolTerminated));
                queued += 1;
            }

            let mut in_flight = 0u64;
            for worker in state.workers.iter_mut() {
                if let Some(running) = worker.terminate() {
                    let _ = running.resolver.send(Err(Error::PoolTerminated));
                    in_flight += 1;
                }
            }
            (queued, in_flight)
        };

        Counters::add(&self.counters.rejected, queued + in_flight);

        info!(
            component = "pool",
            event = "terminated",
            pool = %self.name,
            reason = reason,
            rejected_queued = queued,
            rejected_in_flight = in_flight,
            "worker pool terminated"
        );
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.terminate("dropped");
    }
}

/// Pool of N isolated workers. Cloning yields another handle to the same pool;
/// the pool shuts down when the last handle is dropped.
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `size` worker threads and the dispatcher. Requires a tokio runtime.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let runtime = tokio::runtime::Handle::try_current()
            .context("worker pool must be created inside a tokio runtime")?;

        let token = CancellationToken::new();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let worker = Worker::spawn(&name, id, responses_tx.clone(), token.clone())
                .with_context(|| format!("spawn worker {} of pool {}", id, name))?;
            workers.push(worker);
        }
        drop(responses_tx);

        let shared = Arc::new(Shared {
            name: name.clone(),
            size,
            state: Mutex::new(State {
                workers,
                queue: TaskQueue::new(),
                next_id: 0,
                terminated: false,
            }),
            counters: Counters::new(),
            token,
        });

        runtime.spawn(dispatch_loop(
            Arc::downgrade(&shared),
            responses_rx,
            shared.token.clone(),
        ));

        info!(component = "pool", event = "started", pool = %name, size, "worker pool started");

        Ok(Self { shared })
    }

    /// Builds a pool from the `pool` config section and starts its telemetry.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let pool = Self::new(cfg.pool_name(), cfg.pool_size())?;
        pool.spawn_telemetry(cfg.stats_interval());
        Ok(pool)
    }

    /// Submits a payload. Returns immediately; the handle resolves when the task settles.
    /// After shutdown the handle is already rejected and no task is created.
    pub fn submit<F>(&self, payload: F) -> TaskHandle<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.terminated {
            Counters::inc(&self.shared.counters.rejected);
            return TaskHandle::rejected(Error::PoolTerminated);
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = oneshot::channel();
        state.queue.push(Task::new(id, Box::new(payload), tx));
        state.pump();

        TaskHandle::pending(id, rx)
    }

    /// Starts periodic stats logging; stops with the pool.
    pub fn spawn_telemetry(&self, every: Duration) {
        let weak = Arc::downgrade(&self.shared);
        let token = self.shared.token.clone();
        let name = self.shared.name.clone();
        tokio::spawn(telemetry::run(token, name, every, move || {
            weak.upgrade().map(|shared| shared.stats())
        }));
    }
}

impl<T> WorkerPool<T> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminated
    }

    /// Terminates all workers, rejects queued and in-flight tasks with
    /// `PoolTerminated`, and makes later submits reject immediately. Idempotent.
    pub fn shutdown(&self) {
        self.shared.terminate("shutdown");
    }

    /// Resolves once the pool has terminated.
    pub async fn terminated(&self) {
        self.shared.token.cancelled().await
    }
}

async fn dispatch_loop<T>(
    shared: Weak<Shared<T>>,
    mut responses: mpsc::UnboundedReceiver<Response<T>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                return;
            }
            resp = responses.recv() => {
                let Some(resp) = resp else {
                    return;
                };
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.settle(resp);
            }
        }
    }
}
