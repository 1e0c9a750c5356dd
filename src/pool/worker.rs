//! Worker: an isolated thread that runs one payload at a time.
//!
//! The pool talks to a worker only through messages. A `Request` carries a
//! correlation id and the payload; the worker answers on the pool's shared
//! response channel with a `Response` carrying the same id. A panic inside a
//! payload kills the worker: it reports `Faulted` and its thread exits.
//! Once the pool's token is cancelled, a request still sitting in the channel
//! is dropped unanswered instead of being started.

use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{self, Error};

/// A unit of work executed on a worker thread.
pub type Payload<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

/// Settles a task's future.
pub type Resolver<T> = oneshot::Sender<error::Result<T>>;

/// Pool -> worker.
pub struct Request<T> {
    pub id: u64,
    pub payload: Payload<T>,
}

/// What happened to a request.
pub enum Outcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    /// The worker died; carries the panic message.
    Faulted(String),
}

/// Worker -> pool.
pub struct Response<T> {
    pub worker: usize,
    pub id: u64,
    pub outcome: Outcome<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Terminated,
}

/// A task currently executing on a worker.
pub(crate) struct Running<T> {
    pub id: u64,
    pub resolver: Resolver<T>,
}

/// Pool-side handle of one worker thread.
pub struct Worker<T> {
    id: usize,
    state: WorkerState,
    tx: Option<mpsc::UnboundedSender<Request<T>>>,
    running: Option<Running<T>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawns the worker thread.
    pub fn spawn(
        pool_name: &str,
        id: usize,
        responses: mpsc::UnboundedSender<Response<T>>,
        token: CancellationToken,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("{}-worker-{}", pool_name, id))
            .spawn(move || work(id, rx, responses, token))?;

        Ok(Self {
            id,
            state: WorkerState::Idle,
            tx: Some(tx),
            running: None,
        })
    }
}

impl<T> Worker<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn is_alive(&self) -> bool {
        self.state != WorkerState::Terminated
    }

    /// Sends a task to the worker. Gives the task back if the worker's thread is gone.
    pub(crate) fn run(
        &mut self,
        id: u64,
        payload: Payload<T>,
        resolver: Resolver<T>,
    ) -> Result<(), (Payload<T>, Resolver<T>)> {
        debug_assert!(self.is_idle());
        let Some(tx) = self.tx.as_ref() else {
            return Err((payload, resolver));
        };
        match tx.send(Request { id, payload }) {
            Ok(()) => {
                self.state = WorkerState::Busy;
                self.running = Some(Running { id, resolver });
                Ok(())
            }
            Err(mpsc::error::SendError(req)) => Err((req.payload, resolver)),
        }
    }

    /// Takes the running task if it matches the correlation id.
    pub(crate) fn settle(&mut self, id: u64) -> Option<Running<T>> {
        match &self.running {
            Some(running) if running.id == id => {
                if self.state == WorkerState::Busy {
                    self.state = WorkerState::Idle;
                }
                self.running.take()
            }
            _ => None,
        }
    }

    /// Permanently removes the worker from service. Closing the request
    /// channel ends the thread once its current payload returns.
    pub(crate) fn terminate(&mut self) -> Option<Running<T>> {
        self.state = WorkerState::Terminated;
        self.tx = None;
        self.running.take()
    }
}

fn work<T>(
    id: usize,
    mut rx: mpsc::UnboundedReceiver<Request<T>>,
    responses: mpsc::UnboundedSender<Response<T>>,
    token: CancellationToken,
) {
    debug!(component = "worker", worker = id, "worker started");

    while let Some(Request { id: task, payload }) = rx.blocking_recv() {
        if token.is_cancelled() {
            debug!(component = "worker", worker = id, task, "pool terminated, request dropped");
            break;
        }
        let outcome = match panic::catch_unwind(AssertUnwindSafe(payload)) {
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(panic) => {
                let reason = error::panic_message(panic.as_ref());
                warn!(component = "worker", worker = id, task, reason = %reason, "worker faulted");
                let _ = responses.send(Response {
                    worker: id,
                    id: task,
                    outcome: Outcome::Faulted(reason),
                });
                return;
            }
        };

        if responses
            .send(Response {
                worker: id,
                id: task,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }

    debug!(component = "worker", worker = id, "worker is gone");
}

/// Builds the error a faulted task is rejected with.
pub(crate) fn fault(worker: usize, task: u64, reason: String) -> Error {
    Error::WorkerFault {
        worker,
        task,
        reason,
    }
}
