//! Single-flight request coordinator.
//!
//! `fetch` checks the cache, then the in-flight map, and only on a full miss
//! runs the producer. All three steps happen under one lock, so N concurrent
//! callers for the same key see exactly one producer run. The producer runs on
//! its own tokio task and settles the flight itself: under the same lock it
//! drops the flight and, on success, publishes the value to the cache. Every
//! waiter then receives a clone of that single outcome.

use anyhow::anyhow;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::{Cache, Lookup};
use crate::error::{self, Error, Result};
use crate::metrics;
use crate::pool::WorkerPool;

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

/// A producer run that callers for the same key join.
struct Flight<V> {
    id: u64,
    result: SharedResult<V>,
}

struct State<V> {
    flights: HashMap<String, Flight<V>>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Counters {
    producer_runs: AtomicU64,
    coalesced: AtomicU64,
    hits: AtomicU64,
    stale_hits: AtomicU64,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlightStats {
    /// Keys with a producer currently running.
    pub in_flight: usize,
    pub producer_runs: u64,
    /// Callers that joined an existing flight instead of starting one.
    pub coalesced: u64,
    pub hits: u64,
    pub stale_hits: u64,
}

enum Joined<V> {
    Hit(V),
    Wait(SharedResult<V>),
}

/// Cache-aside front with in-flight deduplication.
pub struct RequestCoordinator<V> {
    cache: Arc<dyn Cache<V>>,
    pool: Option<WorkerPool<V>>,
    state: Arc<Mutex<State<V>>>,
    counters: Counters,
}

impl<V> RequestCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<dyn Cache<V>>) -> Self {
        Self {
            cache,
            pool: None,
            state: Arc::new(Mutex::new(State {
                flights: HashMap::new(),
                next_id: 0,
            })),
            counters: Counters::default(),
        }
    }

    /// Runs `fetch_on_pool` payloads on `pool`.
    pub fn with_pool(mut self, pool: WorkerPool<V>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn cache(&self) -> &Arc<dyn Cache<V>> {
        &self.cache
    }

    /// Returns the cached value for `key`, or runs `producer` once for all
    /// concurrent callers and caches its success.
    ///
    /// Dropping the returned future does not cancel a producer that was started.
    pub async fn fetch<F, Fut>(&self, key: &str, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let work = async move { producer().await.map_err(Error::producer) };
        self.resolve(key, work).await
    }

    /// Like `fetch`, but the producer is a blocking payload run on the worker
    /// pool. Worker faults and pool termination reach the caller unchanged.
    /// Without a pool the payload runs on tokio's blocking threads.
    pub async fn fetch_on_pool<F>(&self, key: &str, payload: F) -> Result<V>
    where
        F: FnOnce() -> anyhow::Result<V> + Send + 'static,
    {
        let pool = self.pool.clone();
        let work = async move {
            match pool {
                Some(pool) => pool.submit(payload).await,
                None => match tokio::task::spawn_blocking(payload).await {
                    Ok(res) => res.map_err(Error::producer),
                    Err(err) => Err(Error::producer(anyhow!("producer panicked: {}", err))),
                },
            }
        };
        self.resolve(key, work).await
    }

    /// Removes the cached value. A flight already running for the key still
    /// publishes its result when it settles.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.delete(key)
    }

    /// Reports whether a producer is running for `key`.
    pub fn in_flight(&self, key: &str) -> bool {
        self.state.lock().flights.contains_key(key)
    }

    pub fn stats(&self) -> FlightStats {
        FlightStats {
            in_flight: self.state.lock().flights.len(),
            producer_runs: self.counters.producer_runs.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            stale_hits: self.counters.stale_hits.load(Ordering::Relaxed),
        }
    }

    async fn resolve<Fut>(&self, key: &str, work: Fut) -> Result<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.join(key, work) {
            Joined::Hit(value) => Ok(value),
            Joined::Wait(result) => result.await,
        }
    }

    /// Cache lookup, pending lookup and flight registration, atomically.
    fn join<Fut>(&self, key: &str, work: Fut) -> Joined<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut state = self.state.lock();

        match self.cache.lookup(key) {
            Some(Lookup::Fresh(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Joined::Hit(value);
            }
            Some(Lookup::Stale(value)) => {
                self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                if !state.flights.contains_key(key) {
                    debug!(component = "flight", event = "revalidate", key, "serving stale value, refreshing");
                    let _ = self.start(&mut state, key, work);
                }
                return Joined::Hit(value);
            }
            None => {}
        }

        if let Some(flight) = state.flights.get(key) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::add_coalesced();
            return Joined::Wait(flight.result.clone());
        }

        Joined::Wait(self.start(&mut state, key, work))
    }

    /// Registers a flight for `key` and spawns its producer. Caller holds the lock.
    fn start<Fut>(&self, state: &mut State<V>, key: &str, work: Fut) -> SharedResult<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let id = state.next_id;
        state.next_id += 1;

        let (tx, rx) = oneshot::channel::<Result<V>>();
        let result = rx
            .map(|res| {
                res.unwrap_or_else(|_| Err(Error::producer(anyhow!("producer abandoned before settling"))))
            })
            .boxed()
            .shared();
        state.flights.insert(
            key.to_string(),
            Flight {
                id,
                result: result.clone(),
            },
        );

        self.counters.producer_runs.fetch_add(1, Ordering::Relaxed);
        metrics::add_producer_run();
        debug!(component = "flight", event = "flight_started", key, flight = id, "producer started");

        let shared = self.state.clone();
        let cache = self.cache.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(Error::producer(anyhow!(
                    "producer panicked: {}",
                    error::panic_message(panic.as_ref())
                ))),
            };

            {
                let mut state = shared.lock();
                if state.flights.get(&key).is_some_and(|f| f.id == id) {
                    state.flights.remove(&key);
                }
                match &outcome {
                    Ok(value) => cache.set(&key, value.clone()),
                    Err(err) => warn!(
                        component = "flight",
                        event = "producer_failed",
                        key = %key,
                        flight = id,
                        error = %err,
                        "producer failed, result not cached"
                    ),
                }
            }

            let _ = tx.send(outcome);
        });

        result
    }
}
