use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::worker::{Response, Worker};
use super::{WorkerPool, WorkerState};
use crate::config::new_test_config;
use crate::error::Error;

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Polls `cond` until it holds or a second passes.
async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// A payload that records its start and then blocks until released.
fn gated(
    name: &'static str,
    log: &Log,
) -> (
    impl FnOnce() -> anyhow::Result<&'static str> + Send + 'static,
    std_mpsc::Sender<()>,
) {
    let (tx, rx) = std_mpsc::channel::<()>();
    let log = log.clone();
    let payload = move || {
        log.lock().push(name);
        let _ = rx.recv();
        Ok(name)
    };
    (payload, tx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_runs_payload() {
    let pool: WorkerPool<u64> = WorkerPool::new("basic", 2).unwrap();
    let out = pool.submit(|| Ok(21 * 2)).await.unwrap();
    assert_eq!(out, 42);

    let stats = pool.stats();
    assert_eq!(stats.pool_size, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.queued_tasks, 0);
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fifo_dispatch_with_two_workers() {
    let pool: WorkerPool<&'static str> = WorkerPool::new("fifo", 2).unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let (a, release_a) = gated("A", &log);
    let (b, release_b) = gated("B", &log);
    let (c, release_c) = gated("C", &log);
    let (d, release_d) = gated("D", &log);

    let ha = pool.submit(a);
    let hb = pool.submit(b);
    let hc = pool.submit(c);
    let hd = pool.submit(d);

    wait_until(|| log.lock().len() == 2).await;
    let stats = pool.stats();
    assert_eq!(stats.busy_workers, 2);
    assert_eq!(stats.queued_tasks, 2);
    {
        let started = log.lock();
        assert!(started.contains(&"A") && started.contains(&"B"));
    }

    release_a.send(()).unwrap();
    assert_eq!(ha.await.unwrap(), "A");

    wait_until(|| log.lock().len() == 3).await;
    assert_eq!(log.lock()[2], "C");
    assert_eq!(pool.stats().queued_tasks, 1);

    release_b.send(()).unwrap();
    release_c.send(()).unwrap();
    release_d.send(()).unwrap();
    assert_eq!(hb.await.unwrap(), "B");
    assert_eq!(hc.await.unwrap(), "C");
    assert_eq!(hd.await.unwrap(), "D");
    assert_eq!(log.lock()[3], "D");
    assert_eq!(pool.stats().completed, 4);
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_rejects_queued_in_flight_and_later_submits() {
    let pool: WorkerPool<&'static str> = WorkerPool::new("shutdown", 1).unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let (a, release_a) = gated("A", &log);
    let ha = pool.submit(a);
    let hb = pool.submit(|| Ok("B"));
    let hc = pool.submit(|| Ok("C"));
    wait_until(|| log.lock().len() == 1).await;

    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_terminated());

    assert!(matches!(ha.await, Err(Error::PoolTerminated)));
    assert!(matches!(hb.await, Err(Error::PoolTerminated)));
    assert!(matches!(hc.await, Err(Error::PoolTerminated)));

    let late = pool.submit(|| Ok("late"));
    assert_eq!(late.id(), None);
    assert!(matches!(late.await, Err(Error::PoolTerminated)));

    let stats = pool.stats();
    assert_eq!(stats.rejected, 4);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.queued_tasks, 0);

    // Let the abandoned payload finish; its result is discarded.
    let _ = release_a.send(());
    tokio::time::timeout(Duration::from_secs(1), pool.terminated())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_error_keeps_worker() {
    let pool: WorkerPool<u32> = WorkerPool::new("errors", 1).unwrap();

    let err = pool
        .submit(|| Err(anyhow::anyhow!("bad input")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Producer(_)));
    assert_eq!(err.to_string(), "producer failed: bad input");

    assert_eq!(pool.submit(|| Ok(7)).await.unwrap(), 7);
    let stats = pool.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.active_workers, 1);
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_fault_retires_worker() {
    let pool: WorkerPool<String> = WorkerPool::new("fault", 2).unwrap();

    let err = pool
        .submit(|| -> anyhow::Result<String> { panic!("context died") })
        .await
        .unwrap_err();
    match err {
        Error::WorkerFault { worker, reason, .. } => {
            assert_eq!(worker, 0);
            assert_eq!(reason, "context died");
        }
        other => panic!("unexpected error: {other}"),
    }

    let stats = pool.stats();
    assert_eq!(stats.active_workers, 1);
    assert_eq!(stats.faulted, 1);

    for _ in 0..4 {
        let thread = pool
            .submit(|| Ok(std::thread::current().name().unwrap_or_default().to_string()))
            .await
            .unwrap();
        assert_eq!(thread, "fault-worker-1");
    }
    assert_eq!(pool.stats().active_workers, 1);
    assert!(!pool.is_terminated());
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_head_goes_to_surviving_worker_after_fault() {
    let pool: WorkerPool<&'static str> = WorkerPool::new("refault", 2).unwrap();
    let log: Arc<Mutex<Vec<(&'static str, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let gate = |name: &'static str, panics: bool| {
        let (tx, rx) = std_mpsc::channel::<()>();
        let log = log.clone();
        let payload = move || -> anyhow::Result<&'static str> {
            let thread = std::thread::current().name().unwrap_or_default().to_string();
            log.lock().push((name, thread));
            let _ = rx.recv();
            if panics {
                panic!("{} crashed", name);
            }
            Ok(name)
        };
        (payload, tx)
    };
    let started = || log.lock().iter().map(|(n, _)| *n).collect::<Vec<_>>();

    let (doomed, release_doomed) = gate("X", true);
    let (b, release_b) = gate("B", false);
    let (c, release_c) = gate("C", false);
    let (d, release_d) = gate("D", false);

    let hx = pool.submit(doomed);
    wait_until(|| log.lock().len() == 1).await;
    let hb = pool.submit(b);
    wait_until(|| log.lock().len() == 2).await;
    let hc = pool.submit(c);
    let hd = pool.submit(d);
    assert_eq!(pool.stats().queued_tasks, 2);

    // Worker 0 dies while worker 1 is still busy: nothing can be dispatched yet.
    release_doomed.send(()).unwrap();
    assert!(hx.await.unwrap_err().is_worker_fault());
    let stats = pool.stats();
    assert_eq!(stats.active_workers, 1);
    assert_eq!(stats.queued_tasks, 2);

    release_b.send(()).unwrap();
    assert_eq!(hb.await.unwrap(), "B");
    wait_until(|| log.lock().len() == 3).await;
    assert_eq!(started(), vec!["X", "B", "C"]);
    assert_eq!(pool.stats().queued_tasks, 1);

    release_c.send(()).unwrap();
    assert_eq!(hc.await.unwrap(), "C");
    wait_until(|| log.lock().len() == 4).await;
    release_d.send(()).unwrap();
    assert_eq!(hd.await.unwrap(), "D");

    assert_eq!(started(), vec!["X", "B", "C", "D"]);
    {
        let log = log.lock();
        assert_eq!(log[0].1, "refault-worker-0");
        assert!(log[1..].iter().all(|(_, thread)| thread == "refault-worker-1"));
    }
    pool.shutdown();
}

#[test]
fn test_worker_drops_request_received_after_cancel() {
    let (responses_tx, mut responses_rx) = mpsc::unbounded_channel::<Response<u8>>();
    let token = CancellationToken::new();
    let mut worker = Worker::spawn("cancelled", 0, responses_tx, token.clone()).unwrap();
    assert_eq!(worker.state(), WorkerState::Idle);

    // The request lands in the channel only after the pool is cancelled.
    token.cancel();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let (resolver, _result) = oneshot::channel();
    let sent = worker.run(
        0,
        Box::new(move || -> anyhow::Result<u8> {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        }),
        resolver,
    );
    assert!(sent.is_ok());
    assert_eq!(worker.state(), WorkerState::Busy);

    // The thread exits without answering once it sees the cancelled token.
    assert!(responses_rx.blocking_recv().is_none());
    assert!(!ran.load(Ordering::SeqCst));

    assert!(worker.terminate().is_some());
    assert_eq!(worker.state(), WorkerState::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_worker_fault_terminates_pool() {
    let pool: WorkerPool<u8> = WorkerPool::new("fragile", 1).unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
    let log_in = log.clone();
    let doomed = pool.submit(move || -> anyhow::Result<u8> {
        log_in.lock().push("doomed");
        let _ = gate_rx.recv();
        panic!("boom")
    });
    let queued = pool.submit(|| Ok(1));
    wait_until(|| log.lock().len() == 1).await;
    gate_tx.send(()).unwrap();

    assert!(doomed.await.unwrap_err().is_worker_fault());
    assert!(queued.await.unwrap_err().is_pool_terminated());

    wait_until(|| pool.is_terminated()).await;
    assert!(pool.submit(|| Ok(2)).await.unwrap_err().is_pool_terminated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_last_handle_rejects_outstanding() {
    let pool: WorkerPool<&'static str> = WorkerPool::new("dropped", 1).unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let (a, release_a) = gated("A", &log);

    let ha = pool.submit(a);
    let hb = pool.submit(|| Ok("B"));
    wait_until(|| log.lock().len() == 1).await;

    drop(pool);
    assert!(ha.await.unwrap_err().is_pool_terminated());
    assert!(hb.await.unwrap_err().is_pool_terminated());
    let _ = release_a.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_submits_all_settle() {
    let pool: WorkerPool<usize> = WorkerPool::new("many", 3).unwrap();
    let handles: Vec<_> = (0..50)
        .map(|i| {
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(1));
                Ok(i * 2)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i * 2);
    }
    let stats = pool.stats();
    assert_eq!(stats.completed, 50);
    assert_eq!(stats.busy_workers, 0);
    pool.shutdown();
}

#[tokio::test]
async fn test_from_config_uses_pool_section() {
    let cfg = new_test_config();
    let pool: WorkerPool<()> = WorkerPool::from_config(&cfg).unwrap();
    assert_eq!(pool.name(), "test-pool");
    assert_eq!(pool.stats().pool_size, 2);
    assert_eq!(pool.stats().active_workers, 2);
    pool.shutdown();
}

#[test]
fn test_new_outside_runtime_fails() {
    let res: anyhow::Result<WorkerPool<()>> = WorkerPool::new("no-runtime", 1);
    assert!(res.is_err());
}
