//! Submission runtime.
//!
//! Scanners submit concurrently. `ReconRuntime` runs each request on a small,
//! bounded pool of worker threads over one shared engine; every request gets its
//! own unit of work, and a full queue is reported to the caller instead of
//! blocking it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::RuntimeConfig;
use crate::error::{ExecutionError, ReconError, ReconResult};

use super::{InventoryEngine, Request, Response};

const REPLY_PATH: &str = "request_reply";

enum Job {
    Execute {
        request: Request,
        reply: Sender<ReconResult<Response>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(config: &RuntimeConfig, engine: &Arc<InventoryEngine>) -> ReconResult<Self> {
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut pool = Self {
            tx,
            workers: Vec::with_capacity(config.workers.max(1)),
            queue_capacity,
        };
        for idx in 0..config.workers.max(1) {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let spawned = thread::Builder::new()
                .name(format!("hostrecon-worker-{idx}"))
                .spawn(move || worker_loop(&engine, &rx));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(ReconError::internal(format!(
                        "failed to spawn worker {idx}: {e}"
                    )));
                }
            }
        }
        Ok(pool)
    }

    fn try_submit(&self, job: Job) -> ReconResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ReconError::Execution(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => {
                Err(ReconError::Execution(ExecutionError::Disconnected {
                    path: "request_queue".to_string(),
                }))
            }
        }
    }

    fn shutdown(self) {
        // Workers drain what is queued, then see the closed channel.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(engine: &InventoryEngine, rx: &Receiver<Job>) {
    loop {
        match rx.recv() {
            Ok(Job::Execute { request, reply }) => {
                let result = engine.execute(request);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "request failed");
                }
                let _ = reply.send(result);
            }
            Err(_) => break,

            #[cfg(test)]
            Ok(Job::Sleep { duration, reply }) => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

fn reply_disconnected() -> ReconError {
    ReconError::Execution(ExecutionError::Disconnected {
        path: REPLY_PATH.to_string(),
    })
}

/// Pending result of a submitted request.
#[derive(Debug)]
pub struct RequestHandle {
    rx: Receiver<ReconResult<Response>>,
}

impl RequestHandle {
    /// Wait for the request to finish.
    pub fn join(self) -> ReconResult<Response> {
        self.rx.recv().map_err(|_| reply_disconnected())?
    }

    /// Wait for the request to finish, giving up after `timeout`.
    ///
    /// A timed-out request still runs to completion on its worker.
    pub fn join_timeout(self, timeout: Duration) -> ReconResult<Response> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ReconError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => reply_disconnected(),
        })?
    }
}

/// Bounded worker pool over a shared [`InventoryEngine`].
pub struct ReconRuntime {
    engine: Arc<InventoryEngine>,
    pool: WorkerPool,
}

impl ReconRuntime {
    /// Start the workers, sized by the engine's `runtime` configuration.
    ///
    /// # Errors
    /// `Internal` if a worker thread cannot be spawned.
    pub fn new(engine: InventoryEngine) -> ReconResult<Self> {
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(&engine.config().runtime, &engine)?;
        tracing::debug!(
            workers = pool.workers.len(),
            queue_capacity = pool.queue_capacity,
            "runtime started"
        );
        Ok(Self { engine, pool })
    }

    /// Queue a request. Fails fast with `QueueFull` when the queue is at capacity.
    pub fn submit(&self, request: Request) -> ReconResult<RequestHandle> {
        let (tx, rx) = bounded::<ReconResult<Response>>(1);
        self.pool.try_submit(Job::Execute { request, reply: tx })?;
        Ok(RequestHandle { rx })
    }

    /// Queue a request and wait for it.
    pub fn execute(&self, request: Request) -> ReconResult<Response> {
        self.submit(request)?.join()
    }

    /// The shared engine.
    #[must_use]
    pub fn engine(&self) -> &InventoryEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> ReconResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for ReconRuntime {
    fn drop(&mut self) {
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::EngineConfig;
    use crate::record::HostRecord;

    fn runtime(workers: usize, queue_capacity: usize) -> ReconRuntime {
        let config = EngineConfig {
            runtime: RuntimeConfig {
                workers,
                queue_capacity,
            },
            ..EngineConfig::default()
        };
        ReconRuntime::new(InventoryEngine::in_memory(config).unwrap()).unwrap()
    }

    #[test]
    fn test_submit_and_join() {
        let runtime = runtime(2, 16);
        let handle = runtime
            .submit(Request::SubmitHosts(vec![HostRecord::new("10.0.0.1")]))
            .unwrap();
        let Response::HostBatch(report) = handle.join().unwrap() else {
            panic!("expected a batch report");
        };
        assert_eq!(report.inserted(), 1);

        let Response::Hosts(hosts) = runtime.execute(Request::ListHosts).unwrap() else {
            panic!("expected hosts");
        };
        assert_eq!(hosts.len(), 1);
    }

    #[test]
    fn test_full_queue_fails_fast() {
        let runtime = runtime(1, 1);

        // Occupy the worker, then fill the single queue slot.
        let busy = runtime.submit_sleep(Duration::from_millis(300)).unwrap();
        let mut queued = None;
        let mut saw_full = false;
        for _ in 0..50 {
            match runtime.submit_sleep(Duration::from_millis(1)) {
                Ok(rx) => queued = Some(rx),
                Err(ReconError::Execution(ExecutionError::QueueFull { capacity })) => {
                    assert_eq!(capacity, 1);
                    saw_full = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert!(saw_full);

        busy.recv_timeout(Duration::from_secs(2)).unwrap();
        if let Some(rx) = queued {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
    }

    #[test]
    fn test_join_reports_disconnected_when_reply_dropped() {
        let (tx, rx) = bounded::<ReconResult<Response>>(1);
        drop(tx);

        let err = RequestHandle { rx }.join().unwrap_err();
        let ReconError::Execution(ExecutionError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, REPLY_PATH);
    }

    #[test]
    fn test_join_timeout_distinguishes_timeout_from_disconnect() {
        let (tx, rx) = bounded::<ReconResult<Response>>(1);
        let err = RequestHandle { rx }
            .join_timeout(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconError::Execution(ExecutionError::Timeout { duration_ms: 10 })
        ));
        drop(tx);

        let (tx, rx) = bounded::<ReconResult<Response>>(1);
        drop(tx);
        let err = RequestHandle { rx }
            .join_timeout(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconError::Execution(ExecutionError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_drop_drains_queued_requests() {
        let runtime = runtime(1, 8);
        let handles: Vec<_> = (1..=4)
            .map(|i| {
                runtime
                    .submit(Request::SubmitHosts(vec![HostRecord::new(format!("10.0.0.{i}"))]))
                    .unwrap()
            })
            .collect();
        drop(runtime);

        for handle in handles {
            assert!(handle.join().is_ok());
        }
    }
}
