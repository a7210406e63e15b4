use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::QuillDriverResult;
use crate::prefetch::PrefetchProducer;

/// Categories of background workers attached to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Prefetch,
    QueryTimeout,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerMetadata {
    pub kind: WorkerKind,
    pub interval: Option<Duration>,
}

pub struct WorkerHandle {
    metadata: WorkerMetadata,
    stop_fn: Option<Box<dyn FnOnce() + Send + 'static>>,
    join_handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(
        metadata: WorkerMetadata,
        stop_fn: impl FnOnce() + Send + 'static,
        join_handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            metadata,
            stop_fn: Some(Box::new(stop_fn)),
            join_handle,
        }
    }

    pub fn metadata(&self) -> WorkerMetadata {
        self.metadata
    }

    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop_fn.take() {
            stop();
        }
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            if let Err(err) = handle.join() {
                warn!(
                    "Background worker {:?} terminated with panic: {:?}",
                    self.metadata.kind, err
                );
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("metadata", &self.metadata)
            .field("running", &self.join_handle.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct BackgroundWorkers {
    workers: Vec<WorkerHandle>,
}

impl BackgroundWorkers {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    pub fn register(&mut self, handle: WorkerHandle) {
        self.workers.push(handle);
    }

    pub fn register_opt(&mut self, handle: Option<WorkerHandle>) {
        if let Some(handle) = handle {
            self.register(handle);
        }
    }

    /// Signal every worker first, then join them, so no worker waits on a
    /// sibling that has not been told to stop yet.
    pub fn shutdown_all(&mut self) {
        for worker in &mut self.workers {
            worker.shutdown();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<WorkerMetadata> {
        self.workers
            .iter()
            .map(|worker| worker.metadata())
            .collect()
    }
}

impl Drop for BackgroundWorkers {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Run `producer` on its own thread. Stopping the worker resets the queue,
/// which releases a producer blocked in `push`.
pub fn spawn_prefetch_worker(producer: PrefetchProducer) -> QuillDriverResult<WorkerHandle> {
    let token = producer.token();
    let queue = producer.queue();
    let join_handle = thread::Builder::new()
        .name(format!("prefetch-{}", token.id))
        .spawn(move || {
            producer.run();
        })?;
    Ok(WorkerHandle::new(
        WorkerMetadata {
            kind: WorkerKind::Prefetch,
            interval: None,
        },
        move || queue.reset(),
        Some(join_handle),
    ))
}

/// Call `on_expire` once `timeout` elapses unless the worker is stopped
/// first. A zero timeout disables the watchdog.
pub fn spawn_timeout_watchdog<F>(timeout: Duration, on_expire: F) -> Option<WorkerHandle>
where
    F: FnOnce() + Send + 'static,
{
    if timeout.is_zero() {
        return None;
    }

    let disarmed = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_disarmed = Arc::clone(&disarmed);

    match thread::Builder::new()
        .name("query-timeout".into())
        .spawn(move || {
            let deadline = Instant::now() + timeout;
            let (lock, cond) = &*thread_disarmed;
            let mut stopped = lock.lock();
            while !*stopped {
                if cond.wait_until(&mut stopped, deadline).timed_out() {
                    break;
                }
            }
            if *stopped {
                return;
            }
            drop(stopped);
            debug!("Query timeout of {:?} expired, cancelling", timeout);
            on_expire();
        }) {
        Ok(join_handle) => Some(WorkerHandle::new(
            WorkerMetadata {
                kind: WorkerKind::QueryTimeout,
                interval: Some(timeout),
            },
            move || {
                let (lock, cond) = &*disarmed;
                *lock.lock() = true;
                cond.notify_all();
            },
            Some(join_handle),
        )),
        Err(err) => {
            warn!("Failed to spawn query timeout watchdog: {}", err);
            None
        }
    }
}
