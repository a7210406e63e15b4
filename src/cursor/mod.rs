use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::background::{self, BackgroundWorkers, WorkerMetadata};
use crate::config::DriverOptions;
use crate::error::{QuillDriverError, QuillDriverResult};
use crate::prefetch::{PagePayload, PrefetchProducer, PrefetchQueue};
use crate::remote::{CursorToken, RemoteService, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CursorState {
    /// No result set yet.
    Idle,
    /// Producer started, no page delivered yet.
    Executing,
    /// At least one page delivered.
    Open,
    Exhausted,
    Cancelled,
    /// A page fetch failed; the error was handed to one `fetch` call.
    Failed,
    Closed,
}

impl CursorState {
    pub fn is_in_progress(self) -> bool {
        matches!(self, CursorState::Executing | CursorState::Open)
    }
}

/// Everything owned by one execution of the statement.
struct Execution {
    token: CursorToken,
    queue: Arc<PrefetchQueue>,
    workers: BackgroundWorkers,
}

struct CursorControl {
    state: CursorState,
    execution: Option<Execution>,
    /// Bumped on every execute so stale wakeups and timers cannot act on a
    /// newer execution.
    generation: u64,
}

impl CursorControl {
    /// Stop an in-progress execution. Returns the token the caller must
    /// cancel remotely, outside this lock.
    fn cancel(&mut self, generation: Option<u64>) -> Option<CursorToken> {
        if generation.is_some_and(|g| g != self.generation) || !self.state.is_in_progress() {
            return None;
        }
        self.state = CursorState::Cancelled;
        // Still opening: `execute` sees the new state and aborts its token.
        let execution = self.execution.as_ref()?;
        execution.queue.set_retrieving(false);
        Some(execution.token)
    }
}

/// Per-statement result cursor.
///
/// All methods take `&self`: `fetch` runs on the consumer thread while
/// `cancel` and `close` may arrive from any other thread. The control lock is
/// only held for state transitions, never across a blocking wait; rows of
/// the current page sit behind a separate consumer-side lock.
pub struct StatementCursor {
    remote: Arc<dyn RemoteService>,
    options: DriverOptions,
    control: Arc<Mutex<CursorControl>>,
    rows: Mutex<VecDeque<Row>>,
}

impl StatementCursor {
    pub fn new(remote: Arc<dyn RemoteService>, options: DriverOptions) -> Self {
        Self {
            remote,
            options,
            control: Arc::new(Mutex::new(CursorControl {
                state: CursorState::Idle,
                execution: None,
                generation: 0,
            })),
            rows: Mutex::new(VecDeque::new()),
        }
    }

    pub fn state(&self) -> CursorState {
        self.control.lock().state
    }

    pub fn token(&self) -> Option<CursorToken> {
        self.control.lock().execution.as_ref().map(|e| e.token)
    }

    /// Background workers attached to the current execution.
    pub fn workers(&self) -> Vec<WorkerMetadata> {
        self.control
            .lock()
            .execution
            .as_ref()
            .map(|e| e.workers.snapshot())
            .unwrap_or_default()
    }

    /// Submit `query` and start prefetching its pages.
    ///
    /// Allowed from `Idle`, `Exhausted` and `Closed`. A cursor that is still
    /// running, was cancelled, or failed must be closed first. The remote
    /// open runs without the control lock, so `cancel` and `close` from
    /// other threads stay responsive; either one makes this call return
    /// `Cancelled` after aborting the freshly opened remote cursor.
    pub fn execute(&self, query: &str) -> QuillDriverResult<()> {
        let (generation, previous) = {
            let mut control = self.control.lock();
            match control.state {
                CursorState::Idle | CursorState::Exhausted | CursorState::Closed => {}
                state => {
                    return Err(QuillDriverError::Sequence(format!(
                        "cannot execute while cursor is {}; close it first",
                        state
                    )))
                }
            }
            control.generation += 1;
            control.state = CursorState::Executing;
            (control.generation, control.execution.take())
        };
        // The previous execution already finished; this only joins its workers.
        drop(previous);

        let opened = self.remote.open_cursor(query).and_then(|token| {
            self.start_execution(token, generation).inspect_err(|_| {
                self.remote.cancel_remote(token);
            })
        });

        let mut control = self.control.lock();
        let current =
            control.generation == generation && control.state == CursorState::Executing;
        match opened {
            Ok(execution) if current => {
                debug!("{} executing (generation {})", execution.token, generation);
                control.execution = Some(execution);
                Ok(())
            }
            Ok(execution) => {
                drop(control);
                debug!("{} stopped while opening", execution.token);
                self.remote.cancel_remote(execution.token);
                drop(execution);
                Err(QuillDriverError::Cancelled)
            }
            Err(err) => {
                if current {
                    control.state = CursorState::Idle;
                }
                Err(err)
            }
        }
    }

    fn start_execution(
        &self,
        token: CursorToken,
        generation: u64,
    ) -> QuillDriverResult<Execution> {
        let queue = Arc::new(PrefetchQueue::new(self.options.prefetch));
        queue.set_retrieving(true);

        let mut workers = BackgroundWorkers::new();
        let producer = PrefetchProducer::new(self.remote.clone(), token, queue.clone());
        workers.register(background::spawn_prefetch_worker(producer)?);

        if let Some(timeout) = self.options.query_timeout {
            let control = Arc::downgrade(&self.control);
            let remote = self.remote.clone();
            workers.register_opt(background::spawn_timeout_watchdog(timeout, move || {
                cancel_generation(&control, remote.as_ref(), generation);
            }));
        }

        Ok(Execution {
            token,
            queue,
            workers,
        })
    }

    /// Next row of the result set. `Ok(None)` once the server reported the
    /// end of data, on this and every later call.
    pub fn fetch(&self) -> QuillDriverResult<Option<Row>> {
        let (queue, generation) = {
            let control = self.control.lock();
            match control.state {
                CursorState::Idle => {
                    return Err(QuillDriverError::Sequence(
                        "fetch called before execute".to_string(),
                    ))
                }
                CursorState::Closed => {
                    return Err(QuillDriverError::Sequence(
                        "fetch called on a closed cursor".to_string(),
                    ))
                }
                CursorState::Failed => {
                    return Err(QuillDriverError::Sequence(
                        "cursor failed; close it before reuse".to_string(),
                    ))
                }
                CursorState::Exhausted => return Ok(None),
                CursorState::Cancelled => return Err(QuillDriverError::Cancelled),
                CursorState::Executing | CursorState::Open => match &control.execution {
                    Some(execution) => (execution.queue.clone(), control.generation),
                    None => {
                        return Err(QuillDriverError::Sequence(
                            "fetch called while execute is still running".to_string(),
                        ))
                    }
                },
            }
        };

        let mut rows = self.rows.lock();
        loop {
            if let Some(row) = rows.pop_front() {
                return Ok(Some(row));
            }

            if !queue.wait_for_readiness_of_front() {
                return self.stopped_outcome(generation);
            }
            let Some(result) = queue.front() else {
                return self.stopped_outcome(generation);
            };
            queue.pop();

            match result {
                Ok(PagePayload::Page(page)) => {
                    if !self.advance(generation, CursorState::Open) {
                        return self.stopped_outcome(generation);
                    }
                    trace!("consumer received page with {} rows", page.rows.len());
                    rows.extend(page.rows);
                }
                Ok(PagePayload::EndOfData) => {
                    queue.set_retrieving(false);
                    if !self.advance(generation, CursorState::Exhausted) {
                        return self.stopped_outcome(generation);
                    }
                    debug!("cursor exhausted");
                    return Ok(None);
                }
                Err(err) => {
                    queue.set_retrieving(false);
                    if !self.advance(generation, CursorState::Failed) {
                        return self.stopped_outcome(generation);
                    }
                    debug!("cursor failed: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Fetch up to `max_rows` rows. Stops early at the end of data.
    pub fn fetch_many(&self, max_rows: usize) -> QuillDriverResult<Vec<Row>> {
        let mut batch = Vec::with_capacity(max_rows.min(1024));
        while batch.len() < max_rows {
            match self.fetch()? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Stop an in-progress execution and tell the remote to abort it. A
    /// no-op in every other state.
    pub fn cancel(&self) -> QuillDriverResult<()> {
        let token = self.control.lock().cancel(None);
        if let Some(token) = token {
            debug!("{} cancelled", token);
            self.remote.cancel_remote(token);
        }
        Ok(())
    }

    /// Tear down the current execution, if any. Idempotent.
    pub fn close(&self) -> QuillDriverResult<()> {
        let (execution, in_progress) = {
            let mut control = self.control.lock();
            let in_progress = control.state.is_in_progress();
            control.state = CursorState::Closed;
            (control.execution.take(), in_progress)
        };

        if let Some(mut execution) = execution {
            execution.queue.reset();
            if in_progress {
                // Lets a producer blocked in a remote fetch return so it can
                // be joined.
                self.remote.cancel_remote(execution.token);
            }
            execution.workers.shutdown_all();
            debug!("{} closed", execution.token);
        }
        self.rows.lock().clear();
        Ok(())
    }

    /// Move an in-progress execution of `generation` to `next`. Fails when
    /// cancel or close got there first.
    fn advance(&self, generation: u64, next: CursorState) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation || !control.state.is_in_progress() {
            return false;
        }
        control.state = next;
        true
    }

    /// Outcome reported to a fetch that found retrieval stopped.
    fn stopped_outcome(&self, generation: u64) -> QuillDriverResult<Option<Row>> {
        let control = self.control.lock();
        if control.generation != generation {
            return Err(QuillDriverError::Cancelled);
        }
        match control.state {
            CursorState::Exhausted => Ok(None),
            CursorState::Cancelled | CursorState::Closed => Err(QuillDriverError::Cancelled),
            CursorState::Failed => Err(QuillDriverError::Sequence(
                "cursor failed; close it before reuse".to_string(),
            )),
            state => Err(QuillDriverError::Internal(format!(
                "prefetch stopped while cursor is {}",
                state
            ))),
        }
    }
}

fn cancel_generation(
    control: &Weak<Mutex<CursorControl>>,
    remote: &dyn RemoteService,
    generation: u64,
) {
    let Some(control) = control.upgrade() else {
        return;
    };
    let token = control.lock().cancel(Some(generation));
    if let Some(token) = token {
        debug!("{} cancelled by query timeout", token);
        remote.cancel_remote(token);
    }
}

impl Drop for StatementCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for StatementCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.control.lock();
        f.debug_struct("StatementCursor")
            .field("state", &control.state)
            .field("generation", &control.generation)
            .field("token", &control.execution.as_ref().map(|e| e.token))
            .finish()
    }
}
