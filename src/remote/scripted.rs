use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{CursorToken, Page, RemoteService, Row};
use crate::error::{QuillDriverError, QuillDriverResult};
use crate::utils::scalar::ScalarValue;

/// One step of a scripted result set. Each `fetch_page` call consumes steps
/// up to and including the next `Rows`, `Fail` or `Hang`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Rows(Vec<Row>),
    Fail(String),
    /// Stall the next fetch. Interrupted by `cancel_remote`.
    Delay(Duration),
    /// Block until `cancel_remote` is called for the cursor.
    Hang,
}

impl ScriptStep {
    fn yields_page(&self) -> bool {
        !matches!(self, ScriptStep::Delay(_))
    }
}

#[derive(Debug)]
struct CursorScript {
    query: String,
    steps: VecDeque<ScriptStep>,
    cancelled: bool,
    fetches: usize,
    cancels: usize,
}

#[derive(Debug, Default)]
struct RemoteState {
    scripts: HashMap<String, Vec<ScriptStep>>,
    default_script: Option<Vec<ScriptStep>>,
    cursors: HashMap<CursorToken, CursorScript>,
    next_id: u64,
}

/// In-process remote service driven by per-query scripts. Counts every
/// fetch and cancel it sees so callers can assert on the traffic.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    state: Mutex<RemoteState>,
    cond: Condvar,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, query: &str, steps: Vec<ScriptStep>) -> Self {
        self.set_script(query, steps);
        self
    }

    pub fn set_script(&self, query: &str, steps: Vec<ScriptStep>) {
        self.state.lock().scripts.insert(query.to_string(), steps);
    }

    /// Script used for any query without an explicit one.
    pub fn set_default_script(&self, steps: Vec<ScriptStep>) {
        self.state.lock().default_script = Some(steps);
    }

    /// Build a paged script of `total_rows` rows of `(id, label)` pairs.
    /// `latency` is inserted before every page; `fail_page` (0-based)
    /// replaces that page with a remote failure.
    pub fn paged_series(
        total_rows: usize,
        page_size: usize,
        latency: Option<Duration>,
        fail_page: Option<usize>,
    ) -> Vec<ScriptStep> {
        let page_size = page_size.max(1);
        let mut steps = Vec::new();
        let mut next = 0usize;
        let mut page_no = 0usize;
        while next < total_rows {
            if let Some(latency) = latency {
                steps.push(ScriptStep::Delay(latency));
            }
            if fail_page == Some(page_no) {
                steps.push(ScriptStep::Fail(format!("page {} unavailable", page_no)));
                return steps;
            }
            let end = (next + page_size).min(total_rows);
            let rows = (next..end).map(|i| series_row(i as i64)).collect();
            steps.push(ScriptStep::Rows(rows));
            next = end;
            page_no += 1;
        }
        steps
    }

    pub fn last_token(&self) -> Option<CursorToken> {
        let state = self.state.lock();
        state.cursors.keys().max_by_key(|token| token.id).copied()
    }

    pub fn opened_cursors(&self) -> usize {
        self.state.lock().cursors.len()
    }

    pub fn query_of(&self, token: CursorToken) -> Option<String> {
        let state = self.state.lock();
        state.cursors.get(&token).map(|c| c.query.clone())
    }

    pub fn fetch_count(&self, token: CursorToken) -> usize {
        let state = self.state.lock();
        state.cursors.get(&token).map_or(0, |c| c.fetches)
    }

    pub fn cancel_count(&self, token: CursorToken) -> usize {
        let state = self.state.lock();
        state.cursors.get(&token).map_or(0, |c| c.cancels)
    }

    pub fn total_cancel_count(&self) -> usize {
        let state = self.state.lock();
        state.cursors.values().map(|c| c.cancels).sum()
    }

    fn wait_until_cancelled(
        &self,
        guard: &mut MutexGuard<'_, RemoteState>,
        token: CursorToken,
        deadline: Option<Instant>,
    ) -> QuillDriverResult<()> {
        loop {
            if is_cancelled(guard, token)? {
                return Err(QuillDriverError::Remote(format!(
                    "{} cancelled while fetching",
                    token
                )));
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(guard, deadline).timed_out() {
                        return if is_cancelled(guard, token)? {
                            Err(QuillDriverError::Remote(format!(
                                "{} cancelled while fetching",
                                token
                            )))
                        } else {
                            Ok(())
                        };
                    }
                }
                None => self.cond.wait(guard),
            }
        }
    }
}

fn series_row(id: i64) -> Row {
    Row::new(vec![
        ScalarValue::from(id),
        ScalarValue::from(format!("row-{}", id)),
    ])
}

fn is_cancelled(state: &RemoteState, token: CursorToken) -> QuillDriverResult<bool> {
    state
        .cursors
        .get(&token)
        .map(|c| c.cancelled)
        .ok_or_else(|| QuillDriverError::Remote(format!("unknown {}", token)))
}

impl RemoteService for ScriptedRemote {
    fn open_cursor(&self, query: &str) -> QuillDriverResult<CursorToken> {
        let mut state = self.state.lock();
        let steps = match state.scripts.get(query) {
            Some(steps) => steps.clone(),
            None => state.default_script.clone().ok_or_else(|| {
                QuillDriverError::Remote(format!("no script registered for query: {}", query))
            })?,
        };
        state.next_id += 1;
        let token = CursorToken::new(state.next_id);
        state.cursors.insert(
            token,
            CursorScript {
                query: query.to_string(),
                steps: steps.into(),
                cancelled: false,
                fetches: 0,
                cancels: 0,
            },
        );
        log::debug!("scripted remote opened {} for {:?}", token, query);
        Ok(token)
    }

    fn fetch_page(&self, token: CursorToken) -> QuillDriverResult<Page> {
        let mut state = self.state.lock();
        let cursor = state
            .cursors
            .get_mut(&token)
            .ok_or_else(|| QuillDriverError::Remote(format!("unknown {}", token)))?;
        cursor.fetches += 1;

        loop {
            if is_cancelled(&state, token)? {
                return Err(QuillDriverError::Remote(format!("{} was cancelled", token)));
            }
            let step = state
                .cursors
                .get_mut(&token)
                .and_then(|cursor| cursor.steps.pop_front());
            match step {
                None => return Ok(Page::new(Vec::new(), false)),
                Some(ScriptStep::Delay(delay)) => {
                    self.wait_until_cancelled(&mut state, token, Some(Instant::now() + delay))?;
                }
                Some(ScriptStep::Hang) => {
                    self.wait_until_cancelled(&mut state, token, None)?;
                }
                Some(ScriptStep::Fail(message)) => {
                    return Err(QuillDriverError::Remote(message));
                }
                Some(ScriptStep::Rows(rows)) => {
                    let more_available = state
                        .cursors
                        .get(&token)
                        .is_some_and(|cursor| cursor.steps.iter().any(ScriptStep::yields_page));
                    return Ok(Page::new(rows, more_available));
                }
            }
        }
    }

    fn cancel_remote(&self, token: CursorToken) {
        let mut state = self.state.lock();
        if let Some(cursor) = state.cursors.get_mut(&token) {
            cursor.cancels += 1;
            cursor.cancelled = true;
            log::debug!("scripted remote cancelled {}", token);
        }
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pages_follow_script_order() {
        let remote = ScriptedRemote::new().with_script(
            "q",
            vec![
                ScriptStep::Rows(vec![series_row(1)]),
                ScriptStep::Rows(vec![series_row(2)]),
            ],
        );
        let token = remote.open_cursor("q").unwrap();

        let first = remote.fetch_page(token).unwrap();
        assert_eq!(first.rows, vec![series_row(1)]);
        assert!(first.more_available);

        let second = remote.fetch_page(token).unwrap();
        assert_eq!(second.rows, vec![series_row(2)]);
        assert!(!second.more_available);

        let tail = remote.fetch_page(token).unwrap();
        assert!(tail.rows.is_empty());
        assert!(!tail.more_available);
        assert_eq!(remote.fetch_count(token), 3);
    }

    #[test]
    fn unknown_query_without_default_fails() {
        let remote = ScriptedRemote::new();
        assert!(matches!(
            remote.open_cursor("select 1"),
            Err(QuillDriverError::Remote(_))
        ));
    }

    #[test]
    fn paged_series_splits_rows() {
        let steps = ScriptedRemote::paged_series(5, 2, None, None);
        let sizes: Vec<usize> = steps
            .iter()
            .map(|step| match step {
                ScriptStep::Rows(rows) => rows.len(),
                other => panic!("unexpected step {:?}", other),
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let failing = ScriptedRemote::paged_series(6, 2, None, Some(1));
        assert!(matches!(failing.last(), Some(ScriptStep::Fail(_))));
        assert_eq!(failing.len(), 2);
    }

    #[test]
    fn cancel_releases_hanging_fetch() {
        let remote = Arc::new(ScriptedRemote::new().with_script("slow", vec![ScriptStep::Hang]));
        let token = remote.open_cursor("slow").unwrap();

        let fetcher = {
            let remote = remote.clone();
            thread::spawn(move || remote.fetch_page(token))
        };
        thread::sleep(Duration::from_millis(20));
        remote.cancel_remote(token);

        let result = fetcher.join().unwrap();
        assert!(matches!(result, Err(QuillDriverError::Remote(_))));
        assert_eq!(remote.cancel_count(token), 1);
    }

    #[test]
    fn cancel_unknown_token_is_ignored() {
        let remote = ScriptedRemote::new();
        remote.cancel_remote(CursorToken::new(42));
        assert_eq!(remote.total_cancel_count(), 0);
    }
}
