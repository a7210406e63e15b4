use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::future::{PageFuture, PageResult};
use crate::config::PrefetchConfig;

#[derive(Debug, Default)]
struct QueueState {
    futures: VecDeque<Arc<PageFuture>>,
    retrieving: bool,
}

/// Bounded single-producer/single-consumer handoff of page futures.
///
/// The `retrieving` flag is the pipeline's stop signal. Any thread may clear
/// it; once cleared, `push` refuses new pages and every waiter wakes up. The
/// flag and the queue share one mutex, so a waiter can never miss the
/// transition.
///
/// Popping the last element does not clear `retrieving`. End of stream is an
/// explicit terminal page pushed by the producer; an empty queue while still
/// retrieving only means the producer has not caught up yet.
#[derive(Debug)]
pub struct PrefetchQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    capacity: usize,
    poll_interval: Duration,
}

impl PrefetchQueue {
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            capacity: config.capacity.max(1),
            poll_interval: config.readiness_poll,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until there is room or retrieval stopped. Returns `false`
    /// without queueing the future once retrieval stopped.
    pub fn push(&self, future: PageFuture) -> bool {
        let mut state = self.state.lock();
        while state.retrieving && state.futures.len() >= self.capacity {
            self.cond.wait(&mut state);
        }
        if !state.retrieving {
            return false;
        }
        state.futures.push_back(Arc::new(future));
        debug_assert!(state.futures.len() <= self.capacity);
        self.cond.notify_all();
        true
    }

    /// Drop the front future, if any, and wake a waiting producer.
    pub fn pop(&self) {
        let mut state = self.state.lock();
        state.futures.pop_front();
        self.cond.notify_one();
    }

    /// Wait for a front future and block on its resolution. The wait for the
    /// page itself happens outside the queue lock, so it is released only by
    /// the page resolving; stopping a stuck fetch is the remote's job.
    ///
    /// Returns `None` when retrieval stopped with nothing queued.
    pub fn front(&self) -> Option<PageResult> {
        let future = {
            let mut state = self.state.lock();
            loop {
                if let Some(front) = state.futures.front() {
                    break front.clone();
                }
                if !state.retrieving {
                    return None;
                }
                self.cond.wait(&mut state);
            }
        };
        Some(future.get())
    }

    /// Cooperatively wait until the front future resolves, re-checking the
    /// stop flag every poll interval. Returns the current `retrieving` value:
    /// `true` means the front page is ready to read.
    pub fn wait_for_readiness_of_front(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if !state.retrieving {
                return false;
            }
            if state.futures.front().is_some_and(|front| front.is_ready()) {
                return true;
            }
            self.cond.wait_for(&mut state, self.poll_interval);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().futures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().futures.len()
    }

    pub fn set_retrieving(&self, retrieving: bool) {
        let mut state = self.state.lock();
        state.retrieving = retrieving;
        self.cond.notify_all();
    }

    pub fn is_retrieving(&self) -> bool {
        self.state.lock().retrieving
    }

    /// Drain every queued future, stop retrieval and wake all waiters.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let drained = state.futures.len();
        state.futures.clear();
        state.retrieving = false;
        self.cond.notify_all();
        if drained > 0 {
            log::trace!("prefetch queue reset dropped {} pending pages", drained);
        }
    }

    pub fn notify_one(&self) {
        let _state = self.state.lock();
        self.cond.notify_one();
    }
}
