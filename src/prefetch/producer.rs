use log::{debug, trace};
use std::sync::Arc;

use super::future::{PageFuture, PagePayload};
use super::queue::PrefetchQueue;
use crate::remote::{CursorToken, RemoteService};

/// Keeps one cursor's prefetch queue topped up.
///
/// Each iteration queues a pending page first and then performs the remote
/// fetch, so the queue always reflects the page in flight and `push` is what
/// throttles the producer to the consumer's pace.
pub struct PrefetchProducer {
    remote: Arc<dyn RemoteService>,
    token: CursorToken,
    queue: Arc<PrefetchQueue>,
}

impl PrefetchProducer {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        token: CursorToken,
        queue: Arc<PrefetchQueue>,
    ) -> Self {
        Self {
            remote,
            token,
            queue,
        }
    }

    pub fn token(&self) -> CursorToken {
        self.token
    }

    pub fn queue(&self) -> Arc<PrefetchQueue> {
        self.queue.clone()
    }

    /// Run until the server reports the end of the result set, a fetch
    /// fails, or retrieval is stopped. Returns the number of pages fetched.
    pub fn run(self) -> usize {
        let mut pages = 0usize;
        while self.queue.is_retrieving() {
            let (promise, future) = PageFuture::pending();
            if !self.queue.push(future) {
                debug!("{}: retrieval stopped, producer exiting", self.token);
                break;
            }

            match self.remote.fetch_page(self.token) {
                Ok(page) => {
                    pages += 1;
                    let more_available = page.more_available;
                    trace!(
                        "{}: page {} with {} rows (more: {})",
                        self.token,
                        pages,
                        page.rows.len(),
                        more_available
                    );
                    promise.resolve(Ok(PagePayload::Page(page)));
                    if !more_available {
                        let marker = PageFuture::resolved(Ok(PagePayload::EndOfData));
                        if !self.queue.push(marker) {
                            debug!("{}: stopped before end-of-data was queued", self.token);
                        }
                        break;
                    }
                }
                Err(err) => {
                    debug!("{}: page fetch failed: {}", self.token, err);
                    promise.resolve(Err(err));
                    break;
                }
            }
        }
        debug!("{}: producer finished after {} pages", self.token, pages);
        pages
    }
}
