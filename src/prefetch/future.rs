use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

use crate::error::{QuillDriverError, QuillDriverResult};
use crate::remote::Page;

#[derive(Debug)]
pub enum PagePayload {
    Page(Page),
    /// Explicit terminal marker pushed once the server reports no more rows.
    EndOfData,
}

pub type PageResult = QuillDriverResult<PagePayload>;

/// Write half of a page fetch. Resolving consumes the promise, so a page is
/// resolved at most once. Dropping it unresolved surfaces as an internal
/// error on the reading side.
#[derive(Debug)]
pub struct PagePromise {
    sender: SyncSender<PageResult>,
}

impl PagePromise {
    pub fn resolve(self, result: PageResult) {
        if let Err(mpsc::SendError(result)) = self.sender.send(result) {
            if let Err(err) = result {
                log::warn!("Discarding page error for abandoned fetch: {}", err);
            }
        }
    }
}

#[derive(Debug)]
enum FutureSlot {
    Pending(Receiver<PageResult>),
    Ready(PageResult),
    Consumed,
}

/// Read half of a page fetch.
#[derive(Debug)]
pub struct PageFuture {
    slot: Mutex<FutureSlot>,
}

impl PageFuture {
    pub fn pending() -> (PagePromise, PageFuture) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (
            PagePromise { sender },
            PageFuture {
                slot: Mutex::new(FutureSlot::Pending(receiver)),
            },
        )
    }

    pub fn resolved(result: PageResult) -> PageFuture {
        PageFuture {
            slot: Mutex::new(FutureSlot::Ready(result)),
        }
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        let mut slot = self.slot.lock();
        let FutureSlot::Pending(receiver) = &*slot else {
            return true;
        };
        match receiver.try_recv() {
            Ok(result) => {
                *slot = FutureSlot::Ready(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                *slot = FutureSlot::Ready(Err(abandoned()));
                true
            }
        }
    }

    /// Block until the page resolves and take it. A second call returns an
    /// internal error: a page is consumed exactly once.
    pub fn get(&self) -> PageResult {
        let receiver = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, FutureSlot::Consumed) {
                FutureSlot::Ready(result) => return result,
                FutureSlot::Consumed => {
                    return Err(QuillDriverError::Internal(
                        "page future already consumed".to_string(),
                    ))
                }
                FutureSlot::Pending(receiver) => receiver,
            }
        };
        receiver.recv().unwrap_or_else(|_| Err(abandoned()))
    }
}

fn abandoned() -> QuillDriverError {
    QuillDriverError::Internal("page producer exited without resolving the fetch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn resolves_across_threads() {
        let (promise, future) = PageFuture::pending();
        assert!(!future.is_ready());

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.resolve(Ok(PagePayload::EndOfData));
        });

        assert!(matches!(future.get(), Ok(PagePayload::EndOfData)));
        handle.join().unwrap();
    }

    #[test]
    fn consumed_once() {
        let future = PageFuture::resolved(Ok(PagePayload::Page(Page::new(vec![], true))));
        assert!(future.is_ready());
        assert!(matches!(future.get(), Ok(PagePayload::Page(_))));
        assert!(matches!(future.get(), Err(QuillDriverError::Internal(_))));
    }

    #[test]
    fn dropped_promise_is_an_error_not_a_hang() {
        let (promise, future) = PageFuture::pending();
        drop(promise);
        assert!(future.is_ready());
        assert!(matches!(future.get(), Err(QuillDriverError::Internal(_))));
    }

    #[test]
    fn readiness_caches_the_value() {
        let (promise, future) = PageFuture::pending();
        promise.resolve(Err(QuillDriverError::Remote("boom".to_string())));
        assert!(future.is_ready());
        assert!(future.is_ready());
        assert!(matches!(future.get(), Err(QuillDriverError::Remote(msg)) if msg == "boom"));
    }
}
