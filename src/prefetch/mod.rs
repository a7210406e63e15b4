pub mod future;
pub mod producer;
pub mod queue;

pub use future::{PageFuture, PagePayload, PagePromise, PageResult};
pub use producer::PrefetchProducer;
pub use queue::PrefetchQueue;
