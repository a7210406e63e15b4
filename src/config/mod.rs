use std::time::Duration;

/// Default number of pages a cursor may hold ahead of its consumer.
pub const DEFAULT_PREFETCH_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Maximum number of not-yet-consumed pages held by the prefetch queue.
    /// The queue always holds at least one page, so `0` behaves like `1`.
    pub capacity: usize,
    /// Granularity of the cooperative readiness poll on the front page.
    pub readiness_poll: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            capacity: DEFAULT_PREFETCH_CAPACITY,
            readiness_poll: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverOptions {
    pub prefetch: PrefetchConfig,
    /// Cancel an execution that is still running after this long.
    /// `None` disables the watchdog.
    pub query_timeout: Option<Duration>,
}

impl DriverOptions {
    pub fn with_query_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.query_timeout = match timeout_ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        };
        self
    }
}
