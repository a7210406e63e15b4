pub mod scripted;

use crate::error::QuillDriverResult;
use crate::utils::scalar::ScalarValue;

pub use scripted::{ScriptStep, ScriptedRemote};

/// Correlation id of one remote result-set traversal.
#[derive(derive_new::new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorToken {
    pub id: u64,
}

impl std::fmt::Display for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cursor#{}", self.id)
    }
}

#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<ScalarValue>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<&ScalarValue> {
        self.values.get(idx)
    }
}

/// One batch of rows returned by a single remote fetch.
#[derive(derive_new::new, Debug, Clone)]
pub struct Page {
    pub rows: Vec<Row>,
    /// `false` once the server has no rows left after this page.
    pub more_available: bool,
}

/// The remote query service the driver sits on. Implementations own all
/// request construction and transport; the driver only sequences calls.
pub trait RemoteService: Send + Sync {
    /// Submit `query` and return the token used for subsequent page fetches.
    fn open_cursor(&self, query: &str) -> QuillDriverResult<CursorToken>;

    /// Fetch the next page for `token`. May block on network latency.
    fn fetch_page(&self, token: CursorToken) -> QuillDriverResult<Page>;

    /// Best-effort abort of any in-flight or future fetch for `token`.
    /// Must be idempotent and harmless after the cursor finished.
    fn cancel_remote(&self, token: CursorToken);
}
