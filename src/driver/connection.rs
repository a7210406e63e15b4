use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::DriverOptions;
use crate::cursor::StatementCursor;
use crate::error::{QuillDriverError, QuillDriverResult};
use crate::remote::{RemoteService, Row};

/// Caller-visible handle of one statement. Clones share the cursor, so a
/// second thread can `cancel` or `close` while the first one fetches.
pub type CursorHandle = Arc<StatementCursor>;

/// A session against one remote query service.
pub struct Connection {
    remote: Arc<dyn RemoteService>,
    options: DriverOptions,
    statements: Mutex<Vec<Weak<StatementCursor>>>,
    connected: AtomicBool,
}

impl Connection {
    pub fn connect(remote: Arc<dyn RemoteService>, options: DriverOptions) -> Self {
        debug!("connection opened with {:?}", options);
        Self {
            remote,
            options,
            statements: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Allocate a statement handle. The handle is reusable: execute, drain
    /// or close, execute again.
    pub fn create_statement(&self) -> QuillDriverResult<CursorHandle> {
        if !self.is_connected() {
            return Err(QuillDriverError::Sequence(
                "connection is closed".to_string(),
            ));
        }
        let cursor = Arc::new(StatementCursor::new(self.remote.clone(), self.options));
        let mut statements = self.statements.lock();
        statements.retain(|stmt| stmt.strong_count() > 0);
        statements.push(Arc::downgrade(&cursor));
        Ok(cursor)
    }

    /// Allocate a statement and execute `query` on it.
    pub fn execute(&self, query: &str) -> QuillDriverResult<CursorHandle> {
        let cursor = self.create_statement()?;
        cursor.execute(query)?;
        Ok(cursor)
    }

    pub fn fetch(&self, cursor: &CursorHandle) -> QuillDriverResult<Option<Row>> {
        cursor.fetch()
    }

    pub fn cancel(&self, cursor: &CursorHandle) -> QuillDriverResult<()> {
        cursor.cancel()
    }

    pub fn close(&self, cursor: &CursorHandle) -> QuillDriverResult<()> {
        cursor.close()
    }

    /// Number of statement handles still alive.
    pub fn open_statements(&self) -> usize {
        let mut statements = self.statements.lock();
        statements.retain(|stmt| stmt.strong_count() > 0);
        statements.len()
    }

    /// Close every live statement and refuse new ones. Idempotent.
    pub fn disconnect(&self) -> QuillDriverResult<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let statements: Vec<CursorHandle> = self
            .statements
            .lock()
            .drain(..)
            .filter_map(|stmt| stmt.upgrade())
            .collect();
        debug!("disconnecting, closing {} statements", statements.len());
        for statement in statements {
            if let Err(err) = statement.close() {
                warn!("Failed to close statement on disconnect: {}", err);
            }
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
