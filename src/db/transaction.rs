//! Nested transactions on top of a single connection.
//!
//! The outermost `begin` opens a real transaction; every nested `begin`
//! pushes a named save-point so inner work can be undone without aborting
//! the outer unit of work.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::db::executor::SqlExecutor;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Root,
    Savepoint(String),
}

/// Stack-based transaction manager.
pub struct TransactionManager {
    executor: SqlExecutor,
    stack: Mutex<Vec<Frame>>,
    next_savepoint: AtomicU64,
}

impl TransactionManager {
    pub fn new(executor: SqlExecutor) -> Self {
        Self {
            executor,
            stack: Mutex::new(Vec::new()),
            next_savepoint: AtomicU64::new(1),
        }
    }

    /// Number of open levels (0 when no transaction is active).
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Returns true while any transaction level is open.
    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Opens a transaction, or a save-point when one is already open.
    pub fn begin(&self) -> Result<()> {
        let mut stack = self.stack.lock();
        let frame = if stack.is_empty() {
            self.run("BEGIN")?;
            Frame::Root
        } else {
            let name = format!(
                "sp_{}",
                self.next_savepoint.fetch_add(1, Ordering::Relaxed)
            );
            self.run(&format!("SAVEPOINT {name}"))?;
            Frame::Savepoint(name)
        };
        debug!(depth = stack.len() + 1, ?frame, "begin");
        stack.push(frame);
        Ok(())
    }

    /// Commits the transaction or releases the innermost save-point.
    ///
    /// Does nothing when no transaction is active.
    pub fn commit(&self) -> Result<()> {
        let mut stack = self.stack.lock();
        let Some(frame) = stack.last().cloned() else {
            warn!("commit called with no active transaction");
            return Ok(());
        };

        match &frame {
            Frame::Root => self.run("COMMIT")?,
            Frame::Savepoint(name) => self.run(&format!("RELEASE SAVEPOINT {name}"))?,
        }
        stack.pop();
        debug!(depth = stack.len(), ?frame, "commit");
        Ok(())
    }

    /// Rolls back the transaction or the innermost save-point.
    ///
    /// Failures are logged and never returned, so they cannot mask the
    /// error that triggered the rollback.
    pub fn rollback(&self) {
        let mut stack = self.stack.lock();
        let Some(frame) = stack.pop() else {
            warn!("rollback called with no active transaction");
            return;
        };

        let outcome = match &frame {
            Frame::Root => self.run("ROLLBACK"),
            Frame::Savepoint(name) => self
                .run(&format!("ROLLBACK TO SAVEPOINT {name}"))
                .and_then(|()| self.run(&format!("RELEASE SAVEPOINT {name}"))),
        };
        if let Err(e) = outcome {
            error!(?frame, error = %e, "rollback failed");
        }
        debug!(depth = stack.len(), ?frame, "rollback");
    }

    /// Runs `f` inside a transaction level.
    ///
    /// Commits when `f` returns `Ok`, rolls back and returns the original
    /// error when it returns `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.begin()?;
        match f() {
            Ok(value) => match self.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.rollback();
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn run(&self, sql: &str) -> Result<()> {
        self.executor
            .execute_script(sql)
            .map_err(|e| StoreError::Transaction(format!("{sql} failed: {e}")))
    }
}
