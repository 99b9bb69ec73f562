//! Executor abstraction and transaction guard.
//!
//! - [`Executor`] is the minimal statement interface a driver must offer:
//!   run a parameterized statement, return rows or an affected-row count,
//!   and open/close (possibly nested) transactions.
//! - [`Transaction`] is an RAII guard over an executor's transaction that
//!   rolls back when dropped without an explicit commit.
//!
//! All calls block the current thread; timeouts and cancellation belong to
//! the driver.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A blocking SQL executor.
///
/// SQL handed to an executor already uses the dialect's native placeholder
/// syntax, and `params` line up with those placeholders in order.
///
/// `begin` may be called while a transaction is already open; implementors
/// are expected to map nested calls onto savepoints so that `commit` and
/// `rollback` always apply to the innermost level.
pub trait Executor: Send + Sync {
    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute an INSERT and return the generated key.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Open a transaction, or a savepoint when one is already open.
    fn begin(&self) -> Result<()>;

    /// Commit the innermost transaction level.
    fn commit(&self) -> Result<()>;

    /// Roll back the innermost transaction level.
    fn rollback(&self) -> Result<()>;

    /// Current nesting depth; zero outside any transaction.
    fn transaction_depth(&self) -> usize;
}

/// A transaction (or savepoint) over an [`Executor`].
///
/// If dropped without `commit`/`rollback`, the level is rolled back.
pub struct Transaction<'a> {
    exec: &'a dyn Executor,
    finalized: bool,
}

impl<'a> Transaction<'a> {
    /// Begin a new transaction level on `exec`.
    pub fn begin(exec: &'a dyn Executor) -> Result<Self> {
        exec.begin()?;
        tracing::trace!(depth = exec.transaction_depth(), "transaction level opened");
        Ok(Self {
            exec,
            finalized: false,
        })
    }

    /// The executor statements should run on while this guard is alive.
    pub fn executor(&self) -> &'a dyn Executor {
        self.exec
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.exec.execute(sql, params)
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.exec.query(sql, params)
    }

    pub fn commit(mut self) -> Result<()> {
        self.finalized = true;
        self.exec.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finalized = true;
        self.exec.rollback()
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(err) = self.exec.rollback() {
                tracing::warn!(error = %err, "rollback of abandoned transaction failed");
            }
        }
    }
}
