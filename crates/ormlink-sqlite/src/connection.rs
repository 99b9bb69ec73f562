//! SQLite connection implementation.
//!
//! Safe wrappers around SQLite's C API, exposed through the blocking
//! [`Executor`] trait from ormlink-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::result_large_err)] // Error type is defined in ormlink-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)] // Clearer for error handling

use crate::types;
use libsqlite3_sys as ffi;
use ormlink_core::{
    ColumnInfo, ConnectionError, Error, Executor, QueryError, QueryErrorKind, Result, Row,
    TransactionError, TransactionErrorKind, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

// libsqlite3-sys omits `sqlite3_close_v2` from its generated bindings; the
// bundled amalgamation still exports it.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Inner state of the SQLite connection, protected by a mutex.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    /// Open transaction levels; levels past the first are savepoints.
    depth: usize,
}

// SAFETY: the handle is only touched while the owning Mutex is held.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// Every call holds the connection mutex for its whole duration, so an
/// INSERT and its `last_insert_rowid` read cannot interleave with another
/// thread's statement.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| connection_error("Invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            } else {
                error_string(rc)
            };
            return Err(connection_error(format!("Failed to open database: {msg}")));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, "opened sqlite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner { db, depth: 0 }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner
            .lock()
            .map_err(|_| connection_error("sqlite connection mutex poisoned".to_string()))
    }

    /// Execute one or more statements without parameters (DDL, scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock()?;
        exec_batch(inner.db, sql)
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if !inner.db.is_null() {
                // SAFETY: db is valid and no statement outlives a call
                unsafe {
                    sqlite3_close_v2(inner.db);
                }
            }
        }
    }
}

impl Executor for SqliteConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.lock()?;
        execute_on(inner.db, sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock()?;
        tracing::trace!(sql, params = params.len(), "sqlite query");
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let mut names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid and i is in range
            let name = unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}"));
            names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: the statement just returned SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }
        Ok(rows)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let inner = self.lock()?;
        execute_on(inner.db, sql, params)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let sql = if inner.depth == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT sp_{}", inner.depth)
        };
        exec_batch(inner.db, &sql)?;
        inner.depth += 1;
        tracing::trace!(depth = inner.depth, "sqlite transaction level opened");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let sql = match inner.depth {
            0 => return Err(not_active("COMMIT")),
            1 => "COMMIT".to_string(),
            depth => format!("RELEASE SAVEPOINT sp_{}", depth - 1),
        };
        exec_batch(inner.db, &sql)?;
        inner.depth -= 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let sql = match inner.depth {
            0 => return Err(not_active("ROLLBACK")),
            1 => "ROLLBACK".to_string(),
            depth => format!(
                "ROLLBACK TO SAVEPOINT sp_{0}; RELEASE SAVEPOINT sp_{0}",
                depth - 1
            ),
        };
        exec_batch(inner.db, &sql)?;
        inner.depth -= 1;
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.inner.lock().map(|inner| inner.depth).unwrap_or(0)
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    sql: String,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "SQL contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }

        Ok(Self {
            raw,
            db,
            sql: sql.to_string(),
        })
    }

    fn bind_all(&self, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(self.sql.clone()),
                    // SAFETY: db is valid
                    message: format!("Failed to bind parameter {}: {}", i + 1, unsafe {
                        errmsg(self.db)
                    }),
                    source: None,
                }));
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 (finalizing NULL is a no-op)
        unsafe { ffi::sqlite3_finalize(self.raw) };
    }
}

fn execute_on(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<u64> {
    tracing::trace!(sql, params = params.len(), "sqlite execute");
    let stmt = Statement::prepare(db, sql)?;
    stmt.bind_all(params)?;

    // SAFETY: stmt is valid
    match unsafe { ffi::sqlite3_step(stmt.raw) } {
        ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
            // SAFETY: db is valid
            let changes = unsafe { ffi::sqlite3_changes(db) };
            Ok(changes as u64)
        }
        _ => Err(step_error(db, sql)),
    }
}

fn exec_batch(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })?;

    let mut err: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err) };

    if rc != ffi::SQLITE_OK {
        let message = if !err.is_null() {
            // SAFETY: err is a valid C string allocated by SQLite
            let msg = unsafe { CStr::from_ptr(err).to_string_lossy().into_owned() };
            unsafe { ffi::sqlite3_free(err.cast()) };
            msg
        } else {
            error_string(rc)
        };
        return Err(Error::Query(QueryError {
            kind: error_code_to_kind(rc),
            sql: Some(sql.to_string()),
            message,
            source: None,
        }));
    }
    Ok(())
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: forwarded from the caller's contract
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(code)) }
        .to_string_lossy()
        .into_owned()
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let message = unsafe { errmsg(db) };
    let code = unsafe { ffi::sqlite3_errcode(db) };

    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended codes carry the primary code in the low byte.
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}

fn connection_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        message,
        source: None,
    })
}

fn not_active(op: &str) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: format!("{op} without an open transaction"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE, score REAL)",
        )
        .unwrap();
        conn
    }

    fn count(conn: &SqliteConnection) -> i64 {
        conn.query("SELECT count(*) FROM users", &[]).unwrap()[0]
            .get_as::<i64>(0)
            .unwrap()
    }

    #[test]
    fn insert_returns_rowid() {
        let conn = setup();
        let first = conn
            .insert("INSERT INTO users (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let second = conn
            .insert("INSERT INTO users (name) VALUES (?)", &[Value::from("b")])
            .unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(conn.last_insert_rowid().unwrap(), 2);
    }

    #[test]
    fn query_reads_columns_by_name() {
        let conn = setup();
        conn.execute(
            "INSERT INTO users (name, score) VALUES (?, ?)",
            &[Value::from("a"), Value::Double(1.5)],
        )
        .unwrap();
        let rows = conn.query("SELECT id, name, score FROM users", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("a")));
        assert_eq!(rows[0].get_by_name("score"), Some(&Value::Double(1.5)));
    }

    #[test]
    fn execute_reports_changes() {
        let conn = setup();
        for name in ["a", "b", "c"] {
            conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::from(name)])
                .unwrap();
        }
        let changed = conn
            .execute("UPDATE users SET score = ? WHERE id > ?", &[Value::Double(2.0), Value::BigInt(1)])
            .unwrap();
        assert_eq!(changed, 2);
    }

    #[test]
    fn constraint_violation_is_classified() {
        let conn = setup();
        conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let err = conn
            .execute("INSERT INTO users (name) VALUES (?)", &[Value::from("a")])
            .unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Constraint);
                assert!(q.sql.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn syntax_errors_surface() {
        let conn = setup();
        let err = conn.query("SELEC nope", &[]).unwrap_err();
        assert_eq!(err.sql(), Some("SELEC nope"));
    }

    #[test]
    fn nested_levels_use_savepoints() {
        let conn = setup();
        conn.begin().unwrap();
        conn.execute("INSERT INTO users (name) VALUES ('outer')", &[]).unwrap();

        conn.begin().unwrap();
        assert_eq!(conn.transaction_depth(), 2);
        conn.execute("INSERT INTO users (name) VALUES ('inner')", &[]).unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.transaction_depth(), 1);

        conn.commit().unwrap();
        assert_eq!(conn.transaction_depth(), 0);
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn rollback_discards_outer_level() {
        let conn = setup();
        conn.begin().unwrap();
        conn.execute("INSERT INTO users (name) VALUES ('x')", &[]).unwrap();
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn commit_without_begin_fails() {
        let conn = setup();
        assert!(matches!(conn.commit(), Err(Error::Transaction(_))));
        assert!(matches!(conn.rollback(), Err(Error::Transaction(_))));
    }

    #[test]
    fn config_builder() {
        let config = SqliteConfig::file("test.db").busy_timeout(100).flags(OpenFlags::read_only());
        assert_eq!(config.path, "test.db");
        assert_eq!(config.busy_timeout_ms, 100);
        assert!(config.flags.read_only);
        assert_eq!(
            OpenFlags::default().to_sqlite_flags(),
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        );
        assert_eq!(SqliteConnection::open_memory().unwrap().path(), ":memory:");
    }
}
