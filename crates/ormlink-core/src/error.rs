//! Error types for ormlink operations.
//!
//! The taxonomy mirrors how failures must be handled by callers:
//!
//! - [`Error::Config`]: the model declaration or the filter shape is wrong.
//!   Reported immediately and never worth retrying.
//! - [`Error::Precondition`]: the operation cannot start (no WHERE clause on an
//!   update/delete, a destination field that cannot be set).
//! - [`Error::Query`], [`Error::Connection`], [`Error::Transaction`]: store
//!   failures, propagated verbatim and usually wrapped in [`Error::Context`].
//!
//! "Not found" is deliberately absent: an empty result set is not an error.

use std::fmt;

/// The primary error type for all ormlink operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed model declaration or unsupported filter value
    Config(ConfigError),
    /// The operation cannot proceed with the given scope/record
    Precondition(PreconditionError),
    /// Statement execution errors reported by the executor
    Query(QueryError),
    /// Value conversion errors while binding or scanning
    Type(TypeError),
    /// Connection-level errors (open, lock poisoning)
    Connection(ConnectionError),
    /// Transaction bookkeeping errors
    Transaction(TransactionError),
    /// A store error annotated with the CRUD operation and table
    Context(Box<ContextError>),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A relationship could not be inferred or its annotation is malformed
    Relationship,
    /// A polymorphic relationship lacks the `<name>_type` discriminator field
    MissingDiscriminator,
    /// A filter value shape the condition builder cannot render
    UnsupportedFilter,
    /// Raw SQL placeholders do not line up with the supplied arguments
    PlaceholderMismatch,
    /// Unknown field, relation or hook name
    UnknownName,
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionErrorKind {
    /// UPDATE/DELETE issued without any WHERE-producing condition
    MissingWhere,
    /// The destination field does not exist or cannot hold the value
    UnsettableField,
    /// The operation needs a single record but got a collection (or vice versa)
    WrongDestination,
    /// The record has no primary key value yet
    BlankPrimaryKey,
}

#[derive(Debug)]
pub struct PreconditionError {
    pub kind: PreconditionErrorKind,
    pub message: String,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// COMMIT/ROLLBACK issued without an open transaction
    NotActive,
    /// The transaction was already committed or rolled back
    AlreadyFinalized,
}

/// Store error wrapped with the operation that produced it.
#[derive(Debug)]
pub struct ContextError {
    pub operation: &'static str,
    pub table: String,
    pub source: Error,
}

impl Error {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Build a precondition error.
    pub fn precondition(kind: PreconditionErrorKind, message: impl Into<String>) -> Self {
        Error::Precondition(PreconditionError {
            kind,
            message: message.into(),
        })
    }

    /// Annotate a store error with the operation and table it came from.
    ///
    /// Configuration and precondition errors are returned untouched, and an
    /// error is never wrapped twice.
    #[must_use]
    pub fn with_context(self, operation: &'static str, table: impl Into<String>) -> Self {
        match self {
            Error::Config(_) | Error::Precondition(_) | Error::Context(_) => self,
            source => Error::Context(Box::new(ContextError {
                operation,
                table: table.into(),
                source,
            })),
        }
    }

    /// Strip any context wrapper.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context(ctx) => ctx.source.root(),
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root(), Error::Config(_))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self.root(), Error::Precondition(_))
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self.root() {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Precondition error kind, if this is one.
    pub fn precondition_kind(&self) -> Option<PreconditionErrorKind> {
        match self.root() {
            Error::Precondition(p) => Some(p.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self.root() {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Precondition(e) => write!(f, "Precondition failed: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Context(ctx) => write!(
                f,
                "{} on table '{}' failed: {}",
                ctx.operation, ctx.table, ctx.source
            ),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Context(ctx) => Some(&ctx.source),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<PreconditionError> for Error {
    fn from(err: PreconditionError) -> Self {
        Error::Precondition(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

/// Result type alias for ormlink operations.
pub type Result<T> = std::result::Result<T, Error>;
