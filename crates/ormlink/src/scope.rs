//! Per-operation state handed to every pipeline step.

use ormlink_core::{
    Destination, Error, Executor, ModelDescriptor, PreconditionErrorKind, Record, Result, Row,
    Value,
};
use ormlink_query::{Assembler, Dialect, Search, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::Db;

/// Setting: run the association save steps (default on).
pub const SAVE_ASSOCIATIONS: &str = "ormlink:save_associations";
/// Setting: explicit column update that skips hooks and timestamps.
pub const UPDATE_COLUMNS: &str = "ormlink:update_columns";

/// What an operation reads from or writes to.
pub enum Target<'a> {
    /// A single record for create/update/delete.
    Record(&'a mut dyn Record),
    /// Query results land here.
    Destination(&'a mut dyn Destination),
    /// No value: statements address every row the search matches.
    Table,
}

/// Mutable state for one run of a pipeline.
///
/// A scope is created per operation and dropped when it returns; nothing in
/// it outlives the statement it builds.
pub struct Scope<'a> {
    pub db: &'a Db,
    pub search: Search,
    pub descriptor: Arc<ModelDescriptor>,
    pub target: Target<'a>,
    /// Statement produced by a build step, consumed by the execute step.
    pub statement: Option<Statement>,
    /// Explicit columns for an update.
    pub attrs: Option<BTreeMap<String, Value>>,
    /// Rows returned by the execute step of a query.
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub(crate) transaction_open: bool,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        db: &'a Db,
        search: Search,
        descriptor: Arc<ModelDescriptor>,
        target: Target<'a>,
    ) -> Self {
        Self {
            db,
            search,
            descriptor,
            target,
            statement: None,
            attrs: None,
            rows: Vec::new(),
            rows_affected: 0,
            transaction_open: false,
        }
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.db.executor()
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.db.dialect()
    }

    /// Target table name.
    pub fn table(&self) -> &str {
        self.search
            .table_name
            .as_deref()
            .unwrap_or(&self.descriptor.table_name)
    }

    /// Statement assembler over this scope's descriptor and search.
    pub fn assembler(&self) -> Assembler<'_> {
        Assembler::new(
            self.db.dialect(),
            self.db.cache(),
            &self.descriptor,
            &self.search,
        )
    }

    /// The record being written, if this is a write operation.
    pub fn record(&self) -> Option<&dyn Record> {
        match &self.target {
            Target::Record(record) => Some(&**record),
            Target::Destination(_) | Target::Table => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut dyn Record> {
        match &mut self.target {
            Target::Record(record) => Some(&mut **record),
            Target::Destination(_) | Target::Table => None,
        }
    }

    /// The record being written; an error for query scopes.
    #[allow(clippy::result_large_err)]
    pub fn require_record(&self) -> Result<&dyn Record> {
        self.record().ok_or_else(wrong_target)
    }

    #[allow(clippy::result_large_err)]
    pub fn require_record_mut(&mut self) -> Result<&mut dyn Record> {
        self.record_mut().ok_or_else(wrong_target)
    }

    pub fn destination_mut(&mut self) -> Option<&mut dyn Destination> {
        match &mut self.target {
            Target::Destination(dest) => Some(&mut **dest),
            Target::Record(_) | Target::Table => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.search.flag(key)
    }

    /// Whether association save steps should run.
    pub fn saves_associations(&self) -> bool {
        self.search
            .get(SAVE_ASSOCIATIONS)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Whether lifecycle hooks and timestamps apply to this update.
    pub fn runs_hooks(&self) -> bool {
        !self.flag(UPDATE_COLUMNS)
    }

    /// Finish a statement for the dialect and log it.
    #[allow(clippy::result_large_err)]
    pub fn finish(&self, statement: Statement) -> Result<Statement> {
        self.db.finish(statement)
    }
}

fn wrong_target() -> Error {
    Error::precondition(
        PreconditionErrorKind::WrongDestination,
        "this step needs a record target",
    )
}
