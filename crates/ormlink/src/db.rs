//! The database handle and its fluent front end.

use ormlink_core::{
    DescriptorCache, Destination, Executor, Model, ModelDescriptor, Record, Result, Row,
    Transaction, Value, set_path,
};
use ormlink_query::{
    Assembler, Dialect, Filter, ORDER_BY_PRIMARY_KEY, Search, Statement, substitute,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::association::Association;
use crate::callbacks::{Action, Callbacks};
use crate::config::DbConfig;
use crate::migrate;
use crate::scope::{SAVE_ASSOCIATIONS, Scope, Target, UPDATE_COLUMNS};

struct Shared {
    executor: Arc<dyn Executor>,
    dialect: Arc<dyn Dialect>,
    cache: DescriptorCache,
    callbacks: RwLock<Callbacks>,
    config: DbConfig,
}

/// A database handle.
///
/// Cloning is cheap: clones share the executor, the descriptor cache and
/// the registered pipelines. Chain methods (`filter`, `order`, ...) return a
/// new handle carrying the accumulated search; the handle they were called
/// on is left untouched, so a base handle can be shared across threads and
/// specialised per operation.
///
/// # Example
///
/// ```rust,ignore
/// let db = Db::open(SqliteConnection::open_memory()?, Sqlite);
/// db.create_table::<User>()?;
///
/// let mut user = User { name: "gernest".into(), ..Default::default() };
/// db.create(&mut user)?;
///
/// let mut found: Vec<User> = Vec::new();
/// db.filter([("name", "gernest")], args![]).find(&mut found)?;
/// ```
#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
    search: Search,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.shared.dialect.name())
            .field("config", &self.shared.config)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Build a handle over a shared executor and dialect.
    pub fn new(executor: Arc<dyn Executor>, dialect: Arc<dyn Dialect>, config: DbConfig) -> Self {
        tracing::debug!(dialect = dialect.name(), ?config, "opening handle");
        let cache = DescriptorCache::with_naming(config.naming());
        Self {
            shared: Arc::new(Shared {
                executor,
                dialect,
                cache,
                callbacks: RwLock::new(Callbacks::default()),
                config,
            }),
            search: Search::new(),
        }
    }

    /// Build a handle with the default configuration.
    pub fn open(executor: impl Executor + 'static, dialect: impl Dialect + 'static) -> Self {
        Self::new(Arc::new(executor), Arc::new(dialect), DbConfig::default())
    }

    pub fn with_config(
        executor: impl Executor + 'static,
        dialect: impl Dialect + 'static,
        config: DbConfig,
    ) -> Self {
        Self::new(Arc::new(executor), Arc::new(dialect), config)
    }

    pub fn executor(&self) -> &dyn Executor {
        self.shared.executor.as_ref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.shared.dialect.as_ref()
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.shared.cache
    }

    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// The search accumulated by chain methods.
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// Descriptor for a model type.
    #[allow(clippy::result_large_err)]
    pub fn describe<T: Model>(&self) -> Result<Arc<ModelDescriptor>> {
        self.shared.cache.describe::<T>()
    }

    /// Edit the registered pipelines.
    ///
    /// Changes are visible to every clone of this handle.
    pub fn with_callbacks<R>(&self, f: impl FnOnce(&mut Callbacks) -> R) -> R {
        let mut callbacks = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut callbacks)
    }

    /// A copy of the registered pipelines.
    pub fn callbacks(&self) -> Callbacks {
        self.shared
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A handle sharing this one's state but with an empty search.
    pub fn fresh(&self) -> Db {
        Db {
            shared: Arc::clone(&self.shared),
            search: Search::new(),
        }
    }

    fn chain(&self, f: impl FnOnce(Search) -> Search) -> Db {
        Db {
            shared: Arc::clone(&self.shared),
            search: f(self.search.clone()),
        }
    }

    // ==================== Chain methods ====================

    /// Add an AND condition.
    #[must_use]
    pub fn filter(&self, query: impl Into<Filter>, args: Vec<Value>) -> Db {
        self.chain(|s| s.filter(query, args))
    }

    /// Add an OR condition.
    #[must_use]
    pub fn or_filter(&self, query: impl Into<Filter>, args: Vec<Value>) -> Db {
        self.chain(|s| s.or_filter(query, args))
    }

    /// Add a negated condition.
    #[must_use]
    pub fn not_filter(&self, query: impl Into<Filter>, args: Vec<Value>) -> Db {
        self.chain(|s| s.not_filter(query, args))
    }

    #[must_use]
    pub fn having(&self, query: impl Into<Filter>, args: Vec<Value>) -> Db {
        self.chain(|s| s.having(query, args))
    }

    #[must_use]
    pub fn joins(&self, query: impl Into<String>, args: Vec<Value>) -> Db {
        self.chain(|s| s.joins(query, args))
    }

    /// Restrict selected (and written) columns.
    #[must_use]
    pub fn select(&self, query: impl Into<String>, args: Vec<Value>) -> Db {
        self.chain(|s| s.select(query, args))
    }

    /// Leave columns out of selects and writes.
    #[must_use]
    pub fn omit<I, S>(&self, columns: I) -> Db
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain(|s| s.omit(columns))
    }

    #[must_use]
    pub fn order(&self, order: impl Into<String>) -> Db {
        self.chain(|s| s.order(order))
    }

    #[must_use]
    pub fn group(&self, group: impl Into<String>) -> Db {
        self.chain(|s| s.group(group))
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Db {
        self.chain(|s| s.limit(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Db {
        self.chain(|s| s.offset(offset))
    }

    /// Load a relation for every record a query returns.
    #[must_use]
    pub fn preload(&self, relation: impl Into<String>) -> Db {
        self.chain(|s| s.preload(relation))
    }

    /// Include soft-deleted rows and delete for real.
    #[must_use]
    pub fn unscoped(&self) -> Db {
        self.chain(Search::unscoped)
    }

    /// Override the table name.
    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> Db {
        self.chain(|s| s.table(name))
    }

    /// Run `sql` as-is for the next query.
    #[must_use]
    pub fn raw(&self, sql: impl Into<String>, args: Vec<Value>) -> Db {
        self.chain(|s| s.raw(sql, args))
    }

    /// Store a setting for pipeline steps.
    #[must_use]
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Db {
        self.chain(|s| s.set(key, value))
    }

    /// Skip saving associations on create/update.
    #[must_use]
    pub fn without_associations(&self) -> Db {
        self.set(SAVE_ASSOCIATIONS, false)
    }

    // ==================== Operations ====================

    #[allow(clippy::result_large_err)]
    pub(crate) fn run(&self, action: Action, scope: &mut Scope<'_>) -> Result<()> {
        let pipeline = self
            .shared
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pipeline(action)
            .clone();
        pipeline.run(action, scope)
    }

    /// Insert a record, assigning its generated key.
    #[allow(clippy::result_large_err)]
    pub fn create(&self, record: &mut dyn Record) -> Result<()> {
        let descriptor = self.shared.cache.describe_record(record)?;
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Record(record));
        self.run(Action::Create, &mut scope)
    }

    /// Insert when the primary key is blank, otherwise update every column.
    #[allow(clippy::result_large_err)]
    pub fn save(&self, record: &mut dyn Record) -> Result<()> {
        let descriptor = self.shared.cache.describe_record(record)?;
        if descriptor.primary_key_is_blank(record) {
            let mut scope =
                Scope::new(self, self.search.clone(), descriptor, Target::Record(record));
            return self.run(Action::Create, &mut scope);
        }
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Record(record));
        self.run(Action::Update, &mut scope)
    }

    #[allow(clippy::result_large_err)]
    fn update_with(
        &self,
        search: Search,
        record: &mut dyn Record,
        attrs: BTreeMap<String, Value>,
    ) -> Result<u64> {
        let descriptor = self.shared.cache.describe_record(record)?;
        let mut scope = Scope::new(self, search, descriptor.clone(), Target::Record(record));
        scope.attrs = Some(attrs);
        self.run(Action::Update, &mut scope)?;
        let rows = scope.rows_affected;
        let attrs = scope.attrs.take().unwrap_or_default();
        if let Target::Record(record) = scope.target {
            for (key, value) in attrs {
                if let Some(field) = descriptor.field(&key) {
                    set_path(record, &field.names, value)?;
                }
            }
        }
        Ok(rows)
    }

    /// Update the given columns, running hooks and timestamps.
    ///
    /// Keys may be field or column names. The record is updated in memory
    /// once the statement succeeds.
    #[allow(clippy::result_large_err)]
    pub fn updates(&self, record: &mut dyn Record, attrs: BTreeMap<String, Value>) -> Result<u64> {
        self.update_with(self.search.clone(), record, attrs)
    }

    /// Update the given columns only: no hooks, no timestamps, no
    /// association saves.
    #[allow(clippy::result_large_err)]
    pub fn update_columns(
        &self,
        record: &mut dyn Record,
        attrs: BTreeMap<String, Value>,
    ) -> Result<u64> {
        let search = self
            .search
            .clone()
            .set(UPDATE_COLUMNS, true)
            .set(SAVE_ASSOCIATIONS, false);
        self.update_with(search, record, attrs)
    }

    /// Update every row of `T` the search matches.
    #[allow(clippy::result_large_err)]
    pub fn update_all<T: Model>(&self, attrs: BTreeMap<String, Value>) -> Result<u64> {
        let descriptor = self.describe::<T>()?;
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Table);
        scope.attrs = Some(attrs);
        self.run(Action::Update, &mut scope)?;
        Ok(scope.rows_affected)
    }

    /// Delete a record (soft delete when it has `deleted_at`).
    #[allow(clippy::result_large_err)]
    pub fn delete(&self, record: &mut dyn Record) -> Result<u64> {
        let descriptor = self.shared.cache.describe_record(record)?;
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Record(record));
        self.run(Action::Delete, &mut scope)?;
        Ok(scope.rows_affected)
    }

    /// Delete every row of `T` the search matches.
    #[allow(clippy::result_large_err)]
    pub fn delete_all<T: Model>(&self) -> Result<u64> {
        let descriptor = self.describe::<T>()?;
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Table);
        self.run(Action::Delete, &mut scope)?;
        Ok(scope.rows_affected)
    }

    /// Query into a record or a collection; returns the row count.
    #[allow(clippy::result_large_err)]
    pub fn find(&self, dest: &mut dyn Destination) -> Result<u64> {
        let descriptor = self.shared.cache.describe_type(&dest.element_type())?;
        let mut scope = Scope::new(self, self.search.clone(), descriptor, Target::Destination(dest));
        self.run(Action::Query, &mut scope)?;
        Ok(scope.rows_affected)
    }

    /// Load the first row by primary key order. `Ok(false)` when none match.
    #[allow(clippy::result_large_err)]
    pub fn first<T: Model>(&self, record: &mut T) -> Result<bool> {
        let db = self.chain(|s| s.limit(1).set(ORDER_BY_PRIMARY_KEY, true));
        Ok(db.find(record)? > 0)
    }

    /// Number of `T` rows the search matches.
    #[allow(clippy::result_large_err)]
    pub fn count<T: Model>(&self) -> Result<i64> {
        let descriptor = self.describe::<T>()?;
        self.count_rows(&descriptor, &self.search)
            .map_err(|err| err.with_context("count", descriptor.table_name.clone()))
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn count_rows(&self, descriptor: &ModelDescriptor, search: &Search) -> Result<i64> {
        let assembler = Assembler::new(self.dialect(), self.cache(), descriptor, search);
        let statement = self.finish(assembler.count(None)?)?;
        match self.executor().query_one(&statement.sql, &statement.args)? {
            Some(row) => row.get_as::<i64>(0),
            None => Ok(0),
        }
    }

    /// The SELECT a `find` of `T` would run.
    #[allow(clippy::result_large_err)]
    pub fn build_select<T: Model>(&self) -> Result<Statement> {
        let descriptor = self.describe::<T>()?;
        let assembler = Assembler::new(self.dialect(), self.cache(), &descriptor, &self.search);
        assembler.select(None)?.finish(self.dialect())
    }

    /// Execute a statement with `?` placeholders; returns rows affected.
    #[allow(clippy::result_large_err)]
    pub fn exec(&self, sql: &str, args: Vec<Value>) -> Result<u64> {
        let statement = self.finish(substitute(sql, &args)?.into())?;
        self.executor().execute(&statement.sql, &statement.args)
    }

    /// Run a query with `?` placeholders and return its rows.
    #[allow(clippy::result_large_err)]
    pub fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>> {
        let statement = self.finish(substitute(sql, &args)?.into())?;
        self.executor().query(&statement.sql, &statement.args)
    }

    /// Rewrite markers for the dialect and log the statement.
    #[allow(clippy::result_large_err)]
    pub(crate) fn finish(&self, statement: Statement) -> Result<Statement> {
        let statement = statement.finish(self.dialect())?;
        if self.shared.config.log_sql {
            tracing::debug!(sql = %statement.sql, args = statement.args.len(), "statement");
        } else {
            tracing::trace!(sql = %statement.sql, args = statement.args.len(), "statement");
        }
        Ok(statement)
    }

    /// Relation `name` of `owner`.
    #[allow(clippy::result_large_err)]
    pub fn association<'a>(
        &'a self,
        owner: &'a mut dyn Record,
        name: &str,
    ) -> Result<Association<'a>> {
        Association::new(self, owner, name)
    }

    /// Run `f` in a transaction; commit on `Ok`, roll back on `Err`.
    ///
    /// Pipelines running inside `f` nest as savepoints.
    #[allow(clippy::result_large_err)]
    pub fn transaction<R>(&self, f: impl FnOnce(&Db) -> Result<R>) -> Result<R> {
        let tx = Transaction::begin(self.executor())?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ==================== Schema ====================

    /// Create the table of `T` (and its join tables) unless it exists.
    #[allow(clippy::result_large_err)]
    pub fn create_table<T: Model>(&self) -> Result<()> {
        let descriptor = self.describe::<T>()?;
        migrate::create_table(self, &descriptor)
    }

    /// Create the table of `T`, or add the columns it is missing.
    #[allow(clippy::result_large_err)]
    pub fn auto_migrate<T: Model>(&self) -> Result<()> {
        let descriptor = self.describe::<T>()?;
        migrate::auto_migrate(self, &descriptor)
    }

    #[allow(clippy::result_large_err)]
    pub fn has_table(&self, table: &str) -> Result<bool> {
        self.dialect().has_table(self.executor(), table)
    }

    #[allow(clippy::result_large_err)]
    pub fn drop_table<T: Model>(&self) -> Result<()> {
        let descriptor = self.describe::<T>()?;
        let sql = format!("DROP TABLE IF EXISTS {}", self.dialect().quote(&descriptor.table_name));
        tracing::debug!(table = %descriptor.table_name, "dropping table");
        self.executor().execute(&sql, &[])?;
        Ok(())
    }
}
