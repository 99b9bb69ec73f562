//! ormlink: typed records to SQL and back.
//!
//! `ormlink` maps Rust structs onto relational tables. A [`Db`] handle runs
//! every create, query, update and delete through a pipeline of named steps
//! that build the statement, execute it, scan rows back into records and
//! fire lifecycle hooks. Relationships between models (has one, has many,
//! belongs to, many to many, polymorphic) are resolved from field
//! annotations and reached through [`Db::association`].
//!
//! # Quick Start
//!
//! ```ignore
//! use ormlink::prelude::*;
//! use ormlink_sqlite::SqliteConnection;
//!
//! #[derive(Model, Debug, Clone, Default)]
//! struct Hero {
//!     id: i64,
//!     name: String,
//!     age: Option<i32>,
//! }
//!
//! let db = Db::open(SqliteConnection::open_memory()?, Sqlite);
//! db.create_table::<Hero>()?;
//!
//! let mut hero = Hero { name: "Spider-Boy".into(), ..Default::default() };
//! db.create(&mut hero)?;
//!
//! let mut heroes: Vec<Hero> = Vec::new();
//! db.filter("age > ?", args![30]).order("name").find(&mut heroes)?;
//! ```
//!
//! # Crates
//!
//! - `ormlink-core`: values, rows, errors, model traits and descriptors
//! - `ormlink-macros`: `#[derive(Model)]`
//! - `ormlink-query`: dialects, conditions and statement assembly
//! - `ormlink-sqlite`: a SQLite executor

pub mod association;
pub mod callbacks;
pub mod config;
pub mod db;
pub mod migrate;
pub mod scan;
pub mod scope;

pub use ormlink_core::{
    ConfigErrorKind, Destination, Error, Executor, Field, FieldDescriptor, Model, ModelDescriptor,
    ModelEvents, PreconditionErrorKind, QueryErrorKind, Record, RecordList, Relationship,
    RelationshipKind, Result, Row, Scanner, SqlType, Transaction, Value,
};
pub use ormlink_macros::Model;
pub use ormlink_query::{Dialect, Filter, Mysql, Postgres, Search, Sqlite, Statement};

pub use association::Association;
pub use callbacks::{Action, Callbacks, Flow, Pipeline};
pub use config::DbConfig;
pub use db::Db;
pub use scope::{SAVE_ASSOCIATIONS, Scope, Target, UPDATE_COLUMNS};

/// Build a `Vec<Value>` of statement arguments.
///
/// ```ignore
/// db.filter("name = ? AND age > ?", args!["gernest", 20]);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($arg)),+]
    };
}

/// Everything needed to declare models and run queries.
pub mod prelude {
    pub use crate::args;
    pub use crate::{
        Action, Association, Callbacks, Db, DbConfig, Destination, Error, Executor, Filter, Flow,
        Model, ModelEvents, Record, Result, Scope, Sqlite, Value,
    };
}
