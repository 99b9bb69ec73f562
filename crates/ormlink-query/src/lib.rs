//! SQL generation for ormlink.
//!
//! - [`Dialect`] describes how a store spells identifiers, placeholders and
//!   column types.
//! - [`Filter`] and [`Clause`] are the condition inputs; the condition module
//!   renders them into fragments with neutral bind markers.
//! - [`Search`] accumulates the per-statement scope and [`Assembler`] turns it
//!   into a [`Statement`].

pub mod condition;
pub mod dialect;
pub mod search;
pub mod statement;

pub use condition::{Clause, Filter, Fragment, MARKER, RenderContext, render, render_not, substitute};
pub use dialect::{Dialect, Mysql, Postgres, Sqlite, needs_quoting};
pub use search::{ORDER_BY_PRIMARY_KEY, Search};
pub use statement::{Assembler, SOFT_DELETE_COLUMN, Statement};
