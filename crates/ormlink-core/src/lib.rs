//! Core types and traits for ormlink.
//!
//! This crate provides the foundations the rest of the workspace builds on:
//!
//! - `Value`, `Row` and `FromValue` for data crossing the executor boundary
//! - `Model`/`Record` for typed records and dynamic field access
//! - `DescriptorCache` for per-type field metadata and relationship inference
//! - `Executor` for the SQL driver the engine runs statements through

pub mod connection;
pub mod error;
pub mod field;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Executor, Transaction};
pub use error::{
    ConfigError, ConfigErrorKind, ConnectionError, ContextError, Error, PreconditionError,
    PreconditionErrorKind, QueryError, QueryErrorKind, Result, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use field::{Field, FieldDecl, FieldDescriptor, FieldShape, parse_tag};
pub use metadata::{DescriptorCache, ModelDescriptor, NamingOptions};
pub use model::{
    Destination, Model, ModelEvents, Record, RecordList, RecordType, Related, RelatedMut,
    Scanner, convert, downcast_many, downcast_one, downcast_record, get_path, set_path,
    unknown_field,
};
pub use relationship::{JoinKey, JoinTable, Relationship, RelationshipKind};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
