//! Field declarations, descriptors and bound fields.
//!
//! A record type declares its fields once as [`FieldDecl`]s (normally
//! generated by `#[derive(Model)]`). The metadata extractor turns those into
//! [`FieldDescriptor`]s, which are cached and never mutated. A [`Field`] pairs
//! a cloned descriptor with the live value read from one record instance.

use crate::model::{Record, RecordType, Related, get_path};
use crate::relationship::Relationship;
use crate::types::SqlType;
use crate::value::Value;
use std::collections::BTreeMap;

/// Declared shape of a field.
#[derive(Debug, Clone, Copy)]
pub enum FieldShape {
    /// A plain column value.
    Scalar { sql_type: SqlType, nullable: bool },
    /// A single related record (`Option<T>`, `Option<Box<T>>` or `T`).
    One(fn() -> RecordType),
    /// A collection of related records (`Vec<T>`).
    Many(fn() -> RecordType),
    /// A nested struct whose fields are flattened into the owner.
    Embedded(fn() -> RecordType),
}

/// One declared field of a record type, as written in the source.
#[derive(Debug, Clone, Copy)]
pub struct FieldDecl {
    /// In-language field name.
    pub name: &'static str,
    /// Raw annotation text, `key:value;key;...`.
    pub tag: &'static str,
    pub shape: FieldShape,
}

impl FieldDecl {
    pub const fn new(name: &'static str, tag: &'static str, shape: FieldShape) -> Self {
        Self { name, tag, shape }
    }

    pub const fn scalar(name: &'static str, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name,
            tag: "",
            shape: FieldShape::Scalar { sql_type, nullable },
        }
    }

    pub const fn tagged(mut self, tag: &'static str) -> Self {
        self.tag = tag;
        self
    }
}

/// Parse an annotation string into upper-cased keys and raw values.
///
/// `column:user_name; PRIMARY_KEY ;size:64` becomes
/// `{"COLUMN": "user_name", "PRIMARY_KEY": "PRIMARY_KEY", "SIZE": "64"}`.
/// Flags without a value map to their own (upper-cased) name.
pub fn parse_tag(tag: &str) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    for part in tag.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = match part.split_once(':') {
            Some((k, v)) => (k.trim().to_uppercase(), v.trim().to_string()),
            None => {
                let k = part.to_uppercase();
                (k.clone(), k)
            }
        };
        settings.insert(key, value);
    }
    settings
}

/// Static metadata about one field of a record type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// In-language name of the field.
    pub name: String,
    /// Path of in-language names, outermost embedded struct first.
    pub names: Vec<String>,
    /// Storage (column) name.
    pub db_name: String,
    pub is_primary_key: bool,
    pub is_ignored: bool,
    /// Plain scalar column (as opposed to a relationship).
    pub is_normal: bool,
    /// The column has a database default (`default:` annotation).
    pub has_default_value: bool,
    /// Values are read and written through a custom `Scanner`.
    pub is_scanner: bool,
    pub sql_type: Option<SqlType>,
    pub nullable: bool,
    /// Parsed annotation settings, keys upper-cased.
    pub tags: BTreeMap<String, String>,
    pub relationship: Option<Relationship>,
}

impl FieldDescriptor {
    /// Annotation value for `key` (case-insensitive).
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(&key.to_uppercase()).map(String::as_str)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(&key.to_uppercase())
    }

    /// Declared column size, from the `size` annotation.
    pub fn size(&self) -> Option<u32> {
        self.tag("size").and_then(|s| s.parse().ok())
    }

    /// Integer primary keys are generated by the store unless the annotation
    /// `auto_increment:false` says otherwise.
    pub fn is_auto_increment(&self) -> bool {
        if let Some(flag) = self.tag("auto_increment") {
            return !flag.eq_ignore_ascii_case("false");
        }
        self.is_primary_key && self.sql_type.is_some_and(|t| t.is_integer())
    }

    /// Participates in column lists (not ignored, not a relationship).
    pub fn is_column(&self) -> bool {
        self.is_normal && !self.is_ignored
    }
}

/// A field descriptor bound to the value it holds on one record.
#[derive(Debug, Clone)]
pub struct Field {
    pub descriptor: FieldDescriptor,
    /// Current value; `Null` for relationship fields.
    pub value: Value,
    /// The value (or related record set) is the zero value of its type.
    pub is_blank: bool,
}

impl Field {
    /// Read `descriptor`'s field from `record`.
    pub fn bind(descriptor: &FieldDescriptor, record: &dyn Record) -> Self {
        if descriptor.is_normal {
            let value = get_path(record, &descriptor.names).unwrap_or(Value::Null);
            let is_blank = value.is_blank();
            return Self {
                descriptor: descriptor.clone(),
                value,
                is_blank,
            };
        }
        let is_blank = match record.related(&descriptor.name) {
            Some(Related::One(one)) => one.is_none(),
            Some(Related::Many(many)) => many.is_empty(),
            None => true,
        };
        Self {
            descriptor: descriptor.clone(),
            value: Value::Null,
            is_blank,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn db_name(&self) -> &str {
        &self.descriptor.db_name
    }
}
