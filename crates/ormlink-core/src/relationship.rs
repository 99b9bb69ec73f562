//! Relationship descriptors.
//!
//! Key naming follows one convention for every kind:
//!
//! - `foreign_*` names the columns that *hold* the reference.
//! - `association_foreign_*` names the columns being *referenced*.
//!
//! For `has_one`/`has_many` the foreign keys live on the related type and
//! reference the owner's primary key. For `belongs_to` they live on the owner
//! and reference the related primary key. For `many_to_many` the join table
//! holds both sides, described by [`JoinTable`].

use crate::model::RecordType;

/// The kind of relationship between two record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// The related type holds a key referencing the owner; at most one row.
    HasOne,
    /// The related type holds a key referencing the owner; any number of rows.
    HasMany,
    /// The owner holds a key referencing the related type.
    BelongsTo,
    /// Both sides are linked through a join table.
    ManyToMany,
}

impl RelationshipKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::BelongsTo => "belongs_to",
            Self::ManyToMany => "many_to_many",
        }
    }

    /// Whether the related side is a collection.
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }
}

/// One column of a join table and the model column it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    /// Column in the join table.
    pub db_name: String,
    /// Referenced column on the model.
    pub association_db_name: String,
    /// In-language name of the referenced field.
    pub association_field: String,
}

/// Join table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Columns referencing the owner.
    pub source_keys: Vec<JoinKey>,
    /// Columns referencing the related record.
    pub destination_keys: Vec<JoinKey>,
}

impl JoinTable {
    /// Every join column, owner side first.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.source_keys
            .iter()
            .chain(self.destination_keys.iter())
            .map(|k| k.db_name.as_str())
    }
}

/// Resolved relationship between the owner of a field and its related type.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Shape of the related type.
    pub related_type: fn() -> RecordType,
    /// Table of the related type.
    pub related_table: String,
    pub foreign_field_names: Vec<String>,
    pub foreign_db_names: Vec<String>,
    pub association_foreign_field_names: Vec<String>,
    pub association_foreign_db_names: Vec<String>,
    /// In-language name of the discriminator field on the related type.
    pub polymorphic_type: Option<String>,
    /// Column name of the discriminator.
    pub polymorphic_db_name: Option<String>,
    /// Value stored in the discriminator for this owner.
    pub polymorphic_value: Option<String>,
    pub join_table: Option<JoinTable>,
}

impl Relationship {
    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic_db_name.is_some()
    }

    /// The discriminator column and value, when both are set.
    pub fn discriminator(&self) -> Option<(&str, &str)> {
        match (&self.polymorphic_db_name, &self.polymorphic_value) {
            (Some(column), Some(value)) if !value.is_empty() => Some((column, value)),
            _ => None,
        }
    }

    /// Pairs of (holding column, referenced column).
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.foreign_db_names
            .iter()
            .map(String::as_str)
            .zip(self.association_foreign_db_names.iter().map(String::as_str))
    }

    /// Pairs of (holding field, referenced field), in-language names.
    pub fn field_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.foreign_field_names
            .iter()
            .map(String::as_str)
            .zip(self.association_foreign_field_names.iter().map(String::as_str))
    }
}
