//! Model traits.
//!
//! Record types are described at compile time by `#[derive(Model)]`, which
//! implements two traits:
//!
//! - [`Model`]: the static side (`record_type()`, `Default`, `Clone`).
//! - [`Record`]: the object-safe side, used by the engine through
//!   `&dyn Record` to read and write fields by name.
//!
//! [`Destination`] abstracts over "one record" and "a collection of records"
//! so the query pipeline can scan rows into either.

use crate::error::{Error, PreconditionErrorKind, Result, TypeError};
use crate::field::FieldDecl;
use crate::row::FromValue;
use crate::types::SqlType;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::fmt;

/// Declared shape of a record type, emitted by `#[derive(Model)]`.
#[derive(Debug, Clone)]
pub struct RecordType {
    /// Type name as written in the source (`UserLanguage`).
    pub name: &'static str,
    pub type_id: TypeId,
    /// Table name override from `#[ormlink(table = "...")]`.
    pub table: Option<&'static str>,
    pub fields: Vec<FieldDecl>,
    /// Allocates a default instance.
    pub new: fn() -> Box<dyn Record>,
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A related record (or records) borrowed from a relationship field.
pub enum Related<'a> {
    One(Option<&'a dyn Record>),
    Many(Vec<&'a dyn Record>),
}

/// Mutable view of a relationship field.
pub enum RelatedMut<'a> {
    One(Option<&'a mut dyn Record>),
    Many(Vec<&'a mut dyn Record>),
}

/// Lifecycle hooks invoked by the default pipelines.
///
/// Every method defaults to a no-op. Returning an error aborts the running
/// pipeline and rolls back its transaction.
#[allow(clippy::result_large_err)]
pub trait ModelEvents {
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after the INSERT; the generated key has been assigned.
    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once per record scanned by a query.
    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Dynamic, object-safe access to a record's fields.
///
/// Field names are the in-language names. Embedded structs are reached
/// through [`Record::embedded`]; see [`get_path`] and [`set_path`].
#[allow(clippy::result_large_err)]
pub trait Record: ModelEvents + Any + Send + Sync + fmt::Debug {
    /// Declared shape of the concrete type.
    fn shape(&self) -> RecordType;

    /// Current value of a scalar field.
    fn get(&self, field: &str) -> Option<Value>;

    /// Assign a scalar field, converting from the storage value.
    fn set(&mut self, field: &str, value: Value) -> Result<()>;

    /// An embedded struct field.
    fn embedded(&self, _field: &str) -> Option<&dyn Record> {
        None
    }

    fn embedded_mut(&mut self, _field: &str) -> Option<&mut dyn Record> {
        None
    }

    /// A relationship field.
    fn related(&self, _field: &str) -> Option<Related<'_>> {
        None
    }

    fn related_mut(&mut self, _field: &str) -> Option<RelatedMut<'_>> {
        None
    }

    /// Replace the contents of a relationship field.
    ///
    /// Single-record fields take the first element (or none).
    fn set_related(&mut self, field: &str, _records: Vec<Box<dyn Record>>) -> Result<()> {
        Err(Error::precondition(
            PreconditionErrorKind::UnsettableField,
            format!("'{field}' is not a relationship field"),
        ))
    }

    fn clone_box(&self) -> Box<dyn Record>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl Clone for Box<dyn Record> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Static side of a record type.
pub trait Model: Record + Default + Clone + Sized {
    fn record_type() -> RecordType;
}

/// A field type with its own conversion to and from storage values.
///
/// Fields annotated `scanner` are read with [`Scanner::value`] and written
/// with [`Scanner::scan`] instead of the built-in conversions.
#[allow(clippy::result_large_err)]
pub trait Scanner {
    /// Column type used when creating tables.
    const SQL_TYPE: SqlType = SqlType::Text;

    fn scan(&mut self, value: Value) -> Result<()>;

    fn value(&self) -> Value;
}

/// Read a (possibly embedded) field by its name path.
pub fn get_path(record: &dyn Record, names: &[String]) -> Option<Value> {
    match names {
        [] => None,
        [name] => record.get(name),
        [outer, rest @ ..] => get_path(record.embedded(outer)?, rest),
    }
}

/// Assign a (possibly embedded) field by its name path.
#[allow(clippy::result_large_err)]
pub fn set_path(record: &mut dyn Record, names: &[String], value: Value) -> Result<()> {
    match names {
        [] => Err(Error::precondition(
            PreconditionErrorKind::UnsettableField,
            "empty field path",
        )),
        [name] => record.set(name, value),
        [outer, rest @ ..] => match record.embedded_mut(outer) {
            Some(inner) => set_path(inner, rest, value),
            None => Err(Error::precondition(
                PreconditionErrorKind::UnsettableField,
                format!("'{outer}' is not an embedded field"),
            )),
        },
    }
}

/// Convert a storage value for `field`, tagging type errors with the field.
#[allow(clippy::result_large_err)]
pub fn convert<T: FromValue>(field: &str, value: &Value) -> Result<T> {
    T::from_value(value).map_err(|e| match e {
        Error::Type(te) => Error::Type(TypeError {
            column: Some(field.to_string()),
            ..te
        }),
        e => e,
    })
}

/// Error for a field name the record does not declare.
pub fn unknown_field(record: &'static str, field: &str) -> Error {
    Error::precondition(
        PreconditionErrorKind::UnsettableField,
        format!("{record} has no settable field '{field}'"),
    )
}

/// Downcast a boxed record to a concrete model.
#[allow(clippy::result_large_err)]
pub fn downcast_record<T: Model>(record: Box<dyn Record>) -> Result<T> {
    let actual = record.shape().name;
    record
        .into_any()
        .downcast::<T>()
        .map(|b| *b)
        .map_err(|_| {
            Error::precondition(
                PreconditionErrorKind::WrongDestination,
                format!(
                    "expected {} record, got {actual}",
                    T::record_type().name
                ),
            )
        })
}

#[allow(clippy::result_large_err)]
pub fn downcast_many<T: Model>(records: Vec<Box<dyn Record>>) -> Result<Vec<T>> {
    records.into_iter().map(downcast_record::<T>).collect()
}

#[allow(clippy::result_large_err)]
pub fn downcast_one<T: Model>(records: Vec<Box<dyn Record>>) -> Result<Option<T>> {
    records.into_iter().next().map(downcast_record::<T>).transpose()
}

/// Something query results can be scanned into: a single record or a
/// collection of them.
pub trait Destination: Send {
    /// Shape of the element type.
    fn element_type(&self) -> RecordType;

    fn is_collection(&self) -> bool;

    /// Clear a collection; reset a single record to its default.
    fn reset(&mut self);

    /// Slot for the next scanned row: a fresh element for collections,
    /// the record itself otherwise.
    fn push_new(&mut self) -> &mut dyn Record;

    fn records(&self) -> Vec<&dyn Record>;

    fn records_mut(&mut self) -> Vec<&mut dyn Record>;

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Model> Destination for T {
    fn element_type(&self) -> RecordType {
        <T as Model>::record_type()
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn reset(&mut self) {
        *self = T::default();
    }

    fn push_new(&mut self) -> &mut dyn Record {
        self
    }

    fn records(&self) -> Vec<&dyn Record> {
        vec![self as &dyn Record]
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        vec![self as &mut dyn Record]
    }
}

impl<T: Model> Destination for Vec<T> {
    fn element_type(&self) -> RecordType {
        <T as Model>::record_type()
    }

    fn is_collection(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn push_new(&mut self) -> &mut dyn Record {
        self.push(T::default());
        let last = self.len() - 1;
        &mut self[last]
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.iter().map(|r| r as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|r| r as &mut dyn Record).collect()
    }
}

/// A collection of records whose type is only known at runtime.
///
/// Used to load relationships whose element type comes from a descriptor.
#[derive(Debug)]
pub struct RecordList {
    ty: RecordType,
    items: Vec<Box<dyn Record>>,
}

impl RecordList {
    pub fn new(ty: RecordType) -> Self {
        Self {
            ty,
            items: Vec::new(),
        }
    }

    pub fn into_records(self) -> Vec<Box<dyn Record>> {
        self.items
    }
}

impl Destination for RecordList {
    fn element_type(&self) -> RecordType {
        self.ty.clone()
    }

    fn is_collection(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.items.clear();
    }

    fn push_new(&mut self) -> &mut dyn Record {
        self.items.push((self.ty.new)());
        let last = self.items.len() - 1;
        self.items[last].as_mut()
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.items.iter().map(AsRef::as_ref).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.items.iter_mut().map(AsMut::as_mut).collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Hand-written record types standing in for derive output.

    use super::*;
    use crate::field::FieldShape;
    use crate::types::TypeInfo;

    fn scalar<T: TypeInfo>(name: &'static str) -> FieldDecl {
        FieldDecl::scalar(name, T::SQL_TYPE, T::NULLABLE)
    }

    macro_rules! record_boilerplate {
        () => {
            fn shape(&self) -> RecordType {
                <Self as Model>::record_type()
            }
            fn clone_box(&self) -> Box<dyn Record> {
                Box::new(self.clone())
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
            fn into_any(self: Box<Self>) -> Box<dyn Any> {
                self
            }
        };
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Pet {
        pub id: i64,
        pub user_id: i64,
        pub name: String,
    }

    impl ModelEvents for Pet {}

    impl Record for Pet {
        record_boilerplate!();

        fn get(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.into()),
                "user_id" => Some(self.user_id.into()),
                "name" => Some(self.name.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = convert(field, &value)?,
                "user_id" => self.user_id = convert(field, &value)?,
                "name" => self.name = convert(field, &value)?,
                _ => return Err(unknown_field("Pet", field)),
            }
            Ok(())
        }
    }

    impl Model for Pet {
        fn record_type() -> RecordType {
            RecordType {
                name: "Pet",
                type_id: TypeId::of::<Self>(),
                table: None,
                fields: vec![
                    scalar::<i64>("id"),
                    scalar::<i64>("user_id"),
                    scalar::<String>("name"),
                ],
                new: || Box::new(Self::default()),
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Audit {
        pub created_by: String,
    }

    impl ModelEvents for Audit {}

    impl Record for Audit {
        record_boilerplate!();

        fn get(&self, field: &str) -> Option<Value> {
            (field == "created_by").then(|| self.created_by.clone().into())
        }

        fn set(&mut self, field: &str, value: Value) -> Result<()> {
            if field != "created_by" {
                return Err(unknown_field("Audit", field));
            }
            self.created_by = convert(field, &value)?;
            Ok(())
        }
    }

    impl Model for Audit {
        fn record_type() -> RecordType {
            RecordType {
                name: "Audit",
                type_id: TypeId::of::<Self>(),
                table: None,
                fields: vec![scalar::<String>("created_by")],
                new: || Box::new(Self::default()),
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct User {
        pub id: i64,
        pub name: String,
        pub nickname: Option<String>,
        pub audit: Audit,
        pub pets: Vec<Pet>,
    }

    impl ModelEvents for User {}

    impl Record for User {
        record_boilerplate!();

        fn get(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.clone().into()),
                "nickname" => Some(self.nickname.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = convert(field, &value)?,
                "name" => self.name = convert(field, &value)?,
                "nickname" => self.nickname = convert(field, &value)?,
                _ => return Err(unknown_field("User", field)),
            }
            Ok(())
        }

        fn embedded(&self, field: &str) -> Option<&dyn Record> {
            (field == "audit").then_some(&self.audit as &dyn Record)
        }

        fn embedded_mut(&mut self, field: &str) -> Option<&mut dyn Record> {
            (field == "audit").then_some(&mut self.audit as &mut dyn Record)
        }

        fn related(&self, field: &str) -> Option<Related<'_>> {
            (field == "pets").then(|| {
                Related::Many(self.pets.iter().map(|p| p as &dyn Record).collect())
            })
        }

        fn related_mut(&mut self, field: &str) -> Option<RelatedMut<'_>> {
            (field == "pets").then(|| {
                RelatedMut::Many(self.pets.iter_mut().map(|p| p as &mut dyn Record).collect())
            })
        }

        fn set_related(&mut self, field: &str, records: Vec<Box<dyn Record>>) -> Result<()> {
            if field != "pets" {
                return Err(unknown_field("User", field));
            }
            self.pets = downcast_many(records)?;
            Ok(())
        }
    }

    impl Model for User {
        fn record_type() -> RecordType {
            RecordType {
                name: "User",
                type_id: TypeId::of::<Self>(),
                table: None,
                fields: vec![
                    scalar::<i64>("id"),
                    scalar::<String>("name").tagged("size:64;unique"),
                    scalar::<Option<String>>("nickname"),
                    FieldDecl::new(
                        "audit",
                        "embedded;embedded_prefix:audit_",
                        FieldShape::Embedded(Audit::record_type),
                    ),
                    FieldDecl::new("pets", "", FieldShape::Many(Pet::record_type)),
                ],
                new: || Box::new(Self::default()),
            }
        }
    }
}
