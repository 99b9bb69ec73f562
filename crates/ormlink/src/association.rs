//! Association resolver.
//!
//! An [`Association`] pairs an owner record with one of its relationship
//! fields. Reads (`count`, `find`, `load`) are scoped to the rows related to
//! the owner; writes (`append`, `delete`, `clear`, `replace`) run in a
//! transaction so a failure part-way leaves nothing behind.
//!
//! | kind | related rows are | link lives in |
//! |------|------------------|---------------|
//! | `has_one`/`has_many` | `related.fk = owner.pk` | the related rows |
//! | `belongs_to` | `related.pk = owner.fk` | the owner row |
//! | `many_to_many` | joined through the join table | the join table |

use ormlink_core::{
    ConfigErrorKind, Destination, Error, Field, FieldDescriptor, Model, ModelDescriptor,
    PreconditionErrorKind, Record, RecordList, Related, Relationship, RelationshipKind, Result,
    Transaction, Value, set_path,
};
use ormlink_query::{Filter, MARKER, Search, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callbacks::Action;
use crate::callbacks::common::{owner_keys, values_of};
use crate::db::Db;
use crate::scope::{Scope, Target};

/// One relationship of one owner record.
pub struct Association<'a> {
    db: &'a Db,
    owner: &'a mut dyn Record,
    descriptor: Arc<ModelDescriptor>,
    field: FieldDescriptor,
    rel: Relationship,
}

impl<'a> Association<'a> {
    #[allow(clippy::result_large_err)]
    pub(crate) fn new(db: &'a Db, owner: &'a mut dyn Record, name: &str) -> Result<Self> {
        let descriptor = db.cache().describe_record(&*owner)?;
        let Some((field, rel)) = descriptor
            .relationships()
            .find(|(f, _)| f.name == name)
            .map(|(f, r)| (f.clone(), r.clone()))
        else {
            return Err(Error::config(
                ConfigErrorKind::UnknownName,
                format!("{} has no relation named '{name}'", descriptor.type_name),
            ));
        };
        Ok(Self {
            db,
            owner,
            descriptor,
            field,
            rel,
        })
    }

    pub fn kind(&self) -> RelationshipKind {
        self.rel.kind
    }

    pub fn relationship(&self) -> &Relationship {
        &self.rel
    }

    #[allow(clippy::result_large_err)]
    fn related_descriptor(&self) -> Result<Arc<ModelDescriptor>> {
        self.db.cache().describe_type(&(self.rel.related_type)())
    }

    /// Owner key values, which must all be set for a has/many-to-many link.
    #[allow(clippy::result_large_err)]
    fn required_owner_keys(&self) -> Result<Vec<Value>> {
        let keys = owner_keys(&self.descriptor, &*self.owner, &self.rel);
        if keys.iter().any(Value::is_blank) {
            return Err(Error::precondition(
                PreconditionErrorKind::BlankPrimaryKey,
                format!(
                    "{} must be saved before using its '{}' relation",
                    self.descriptor.type_name, self.field.name
                ),
            ));
        }
        Ok(keys)
    }

    /// Search for the owner's related rows, or `None` when a `belongs_to`
    /// key is unset and nothing can be related.
    #[allow(clippy::result_large_err)]
    fn scoped_search(&self, related: &ModelDescriptor) -> Result<Option<Search>> {
        let mut search = self.db.search().clone();
        search.table_name = None;
        search.preload.clear();

        let dialect = self.db.dialect();
        match self.rel.kind {
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                let keys = self.required_owner_keys()?;
                let mut map: BTreeMap<String, Value> =
                    self.rel.foreign_db_names.iter().cloned().zip(keys).collect();
                if let Some((column, value)) = self.rel.discriminator() {
                    map.insert(column.to_string(), Value::from(value));
                }
                Ok(Some(search.filter(Filter::Map(map), vec![])))
            }
            RelationshipKind::BelongsTo => {
                let keys = owner_keys(&self.descriptor, &*self.owner, &self.rel);
                if keys.iter().any(Value::is_blank) {
                    return Ok(None);
                }
                let map: BTreeMap<String, Value> = self
                    .rel
                    .association_foreign_db_names
                    .iter()
                    .cloned()
                    .zip(keys)
                    .collect();
                Ok(Some(search.filter(Filter::Map(map), vec![])))
            }
            RelationshipKind::ManyToMany => {
                let join = self.join_table()?;
                let keys = self.required_owner_keys()?;
                let jt = dialect.quote(&join.table);
                let on = join
                    .destination_keys
                    .iter()
                    .map(|k| {
                        format!(
                            "{jt}.{} = {}.{}",
                            dialect.quote(&k.db_name),
                            dialect.quote(&related.table_name),
                            dialect.quote(&k.association_db_name)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let condition = join
                    .source_keys
                    .iter()
                    .map(|k| format!("{jt}.{} = ?", dialect.quote(&k.db_name)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                Ok(Some(
                    search
                        .joins(format!("INNER JOIN {jt} ON {on}"), vec![])
                        .filter(condition, keys),
                ))
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn join_table(&self) -> Result<&ormlink_core::JoinTable> {
        self.rel.join_table.as_ref().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::Relationship,
                format!("'{}' has no join table", self.field.name),
            )
        })
    }

    /// Number of related rows.
    #[tracing::instrument(level = "debug", skip_all, fields(relation = %self.field.name))]
    #[allow(clippy::result_large_err)]
    pub fn count(&self) -> Result<i64> {
        let related = self.related_descriptor()?;
        let Some(search) = self.scoped_search(&related)? else {
            return Ok(0);
        };
        self.db
            .count_rows(&related, &search)
            .map_err(|err| err.with_context("count", related.table_name.clone()))
    }

    /// Query the related rows into `dest`; returns the row count.
    #[tracing::instrument(level = "debug", skip_all, fields(relation = %self.field.name))]
    #[allow(clippy::result_large_err)]
    pub fn find(&self, dest: &mut dyn Destination) -> Result<u64> {
        let related = self.related_descriptor()?;
        if dest.element_type().type_id != related.type_id {
            return Err(Error::precondition(
                PreconditionErrorKind::WrongDestination,
                format!(
                    "relation '{}' holds {}, not {}",
                    self.field.name,
                    related.type_name,
                    dest.element_type().name
                ),
            ));
        }
        let Some(search) = self.scoped_search(&related)? else {
            if dest.is_collection() {
                dest.reset();
            }
            return Ok(0);
        };
        let mut scope = Scope::new(self.db, search, related, Target::Destination(dest));
        self.db.run(Action::Query, &mut scope)?;
        Ok(scope.rows_affected)
    }

    /// Query the related rows and store them in the owner's field.
    #[allow(clippy::result_large_err)]
    pub fn load(&mut self) -> Result<u64> {
        let mut list = RecordList::new((self.rel.related_type)());
        let found = self.find(&mut list)?;
        self.owner.set_related(&self.field.name, list.into_records())?;
        Ok(found)
    }

    /// Attach `values` to the owner, saving them as needed.
    #[allow(clippy::result_large_err)]
    pub fn append<R: Model>(&mut self, values: impl IntoIterator<Item = R>) -> Result<()> {
        let values = values
            .into_iter()
            .map(|v| Box::new(v) as Box<dyn Record>)
            .collect();
        self.append_records(values)
    }

    /// [`append`](Self::append) for records whose type is known at runtime.
    #[tracing::instrument(level = "debug", skip_all, fields(relation = %self.field.name, count = values.len()))]
    #[allow(clippy::result_large_err)]
    pub fn append_records(&mut self, values: Vec<Box<dyn Record>>) -> Result<()> {
        self.check_types(&values)?;
        let db = self.db.fresh();
        let tx = Transaction::begin(db.executor())?;
        match self.rel.kind {
            RelationshipKind::ManyToMany => {
                let keys = self.required_owner_keys()?;
                let mut current = self.current();
                for mut value in values {
                    db.save(value.as_mut())?;
                    link_join_row(&db, &self.rel, &keys, value.as_ref())?;
                    current.push(value);
                }
                self.owner.set_related(&self.field.name, current)?;
            }
            RelationshipKind::HasMany => {
                self.required_owner_keys()?;
                let mut current = self.current();
                current.extend(values);
                self.owner.set_related(&self.field.name, current)?;
                db.select(self.field.name.clone(), vec![]).save(&mut *self.owner)?;
            }
            RelationshipKind::HasOne => {
                self.required_owner_keys()?;
                let values = self.overlay_stored(&db, values)?;
                self.owner.set_related(&self.field.name, values)?;
                db.select(self.field.name.clone(), vec![]).save(&mut *self.owner)?;
            }
            RelationshipKind::BelongsTo => {
                let values = self.overlay_stored(&db, values)?;
                self.owner.set_related(&self.field.name, values)?;
                let columns = std::iter::once(&self.field.name)
                    .chain(&self.rel.foreign_db_names)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                db.select(columns, vec![]).save(&mut *self.owner)?;
            }
        }
        tx.commit()
    }

    /// Unlink `values` from the owner without deleting them.
    #[allow(clippy::result_large_err)]
    pub fn delete<R: Model>(&mut self, values: &[R]) -> Result<u64> {
        let values: Vec<&dyn Record> = values.iter().map(|v| v as &dyn Record).collect();
        self.delete_records(&values)
    }

    /// [`delete`](Self::delete) for records whose type is known at runtime.
    ///
    /// Join rows are removed for many-to-many; foreign keys are set to NULL
    /// otherwise. Returns the number of links removed.
    #[tracing::instrument(level = "debug", skip_all, fields(relation = %self.field.name, count = values.len()))]
    #[allow(clippy::result_large_err)]
    pub fn delete_records(&mut self, values: &[&dyn Record]) -> Result<u64> {
        let related = self.related_descriptor()?;
        let db = self.db.fresh();
        let tx = Transaction::begin(db.executor())?;
        let mut removed = 0;
        let mut gone = Vec::new();
        for value in values {
            let pk = values_of(
                &related,
                *value,
                related.primary_fields().map(|f| f.name.as_str()),
            );
            removed += match self.rel.kind {
                RelationshipKind::ManyToMany => self.unlink_join_rows(&db, Some(*value))?,
                RelationshipKind::HasOne | RelationshipKind::HasMany => {
                    self.null_child_keys(&db, &related, Some(&pk))?
                }
                RelationshipKind::BelongsTo => {
                    let keys = owner_keys(&self.descriptor, &*self.owner, &self.rel);
                    if keys == pk {
                        self.null_owner_keys(&db)?
                    } else {
                        0
                    }
                }
            };
            gone.push(pk);
        }
        tx.commit()?;

        let held: Vec<&dyn Record> = match self.owner.related(&self.field.name) {
            Some(Related::Many(records)) => records,
            Some(Related::One(record)) => record.into_iter().collect(),
            None => Vec::new(),
        };
        let kept = held
            .into_iter()
            .filter(|r| {
                let pk = values_of(&related, *r, related.primary_fields().map(|f| f.name.as_str()));
                !gone.contains(&pk)
            })
            .map(|r| r.clone_box())
            .collect();
        self.owner.set_related(&self.field.name, kept)?;
        Ok(removed)
    }

    /// Unlink every related row.
    #[tracing::instrument(level = "debug", skip_all, fields(relation = %self.field.name))]
    #[allow(clippy::result_large_err)]
    pub fn clear(&mut self) -> Result<u64> {
        let related = self.related_descriptor()?;
        let db = self.db.fresh();
        let tx = Transaction::begin(db.executor())?;
        let removed = match self.rel.kind {
            RelationshipKind::ManyToMany => self.unlink_join_rows(&db, None)?,
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                self.null_child_keys(&db, &related, None)?
            }
            RelationshipKind::BelongsTo => self.null_owner_keys(&db)?,
        };
        tx.commit()?;
        self.owner.set_related(&self.field.name, Vec::new())?;
        Ok(removed)
    }

    /// Clear, then append `values`, as one transaction.
    #[allow(clippy::result_large_err)]
    pub fn replace<R: Model>(&mut self, values: impl IntoIterator<Item = R>) -> Result<()> {
        let tx = Transaction::begin(self.db.executor())?;
        self.clear()?;
        self.append(values)?;
        tx.commit()
    }

    #[allow(clippy::result_large_err)]
    fn check_types(&self, values: &[Box<dyn Record>]) -> Result<()> {
        let expected = (self.rel.related_type)();
        match values
            .iter()
            .find(|v| v.shape().type_id != expected.type_id)
        {
            Some(wrong) => Err(Error::precondition(
                PreconditionErrorKind::WrongDestination,
                format!(
                    "relation '{}' holds {}, not {}",
                    self.field.name,
                    expected.name,
                    wrong.shape().name
                ),
            )),
            None => Ok(()),
        }
    }

    /// Replace each keyed value with its stored row, overlaid with the
    /// value's non-blank columns, so a partial value does not blank out
    /// stored data when it is saved. Unkeyed or unstored values pass through.
    #[allow(clippy::result_large_err)]
    fn overlay_stored(
        &self,
        db: &Db,
        values: Vec<Box<dyn Record>>,
    ) -> Result<Vec<Box<dyn Record>>> {
        let related = self.related_descriptor()?;
        let mut merged = Vec::with_capacity(values.len());
        for value in values {
            if related.primary_key_is_blank(value.as_ref()) {
                merged.push(value);
                continue;
            }
            let key: BTreeMap<String, Value> = related
                .primary_fields()
                .map(|f| (f.db_name.clone(), Field::bind(f, value.as_ref()).value))
                .collect();
            let mut stored = RecordList::new((self.rel.related_type)());
            db.filter(Filter::Map(key), vec![]).limit(1).find(&mut stored)?;
            let Some(mut target) = stored.into_records().into_iter().next() else {
                merged.push(value);
                continue;
            };
            for field in related.columns() {
                let given = Field::bind(field, value.as_ref());
                if !given.is_blank {
                    set_path(target.as_mut(), &field.names, given.value)?;
                }
            }
            merged.push(target);
        }
        Ok(merged)
    }

    /// Copies of the records currently held by a collection field.
    fn current(&self) -> Vec<Box<dyn Record>> {
        match self.owner.related(&self.field.name) {
            Some(Related::Many(records)) => records.into_iter().map(|r| r.clone_box()).collect(),
            _ => Vec::new(),
        }
    }

    /// DELETE join rows of the owner, optionally only those pointing at `value`.
    #[allow(clippy::result_large_err)]
    fn unlink_join_rows(&self, db: &Db, value: Option<&dyn Record>) -> Result<u64> {
        let join = self.join_table()?;
        let dialect = db.dialect();
        let mut conditions = Vec::new();
        let mut args = self.required_owner_keys()?;
        for key in &join.source_keys {
            conditions.push(format!("{} = {MARKER}", dialect.quote(&key.db_name)));
        }
        if let Some(value) = value {
            let related = db.cache().describe_record(value)?;
            args.extend(values_of(
                &related,
                value,
                join.destination_keys.iter().map(|k| k.association_field.as_str()),
            ));
            for key in &join.destination_keys {
                conditions.push(format!("{} = {MARKER}", dialect.quote(&key.db_name)));
            }
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            dialect.quote(&join.table),
            conditions.join(" AND ")
        );
        let statement = db.finish(Statement::new(sql, args))?;
        db.executor().execute(&statement.sql, &statement.args)
    }

    /// Set the foreign keys of related rows to NULL, optionally only for the
    /// row with primary key `pk`.
    #[allow(clippy::result_large_err)]
    fn null_child_keys(
        &self,
        db: &Db,
        related: &ModelDescriptor,
        pk: Option<&[Value]>,
    ) -> Result<u64> {
        let dialect = db.dialect();
        let sets = self
            .rel
            .foreign_db_names
            .iter()
            .map(|c| format!("{} = NULL", dialect.quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut conditions = Vec::new();
        let mut args = self.required_owner_keys()?;
        for column in &self.rel.foreign_db_names {
            conditions.push(format!("{} = {MARKER}", dialect.quote(column)));
        }
        if let Some((column, value)) = self.rel.discriminator() {
            conditions.push(format!("{} = {MARKER}", dialect.quote(column)));
            args.push(Value::from(value));
        }
        if let Some(pk) = pk {
            for (field, value) in related.primary_fields().zip(pk) {
                conditions.push(format!("{} = {MARKER}", dialect.quote(&field.db_name)));
                args.push(value.clone());
            }
        }
        let sql = format!(
            "UPDATE {} SET {sets} WHERE {}",
            dialect.quote(&related.table_name),
            conditions.join(" AND ")
        );
        let statement = db.finish(Statement::new(sql, args))?;
        db.executor().execute(&statement.sql, &statement.args)
    }

    /// Clear the owner's own foreign keys, in the table and in memory.
    #[allow(clippy::result_large_err)]
    fn null_owner_keys(&mut self, db: &Db) -> Result<u64> {
        let mut attrs = BTreeMap::new();
        for name in &self.rel.foreign_field_names {
            if let Some(field) = self.descriptor.field(name) {
                attrs.insert(field.db_name.clone(), zero_value(field));
            }
        }
        db.update_columns(&mut *self.owner, attrs)
    }
}

/// Value a cleared key column takes: NULL when nullable, else the zero value.
fn zero_value(field: &FieldDescriptor) -> Value {
    match field.sql_type {
        _ if field.nullable => Value::Null,
        Some(t) if t.is_integer() => Value::BigInt(0),
        Some(t) if t.is_text() => Value::Text(String::new()),
        _ => Value::Null,
    }
}

/// Insert the join row linking an owner (by its key values) to `child`,
/// unless the pair is already linked.
#[allow(clippy::result_large_err)]
pub(crate) fn link_join_row(
    db: &Db,
    rel: &Relationship,
    owner_keys: &[Value],
    child: &dyn Record,
) -> Result<()> {
    let Some(join) = &rel.join_table else {
        return Err(Error::config(
            ConfigErrorKind::Relationship,
            "join rows need a many-to-many relationship",
        ));
    };
    let child_desc = db.cache().describe_record(child)?;
    let child_keys = values_of(
        &child_desc,
        child,
        join.destination_keys.iter().map(|k| k.association_field.as_str()),
    );
    if owner_keys.iter().chain(&child_keys).any(Value::is_blank) {
        return Err(Error::precondition(
            PreconditionErrorKind::BlankPrimaryKey,
            format!("cannot link {} rows with blank keys", join.table),
        ));
    }

    let dialect = db.dialect();
    let table = dialect.quote(&join.table);
    let columns: Vec<String> = join.columns().map(|c| dialect.quote(c)).collect();
    let markers = vec![MARKER; columns.len()].join(", ");
    let matches = columns
        .iter()
        .map(|c| format!("{c} = {MARKER}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let dummy = match dialect.select_from_dummy_table() {
        "" => String::new(),
        from => format!(" {from}"),
    };
    let sql = format!(
        "INSERT INTO {table} ({}) SELECT {markers}{dummy} WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {matches})",
        columns.join(", ")
    );
    let values: Vec<Value> = owner_keys.iter().chain(&child_keys).cloned().collect();
    let mut args = values.clone();
    args.extend(values);

    let statement = db.finish(Statement::new(sql, args))?;
    let linked = db.executor().execute(&statement.sql, &statement.args)?;
    tracing::trace!(join_table = %join.table, linked, "linked join row");
    Ok(())
}

/// Load `relation` into `record`.
#[allow(clippy::result_large_err)]
pub(crate) fn preload(db: &Db, record: &mut dyn Record, relation: &str) -> Result<u64> {
    Association::new(db, record, relation)?.load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_follow_nullability() {
        let mut field = FieldDescriptor {
            name: "owner_id".into(),
            names: vec!["owner_id".into()],
            db_name: "owner_id".into(),
            is_primary_key: false,
            is_ignored: false,
            is_normal: true,
            has_default_value: false,
            is_scanner: false,
            sql_type: Some(ormlink_core::SqlType::BigInt),
            nullable: false,
            tags: BTreeMap::new(),
            relationship: None,
        };
        assert_eq!(zero_value(&field), Value::BigInt(0));
        field.nullable = true;
        assert_eq!(zero_value(&field), Value::Null);
        field.nullable = false;
        field.sql_type = Some(ormlink_core::SqlType::Text);
        assert_eq!(zero_value(&field), Value::Text(String::new()));
    }
}
