//! Steps shared by several pipelines.

use ormlink_core::{
    Error, Field, ModelDescriptor, PreconditionErrorKind, Record, RelatedMut, Relationship,
    RelationshipKind, Result, Value, set_path,
};
use std::time::{SystemTime, UNIX_EPOCH};

use ormlink_query::Search;

use super::Flow;
use crate::association;
use crate::db::Db;
use crate::scope::Scope;

/// Name of the step that opens the pipeline's transaction.
pub const BEGIN_TRANSACTION: &str = "ormlink:begin_transaction";

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

/// Current time in Unix seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[allow(clippy::result_large_err)]
pub(super) fn begin_transaction(scope: &mut Scope<'_>) -> Result<Flow> {
    scope.executor().begin()?;
    scope.transaction_open = true;
    Ok(Flow::Continue)
}

/// Commit on success, roll back on failure.
#[allow(clippy::result_large_err)]
pub(super) fn settle_transaction(scope: &mut Scope<'_>, result: Result<()>) -> Result<()> {
    if !scope.transaction_open {
        return result;
    }
    scope.transaction_open = false;
    let exec = scope.executor();
    match result {
        Ok(()) => exec.commit(),
        Err(err) => {
            if let Err(rollback_err) = exec.rollback() {
                tracing::warn!(error = %rollback_err, "rollback after failed pipeline failed");
            }
            Err(err)
        }
    }
}

/// Refuse an UPDATE/DELETE whose WHERE clause would not narrow the rows.
///
/// Judged on the rendered clause: conditions that render nothing and the
/// soft-delete term alone do not count. Registered first, so nothing has
/// reached the executor when it fails.
#[allow(clippy::result_large_err)]
pub(super) fn require_where(scope: &mut Scope<'_>) -> Result<Flow> {
    if !scope.db.config().block_global_update {
        return Ok(Flow::Continue);
    }
    if scope.assembler().restricts_rows(scope.record())? {
        return Ok(Flow::Continue);
    }
    Err(Error::precondition(
        PreconditionErrorKind::MissingWhere,
        format!(
            "refusing to modify every row of '{}' without a WHERE clause",
            scope.table()
        ),
    ))
}

/// Run a record lifecycle hook when the scope writes a record.
#[allow(clippy::result_large_err)]
pub(super) fn hook(scope: &mut Scope<'_>, f: fn(&mut dyn Record) -> Result<()>) -> Result<Flow> {
    if !scope.runs_hooks() {
        return Ok(Flow::Continue);
    }
    if let Some(record) = scope.record_mut() {
        f(record)?;
    }
    Ok(Flow::Continue)
}

/// Set blank `created_at`/`updated_at` on create; always `updated_at` on update.
#[allow(clippy::result_large_err)]
pub(super) fn update_time_stamp(scope: &mut Scope<'_>, creating: bool) -> Result<Flow> {
    if !scope.runs_hooks() {
        return Ok(Flow::Continue);
    }
    let now = Value::BigInt(now());
    let descriptor = scope.descriptor.clone();
    let mut touched_updated_at = false;
    if let Some(record) = scope.record_mut() {
        for column in [CREATED_AT, UPDATED_AT] {
            let Some(field) = descriptor.field_by_db_name(column).filter(|f| f.is_column())
            else {
                continue;
            };
            let always = column == UPDATED_AT && !creating;
            if always || Field::bind(field, record).is_blank {
                set_path(record, &field.names, now.clone())?;
                touched_updated_at |= column == UPDATED_AT;
            }
        }
    }
    if let (true, Some(attrs)) = (touched_updated_at, scope.attrs.as_mut()) {
        attrs.insert(UPDATED_AT.to_string(), now);
    }
    Ok(Flow::Continue)
}

/// Values of `names` (fields of `descriptor`) on `record`.
pub(crate) fn values_of<'n>(
    descriptor: &ModelDescriptor,
    record: &dyn Record,
    names: impl IntoIterator<Item = &'n str>,
) -> Vec<Value> {
    names
        .into_iter()
        .map(|name| {
            descriptor
                .field(name)
                .map_or(Value::Null, |f| Field::bind(f, record).value)
        })
        .collect()
}

/// Relation fields follow the select/omit lists like columns do.
fn includes(search: &Search, relation: &str) -> bool {
    search.includes_column(relation)
}

/// A record whose columns all hold zero values, e.g. a defaulted plain
/// relation field.
pub(crate) fn is_blank_record(descriptor: &ModelDescriptor, record: &dyn Record) -> bool {
    descriptor
        .columns()
        .all(|f| Field::bind(f, record).is_blank)
}

/// Owner-side key values a relationship references.
pub(crate) fn owner_keys(
    descriptor: &ModelDescriptor,
    owner: &dyn Record,
    rel: &Relationship,
) -> Vec<Value> {
    match (&rel.kind, &rel.join_table) {
        (RelationshipKind::ManyToMany, Some(join)) => values_of(
            descriptor,
            owner,
            join.source_keys.iter().map(|k| k.association_field.as_str()),
        ),
        (RelationshipKind::BelongsTo, _) => values_of(
            descriptor,
            owner,
            rel.foreign_field_names.iter().map(String::as_str),
        ),
        _ => values_of(
            descriptor,
            owner,
            rel.association_foreign_field_names.iter().map(String::as_str),
        ),
    }
}

/// Point a has_one/has_many child at its owner: foreign keys plus the
/// polymorphic discriminator.
#[allow(clippy::result_large_err)]
pub(crate) fn link_child(
    db: &Db,
    child: &mut dyn Record,
    rel: &Relationship,
    owner_values: &[Value],
) -> Result<()> {
    let child_desc = db.cache().describe_record(child)?;
    for (name, value) in rel.foreign_field_names.iter().zip(owner_values) {
        if let Some(field) = child_desc.field(name) {
            set_path(child, &field.names, value.clone())?;
        }
    }
    if let (Some(type_field), Some(value)) = (&rel.polymorphic_type, &rel.polymorphic_value) {
        if let Some(field) = child_desc.field(type_field) {
            set_path(child, &field.names, Value::from(value.as_str()))?;
        }
    }
    Ok(())
}

/// Persist `belongs_to` targets first and copy their keys into the owner.
#[allow(clippy::result_large_err)]
pub(super) fn save_before_associations(scope: &mut Scope<'_>) -> Result<Flow> {
    if !scope.saves_associations() {
        return Ok(Flow::Continue);
    }
    let db = scope.db.fresh();
    let search = scope.search.clone();
    let descriptor = scope.descriptor.clone();
    let Some(owner) = scope.record_mut() else {
        return Ok(Flow::Continue);
    };
    for (field, rel) in descriptor.relationships() {
        if rel.kind != RelationshipKind::BelongsTo || !includes(&search, &field.name) {
            continue;
        }
        let keys = {
            let Some(RelatedMut::One(Some(target))) = owner.related_mut(&field.name) else {
                continue;
            };
            let target_desc = db.cache().describe_record(&*target)?;
            if is_blank_record(&target_desc, &*target) {
                continue;
            }
            db.save(&mut *target)?;
            values_of(
                &target_desc,
                &*target,
                rel.association_foreign_field_names.iter().map(String::as_str),
            )
        };
        for (holder, value) in rel.foreign_field_names.iter().zip(keys) {
            if let Some(holder_field) = descriptor.field(holder) {
                set_path(owner, &holder_field.names, value)?;
            }
        }
    }
    Ok(Flow::Continue)
}

/// Persist children and join rows once the owner has its key.
#[allow(clippy::result_large_err)]
pub(super) fn save_after_associations(scope: &mut Scope<'_>) -> Result<Flow> {
    if !scope.saves_associations() {
        return Ok(Flow::Continue);
    }
    let db = scope.db.fresh();
    let search = scope.search.clone();
    let descriptor = scope.descriptor.clone();
    let Some(owner) = scope.record_mut() else {
        return Ok(Flow::Continue);
    };

    for (field, rel) in descriptor.relationships() {
        if rel.kind == RelationshipKind::BelongsTo || !includes(&search, &field.name) {
            continue;
        }
        let keys = owner_keys(&descriptor, &*owner, rel);
        let children: Vec<&mut dyn Record> = match owner.related_mut(&field.name) {
            Some(RelatedMut::One(Some(child))) => vec![child],
            Some(RelatedMut::Many(children)) => children,
            _ => continue,
        };
        for child in children {
            let child_desc = db.cache().describe_record(&*child)?;
            if is_blank_record(&child_desc, &*child) {
                continue;
            }
            if rel.kind == RelationshipKind::ManyToMany {
                db.save(&mut *child)?;
                association::link_join_row(&db, rel, &keys, &*child)?;
            } else {
                link_child(&db, &mut *child, rel, &keys)?;
                db.save(child)?;
            }
        }
    }
    Ok(Flow::Continue)
}
