//! Default create pipeline.

use ormlink_core::{Result, Value, set_path};

use super::{Flow, Pipeline, common, step};
use crate::scope::Scope;

pub(super) fn pipeline() -> Pipeline {
    [
        step("begin_transaction", common::begin_transaction),
        step("before_save", |s| common::hook(s, |r| r.before_save())),
        step("before_create", |s| common::hook(s, |r| r.before_create())),
        step("save_before_associations", common::save_before_associations),
        step("update_time_stamp", |s| common::update_time_stamp(s, true)),
        step("build_insert", build_insert),
        step("execute_insert", execute_insert),
        step("save_after_associations", common::save_after_associations),
        step("after_create", |s| common::hook(s, |r| r.after_create())),
        step("after_save", |s| common::hook(s, |r| r.after_save())),
    ]
    .into_iter()
    .collect()
}

#[allow(clippy::result_large_err)]
fn build_insert(scope: &mut Scope<'_>) -> Result<Flow> {
    let statement = scope.assembler().insert(scope.require_record()?)?;
    scope.statement = Some(scope.finish(statement)?);
    Ok(Flow::Continue)
}

/// Run the INSERT and copy a generated key back into the record.
#[allow(clippy::result_large_err)]
fn execute_insert(scope: &mut Scope<'_>) -> Result<Flow> {
    let Some(statement) = scope.statement.take() else {
        return Ok(Flow::Continue);
    };
    let exec = scope.executor();
    let descriptor = scope.descriptor.clone();
    let record = scope.require_record_mut()?;

    let generated = descriptor
        .primary_field()
        .filter(|pk| pk.is_auto_increment() && descriptor.primary_key_is_blank(&*record));
    let id = exec.insert(&statement.sql, &statement.args)?;
    if let Some(pk) = generated {
        set_path(record, &pk.names, Value::BigInt(id))?;
        tracing::trace!(table = %descriptor.table_name, id, "assigned generated key");
    }
    scope.rows_affected = 1;
    Ok(Flow::Continue)
}
