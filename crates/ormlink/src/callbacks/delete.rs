//! Default delete pipeline.

use ormlink_core::{Result, Value};

use super::{Flow, Pipeline, common, step};
use crate::scope::Scope;

pub(super) fn pipeline() -> Pipeline {
    [
        step("require_where", common::require_where),
        step("begin_transaction", common::begin_transaction),
        step("before_delete", |s| common::hook(s, |r| r.before_delete())),
        step("build_delete", build_delete),
        step("execute_delete", execute_delete),
        step("after_delete", |s| common::hook(s, |r| r.after_delete())),
    ]
    .into_iter()
    .collect()
}

/// DELETE, or a soft-delete UPDATE when the model has `deleted_at`.
#[allow(clippy::result_large_err)]
fn build_delete(scope: &mut Scope<'_>) -> Result<Flow> {
    let statement = scope
        .assembler()
        .delete(scope.record(), Value::BigInt(common::now()))?;
    scope.statement = Some(scope.finish(statement)?);
    Ok(Flow::Continue)
}

#[allow(clippy::result_large_err)]
fn execute_delete(scope: &mut Scope<'_>) -> Result<Flow> {
    if let Some(statement) = scope.statement.take() {
        scope.rows_affected = scope.executor().execute(&statement.sql, &statement.args)?;
    }
    Ok(Flow::Continue)
}
