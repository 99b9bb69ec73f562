//! Default update pipeline.

use ormlink_core::Result;

use super::{Flow, Pipeline, common, step};
use crate::scope::Scope;

pub(super) fn pipeline() -> Pipeline {
    [
        step("require_where", common::require_where),
        step("begin_transaction", common::begin_transaction),
        step("before_save", |s| common::hook(s, |r| r.before_save())),
        step("before_update", |s| common::hook(s, |r| r.before_update())),
        step("save_before_associations", common::save_before_associations),
        step("update_time_stamp", |s| common::update_time_stamp(s, false)),
        step("build_update", build_update),
        step("execute_update", execute_update),
        step("save_after_associations", common::save_after_associations),
        step("after_update", |s| common::hook(s, |r| r.after_update())),
        step("after_save", |s| common::hook(s, |r| r.after_save())),
    ]
    .into_iter()
    .collect()
}

#[allow(clippy::result_large_err)]
fn build_update(scope: &mut Scope<'_>) -> Result<Flow> {
    let statement = scope
        .assembler()
        .update(scope.record(), scope.attrs.as_ref())?;
    scope.statement = match statement {
        Some(statement) => Some(scope.finish(statement)?),
        None => {
            tracing::trace!(table = %scope.table(), "nothing to update");
            None
        }
    };
    Ok(Flow::Continue)
}

#[allow(clippy::result_large_err)]
fn execute_update(scope: &mut Scope<'_>) -> Result<Flow> {
    if let Some(statement) = scope.statement.take() {
        scope.rows_affected = scope.executor().execute(&statement.sql, &statement.args)?;
    }
    Ok(Flow::Continue)
}
