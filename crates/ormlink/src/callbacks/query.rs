//! Default query pipeline.

use ormlink_core::{Error, PreconditionErrorKind, Result};

use super::{Flow, Pipeline, step};
use crate::scope::Scope;
use crate::{association, scan};

pub(super) fn pipeline() -> Pipeline {
    [
        step("build_select", build_select),
        step("execute_query", execute_query),
        step("scan_rows", scan_rows),
        step("preload", preload),
        step("after_query", after_query),
    ]
    .into_iter()
    .collect()
}

#[allow(clippy::result_large_err)]
fn build_select(scope: &mut Scope<'_>) -> Result<Flow> {
    let statement = scope.assembler().select(None)?;
    scope.statement = Some(scope.finish(statement)?);
    Ok(Flow::Continue)
}

#[allow(clippy::result_large_err)]
fn execute_query(scope: &mut Scope<'_>) -> Result<Flow> {
    if let Some(statement) = scope.statement.take() {
        scope.rows = scope.executor().query(&statement.sql, &statement.args)?;
        scope.rows_affected = scope.rows.len() as u64;
    }
    Ok(Flow::Continue)
}

#[allow(clippy::result_large_err)]
fn scan_rows(scope: &mut Scope<'_>) -> Result<Flow> {
    let rows = std::mem::take(&mut scope.rows);
    let descriptor = scope.descriptor.clone();
    let Some(dest) = scope.destination_mut() else {
        return Err(Error::precondition(
            PreconditionErrorKind::WrongDestination,
            "query results need a destination",
        ));
    };
    if dest.element_type().type_id != descriptor.type_id {
        return Err(Error::precondition(
            PreconditionErrorKind::WrongDestination,
            format!(
                "cannot scan {} rows into {}",
                descriptor.type_name,
                dest.element_type().name
            ),
        ));
    }
    if rows.is_empty() && !dest.is_collection() {
        return Ok(Flow::Continue);
    }
    scan::scan_rows(&rows, &descriptor, dest)?;
    Ok(Flow::Continue)
}

/// Load each requested relation into every scanned record.
#[allow(clippy::result_large_err)]
fn preload(scope: &mut Scope<'_>) -> Result<Flow> {
    if scope.search.preload.is_empty() || scope.rows_affected == 0 {
        return Ok(Flow::Continue);
    }
    let db = scope.db.fresh();
    let relations = scope.search.preload.clone();
    if let Some(dest) = scope.destination_mut() {
        for relation in &relations {
            for record in dest.records_mut() {
                association::preload(&db, record, relation)?;
            }
        }
    }
    Ok(Flow::Continue)
}

#[allow(clippy::result_large_err)]
fn after_query(scope: &mut Scope<'_>) -> Result<Flow> {
    if scope.rows_affected == 0 {
        return Ok(Flow::Continue);
    }
    if let Some(dest) = scope.destination_mut() {
        for record in dest.records_mut() {
            record.after_find()?;
        }
    }
    Ok(Flow::Continue)
}
