//! Scanning result rows into records.

use ormlink_core::{
    ColumnInfo, Destination, FieldDescriptor, ModelDescriptor, Result, Row, set_path,
};
use std::sync::Arc;

/// Field for each result column, `None` where nothing maps.
fn column_plan<'d>(
    descriptor: &'d ModelDescriptor,
    columns: &ColumnInfo,
) -> Vec<Option<&'d FieldDescriptor>> {
    columns
        .names()
        .iter()
        .map(|column| descriptor.field_by_db_name(column).filter(|f| f.is_column()))
        .collect()
}

/// Copy `rows` into `dest`, matching columns to fields by storage name.
///
/// Collections are emptied first and get one new record per row. A single
/// destination is overwritten in place by each row, so it ends up holding
/// the last one. Columns without a matching field are ignored; conversion
/// failures are returned with the field name attached.
#[allow(clippy::result_large_err)]
pub fn scan_rows(
    rows: &[Row],
    descriptor: &ModelDescriptor,
    dest: &mut dyn Destination,
) -> Result<usize> {
    if dest.is_collection() {
        dest.reset();
    }
    let mut plan: Option<(Arc<ColumnInfo>, Vec<Option<&FieldDescriptor>>)> = None;
    for row in rows {
        let stale = plan
            .as_ref()
            .is_none_or(|(columns, _)| !Arc::ptr_eq(columns, row.columns()));
        if stale {
            plan = Some((row.columns().clone(), column_plan(descriptor, row.columns())));
        }
        let Some((_, fields)) = plan.as_ref() else {
            continue;
        };
        let record = dest.push_new();
        for (index, field) in fields.iter().enumerate() {
            let (Some(field), Some(value)) = (field, row.get(index)) else {
                continue;
            };
            set_path(record, &field.names, value.clone())?;
        }
    }
    tracing::trace!(model = descriptor.type_name, rows = rows.len(), "scanned rows");
    Ok(rows.len())
}
