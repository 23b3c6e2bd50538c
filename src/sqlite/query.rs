use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::ValueRef;

use crate::error::BridgeError;
use crate::types::{Row, SqlValue};

use super::params::values_as_tosql;

/// Extract a `SqlValue` from a `SQLite` row.
///
/// # Errors
/// Returns `BridgeError::SqliteError` if the column cannot be read.
pub fn extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<SqlValue, BridgeError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    })
}

fn column_names(stmt: &Statement<'_>) -> Arc<Vec<String>> {
    Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    )
}

/// Run `stmt` and collect up to `limit` rows, preserving result order.
fn collect_rows(
    stmt: &mut Statement<'_>,
    params: &[SqlValue],
    limit: Option<usize>,
) -> Result<Vec<Row>, BridgeError> {
    let names = column_names(stmt);
    let param_refs = values_as_tosql(params);
    let mut rows_iter = stmt.query(&param_refs[..])?;
    let mut rows = Vec::new();

    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(names.len());
        for i in 0..names.len() {
            values.push(extract_value(row, i)?);
        }
        rows.push(Row::new(Arc::clone(&names), values));
        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
    }

    Ok(rows)
}

/// Run a query and return every row.
///
/// # Errors
/// Returns `BridgeError::SqliteError` if binding, stepping or reading fails.
pub fn build_rows(stmt: &mut Statement<'_>, params: &[SqlValue]) -> Result<Vec<Row>, BridgeError> {
    collect_rows(stmt, params, None)
}

/// Run a query and return its first row, if any. Remaining rows are not stepped.
///
/// # Errors
/// Returns `BridgeError::SqliteError` if binding, stepping or reading fails.
pub fn first_row(stmt: &mut Statement<'_>, params: &[SqlValue]) -> Result<Option<Row>, BridgeError> {
    Ok(collect_rows(stmt, params, Some(1))?.into_iter().next())
}
