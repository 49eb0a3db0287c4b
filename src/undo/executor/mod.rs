// Undo executors
//
// Turn one statement's undo entry into compensating statements. Before any
// write the current rows are read with a locking select and compared with
// the images: rows still holding the after image are restored, rows already
// holding the before image are left alone, anything else is dirty data.

pub mod delete;
pub mod insert;
pub mod update;
pub mod upsert;

use log::{debug, info, warn};

use super::builder::{image_columns, image_keys, pk_condition};
use super::{rows_equal, RecordImage, RowImage, SqlUndoLog};
use crate::common::{DataValue, NamedValue, SqlType};
use crate::driver::Conn;
use crate::error::{AtError, Result};

pub use self::delete::DeleteUndoExecutor;
pub use self::insert::InsertUndoExecutor;
pub use self::update::UpdateUndoExecutor;
pub use self::upsert::UpsertUndoExecutor;

/// A compensating statement
#[derive(Debug, Clone, PartialEq)]
pub struct Compensation {
    pub sql: String,
    pub args: Vec<NamedValue>,
}

/// Reverses the change recorded by one undo entry
pub trait UndoExecutor {
    /// Statements undoing the change, assuming the rows still hold the after image
    fn compensations(&self) -> Result<Vec<Compensation>>;

    /// Validate the current rows and apply the compensation
    fn execute_on(&self, conn: &mut dyn Conn) -> Result<()>;
}

/// Executor for an undo entry's statement kind
pub fn undo_executor_for(log: &SqlUndoLog) -> Result<Box<dyn UndoExecutor + '_>> {
    match log.sql_type {
        SqlType::Insert => Ok(Box::new(InsertUndoExecutor::new(log))),
        SqlType::Update => Ok(Box::new(UpdateUndoExecutor::new(log))),
        SqlType::Delete => Ok(Box::new(DeleteUndoExecutor::new(log))),
        SqlType::Replace | SqlType::InsertOnDuplicateUpdate => Ok(Box::new(UpsertUndoExecutor::new(log))),
        other => Err(AtError::NotFound(format!("undo executor for {}", other))),
    }
}

/// `id=?` or `a=? AND b=?`
pub(crate) fn pk_where(primary_keys: &[String]) -> String {
    primary_keys
        .iter()
        .map(|pk| format!("{}=?", pk))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Primary key of `row` as ordinal arguments starting at `first`
pub(crate) fn pk_args(image: &RecordImage, row: &RowImage, first: usize) -> Result<Vec<NamedValue>> {
    Ok(image
        .pk_values(row)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| NamedValue::new(first + i, v))
        .collect())
}

pub(crate) fn delete_row(image: &RecordImage, row: &RowImage) -> Result<Compensation> {
    Ok(Compensation {
        sql: format!("DELETE FROM {} WHERE {}", image.table_name, pk_where(&image.primary_keys)),
        args: pk_args(image, row, 1)?,
    })
}

pub(crate) fn insert_row(image: &RecordImage, row: &RowImage) -> Compensation {
    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let marks = vec!["?"; columns.len()].join(", ");
    Compensation {
        sql: format!("INSERT INTO {} ({}) VALUES ({})", image.table_name, columns.join(", "), marks),
        args: row
            .values()
            .enumerate()
            .map(|(i, v)| NamedValue::new(i + 1, v.clone()))
            .collect(),
    }
}

/// Restore the non-key columns of `row`; `None` when it has only key columns
pub(crate) fn update_row(image: &RecordImage, row: &RowImage) -> Result<Option<Compensation>> {
    let is_pk = |col: &str| image.primary_keys.iter().any(|pk| pk.eq_ignore_ascii_case(col));
    let assignments: Vec<(&String, &DataValue)> = row.iter().filter(|(col, _)| !is_pk(col)).collect();
    if assignments.is_empty() {
        return Ok(None);
    }

    let set = assignments
        .iter()
        .map(|(col, _)| format!("{}=?", col))
        .collect::<Vec<_>>()
        .join(",");
    let mut args: Vec<NamedValue> = assignments
        .iter()
        .enumerate()
        .map(|(i, (_, v))| NamedValue::new(i + 1, (*v).clone()))
        .collect();
    args.extend(pk_args(image, row, args.len() + 1)?);

    Ok(Some(Compensation {
        sql: format!("UPDATE {} SET {} WHERE {}", image.table_name, set, pk_where(&image.primary_keys)),
        args,
    }))
}

/// Lock and read the current rows holding the keys of `image`
pub(crate) fn query_current(conn: &mut dyn Conn, image: &RecordImage, keys: &[Vec<DataValue>]) -> Result<Vec<RowImage>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let columns = image_columns(&image.rows, &image.primary_keys);
    let (condition, args) = pk_condition(&image.primary_keys, keys);
    let sql = format!("SELECT {} FROM {} WHERE {} FOR UPDATE", columns.join(","), image.table_name, condition);
    debug!("Current image query: {} {:?}", sql, args);
    Ok(conn.query(&sql, &args)?.to_maps())
}

/// Compare current data with both images; `Ok(true)` when the compensation
/// must run, `Ok(false)` when there is nothing left to undo
pub(crate) fn check_data(conn: &mut dyn Conn, log: &SqlUndoLog) -> Result<bool> {
    let before = &log.before_image;
    let after = &log.after_image;
    if before.same_rows(after) {
        debug!("Undo entry on {} changed nothing, skipping", log.table_name);
        return Ok(false);
    }

    let reference = if after.is_empty() { before } else { after };
    let current = query_current(conn, reference, &image_keys(reference)?)?;

    if rows_equal(&current, &after.rows, &reference.primary_keys) {
        return Ok(true);
    }
    if rows_equal(&current, &before.rows, &reference.primary_keys) {
        info!("Rows of {} already hold the before image, skipping", log.table_name);
        return Ok(false);
    }
    warn!("Dirty data in {}: current {:?}, expected {:?}", log.table_name, current, after.rows);
    Err(AtError::DirtyData {
        table: log.table_name.clone(),
        detail: format!("{} current rows differ from the after image", current.len()),
    })
}

pub(crate) fn apply(conn: &mut dyn Conn, compensations: &[Compensation]) -> Result<()> {
    for compensation in compensations {
        debug!("Undo statement: {} {:?}", compensation.sql, compensation.args);
        conn.exec(&compensation.sql, &compensation.args)?;
    }
    Ok(())
}
