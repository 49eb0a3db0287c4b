// INSERT image builder

use super::{pk_condition, supplied_value, table_sql, ImageQuery, UndoLogBuilder};
use crate::common::{DataValue, ImageKind, NamedValue, SqlType};
use crate::datasource::TableMeta;
use crate::driver::ExecResult;
use crate::error::{AtError, Result};
use crate::exec::ExecContext;
use crate::parser::ast::{InsertStatement, Statement};
use crate::undo::RecordImage;

#[derive(Debug, Default)]
pub struct InsertUndoLogBuilder;

/// Column list of an INSERT; the table's own order when none is given
pub(crate) fn insert_columns(stmt: &InsertStatement, meta: &TableMeta) -> Vec<String> {
    if stmt.columns.is_empty() {
        meta.column_names.clone()
    } else {
        stmt.columns.clone()
    }
}

/// Value a row supplies for `column`, if any
pub(crate) fn row_value_for(
    columns: &[String],
    row: &[crate::parser::ast::Expression],
    column: &str,
    args: &[NamedValue],
) -> Option<DataValue> {
    let pos = columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
    row.get(pos).and_then(|expr| supplied_value(expr, args))
}

impl InsertUndoLogBuilder {
    /// Primary key of every inserted row. Keys the statement leaves out come
    /// from the generated id, counting up from `last_insert_id`.
    pub fn primary_key_values(
        stmt: &InsertStatement,
        meta: &TableMeta,
        args: &[NamedValue],
        result: Option<&ExecResult>,
    ) -> Result<Vec<Vec<DataValue>>> {
        let pks = meta.primary_key_columns()?;
        let columns = insert_columns(stmt, meta);
        let mut next_generated = result.and_then(|r| r.last_insert_id);

        let mut keys = Vec::with_capacity(stmt.rows.len());
        for row in &stmt.rows {
            let mut key = Vec::with_capacity(pks.len());
            for pk in &pks {
                match row_value_for(&columns, row, pk, args) {
                    Some(value) => key.push(value),
                    None if pks.len() == 1 => {
                        let id = next_generated.ok_or_else(|| {
                            AtError::ImageCapture(format!(
                                "cannot determine generated primary key {} of {}",
                                pk, meta.table_name
                            ))
                        })?;
                        key.push(DataValue::Integer(id));
                        next_generated = Some(id + 1);
                    }
                    None => {
                        return Err(AtError::ImageCapture(format!(
                            "composite primary key column {} of {} has no value",
                            pk, meta.table_name
                        )));
                    }
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// `SELECT <all columns> FROM <table> WHERE <pk> IN (...)`
    pub fn build_after_image_sql(
        stmt: &InsertStatement,
        meta: &TableMeta,
        args: &[NamedValue],
        result: Option<&ExecResult>,
    ) -> Result<ImageQuery> {
        let pks = meta.primary_key_columns()?;
        let keys = Self::primary_key_values(stmt, meta, args, result)?;
        let (condition, args) = pk_condition(&pks, &keys);
        Ok(ImageQuery {
            sql: format!("SELECT {} FROM {} WHERE {}", meta.column_names.join(","), table_sql(&stmt.table), condition),
            args,
        })
    }

    fn statement<'s>(ctx: &ExecContext<'s>) -> Result<&'s InsertStatement> {
        match &ctx.parsed()?.statement {
            Statement::Insert(stmt) => Ok(stmt),
            other => Err(AtError::ImageCapture(format!("expected INSERT, got {}", other))),
        }
    }
}

impl UndoLogBuilder for InsertUndoLogBuilder {
    fn sql_type(&self) -> SqlType {
        SqlType::Insert
    }

    /// Nothing exists before an insert
    fn before_image(&self, ctx: &mut ExecContext<'_>) -> Result<RecordImage> {
        let meta = ctx.table_meta()?;
        Ok(RecordImage::empty(&meta.table_name, ImageKind::Before, SqlType::Insert, meta.primary_key_columns()?))
    }

    fn after_image(&self, ctx: &mut ExecContext<'_>, _before: &RecordImage) -> Result<RecordImage> {
        let stmt = Self::statement(ctx)?;
        let meta = ctx.table_meta()?;
        let query = Self::build_after_image_sql(stmt, &meta, ctx.values, ctx.exec_result.as_ref())?;
        query.fetch(
            &mut *ctx.conn,
            &meta.table_name,
            ImageKind::After,
            SqlType::Insert,
            meta.primary_key_columns()?,
        )
    }
}
