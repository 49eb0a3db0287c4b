// DELETE image builder

use super::{restore_conditions, table_sql, ImageQuery, UndoLogBuilder};
use crate::common::{ImageKind, NamedValue, SqlType};
use crate::datasource::TableMeta;
use crate::error::{AtError, Result};
use crate::exec::ExecContext;
use crate::parser::ast::{DeleteStatement, Statement};
use crate::undo::RecordImage;

#[derive(Debug, Default)]
pub struct DeleteUndoLogBuilder;

impl DeleteUndoLogBuilder {
    /// `SELECT <all columns> FROM <table> WHERE ... [ORDER BY] [LIMIT] FOR UPDATE`
    pub fn build_before_image_sql(stmt: &DeleteStatement, meta: &TableMeta, args: &[NamedValue]) -> Result<ImageQuery> {
        let (conditions, args) =
            restore_conditions(stmt.where_clause.as_ref(), &stmt.order_by, stmt.limit.as_ref(), args)?;
        Ok(ImageQuery {
            sql: format!(
                "SELECT {} FROM {}{} FOR UPDATE",
                meta.column_names.join(","),
                table_sql(&stmt.table),
                conditions
            ),
            args,
        })
    }
}

impl UndoLogBuilder for DeleteUndoLogBuilder {
    fn sql_type(&self) -> SqlType {
        SqlType::Delete
    }

    fn before_image(&self, ctx: &mut ExecContext<'_>) -> Result<RecordImage> {
        let stmt = match &ctx.parsed()?.statement {
            Statement::Delete(stmt) => stmt,
            other => return Err(AtError::ImageCapture(format!("expected DELETE, got {}", other))),
        };
        let meta = ctx.table_meta()?;
        let query = Self::build_before_image_sql(stmt, &meta, ctx.values)?;
        query.fetch(
            &mut *ctx.conn,
            &meta.table_name,
            ImageKind::Before,
            SqlType::Delete,
            meta.primary_key_columns()?,
        )
    }

    /// Deleted rows leave nothing behind
    fn after_image(&self, _ctx: &mut ExecContext<'_>, before: &RecordImage) -> Result<RecordImage> {
        Ok(RecordImage::empty(&before.table_name, ImageKind::After, SqlType::Delete, before.primary_keys.clone()))
    }
}
