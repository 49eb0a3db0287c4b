// UPDATE image builder

use super::{image_columns, image_keys, pk_condition, restore_conditions, table_sql, ImageQuery, UndoLogBuilder};
use crate::common::{ImageKind, NamedValue, SqlType};
use crate::datasource::TableMeta;
use crate::error::{AtError, Result};
use crate::exec::ExecContext;
use crate::parser::ast::{Statement, UpdateStatement};
use crate::undo::RecordImage;

#[derive(Debug, Default)]
pub struct UpdateUndoLogBuilder;

impl UpdateUndoLogBuilder {
    /// Columns captured for an UPDATE: the SET columns followed by any
    /// primary key column not among them, or every column in table order
    pub fn image_columns(stmt: &UpdateStatement, meta: &TableMeta, only_care_update_columns: bool) -> Result<Vec<String>> {
        if !only_care_update_columns {
            return Ok(meta.column_names.clone());
        }
        let mut columns: Vec<String> = Vec::new();
        for assignment in &stmt.assignments {
            let name = &assignment.column.name;
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                columns.push(name.clone());
            }
        }
        for pk in meta.primary_key_columns()? {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&pk)) {
                columns.push(pk);
            }
        }
        Ok(columns)
    }

    /// `SELECT <columns> FROM <table> WHERE ... [ORDER BY] [LIMIT] FOR UPDATE`
    pub fn build_before_image_sql(
        stmt: &UpdateStatement,
        meta: &TableMeta,
        args: &[NamedValue],
        only_care_update_columns: bool,
    ) -> Result<ImageQuery> {
        Self::check_primary_key_untouched(stmt, meta)?;
        let columns = Self::image_columns(stmt, meta, only_care_update_columns)?;
        let (conditions, args) =
            restore_conditions(stmt.where_clause.as_ref(), &stmt.order_by, stmt.limit.as_ref(), args)?;
        Ok(ImageQuery {
            sql: format!("SELECT {} FROM {}{} FOR UPDATE", columns.join(","), table_sql(&stmt.table), conditions),
            args,
        })
    }

    /// Rows are matched back by primary key, so a changed key cannot be compensated
    fn check_primary_key_untouched(stmt: &UpdateStatement, meta: &TableMeta) -> Result<()> {
        match stmt.assignments.iter().find(|a| meta.is_primary_key(&a.column.name)) {
            Some(assignment) => Err(AtError::ImageCapture(format!(
                "update of primary key column {} of {} is not supported",
                assignment.column.name, meta.table_name
            ))),
            None => Ok(()),
        }
    }

    fn statement<'s>(ctx: &ExecContext<'s>) -> Result<&'s UpdateStatement> {
        match &ctx.parsed()?.statement {
            Statement::Update(stmt) => Ok(stmt),
            other => Err(AtError::ImageCapture(format!("expected UPDATE, got {}", other))),
        }
    }
}

impl UndoLogBuilder for UpdateUndoLogBuilder {
    fn sql_type(&self) -> SqlType {
        SqlType::Update
    }

    fn before_image(&self, ctx: &mut ExecContext<'_>) -> Result<RecordImage> {
        let stmt = Self::statement(ctx)?;
        let meta = ctx.table_meta()?;
        let query = Self::build_before_image_sql(stmt, &meta, ctx.values, ctx.undo_config.only_care_update_columns)?;
        query.fetch(
            &mut *ctx.conn,
            &meta.table_name,
            ImageKind::Before,
            SqlType::Update,
            meta.primary_key_columns()?,
        )
    }

    /// Re-select the before image's rows by primary key
    fn after_image(&self, ctx: &mut ExecContext<'_>, before: &RecordImage) -> Result<RecordImage> {
        let stmt = Self::statement(ctx)?;
        if before.is_empty() {
            return Ok(RecordImage::empty(
                &before.table_name,
                ImageKind::After,
                SqlType::Update,
                before.primary_keys.clone(),
            ));
        }
        let meta = ctx.table_meta()?;
        let columns = image_columns(
            &before.rows,
            &Self::image_columns(stmt, &meta, ctx.undo_config.only_care_update_columns)?,
        );
        let (condition, args) = pk_condition(&before.primary_keys, &image_keys(before)?);
        let query = ImageQuery {
            sql: format!("SELECT {} FROM {} WHERE {}", columns.join(","), table_sql(&stmt.table), condition),
            args,
        };
        query.fetch(
            &mut *ctx.conn,
            &before.table_name,
            ImageKind::After,
            SqlType::Update,
            before.primary_keys.clone(),
        )
    }
}
