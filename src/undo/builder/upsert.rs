// REPLACE INTO / INSERT ... ON DUPLICATE KEY UPDATE image builder
//
// Whether a row was inserted or updated is only known after the fact, so both
// images are selected by every unique key the statement supplies. The replay
// pairs before and after rows by primary key.

use super::insert::{insert_columns, row_value_for};
use super::{image_keys, pk_condition, renumber, table_sql, ImageQuery, UndoLogBuilder};
use crate::common::{DataValue, ImageKind, NamedValue, SqlType};
use crate::datasource::TableMeta;
use crate::driver::ExecResult;
use crate::error::{AtError, Result};
use crate::exec::ExecContext;
use crate::parser::ast::{InsertStatement, Statement};
use crate::undo::RecordImage;

#[derive(Debug)]
pub struct UpsertUndoLogBuilder {
    sql_type: SqlType,
}

impl UpsertUndoLogBuilder {
    pub fn replace() -> Self {
        UpsertUndoLogBuilder { sql_type: SqlType::Replace }
    }

    pub fn insert_on_duplicate_update() -> Self {
        UpsertUndoLogBuilder { sql_type: SqlType::InsertOnDuplicateUpdate }
    }

    /// `(a=?) OR (b=? AND c=?)` over every unique index whose columns all
    /// have a value in some row; `None` when no row supplies one
    pub fn unique_key_condition(
        stmt: &InsertStatement,
        meta: &TableMeta,
        args: &[NamedValue],
    ) -> Option<(String, Vec<NamedValue>)> {
        let columns = insert_columns(stmt, meta);
        let mut groups = Vec::new();
        let mut bound = Vec::new();

        for row in &stmt.rows {
            for index in meta.unique_indexes() {
                let values: Option<Vec<DataValue>> = index
                    .columns
                    .iter()
                    .map(|c| row_value_for(&columns, row, c, args))
                    .collect();
                let Some(values) = values else { continue };

                let terms: Vec<String> = index.columns.iter().map(|c| format!("{}=?", c)).collect();
                groups.push(format!("({})", terms.join(" AND ")));
                bound.extend(values.into_iter().map(|v| NamedValue::new(0, v)));
            }
        }

        if groups.is_empty() {
            None
        } else {
            Some((groups.join(" OR "), renumber(bound)))
        }
    }

    pub fn build_before_image_sql(stmt: &InsertStatement, meta: &TableMeta, args: &[NamedValue]) -> Option<ImageQuery> {
        let (condition, args) = Self::unique_key_condition(stmt, meta, args)?;
        Some(ImageQuery {
            sql: format!(
                "SELECT {} FROM {} WHERE {} FOR UPDATE",
                meta.column_names.join(","),
                table_sql(&stmt.table),
                condition
            ),
            args,
        })
    }

    /// Same unique-key condition, plus the rows the before image held and
    /// any keys generated by the statement
    pub fn build_after_image_sql(
        stmt: &InsertStatement,
        meta: &TableMeta,
        args: &[NamedValue],
        before: &RecordImage,
        result: Option<&ExecResult>,
    ) -> Result<Option<ImageQuery>> {
        let mut parts = Vec::new();
        let mut bound = Vec::new();

        if let Some((condition, cond_args)) = Self::unique_key_condition(stmt, meta, args) {
            parts.push(condition);
            bound.extend(cond_args);
        }
        if !before.is_empty() {
            let (condition, pk_args) = pk_condition(&before.primary_keys, &image_keys(before)?);
            parts.push(condition);
            bound.extend(pk_args);
        }
        let generated = Self::generated_keys(stmt, meta, args, result)?;
        if !generated.is_empty() {
            let (condition, pk_args) = pk_condition(&meta.primary_key_columns()?, &generated);
            parts.push(condition);
            bound.extend(pk_args);
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(ImageQuery {
            sql: format!(
                "SELECT {} FROM {} WHERE {}",
                meta.column_names.join(","),
                table_sql(&stmt.table),
                parts.join(" OR ")
            ),
            args: renumber(bound),
        }))
    }

    /// Ids generated for rows that leave a single-column key out
    fn generated_keys(
        stmt: &InsertStatement,
        meta: &TableMeta,
        args: &[NamedValue],
        result: Option<&ExecResult>,
    ) -> Result<Vec<Vec<DataValue>>> {
        let pks = meta.primary_key_columns()?;
        let Some(mut next) = result.and_then(|r| r.last_insert_id) else {
            return Ok(Vec::new());
        };
        if pks.len() != 1 {
            return Ok(Vec::new());
        }
        let columns = insert_columns(stmt, meta);
        let mut keys = Vec::new();
        for row in &stmt.rows {
            if row_value_for(&columns, row, &pks[0], args).is_none() {
                keys.push(vec![DataValue::Integer(next)]);
                next += 1;
            }
        }
        Ok(keys)
    }

    fn statement<'s>(ctx: &ExecContext<'s>) -> Result<&'s InsertStatement> {
        match &ctx.parsed()?.statement {
            Statement::Insert(stmt) => Ok(stmt),
            other => Err(AtError::ImageCapture(format!("expected REPLACE or INSERT, got {}", other))),
        }
    }
}

impl UndoLogBuilder for UpsertUndoLogBuilder {
    fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    fn before_image(&self, ctx: &mut ExecContext<'_>) -> Result<RecordImage> {
        let stmt = Self::statement(ctx)?;
        let meta = ctx.table_meta()?;
        let pks = meta.primary_key_columns()?;
        match Self::build_before_image_sql(stmt, &meta, ctx.values) {
            Some(query) => query.fetch(&mut *ctx.conn, &meta.table_name, ImageKind::Before, self.sql_type, pks),
            None => Ok(RecordImage::empty(&meta.table_name, ImageKind::Before, self.sql_type, pks)),
        }
    }

    fn after_image(&self, ctx: &mut ExecContext<'_>, before: &RecordImage) -> Result<RecordImage> {
        let stmt = Self::statement(ctx)?;
        let meta = ctx.table_meta()?;
        let pks = meta.primary_key_columns()?;
        match Self::build_after_image_sql(stmt, &meta, ctx.values, before, ctx.exec_result.as_ref())? {
            Some(query) => query.fetch(&mut *ctx.conn, &meta.table_name, ImageKind::After, self.sql_type, pks),
            None => Err(AtError::ImageCapture(format!(
                "cannot determine rows written to {}: no unique key value and no generated key",
                meta.table_name
            ))),
        }
    }
}
