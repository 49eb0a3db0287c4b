// Image builders
//
// Each builder knows how to select the rows a statement kind touches, before
// and after it runs.

pub mod delete;
pub mod insert;
pub mod update;
pub mod upsert;

use log::debug;

use super::{RecordImage, RowImage};
use crate::common::{DataValue, ImageKind, NamedValue, SqlType};
use crate::driver::Conn;
use crate::error::{AtError, Result};
use crate::exec::ExecContext;
use crate::parser::ast::{Expression, Limit, OrderByItem, Placeholder, TableReference, Value};
use crate::parser::restore::{restore_expression, restore_limit, restore_order_by};
use crate::parser::{bind_arguments, resolve_placeholder, ParseError};

pub use self::delete::DeleteUndoLogBuilder;
pub use self::insert::InsertUndoLogBuilder;
pub use self::update::UpdateUndoLogBuilder;
pub use self::upsert::UpsertUndoLogBuilder;

/// Captures the before and after images of one statement kind
pub trait UndoLogBuilder: Send + Sync {
    fn sql_type(&self) -> SqlType;

    fn before_image(&self, ctx: &mut ExecContext<'_>) -> Result<RecordImage>;

    fn after_image(&self, ctx: &mut ExecContext<'_>, before: &RecordImage) -> Result<RecordImage>;
}

/// A generated SELECT with its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ImageQuery {
    pub sql: String,
    pub args: Vec<NamedValue>,
}

impl ImageQuery {
    /// Run the query and wrap the rows as an image
    pub fn fetch(
        &self,
        conn: &mut dyn Conn,
        table: &str,
        kind: ImageKind,
        sql_type: SqlType,
        primary_keys: Vec<String>,
    ) -> Result<RecordImage> {
        debug!("{:?} image query: {} {:?}", kind, self.sql, self.args);
        let rows = conn.query(&self.sql, &self.args)?;
        Ok(RecordImage::from_rows(table, kind, sql_type, primary_keys, &rows))
    }
}

fn capture_error(e: ParseError) -> AtError {
    AtError::ImageCapture(format!("cannot determine affected rows: {}", e))
}

/// Table as written in the statement, with schema and alias
pub(crate) fn table_sql(table: &TableReference) -> String {
    let mut sql = match &table.schema {
        Some(schema) => format!("{}.{}", schema, table.name),
        None => table.name.clone(),
    };
    if let Some(alias) = &table.alias {
        sql.push(' ');
        sql.push_str(alias);
    }
    sql
}

/// ` WHERE ... ORDER BY ... LIMIT ...` of the original statement, with the
/// arguments its placeholders were bound to
pub(crate) fn restore_conditions(
    where_clause: Option<&Expression>,
    order_by: &[OrderByItem],
    limit: Option<&Limit>,
    args: &[NamedValue],
) -> Result<(String, Vec<NamedValue>)> {
    let mut sql = String::new();
    let mut placeholders: Vec<&Placeholder> = Vec::new();

    if let Some(expr) = where_clause {
        if expr.contains_subquery() {
            return Err(AtError::ImageCapture(
                "cannot determine affected rows: predicate contains a subquery".to_string(),
            ));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&restore_expression(expr).map_err(capture_error)?);
        expr.collect_placeholders(&mut placeholders);
    }
    if !order_by.is_empty() {
        sql.push(' ');
        sql.push_str(&restore_order_by(order_by).map_err(capture_error)?);
        for item in order_by {
            item.expr.collect_placeholders(&mut placeholders);
        }
    }
    if let Some(limit) = limit {
        sql.push(' ');
        sql.push_str(&restore_limit(limit).map_err(capture_error)?);
        if let Some(offset) = &limit.offset {
            offset.collect_placeholders(&mut placeholders);
        }
        limit.count.collect_placeholders(&mut placeholders);
    }

    let bound = bind_arguments(&placeholders, args).map_err(capture_error)?;
    Ok((sql, bound))
}

/// Primary key predicate: `id IN (?,?)` or `(a,b) IN ((?,?),(?,?))`
pub(crate) fn pk_condition(primary_keys: &[String], keys: &[Vec<DataValue>]) -> (String, Vec<NamedValue>) {
    let mut args = Vec::new();
    let mut groups = Vec::with_capacity(keys.len());
    for key in keys {
        let marks = vec!["?"; key.len()].join(",");
        groups.push(if primary_keys.len() == 1 { marks } else { format!("({})", marks) });
        for value in key {
            args.push(NamedValue::new(args.len() + 1, value.clone()));
        }
    }
    let sql = if primary_keys.len() == 1 {
        format!("{} IN ({})", primary_keys[0], groups.join(","))
    } else {
        format!("({}) IN ({})", primary_keys.join(","), groups.join(","))
    };
    (sql, args)
}

/// Primary key values of every row of an image
pub(crate) fn image_keys(image: &RecordImage) -> Result<Vec<Vec<DataValue>>> {
    image.rows.iter().map(|row| image.pk_values(row)).collect()
}

/// Column list of an image's rows, falling back to `default` when empty
pub(crate) fn image_columns(rows: &[RowImage], default: &[String]) -> Vec<String> {
    match rows.first() {
        Some(row) => row.keys().cloned().collect(),
        None => default.to_vec(),
    }
}

/// Renumber arguments after concatenating several condition groups
pub(crate) fn renumber(args: Vec<NamedValue>) -> Vec<NamedValue> {
    args.into_iter()
        .enumerate()
        .map(|(i, a)| NamedValue { name: None, ordinal: i + 1, value: a.value })
        .collect()
}

/// Value an INSERT supplies for a column: literal, bound placeholder or absent
pub(crate) fn supplied_value(expr: &Expression, args: &[NamedValue]) -> Option<DataValue> {
    match expr {
        Expression::Literal(Value::Null) => None,
        Expression::Literal(Value::Integer(i)) => Some(DataValue::Integer(*i)),
        Expression::Literal(Value::Float(f)) => Some(DataValue::Float(*f)),
        Expression::Literal(Value::String(s)) => Some(DataValue::Text(s.clone())),
        Expression::Literal(Value::Boolean(b)) => Some(DataValue::Boolean(*b)),
        Expression::CharsetLiteral { text, .. } => Some(DataValue::Text(text.clone())),
        Expression::UnaryOp { op: crate::parser::ast::UnaryOperator::Minus, expr } => {
            match supplied_value(expr, args)? {
                DataValue::Integer(i) => Some(DataValue::Integer(-i)),
                DataValue::Float(f) => Some(DataValue::Float(-f)),
                _ => None,
            }
        }
        Expression::Placeholder(p) => resolve_placeholder(p, args).filter(|v| !v.is_null()).cloned(),
        _ => None,
    }
}
