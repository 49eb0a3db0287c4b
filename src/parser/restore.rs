// SQL restoring
//
// Renders AST fragments back to normalized SQL text for the image queries:
// uppercase keywords, comparison operators without spaces, placeholders kept
// as `?` in source order.

use super::ast::*;
use super::parser::{ParseError, ParseResult};

/// Render an expression as normalized SQL
pub fn restore_expression(expr: &Expression) -> ParseResult<String> {
    let mut out = String::new();
    write_expression(expr, &mut out)?;
    Ok(out)
}

/// Render `ORDER BY ...`; empty string when there are no items
pub fn restore_order_by(items: &[OrderByItem]) -> ParseResult<String> {
    if items.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let mut part = restore_expression(&item.expr)?;
        match item.descending {
            Some(true) => part.push_str(" DESC"),
            Some(false) => part.push_str(" ASC"),
            None => {}
        }
        parts.push(part);
    }
    Ok(format!("ORDER BY {}", parts.join(",")))
}

/// Render `LIMIT count` or `LIMIT offset,count`
pub fn restore_limit(limit: &Limit) -> ParseResult<String> {
    let count = restore_expression(&limit.count)?;
    match &limit.offset {
        Some(offset) => Ok(format!("LIMIT {},{}", restore_expression(offset)?, count)),
        None => Ok(format!("LIMIT {}", count)),
    }
}

/// Render a column reference, keeping its qualifier
pub fn restore_column(column: &ColumnReference) -> String {
    match &column.table {
        Some(table) => format!("{}.{}", table, column.name),
        None => column.name.clone(),
    }
}

fn write_list(items: &[Expression], out: &mut String) -> ParseResult<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_expression(item, out)?;
    }
    Ok(())
}

fn write_expression(expr: &Expression, out: &mut String) -> ParseResult<()> {
    match expr {
        Expression::Literal(value) => write_literal(value, out),
        Expression::CharsetLiteral { raw, .. } => out.push_str(raw),
        Expression::Column(column) => out.push_str(&restore_column(column)),
        Expression::Placeholder(_) => out.push('?'),
        Expression::BinaryOp { left, op, right } => {
            write_expression(left, out)?;
            out.push_str(operator_text(*op));
            write_expression(right, out)?;
        }
        Expression::UnaryOp { op, expr } => {
            match op {
                UnaryOperator::Not => out.push_str("NOT "),
                UnaryOperator::Minus => out.push('-'),
            }
            write_expression(expr, out)?;
        }
        Expression::InList { expr, list, negated } => {
            write_expression(expr, out)?;
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            write_list(list, out)?;
            out.push(')');
        }
        Expression::Between { expr, low, high, negated } => {
            write_expression(expr, out)?;
            out.push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            write_expression(low, out)?;
            out.push_str(" AND ");
            write_expression(high, out)?;
        }
        Expression::IsNull { expr, negated } => {
            write_expression(expr, out)?;
            out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Expression::Function { name, args } => {
            out.push_str(&name.to_uppercase());
            out.push('(');
            write_list(args, out)?;
            out.push(')');
        }
        Expression::Tuple(items) => {
            out.push('(');
            write_list(items, out)?;
            out.push(')');
        }
        Expression::Nested(inner) => {
            out.push('(');
            write_expression(inner, out)?;
            out.push(')');
        }
        Expression::Subquery(_) => {
            return Err(ParseError::Unsupported("subquery in predicate".to_string()));
        }
    }
    Ok(())
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&f.to_string()),
        // Unbound string literals keep the connection charset marker
        Value::String(s) => {
            out.push_str("_UTF8MB4");
            out.push_str(s);
        }
        Value::Boolean(true) => out.push_str("TRUE"),
        Value::Boolean(false) => out.push_str("FALSE"),
    }
}

fn operator_text(op: Operator) -> &'static str {
    match op {
        Operator::Equals => "=",
        Operator::NotEquals => "!=",
        Operator::LessThan => "<",
        Operator::GreaterThan => ">",
        Operator::LessEquals => "<=",
        Operator::GreaterEquals => ">=",
        Operator::Like => " LIKE ",
        Operator::NotLike => " NOT LIKE ",
        Operator::And => " AND ",
        Operator::Or => " OR ",
        Operator::Plus => "+",
        Operator::Minus => "-",
        Operator::Multiply => "*",
        Operator::Divide => "/",
        Operator::Modulo => "%",
    }
}
