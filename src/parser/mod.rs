// SQL Parser Module
//
// Classifies statements and exposes their structure to the image builders.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod restore;

pub use self::ast::Statement;
pub use self::parser::{ParseError, ParseResult, Parser};

use crate::common::{DataValue, NamedValue, SqlType};
use self::ast::{Placeholder, TableReference};

/// A classified statement with its AST
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub sql_type: SqlType,
    pub statement: Statement,
    /// Number of bind placeholders in the statement
    pub placeholder_count: usize,
}

impl ParsedStatement {
    /// Target table of the statement
    pub fn table(&self) -> &TableReference {
        match &self.statement {
            Statement::Select(s) => &s.table,
            Statement::Insert(i) => &i.table,
            Statement::Update(u) => &u.table,
            Statement::Delete(d) => &d.table,
        }
    }

    pub fn table_name(&self) -> &str {
        self.table().name()
    }
}

/// Parse and classify a single SQL statement
pub fn do_parse(sql: &str) -> ParseResult<ParsedStatement> {
    let mut parser = Parser::new(sql);
    let statement = parser.parse_statement()?;
    let sql_type = match &statement {
        Statement::Select(s) if s.for_update => SqlType::SelectForUpdate,
        Statement::Select(_) => SqlType::Select,
        Statement::Insert(i) if i.replace => SqlType::Replace,
        Statement::Insert(i) if !i.on_duplicate_update.is_empty() => SqlType::InsertOnDuplicateUpdate,
        Statement::Insert(_) => SqlType::Insert,
        Statement::Update(_) => SqlType::Update,
        Statement::Delete(_) => SqlType::Delete,
    };

    Ok(ParsedStatement { sql_type, statement, placeholder_count: parser.placeholder_count() })
}

/// Look up the argument bound to a placeholder.
///
/// Named placeholders match by name; positional ones match by ordinal and fall
/// back to the argument at the same position.
pub fn resolve_placeholder<'a>(placeholder: &Placeholder, args: &'a [NamedValue]) -> Option<&'a DataValue> {
    if let Some(name) = &placeholder.name {
        return args
            .iter()
            .find(|a| a.name.as_deref().map(|n| n.trim_start_matches([':', '@'])) == Some(name.as_str()))
            .map(|a| &a.value);
    }
    args.iter()
        .find(|a| a.ordinal == placeholder.index + 1)
        .or_else(|| args.get(placeholder.index))
        .map(|a| &a.value)
}

/// Collect the arguments for `placeholders`, renumbered `1..=n` in order
pub fn bind_arguments(placeholders: &[&Placeholder], args: &[NamedValue]) -> ParseResult<Vec<NamedValue>> {
    placeholders
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let value = resolve_placeholder(p, args).ok_or_else(|| {
                ParseError::InvalidSyntax(format!("no argument bound for placeholder {}", p.index + 1))
            })?;
            Ok(NamedValue { name: None, ordinal: i + 1, value: value.clone() })
        })
        .collect()
}
