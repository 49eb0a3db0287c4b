// SQL Abstract Syntax Tree (AST) Implementation
//
// AST nodes for the statements the interception layer classifies.

use std::fmt;

/// Represents a SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

/// SELECT statement representation (single table)
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub columns: Vec<SelectColumn>,
    pub table: TableReference,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Limit>,
    pub for_update: bool,
}

/// Column in a SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// All columns (*)
    Wildcard,
    /// Expression with optional alias
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

/// Column reference (could be qualified with table name)
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnReference {
    pub table: Option<String>,
    pub name: String,
}

/// Table reference, optionally schema-qualified
#[derive(Debug, Clone, PartialEq)]
pub struct TableReference {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

/// A bind parameter occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    /// 0-based position among all placeholders of the statement
    pub index: usize,
    /// Name for `:name` parameters
    pub name: Option<String>,
}

/// Expression in SQL
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// Charset-introduced literal, kept as written in the source
    CharsetLiteral {
        charset: String,
        text: String,
        raw: String,
    },
    Column(ColumnReference),
    Placeholder(Placeholder),
    BinaryOp {
        left: Box<Expression>,
        op: Operator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
    /// Row constructor `(a, b)`
    Tuple(Vec<Expression>),
    /// Parenthesised expression, kept so rendering preserves grouping
    Nested(Box<Expression>),
    Subquery(Box<SelectStatement>),
}

/// SQL literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // Comparison
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessEquals,
    GreaterEquals,
    Like,
    NotLike,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expression,
    /// `Some(true)` for DESC, `Some(false)` for an explicit ASC
    pub descending: Option<bool>,
}

/// LIMIT clause (`LIMIT count`, `LIMIT offset, count`, `LIMIT count OFFSET offset`)
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub count: Expression,
    pub offset: Option<Expression>,
}

/// INSERT / REPLACE statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: TableReference,
    /// Explicit column list; empty when the statement relies on table order
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expression>>,
    pub replace: bool,
    /// Assignments of `ON DUPLICATE KEY UPDATE`
    pub on_duplicate_update: Vec<Assignment>,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: TableReference,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Limit>,
}

/// Column assignment in UPDATE
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: ColumnReference,
    pub value: Expression,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: TableReference,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Limit>,
}

impl Expression {
    /// Whether the expression tree contains a nested SELECT
    pub fn contains_subquery(&self) -> bool {
        match self {
            Expression::Subquery(_) => true,
            Expression::BinaryOp { left, right, .. } => left.contains_subquery() || right.contains_subquery(),
            Expression::UnaryOp { expr, .. } | Expression::IsNull { expr, .. } | Expression::Nested(expr) => {
                expr.contains_subquery()
            }
            Expression::InList { expr, list, .. } => {
                expr.contains_subquery() || list.iter().any(Expression::contains_subquery)
            }
            Expression::Between { expr, low, high, .. } => {
                expr.contains_subquery() || low.contains_subquery() || high.contains_subquery()
            }
            Expression::Function { args, .. } | Expression::Tuple(args) => {
                args.iter().any(Expression::contains_subquery)
            }
            Expression::Literal(_)
            | Expression::CharsetLiteral { .. }
            | Expression::Column(_)
            | Expression::Placeholder(_) => false,
        }
    }

    /// Placeholder occurrences in source order
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        let mut out = Vec::new();
        self.collect_placeholders(&mut out);
        out
    }

    pub(crate) fn collect_placeholders<'a>(&'a self, out: &mut Vec<&'a Placeholder>) {
        match self {
            Expression::Placeholder(p) => out.push(p),
            Expression::BinaryOp { left, right, .. } => {
                left.collect_placeholders(out);
                right.collect_placeholders(out);
            }
            Expression::UnaryOp { expr, .. } | Expression::IsNull { expr, .. } | Expression::Nested(expr) => {
                expr.collect_placeholders(out)
            }
            Expression::InList { expr, list, .. } => {
                expr.collect_placeholders(out);
                list.iter().for_each(|e| e.collect_placeholders(out));
            }
            Expression::Between { expr, low, high, .. } => {
                expr.collect_placeholders(out);
                low.collect_placeholders(out);
                high.collect_placeholders(out);
            }
            Expression::Function { args, .. } | Expression::Tuple(args) => {
                args.iter().for_each(|e| e.collect_placeholders(out));
            }
            Expression::Subquery(select) => {
                if let Some(w) = &select.where_clause {
                    w.collect_placeholders(out);
                }
            }
            Expression::Literal(_) | Expression::CharsetLiteral { .. } | Expression::Column(_) => {}
        }
    }
}

impl TableReference {
    /// Name used for metadata lookup
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(_) => write!(f, "SELECT statement"),
            Statement::Insert(i) if i.replace => write!(f, "REPLACE statement"),
            Statement::Insert(_) => write!(f, "INSERT statement"),
            Statement::Update(_) => write!(f, "UPDATE statement"),
            Statement::Delete(_) => write!(f, "DELETE statement"),
        }
    }
}
