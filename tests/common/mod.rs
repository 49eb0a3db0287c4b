#![allow(dead_code)]

// Test utilities: an in-memory database reachable through the driver traits,
// a recording coordinator and a fully wired proxy.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use atundo::common::{BranchId, BranchStatus, BranchType, DataValue, NamedValue, Xid};
use atundo::driver::{Conn, Driver, DriverError, DriverResult, ExecResult, Rows};
use atundo::error::{AtError, Result as AtResult};
use atundo::parser::ast::{
    ColumnReference, DeleteStatement, Expression, InsertStatement, Limit, Operator, OrderByItem, SelectColumn, SelectStatement,
    UnaryOperator, UpdateStatement, Value,
};
use atundo::parser::{resolve_placeholder, Parser, Statement};
use atundo::registry::AtRegistry;
use atundo::undo::RowImage;
use atundo::{AtConfig, DataSourceManager, ProxyDriver, ResourceManagerOutbound};

pub const DSN: &str = "root:secret@tcp(127.0.0.1:3306)/test_db?charset=utf8mb4&parseTime=True";
pub const RESOURCE_ID: &str = "root:secret@tcp(127.0.0.1:3306)/test_db";
pub const SCHEMA: &str = "test_db";

fn exec_err(msg: impl Into<String>) -> DriverError {
    DriverError::Execution(msg.into())
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub auto_increment: bool,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub unique: Vec<(String, Vec<String>)>,
    pub rows: Vec<Vec<DataValue>>,
    next_id: i64,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Table {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            rows: Vec::new(),
            next_id: 1,
        }
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), data_type: data_type.to_string(), auto_increment: false });
        self
    }

    pub fn auto_increment_column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), data_type: data_type.to_string(), auto_increment: true });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn unique_key(mut self, name: &str, columns: &[&str]) -> Self {
        self.unique.push((name.to_string(), columns.iter().map(|c| c.to_string()).collect()));
        self
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn require_index(&self, column: &str) -> DriverResult<usize> {
        self.index_of(column)
            .ok_or_else(|| exec_err(format!("Unknown column '{}' in '{}'", column, self.name)))
    }

    /// Column positions of the primary key and every unique key
    fn key_sets(&self) -> Vec<Vec<usize>> {
        let mut sets = Vec::new();
        let mut add = |cols: &[String]| {
            let idx: Vec<usize> = cols.iter().filter_map(|c| self.index_of(c)).collect();
            if !idx.is_empty() {
                sets.push(idx);
            }
        };
        add(&self.primary_key);
        for (_, cols) in &self.unique {
            add(cols);
        }
        sets
    }

    /// Existing rows sharing a key with `row`
    fn conflicts(&self, row: &[DataValue], skip: Option<usize>) -> Vec<usize> {
        let sets = self.key_sets();
        let mut found = Vec::new();
        for (i, existing) in self.rows.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            let clash = sets.iter().any(|set| {
                set.iter()
                    .all(|&c| !row[c].is_null() && values_equal(&row[c], &existing[c]))
            });
            if clash {
                found.push(i);
            }
        }
        found
    }

    fn bump_auto_increment(&mut self, row: &mut [DataValue]) -> Option<i64> {
        let ai = self.columns.iter().position(|c| c.auto_increment)?;
        if row[ai].is_null() {
            let id = self.next_id;
            self.next_id += 1;
            row[ai] = DataValue::Integer(id);
            return Some(id);
        }
        if let Some(v) = row[ai].as_i64() {
            self.next_id = self.next_id.max(v + 1);
        }
        None
    }
}

pub fn user_table() -> Table {
    Table::new("t_user")
        .auto_increment_column("id", "int")
        .column("name", "varchar")
        .column("age", "int")
        .primary_key(&["id"])
}

pub fn undo_log_table(name: &str) -> Table {
    Table::new(name)
        .auto_increment_column("id", "bigint")
        .column("branch_id", "bigint")
        .column("xid", "varchar")
        .column("context", "varchar")
        .column("rollback_info", "longblob")
        .column("log_status", "int")
        .column("log_created", "datetime")
        .column("log_modified", "datetime")
        .primary_key(&["id"])
        .unique_key("ux_undo_log", &["xid", "branch_id"])
}

// ---------------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------------

struct Env<'a> {
    table: &'a Table,
    row: Option<&'a [DataValue]>,
    /// Row being inserted, for `VALUES(col)`
    inserted: Option<&'a [DataValue]>,
    args: &'a [NamedValue],
    now: &'a str,
}

fn number(v: &DataValue) -> Option<f64> {
    match v {
        DataValue::Integer(i) => Some(*i as f64),
        DataValue::Float(f) => Some(*f),
        DataValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        DataValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &DataValue) -> Option<&str> {
    match v {
        DataValue::Text(s) | DataValue::Date(s) | DataValue::Timestamp(s) => Some(s),
        DataValue::Blob(b) => std::str::from_utf8(b).ok(),
        _ => None,
    }
}

fn compare(a: &DataValue, b: &DataValue) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (DataValue::Integer(x), DataValue::Integer(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    if let (DataValue::Blob(x), DataValue::Blob(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    let numeric = !matches!((a, b), (DataValue::Text(_), DataValue::Text(_)));
    if numeric {
        if let (Some(x), Some(y)) = (number(a), number(b)) {
            return x.partial_cmp(&y);
        }
    }
    match (as_text(a), as_text(b)) {
        (Some(x), Some(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &DataValue, b: &DataValue) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

fn truthy(v: &DataValue) -> bool {
    match v {
        DataValue::Boolean(b) => *b,
        DataValue::Null => false,
        other => number(other).is_some_and(|n| n != 0.0),
    }
}

fn like(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|i| like(&value[i..], rest)),
        Some(('_', rest)) => !value.is_empty() && like(&value[1..], rest),
        Some((c, rest)) => value
            .split_first()
            .is_some_and(|(v, tail)| v.eq_ignore_ascii_case(c) && like(tail, rest)),
    }
}

fn arithmetic(l: &DataValue, op: Operator, r: &DataValue) -> DriverResult<DataValue> {
    if l.is_null() || r.is_null() {
        return Ok(DataValue::Null);
    }
    if let (DataValue::Integer(a), DataValue::Integer(b)) = (l, r) {
        let v = match op {
            Operator::Plus => a.checked_add(*b),
            Operator::Minus => a.checked_sub(*b),
            Operator::Multiply => a.checked_mul(*b),
            Operator::Modulo => a.checked_rem(*b),
            _ => None,
        };
        if let Some(v) = v {
            return Ok(DataValue::Integer(v));
        }
    }
    let (a, b) = match (number(l), number(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(exec_err(format!("cannot apply {:?} to {} and {}", op, l, r))),
    };
    Ok(match op {
        Operator::Plus => DataValue::Float(a + b),
        Operator::Minus => DataValue::Float(a - b),
        Operator::Multiply => DataValue::Float(a * b),
        Operator::Divide if b == 0.0 => DataValue::Null,
        Operator::Divide => DataValue::Float(a / b),
        Operator::Modulo => DataValue::Float(a % b),
        _ => return Err(exec_err(format!("not an arithmetic operator: {:?}", op))),
    })
}

fn column_value(name: &str, env: &Env<'_>) -> DriverResult<DataValue> {
    if let Some(idx) = env.table.index_of(name) {
        return match env.row {
            Some(row) => Ok(row[idx].clone()),
            None => Err(exec_err(format!("column '{}' used without a row", name))),
        };
    }
    // Charset-introduced literal written without quotes, e.g. `_UTF8MB4Jack`
    if name.len() >= 8 && name[..8].eq_ignore_ascii_case("_UTF8MB4") {
        return Ok(DataValue::Text(name[8..].to_string()));
    }
    Err(exec_err(format!("Unknown column '{}' in '{}'", name, env.table.name)))
}

fn eval_tuple(expr: &Expression, env: &Env<'_>) -> DriverResult<Vec<DataValue>> {
    match expr {
        Expression::Tuple(items) => items.iter().map(|e| eval(e, env)).collect(),
        Expression::Nested(inner) => eval_tuple(inner, env),
        other => Ok(vec![eval(other, env)?]),
    }
}

fn eval(expr: &Expression, env: &Env<'_>) -> DriverResult<DataValue> {
    match expr {
        Expression::Literal(v) => Ok(match v {
            Value::Null => DataValue::Null,
            Value::Integer(i) => DataValue::Integer(*i),
            Value::Float(f) => DataValue::Float(*f),
            Value::String(s) => DataValue::Text(s.clone()),
            Value::Boolean(b) => DataValue::Boolean(*b),
        }),
        Expression::CharsetLiteral { text, .. } => Ok(DataValue::Text(text.clone())),
        Expression::Column(c) => column_value(&c.name, env),
        Expression::Placeholder(p) => resolve_placeholder(p, env.args)
            .cloned()
            .ok_or_else(|| exec_err(format!("no argument bound to placeholder {}", p.index))),
        Expression::Nested(inner) => eval(inner, env),
        Expression::UnaryOp { op, expr } => {
            let v = eval(expr, env)?;
            match op {
                UnaryOperator::Not => Ok(DataValue::Boolean(!truthy(&v))),
                UnaryOperator::Minus => match v {
                    DataValue::Integer(i) => Ok(DataValue::Integer(-i)),
                    DataValue::Float(f) => Ok(DataValue::Float(-f)),
                    DataValue::Null => Ok(DataValue::Null),
                    other => Err(exec_err(format!("cannot negate {}", other))),
                },
            }
        }
        Expression::BinaryOp { left, op, right } => {
            let l = eval(left, env)?;
            match op {
                Operator::And => return Ok(DataValue::Boolean(truthy(&l) && truthy(&eval(right, env)?))),
                Operator::Or => return Ok(DataValue::Boolean(truthy(&l) || truthy(&eval(right, env)?))),
                _ => {}
            }
            let r = eval(right, env)?;
            let ordering = compare(&l, &r);
            let result = match op {
                Operator::Equals => ordering.map(|o| o == Ordering::Equal),
                Operator::NotEquals => ordering.map(|o| o != Ordering::Equal),
                Operator::LessThan => ordering.map(|o| o == Ordering::Less),
                Operator::GreaterThan => ordering.map(|o| o == Ordering::Greater),
                Operator::LessEquals => ordering.map(|o| o != Ordering::Greater),
                Operator::GreaterEquals => ordering.map(|o| o != Ordering::Less),
                Operator::Like | Operator::NotLike => match (as_text(&l), as_text(&r)) {
                    (Some(value), Some(pattern)) => {
                        let value: Vec<char> = value.chars().collect();
                        let pattern: Vec<char> = pattern.chars().collect();
                        Some(like(&value, &pattern) == (*op == Operator::Like))
                    }
                    _ => None,
                },
                _ => return arithmetic(&l, *op, &r),
            };
            Ok(result.map(DataValue::Boolean).unwrap_or(DataValue::Null))
        }
        Expression::InList { expr, list, negated } => {
            let left = eval_tuple(expr, env)?;
            let mut found = false;
            for item in list {
                let right = eval_tuple(item, env)?;
                if left.len() == right.len() && left.iter().zip(&right).all(|(a, b)| values_equal(a, b)) {
                    found = true;
                    break;
                }
            }
            Ok(DataValue::Boolean(found != *negated))
        }
        Expression::Between { expr, low, high, negated } => {
            let v = eval(expr, env)?;
            let lo = eval(low, env)?;
            let hi = eval(high, env)?;
            let inside = matches!(compare(&v, &lo), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(&v, &hi), Some(Ordering::Less | Ordering::Equal));
            Ok(DataValue::Boolean(inside != *negated))
        }
        Expression::IsNull { expr, negated } => Ok(DataValue::Boolean(eval(expr, env)?.is_null() != *negated)),
        Expression::Function { name, args } => match name.to_ascii_uppercase().as_str() {
            "NOW" | "CURRENT_TIMESTAMP" => Ok(DataValue::Timestamp(env.now.to_string())),
            "VALUES" | "VALUE" => {
                let column = match args.first() {
                    Some(Expression::Column(c)) => &c.name,
                    _ => return Err(exec_err("VALUES() expects a column")),
                };
                let idx = env.table.require_index(column)?;
                env.inserted
                    .map(|row| row[idx].clone())
                    .ok_or_else(|| exec_err("VALUES() outside ON DUPLICATE KEY UPDATE"))
            }
            "IFNULL" | "COALESCE" => {
                for arg in args {
                    let v = eval(arg, env)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(DataValue::Null)
            }
            other => Err(exec_err(format!("unsupported function {}", other))),
        },
        Expression::Tuple(_) => Err(exec_err("row value used outside IN")),
        Expression::Subquery(_) => Err(exec_err("subqueries are not supported by the test database")),
    }
}

/// Positions of the rows matching a filter, ordered and limited
fn select_indices(
    table: &Table,
    where_clause: Option<&Expression>,
    order_by: &[OrderByItem],
    limit: Option<&Limit>,
    args: &[NamedValue],
    now: &str,
) -> DriverResult<Vec<usize>> {
    let mut matched = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let env = Env { table, row: Some(row), inserted: None, args, now };
        if let Some(cond) = where_clause {
            if !truthy(&eval(cond, &env)?) {
                continue;
            }
        }
        let mut keys = Vec::with_capacity(order_by.len());
        for item in order_by {
            keys.push(eval(&item.expr, &env)?);
        }
        matched.push((i, keys));
    }

    if !order_by.is_empty() {
        matched.sort_by(|(_, a), (_, b)| {
            for (idx, item) in order_by.iter().enumerate() {
                let mut ord = compare(&a[idx], &b[idx]).unwrap_or(Ordering::Equal);
                if item.descending == Some(true) {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let mut indices: Vec<usize> = matched.into_iter().map(|(i, _)| i).collect();
    if let Some(limit) = limit {
        let env = Env { table, row: None, inserted: None, args, now };
        let count = eval(&limit.count, &env)?.as_i64().unwrap_or(0).max(0) as usize;
        let offset = match &limit.offset {
            Some(offset) => eval(offset, &env)?.as_i64().unwrap_or(0).max(0) as usize,
            None => 0,
        };
        indices = indices.into_iter().skip(offset).take(count).collect();
    }
    Ok(indices)
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Statement as received by the database
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub args: Vec<DataValue>,
}

pub struct MemDb {
    schema: String,
    tables: Mutex<HashMap<String, Table>>,
    executed: Mutex<Vec<Executed>>,
    catalog_queries: AtomicUsize,
    catalog_delay: Mutex<Duration>,
    failures: Mutex<Vec<String>>,
    now: Mutex<String>,
}

impl MemDb {
    pub fn new(schema: &str) -> Arc<Self> {
        Arc::new(MemDb {
            schema: schema.to_string(),
            tables: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            catalog_queries: AtomicUsize::new(0),
            catalog_delay: Mutex::new(Duration::ZERO),
            failures: Mutex::new(Vec::new()),
            now: Mutex::new("2024-01-01 00:00:00.000000".to_string()),
        })
    }

    pub fn create_table(&self, table: Table) {
        self.tables.lock().insert(table.name.to_ascii_lowercase(), table);
    }

    /// Insert rows directly, bypassing statement handling and the log
    pub fn seed(&self, table: &str, rows: Vec<Vec<DataValue>>) {
        let mut tables = self.tables.lock();
        let t = tables.get_mut(&table.to_ascii_lowercase()).expect("seeded table exists");
        for mut row in rows {
            t.bump_auto_increment(&mut row);
            t.rows.push(row);
        }
    }

    /// Overwrite rows matching `id` directly, simulating a writer outside the transaction
    pub fn tamper(&self, table: &str, id: i64, column: &str, value: DataValue) {
        let mut tables = self.tables.lock();
        let t = tables.get_mut(&table.to_ascii_lowercase()).expect("tampered table exists");
        let id_idx = t.index_of("id").expect("table has an id column");
        let col_idx = t.index_of(column).expect("tampered column exists");
        for row in t.rows.iter_mut() {
            if row[id_idx] == DataValue::Integer(id) {
                row[col_idx] = value.clone();
            }
        }
    }

    pub fn rows(&self, table: &str) -> Vec<RowImage> {
        let tables = self.tables.lock();
        let t = match tables.get(&table.to_ascii_lowercase()) {
            Some(t) => t,
            None => return Vec::new(),
        };
        t.rows
            .iter()
            .map(|row| t.columns.iter().map(|c| c.name.clone()).zip(row.iter().cloned()).collect())
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .get(&table.to_ascii_lowercase())
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed.lock().iter().map(|e| e.sql.clone()).collect()
    }

    pub fn clear_statements(&self) {
        self.executed.lock().clear();
    }

    pub fn catalog_queries(&self) -> usize {
        self.catalog_queries.load(AtomicOrdering::SeqCst)
    }

    pub fn set_catalog_delay(&self, delay: Duration) {
        *self.catalog_delay.lock() = delay;
    }

    /// Fail every statement containing `pattern`; `COMMIT` matches commits
    pub fn fail_on(&self, pattern: &str) {
        self.failures.lock().push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn set_now(&self, now: &str) {
        *self.now.lock() = now.to_string();
    }

    fn record(&self, sql: &str, args: &[NamedValue]) {
        self.executed.lock().push(Executed {
            sql: sql.to_string(),
            args: args.iter().map(|a| a.value.clone()).collect(),
        });
    }

    fn check_failure(&self, sql: &str) -> DriverResult<()> {
        if self.failures.lock().iter().any(|p| sql.contains(p.as_str())) {
            return Err(exec_err(format!("injected failure: {}", sql)));
        }
        Ok(())
    }

    fn parse(sql: &str) -> DriverResult<Statement> {
        Parser::new(sql)
            .parse_statement()
            .map_err(|e| exec_err(format!("You have an error in your SQL syntax: {}", e)))
    }

    fn execute(&self, sql: &str, args: &[NamedValue]) -> DriverResult<ExecResult> {
        let now = self.now.lock().clone();
        match Self::parse(sql)? {
            Statement::Insert(stmt) => self.insert(&stmt, args, &now),
            Statement::Update(stmt) => self.update(&stmt, args, &now),
            Statement::Delete(stmt) => self.delete(&stmt, args, &now),
            Statement::Select(stmt) => {
                self.select(&stmt, args, &now)?;
                Ok(ExecResult::default())
            }
        }
    }

    fn query(&self, sql: &str, args: &[NamedValue]) -> DriverResult<Rows> {
        let now = self.now.lock().clone();
        match Self::parse(sql)? {
            Statement::Select(stmt) => self.select(&stmt, args, &now),
            other => Err(exec_err(format!("{} does not return rows", other))),
        }
    }

    fn with_table<T>(&self, name: &str, f: impl FnOnce(&mut Table) -> DriverResult<T>) -> DriverResult<T> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| exec_err(format!("Table '{}.{}' doesn't exist", self.schema, name)))?;
        f(table)
    }

    fn select(&self, stmt: &SelectStatement, args: &[NamedValue], now: &str) -> DriverResult<Rows> {
        if stmt.table.schema.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("INFORMATION_SCHEMA")) {
            let catalog = self.catalog_table(&stmt.table.name)?;
            return project(&catalog, stmt, args, now);
        }
        self.with_table(&stmt.table.name, |table| project(table, stmt, args, now))
    }

    fn catalog_table(&self, view: &str) -> DriverResult<Table> {
        self.catalog_queries.fetch_add(1, AtomicOrdering::SeqCst);
        let delay = *self.catalog_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let tables = self.tables.lock();
        let text = |v: &str| DataValue::Text(v.to_string());
        match view.to_ascii_uppercase().as_str() {
            "COLUMNS" => {
                let mut catalog = Table::new("COLUMNS");
                for c in [
                    "TABLE_CATALOG", "TABLE_SCHEMA", "TABLE_NAME", "COLUMN_NAME", "ORDINAL_POSITION", "DATA_TYPE",
                    "COLUMN_TYPE", "COLUMN_KEY", "IS_NULLABLE", "COLUMN_DEFAULT", "EXTRA",
                ] {
                    catalog = catalog.column(c, "varchar");
                }
                for t in tables.values() {
                    for (i, c) in t.columns.iter().enumerate() {
                        let in_pk = t.primary_key.iter().any(|k| k.eq_ignore_ascii_case(&c.name));
                        let key = if in_pk {
                            "PRI"
                        } else if t.unique.iter().any(|(_, cols)| cols[0].eq_ignore_ascii_case(&c.name)) {
                            "UNI"
                        } else {
                            ""
                        };
                        catalog.rows.push(vec![
                            text("def"),
                            text(&self.schema),
                            text(&t.name),
                            text(&c.name),
                            DataValue::Integer(i as i64 + 1),
                            text(&c.data_type),
                            text(&c.data_type),
                            text(key),
                            text(if in_pk { "NO" } else { "YES" }),
                            DataValue::Null,
                            text(if c.auto_increment { "auto_increment" } else { "" }),
                        ]);
                    }
                }
                Ok(catalog)
            }
            "STATISTICS" => {
                let mut catalog = Table::new("STATISTICS");
                for c in [
                    "TABLE_SCHEMA", "TABLE_NAME", "INDEX_NAME", "SEQ_IN_INDEX", "COLUMN_NAME", "NON_UNIQUE",
                    "INDEX_TYPE", "COLLATION", "CARDINALITY",
                ] {
                    catalog = catalog.column(c, "varchar");
                }
                for t in tables.values() {
                    let mut indexes = Vec::new();
                    if !t.primary_key.is_empty() {
                        indexes.push(("PRIMARY".to_string(), t.primary_key.clone()));
                    }
                    indexes.extend(t.unique.iter().cloned());
                    for (name, cols) in indexes {
                        for (seq, col) in cols.iter().enumerate() {
                            catalog.rows.push(vec![
                                text(&self.schema),
                                text(&t.name),
                                text(&name),
                                DataValue::Integer(seq as i64 + 1),
                                text(col),
                                DataValue::Integer(0),
                                text("BTREE"),
                                text("A"),
                                DataValue::Integer(t.rows.len() as i64),
                            ]);
                        }
                    }
                }
                Ok(catalog)
            }
            other => Err(exec_err(format!("Unknown catalog view INFORMATION_SCHEMA.{}", other))),
        }
    }

    fn insert(&self, stmt: &InsertStatement, args: &[NamedValue], now: &str) -> DriverResult<ExecResult> {
        self.with_table(&stmt.table.name, |table| {
            let positions: Vec<usize> = if stmt.columns.is_empty() {
                (0..table.columns.len()).collect()
            } else {
                stmt.columns
                    .iter()
                    .map(|c| table.require_index(c))
                    .collect::<DriverResult<_>>()?
            };

            let mut result = ExecResult::default();
            for values in &stmt.rows {
                if values.len() != positions.len() {
                    return Err(exec_err("Column count doesn't match value count"));
                }
                let mut row = vec![DataValue::Null; table.columns.len()];
                {
                    let env = Env { table, row: None, inserted: None, args, now };
                    for (pos, expr) in positions.iter().zip(values) {
                        row[*pos] = eval(expr, &env)?;
                    }
                }
                if let Some(id) = table.bump_auto_increment(&mut row) {
                    result.last_insert_id.get_or_insert(id);
                }

                let conflicts = table.conflicts(&row, None);
                if conflicts.is_empty() {
                    table.rows.push(row);
                    result.rows_affected += 1;
                } else if stmt.replace {
                    for idx in conflicts.iter().rev() {
                        table.rows.remove(*idx);
                    }
                    result.rows_affected += conflicts.len() as u64 + 1;
                    table.rows.push(row);
                } else if !stmt.on_duplicate_update.is_empty() {
                    let target = conflicts[0];
                    let existing = table.rows[target].clone();
                    let mut updated = existing.clone();
                    {
                        let env = Env { table, row: Some(&existing), inserted: Some(&row), args, now };
                        for assignment in &stmt.on_duplicate_update {
                            let idx = table.require_index(&assignment.column.name)?;
                            updated[idx] = eval(&assignment.value, &env)?;
                        }
                    }
                    if updated != existing {
                        table.rows[target] = updated;
                        result.rows_affected += 2;
                    }
                } else {
                    return Err(exec_err(format!("Duplicate entry for key of '{}'", table.name)));
                }
            }
            Ok(result)
        })
    }

    fn update(&self, stmt: &UpdateStatement, args: &[NamedValue], now: &str) -> DriverResult<ExecResult> {
        self.with_table(&stmt.table.name, |table| {
            let indices = select_indices(
                table,
                stmt.where_clause.as_ref(),
                &stmt.order_by,
                stmt.limit.as_ref(),
                args,
                now,
            )?;
            let mut changed = 0;
            for i in indices {
                let original = table.rows[i].clone();
                let mut updated = original.clone();
                {
                    let env = Env { table, row: Some(&original), inserted: None, args, now };
                    for assignment in &stmt.assignments {
                        let idx = table.require_index(&assignment.column.name)?;
                        updated[idx] = eval(&assignment.value, &env)?;
                    }
                }
                if updated != original {
                    if !table.conflicts(&updated, Some(i)).is_empty() {
                        return Err(exec_err(format!("Duplicate entry for key of '{}'", table.name)));
                    }
                    table.rows[i] = updated;
                    changed += 1;
                }
            }
            Ok(ExecResult { rows_affected: changed, last_insert_id: None })
        })
    }

    fn delete(&self, stmt: &DeleteStatement, args: &[NamedValue], now: &str) -> DriverResult<ExecResult> {
        self.with_table(&stmt.table.name, |table| {
            let mut indices = select_indices(
                table,
                stmt.where_clause.as_ref(),
                &stmt.order_by,
                stmt.limit.as_ref(),
                args,
                now,
            )?;
            indices.sort_unstable();
            for idx in indices.iter().rev() {
                table.rows.remove(*idx);
            }
            Ok(ExecResult { rows_affected: indices.len() as u64, last_insert_id: None })
        })
    }
}

fn project(table: &Table, stmt: &SelectStatement, args: &[NamedValue], now: &str) -> DriverResult<Rows> {
    let mut outputs: Vec<(String, Expression)> = Vec::new();
    for (i, column) in stmt.columns.iter().enumerate() {
        match column {
            SelectColumn::Wildcard => {
                for c in &table.columns {
                    outputs.push((
                        c.name.clone(),
                        Expression::Column(ColumnReference { table: None, name: c.name.clone() }),
                    ));
                }
            }
            SelectColumn::Expression { expr, alias } => {
                let name = match (alias, expr) {
                    (Some(alias), _) => alias.clone(),
                    (None, Expression::Column(c)) => c.name.clone(),
                    (None, _) => format!("expr{}", i),
                };
                outputs.push((name, expr.clone()));
            }
        }
    }

    let indices = select_indices(table, stmt.where_clause.as_ref(), &stmt.order_by, stmt.limit.as_ref(), args, now)?;
    let mut rows = Rows::new(outputs.iter().map(|(name, _)| name.clone()).collect());
    for i in indices {
        let env = Env { table, row: Some(&table.rows[i]), inserted: None, args, now };
        let mut values = Vec::with_capacity(outputs.len());
        for (_, expr) in &outputs {
            values.push(eval(expr, &env)?);
        }
        rows.add_row(values);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct MemConn {
    db: Arc<MemDb>,
    snapshot: Option<HashMap<String, Table>>,
}

impl MemConn {
    pub fn new(db: Arc<MemDb>) -> Self {
        MemConn { db, snapshot: None }
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

impl Conn for MemConn {
    fn exec(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<ExecResult> {
        self.db.record(query, args);
        self.db.check_failure(query)?;
        self.db.execute(query, args)
    }

    fn query(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<Rows> {
        self.db.record(query, args);
        self.db.check_failure(query)?;
        self.db.query(query, args)
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.db.record("BEGIN", &[]);
        self.snapshot = Some(self.db.tables.lock().clone());
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.db.record("COMMIT", &[]);
        self.db
            .check_failure("COMMIT")
            .map_err(|e| DriverError::Transaction(e.to_string()))?;
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.db.record("ROLLBACK", &[]);
        if let Some(snapshot) = self.snapshot.take() {
            *self.db.tables.lock() = snapshot;
        }
        Ok(())
    }
}

pub struct MemDriver {
    name: String,
    db: Arc<MemDb>,
}

impl MemDriver {
    pub fn new(name: &str, db: Arc<MemDb>) -> Self {
        MemDriver { name: name.to_string(), db }
    }

    pub fn mysql(db: Arc<MemDb>) -> Self {
        MemDriver::new("mysql", db)
    }
}

impl Driver for MemDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, _dsn: &str) -> DriverResult<Box<dyn Conn>> {
        Ok(Box::new(MemConn::new(Arc::clone(&self.db))))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub resource_id: String,
    pub xid: Xid,
    pub lock_keys: String,
    pub branch_id: BranchId,
}

/// Records what the engine reports to the coordinator
pub struct MockCoordinator {
    next_branch_id: AtomicI64,
    fail_register: AtomicBool,
    pub registrations: Mutex<Vec<Registration>>,
    pub reports: Mutex<Vec<(Xid, BranchId, BranchStatus)>>,
    pub lock_queries: Mutex<Vec<String>>,
}

impl MockCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(MockCoordinator {
            next_branch_id: AtomicI64::new(1000),
            fail_register: AtomicBool::new(false),
            registrations: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            lock_queries: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_registration(&self, fail: bool) {
        self.fail_register.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().clone()
    }

    pub fn reports(&self) -> Vec<(Xid, BranchId, BranchStatus)> {
        self.reports.lock().clone()
    }
}

impl ResourceManagerOutbound for MockCoordinator {
    fn branch_register(
        &self,
        _branch_type: BranchType,
        resource_id: &str,
        _client_id: &str,
        xid: &str,
        _application_data: &str,
        lock_keys: &str,
    ) -> AtResult<BranchId> {
        if self.fail_register.load(AtomicOrdering::SeqCst) {
            return Err(AtError::Resource("coordinator unavailable".to_string()));
        }
        let branch_id = self.next_branch_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.registrations.lock().push(Registration {
            resource_id: resource_id.to_string(),
            xid: xid.to_string(),
            lock_keys: lock_keys.to_string(),
            branch_id,
        });
        Ok(branch_id)
    }

    fn branch_report(
        &self,
        _branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        status: BranchStatus,
        _application_data: &str,
    ) -> AtResult<()> {
        self.reports.lock().push((xid.to_string(), branch_id, status));
        Ok(())
    }

    fn lock_query(&self, _branch_type: BranchType, _resource_id: &str, _xid: &str, lock_keys: &str) -> AtResult<bool> {
        self.lock_queries.lock().push(lock_keys.to_string());
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub db: Arc<MemDb>,
    pub registry: Arc<AtRegistry>,
    pub coordinator: Arc<MockCoordinator>,
    pub rm: Arc<DataSourceManager>,
    pub driver: ProxyDriver,
}

impl Harness {
    pub fn new() -> Self {
        Harness::build(AtConfig::default(), |_| {})
    }

    pub fn with_config(config: AtConfig) -> Self {
        Harness::build(config, |_| {})
    }

    /// Harness whose registry is adjusted by `customize` before use
    pub fn build(config: AtConfig, customize: impl FnOnce(&mut AtRegistry)) -> Self {
        let db = MemDb::new(SCHEMA);
        db.create_table(user_table());
        db.create_table(undo_log_table(&config.undo.log_table));

        let mut registry = AtRegistry::new(&config).expect("valid test configuration");
        customize(&mut registry);
        let registry = Arc::new(registry);

        let coordinator = MockCoordinator::new();
        let rm = Arc::new(DataSourceManager::new(Arc::clone(&registry), coordinator.clone()));
        let driver = ProxyDriver::new(Arc::new(MemDriver::mysql(Arc::clone(&db))), Arc::clone(&registry), Arc::clone(&rm));

        Harness { db, registry, coordinator, rm, driver }
    }

    /// Plain connection to the database, outside the proxy
    pub fn raw_conn(&self) -> MemConn {
        MemConn::new(Arc::clone(&self.db))
    }
}

pub fn int(v: i64) -> DataValue {
    DataValue::Integer(v)
}

pub fn text(v: &str) -> DataValue {
    DataValue::Text(v.to_string())
}

/// Ordinal arguments 1..n
pub fn args(values: Vec<DataValue>) -> Vec<NamedValue> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| NamedValue::new(i + 1, v))
        .collect()
}

/// `(id, name, age)` rows of t_user in table order
pub fn users(db: &MemDb) -> Vec<(i64, String, i64)> {
    db.rows("t_user")
        .iter()
        .map(|r| {
            (
                r["id"].as_i64().unwrap_or_default(),
                r["name"].as_str().unwrap_or_default().to_string(),
                r["age"].as_i64().unwrap_or_default(),
            )
        })
        .collect()
}
