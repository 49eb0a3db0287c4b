// Database driver boundary
//
// The engine wraps an existing driver instead of talking to a database itself.
// Anything implementing these traits can sit behind the proxy.

use linked_hash_map::LinkedHashMap;
use thiserror::Error;

use crate::common::{DataValue, NamedValue};

/// Errors reported by an underlying driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// Result type for driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Outcome of a mutating statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// First generated key of the statement, when the table has one
    pub last_insert_id: Option<i64>,
}

/// Result set of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    columns: Vec<String>,
    rows: Vec<Vec<DataValue>>,
}

impl Rows {
    /// Create a new empty result set with column names
    pub fn new(columns: Vec<String>) -> Self {
        Rows { columns, rows: Vec::new() }
    }

    /// Add a row; values are in column order
    pub fn add_row(&mut self, values: Vec<DataValue>) {
        self.rows.push(values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<DataValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Value of `column` in row `row`
    pub fn get(&self, row: usize, column: &str) -> Option<&DataValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Rows as ordered column → value maps
    pub fn to_maps(&self) -> Vec<LinkedHashMap<String, DataValue>> {
        self.rows
            .iter()
            .map(|values| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect::<LinkedHashMap<_, _>>()
            })
            .collect()
    }
}

/// An open database connection
pub trait Conn: Send {
    /// Execute a mutating statement
    fn exec(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<ExecResult>;

    /// Run a query returning rows
    fn query(&mut self, query: &str, args: &[NamedValue]) -> DriverResult<Rows>;

    fn begin(&mut self) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;
}

/// A database driver able to open connections
pub trait Driver: Send + Sync {
    /// Registered driver name, e.g. `mysql`
    fn name(&self) -> &str;

    fn open(&self, dsn: &str) -> DriverResult<Box<dyn Conn>>;
}
