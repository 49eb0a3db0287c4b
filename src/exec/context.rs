// Execution contexts
//
// `TransactionContext` lives as long as a proxy connection's local
// transaction; `ExecContext` lives for one intercepted statement.

use std::sync::Arc;

use crate::common::{BranchId, DbType, NamedValue, Xid};
use crate::config::UndoConfig;
use crate::datasource::{TableMeta, TableMetaCache};
use crate::driver::{Conn, ExecResult};
use crate::error::{AtError, Result};
use crate::parser::ParsedStatement;
use crate::undo::{RecordImage, SqlUndoLog};

/// In-flight state of a local transaction taking part in a global one
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    pub xid: Option<Xid>,
    pub branch_id: Option<BranchId>,
    pub resource_id: String,
    pub db_type: Option<DbType>,
    /// Undo entries in execution order
    pub undo_logs: Vec<SqlUndoLog>,
    /// One `table:pk,...` entry per captured statement
    pub lock_keys: Vec<String>,
}

impl TransactionContext {
    pub fn new(resource_id: impl Into<String>, db_type: DbType) -> Self {
        TransactionContext {
            resource_id: resource_id.into(),
            db_type: Some(db_type),
            ..Default::default()
        }
    }

    pub fn in_global_transaction(&self) -> bool {
        self.xid.is_some()
    }

    pub fn has_undo_logs(&self) -> bool {
        !self.undo_logs.is_empty()
    }

    /// Lock keys in the coordinator's `a:1,2;b:3` form
    pub fn build_lock_keys(&self) -> String {
        self.lock_keys.join(";")
    }

    /// Forget everything captured by the current local transaction
    pub fn reset(&mut self) {
        self.branch_id = None;
        self.undo_logs.clear();
        self.lock_keys.clear();
    }
}

/// State shared by the executor, builders and hooks for one statement
pub struct ExecContext<'a> {
    pub conn: &'a mut dyn Conn,
    pub query: &'a str,
    pub values: &'a [NamedValue],
    pub parsed: Option<&'a ParsedStatement>,
    pub db_type: DbType,
    /// Database name used for catalog lookups
    pub schema: &'a str,
    pub meta_cache: &'a TableMetaCache,
    pub undo_config: &'a UndoConfig,
    pub tx_ctx: &'a mut TransactionContext,
    pub before_image: Option<RecordImage>,
    pub after_image: Option<RecordImage>,
    pub exec_result: Option<ExecResult>,
}

impl<'a> ExecContext<'a> {
    pub fn parsed(&self) -> Result<&'a ParsedStatement> {
        self.parsed
            .ok_or_else(|| AtError::ImageCapture(format!("statement was not parsed: {}", self.query)))
    }

    /// Metadata of the statement's target table
    pub fn table_meta(&mut self) -> Result<Arc<TableMeta>> {
        let parsed = self.parsed()?;
        let table = parsed.table();
        let schema = table.schema.as_deref().unwrap_or(self.schema);
        self.meta_cache
            .get_table_meta(&mut *self.conn, schema, table.name())
            .map_err(|e| match e {
                AtError::NotFound(_) | AtError::Schema(_) => e,
                other => AtError::Schema(other.to_string()),
            })
    }
}
