// Undo Log Module
//
// Record images, their persisted branch log, and the builders, codecs,
// compensating executors and managers working on them.

pub mod builder;
pub mod codec;
pub mod compressor;
pub mod executor;
pub mod manager;
pub mod serializer;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::common::{BranchId, DataValue, DbType, ImageKind, SqlType, Xid};
use crate::driver::{Conn, Rows};
use crate::error::{AtError, Result};
use crate::exec::TransactionContext;

pub use self::builder::UndoLogBuilder;
pub use self::codec::UndoLogCodec;
pub use self::compressor::UndoLogCompressor;
pub use self::manager::MySqlUndoLogManager;

/// One row of an image: column name → value, in select order
pub type RowImage = LinkedHashMap<String, DataValue>;

/// Rows of one table captured before or after a statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordImage {
    pub table_name: String,
    pub image_kind: ImageKind,
    pub sql_type: SqlType,
    /// Columns identifying a row
    pub primary_keys: Vec<String>,
    pub rows: Vec<RowImage>,
}

impl RecordImage {
    pub fn empty(table_name: &str, image_kind: ImageKind, sql_type: SqlType, primary_keys: Vec<String>) -> Self {
        RecordImage {
            table_name: table_name.to_string(),
            image_kind,
            sql_type,
            primary_keys,
            rows: Vec::new(),
        }
    }

    /// Build an image from a query result
    pub fn from_rows(
        table_name: &str,
        image_kind: ImageKind,
        sql_type: SqlType,
        primary_keys: Vec<String>,
        rows: &Rows,
    ) -> Self {
        RecordImage {
            table_name: table_name.to_string(),
            image_kind,
            sql_type,
            primary_keys,
            rows: rows.to_maps(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Primary key values of a row, in key order
    pub fn pk_values(&self, row: &RowImage) -> Result<Vec<DataValue>> {
        self.primary_keys
            .iter()
            .map(|pk| {
                row_value(row, pk).cloned().ok_or_else(|| {
                    AtError::ImageCapture(format!("primary key {} missing from image of {}", pk, self.table_name))
                })
            })
            .collect()
    }

    /// Row whose primary key equals `key`
    pub fn find_by_pk(&self, key: &[DataValue]) -> Option<&RowImage> {
        self.rows.iter().find(|row| {
            self.primary_keys.len() == key.len()
                && self
                    .primary_keys
                    .iter()
                    .zip(key)
                    .all(|(pk, v)| row_value(row, pk).is_some_and(|rv| rv.same_as(v)))
        })
    }

    /// Whether both images hold the same rows, matched by primary key
    pub fn same_rows(&self, other: &RecordImage) -> bool {
        rows_equal(&self.rows, &other.rows, &self.primary_keys)
    }

    /// Lock key `table:pk1,pk2`; composite keys join their parts with `_`
    pub fn lock_key(&self) -> Result<Option<String>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let mut keys = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let parts: Vec<String> = self.pk_values(row)?.iter().map(DataValue::to_string).collect();
            keys.push(parts.join("_"));
        }
        Ok(Some(format!("{}:{}", self.table_name, keys.join(","))))
    }
}

/// Column lookup that tolerates case differences between catalog and result set
pub fn row_value<'a>(row: &'a RowImage, column: &str) -> Option<&'a DataValue> {
    row.get(column)
        .or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(column)).map(|(_, v)| v))
}

/// Compare two row sets by primary key, ignoring row order
pub fn rows_equal(left: &[RowImage], right: &[RowImage], primary_keys: &[String]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().all(|l| {
        right.iter().any(|r| {
            primary_keys
                .iter()
                .all(|pk| matches!((row_value(l, pk), row_value(r, pk)), (Some(a), Some(b)) if a.same_as(b)))
                && row_equal(l, r)
        })
    })
}

/// Column-wise equality over the columns of `left`
pub fn row_equal(left: &RowImage, right: &RowImage) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(col, v)| row_value(right, col).is_some_and(|rv| rv.same_as(v)))
}

/// Undo information of one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlUndoLog {
    pub sql_type: SqlType,
    pub table_name: String,
    pub before_image: RecordImage,
    pub after_image: RecordImage,
}

/// Undo information of one branch, persisted as a single row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchUndoLog {
    pub xid: Xid,
    pub branch_id: BranchId,
    /// Statement logs in execution order
    pub logs: Vec<SqlUndoLog>,
}

/// Persists and replays undo logs for one database dialect
pub trait UndoLogManager: Send + Sync {
    /// Prepare the manager; called once when it is first looked up
    fn init(&self) -> Result<()>;

    fn db_type(&self) -> DbType;

    /// Insert encoded branch logs on the caller's connection and transaction
    fn insert_undo_log(&self, logs: &[BranchUndoLog], conn: &mut dyn Conn) -> Result<()>;

    fn delete_undo_log(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()>;

    fn batch_delete_undo_log(&self, xids: &[Xid], branch_ids: &[BranchId], conn: &mut dyn Conn) -> Result<()>;

    /// Remove rows created at or before `before`, at most `limit` of them
    fn delete_undo_log_by_created(&self, before: &str, limit: usize, conn: &mut dyn Conn) -> Result<u64>;

    /// Persist the logs accumulated by a transaction context
    fn flush_undo_log(&self, tx_ctx: &TransactionContext, conn: &mut dyn Conn) -> Result<()>;

    /// Replay the branch's undo log in reverse order and delete it
    fn run_undo(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()>;
}

/// Encodes branch logs to bytes
pub trait UndoLogParser: Send + Sync {
    /// Name recorded in the undo row's context
    fn name(&self) -> &str;

    fn encode(&self, log: &BranchUndoLog) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<BranchUndoLog>;
}
