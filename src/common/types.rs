use std::fmt;

use serde::{Deserialize, Serialize};

/// Global transaction identifier
pub type Xid = String;

/// Branch transaction identifier assigned by the coordinator
pub type BranchId = i64;

/// Database dialect served by a driver, undo log manager or metadata cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    MySql,
    PostgreSql,
    Oracle,
    Unknown,
}

impl DbType {
    /// Resolve the dialect from a target driver name such as `mysql`
    pub fn from_driver_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => DbType::MySql,
            "postgres" | "postgresql" | "pgx" => DbType::PostgreSql,
            "oracle" | "godror" => DbType::Oracle,
            _ => DbType::Unknown,
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::MySql => write!(f, "mysql"),
            DbType::PostgreSql => write!(f, "postgresql"),
            DbType::Oracle => write!(f, "oracle"),
            DbType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Statement kind as classified by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Select,
    SelectForUpdate,
    Insert,
    Update,
    Delete,
    Replace,
    InsertOnDuplicateUpdate,
    Unknown,
}

impl SqlType {
    /// Whether statements of this kind mutate rows and take part in image capture
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            SqlType::Insert
                | SqlType::Update
                | SqlType::Delete
                | SqlType::Replace
                | SqlType::InsertOnDuplicateUpdate
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Select => "SELECT",
            SqlType::SelectForUpdate => "SELECT_FOR_UPDATE",
            SqlType::Insert => "INSERT",
            SqlType::Update => "UPDATE",
            SqlType::Delete => "DELETE",
            SqlType::Replace => "REPLACE",
            SqlType::InsertOnDuplicateUpdate => "INSERT_ON_DUPLICATE_UPDATE",
            SqlType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Transaction mode of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchType {
    AT,
    TCC,
    Saga,
    XA,
}

/// Branch status reported to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchStatus {
    Unknown,
    Registered,
    PhaseOneDone,
    PhaseOneFailed,
    PhaseTwoCommitted,
    PhaseTwoCommitFailedRetryable,
    PhaseTwoRollbacked,
    PhaseTwoRollbackFailedRetryable,
    PhaseTwoRollbackFailedUnretryable,
}

/// Kind of a table index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    PrimaryKey,
    Unique,
    Normal,
}

/// Which side of a statement a record image was captured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Before,
    After,
}

/// Persisted `log_status` of an undo log row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoLogStatus {
    /// The row can be replayed by a branch rollback
    Normal = 0,
    /// Terminal marker written after the global transaction finished
    GlobalFinished = 1,
}

impl UndoLogStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UndoLogStatus::Normal),
            1 => Some(UndoLogStatus::GlobalFinished),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        *self as i64
    }
}
