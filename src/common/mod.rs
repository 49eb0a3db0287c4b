// Shared identifiers, enums and typed values

pub mod types;
pub mod value;

pub use self::types::{BranchId, BranchStatus, BranchType, DbType, ImageKind, IndexType, SqlType, UndoLogStatus, Xid};
pub use self::value::{named_to_values, values_to_named, DataValue, NamedValue};
