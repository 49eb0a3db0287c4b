// MySQL undo log manager

use std::sync::Arc;

use log::debug;

use super::base::BaseUndoLogManager;
use crate::common::{BranchId, DbType, Xid};
use crate::driver::Conn;
use crate::error::Result;
use crate::exec::TransactionContext;
use crate::undo::codec::UndoLogCodec;
use crate::undo::{BranchUndoLog, UndoLogManager};

pub struct MySqlUndoLogManager {
    base: BaseUndoLogManager,
}

impl MySqlUndoLogManager {
    pub fn new(codec: Arc<UndoLogCodec>, table: impl Into<String>) -> Self {
        MySqlUndoLogManager {
            base: BaseUndoLogManager::new(codec, table, "now(6)"),
        }
    }

    pub fn base(&self) -> &BaseUndoLogManager {
        &self.base
    }
}

impl UndoLogManager for MySqlUndoLogManager {
    fn init(&self) -> Result<()> {
        debug!("MySQL undo log manager ready: {}", self.base.insert_sql());
        Ok(())
    }

    fn db_type(&self) -> DbType {
        DbType::MySql
    }

    fn insert_undo_log(&self, logs: &[BranchUndoLog], conn: &mut dyn Conn) -> Result<()> {
        self.base.insert_undo_log(logs, conn)
    }

    fn delete_undo_log(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()> {
        self.base.delete_undo_log(xid, branch_id, conn)
    }

    fn batch_delete_undo_log(&self, xids: &[Xid], branch_ids: &[BranchId], conn: &mut dyn Conn) -> Result<()> {
        self.base.batch_delete_undo_log(xids, branch_ids, conn)
    }

    fn delete_undo_log_by_created(&self, before: &str, limit: usize, conn: &mut dyn Conn) -> Result<u64> {
        self.base.delete_undo_log_by_created(before, limit, conn)
    }

    fn flush_undo_log(&self, tx_ctx: &TransactionContext, conn: &mut dyn Conn) -> Result<()> {
        self.base.flush_undo_log(tx_ctx, conn)
    }

    fn run_undo(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()> {
        self.base.run_undo(xid, branch_id, conn)
    }
}
