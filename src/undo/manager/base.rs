// Undo log manager shared logic
//
// Statement text and the replay procedure are common to every dialect; a
// dialect supplies its current-timestamp expression.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::common::{BranchId, DataValue, NamedValue, UndoLogStatus, Xid};
use crate::driver::Conn;
use crate::error::{AtError, Result};
use crate::exec::TransactionContext;
use crate::undo::codec::UndoLogCodec;
use crate::undo::executor::undo_executor_for;
use crate::undo::BranchUndoLog;

/// Undo log persistence for one undo table
pub struct BaseUndoLogManager {
    codec: Arc<UndoLogCodec>,
    table: String,
    now_fn: &'static str,
}

impl BaseUndoLogManager {
    pub fn new(codec: Arc<UndoLogCodec>, table: impl Into<String>, now_fn: &'static str) -> Self {
        BaseUndoLogManager { codec, table: table.into(), now_fn }
    }

    pub fn codec(&self) -> &UndoLogCodec {
        &self.codec
    }

    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (branch_id, xid, context, rollback_info, log_status, log_created, log_modified) \
             VALUES (?, ?, ?, ?, ?, {now}, {now})",
            self.table,
            now = self.now_fn
        )
    }

    pub fn select_sql(&self) -> String {
        format!(
            "SELECT log_status, context, rollback_info FROM {} WHERE branch_id = ? AND xid = ? FOR UPDATE",
            self.table
        )
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE branch_id = ? AND xid = ?", self.table)
    }

    pub fn batch_delete_sql(&self, branch_count: usize, xid_count: usize) -> String {
        format!(
            "DELETE FROM {} WHERE branch_id IN ({}) AND xid IN ({})",
            self.table,
            vec!["?"; branch_count].join(","),
            vec!["?"; xid_count].join(",")
        )
    }

    pub fn delete_by_created_sql(&self) -> String {
        format!("DELETE FROM {} WHERE log_created <= ? LIMIT ?", self.table)
    }

    pub fn insert_undo_log(&self, logs: &[BranchUndoLog], conn: &mut dyn Conn) -> Result<()> {
        let sql = self.insert_sql();
        for log in logs {
            let (context, payload) = self.codec.encode(log)?;
            let args = [
                NamedValue::new(1, log.branch_id),
                NamedValue::new(2, log.xid.as_str()),
                NamedValue::new(3, context),
                NamedValue::new(4, payload),
                NamedValue::new(5, UndoLogStatus::Normal.code()),
            ];
            conn.exec(&sql, &args)
                .map_err(|e| AtError::Persistence(format!("insert undo log of branch {}: {}", log.branch_id, e)))?;
            debug!("Inserted undo log of xid {} branch {} ({} entries)", log.xid, log.branch_id, log.logs.len());
        }
        Ok(())
    }

    pub fn delete_undo_log(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()> {
        let args = [NamedValue::new(1, branch_id), NamedValue::new(2, xid)];
        conn.exec(&self.delete_sql(), &args)
            .map_err(|e| AtError::Persistence(format!("delete undo log of branch {}: {}", branch_id, e)))?;
        Ok(())
    }

    pub fn batch_delete_undo_log(&self, xids: &[Xid], branch_ids: &[BranchId], conn: &mut dyn Conn) -> Result<()> {
        if xids.is_empty() || branch_ids.is_empty() {
            return Ok(());
        }
        let mut args = Vec::with_capacity(xids.len() + branch_ids.len());
        for branch_id in branch_ids {
            args.push(NamedValue::new(args.len() + 1, *branch_id));
        }
        for xid in xids {
            args.push(NamedValue::new(args.len() + 1, xid.as_str()));
        }
        conn.exec(&self.batch_delete_sql(branch_ids.len(), xids.len()), &args)
            .map_err(|e| AtError::Persistence(format!("batch delete undo logs: {}", e)))?;
        Ok(())
    }

    pub fn delete_undo_log_by_created(&self, before: &str, limit: usize, conn: &mut dyn Conn) -> Result<u64> {
        let args = [NamedValue::new(1, before), NamedValue::new(2, limit as i64)];
        let result = conn
            .exec(&self.delete_by_created_sql(), &args)
            .map_err(|e| AtError::Persistence(format!("delete undo logs created before {}: {}", before, e)))?;
        Ok(result.rows_affected)
    }

    pub fn flush_undo_log(&self, tx_ctx: &TransactionContext, conn: &mut dyn Conn) -> Result<()> {
        if !tx_ctx.has_undo_logs() {
            return Ok(());
        }
        let (xid, branch_id) = match (&tx_ctx.xid, tx_ctx.branch_id) {
            (Some(xid), Some(branch_id)) => (xid.clone(), branch_id),
            _ => {
                return Err(AtError::Persistence(
                    "undo logs captured outside a registered branch".to_string(),
                ));
            }
        };
        let log = BranchUndoLog { xid, branch_id, logs: tx_ctx.undo_logs.clone() };
        self.insert_undo_log(std::slice::from_ref(&log), conn)
    }

    /// Replay inside a local transaction of its own on `conn`
    pub fn run_undo(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()> {
        conn.begin()?;
        match self.undo_in_transaction(xid, branch_id, conn) {
            Ok(()) => {
                conn.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback() {
                    warn!("Rollback after failed undo of branch {} failed: {}", branch_id, rollback_err);
                }
                Err(e)
            }
        }
    }

    fn undo_in_transaction(&self, xid: &str, branch_id: BranchId, conn: &mut dyn Conn) -> Result<()> {
        let args = [NamedValue::new(1, branch_id), NamedValue::new(2, xid)];
        let rows = conn.query(&self.select_sql(), &args)?;
        if rows.is_empty() {
            info!("No undo log for xid {} branch {}, nothing to roll back", xid, branch_id);
            return Ok(());
        }

        for i in 0..rows.row_count() {
            let status = rows.get(i, "log_status").and_then(DataValue::as_i64);
            if status.and_then(UndoLogStatus::from_code) == Some(UndoLogStatus::GlobalFinished) {
                info!("Undo log of xid {} branch {} is global finished, skipping", xid, branch_id);
                return Ok(());
            }

            let context = rows.get(i, "context").and_then(DataValue::as_str).unwrap_or_default();
            let payload = rows
                .get(i, "rollback_info")
                .and_then(DataValue::as_bytes)
                .ok_or_else(|| AtError::Codec(format!("undo log of branch {} has no rollback_info", branch_id)))?;
            let branch_log = self.codec.decode(context, payload)?;

            for log in branch_log.logs.iter().rev() {
                undo_executor_for(log)?.execute_on(conn)?;
            }
        }

        self.delete_undo_log(xid, branch_id, conn)?;
        info!("Rolled back xid {} branch {}", xid, branch_id);
        Ok(())
    }
}
