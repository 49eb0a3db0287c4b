// Undo of a DELETE: insert the deleted rows back

use super::{apply, check_data, insert_row, Compensation, UndoExecutor};
use crate::driver::Conn;
use crate::error::Result;
use crate::undo::SqlUndoLog;

pub struct DeleteUndoExecutor<'a> {
    log: &'a SqlUndoLog,
}

impl<'a> DeleteUndoExecutor<'a> {
    pub fn new(log: &'a SqlUndoLog) -> Self {
        DeleteUndoExecutor { log }
    }
}

impl UndoExecutor for DeleteUndoExecutor<'_> {
    fn compensations(&self) -> Result<Vec<Compensation>> {
        let before = &self.log.before_image;
        Ok(before.rows.iter().map(|row| insert_row(before, row)).collect())
    }

    fn execute_on(&self, conn: &mut dyn Conn) -> Result<()> {
        if check_data(conn, self.log)? {
            apply(conn, &self.compensations()?)?;
        }
        Ok(())
    }
}
