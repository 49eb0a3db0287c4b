// Undo of an INSERT: delete the inserted rows

use super::{apply, check_data, delete_row, Compensation, UndoExecutor};
use crate::driver::Conn;
use crate::error::Result;
use crate::undo::SqlUndoLog;

pub struct InsertUndoExecutor<'a> {
    log: &'a SqlUndoLog,
}

impl<'a> InsertUndoExecutor<'a> {
    pub fn new(log: &'a SqlUndoLog) -> Self {
        InsertUndoExecutor { log }
    }
}

impl UndoExecutor for InsertUndoExecutor<'_> {
    fn compensations(&self) -> Result<Vec<Compensation>> {
        let after = &self.log.after_image;
        after.rows.iter().map(|row| delete_row(after, row)).collect()
    }

    fn execute_on(&self, conn: &mut dyn Conn) -> Result<()> {
        if check_data(conn, self.log)? {
            apply(conn, &self.compensations()?)?;
        }
        Ok(())
    }
}
