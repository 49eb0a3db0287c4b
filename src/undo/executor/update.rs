// Undo of an UPDATE: write the before values back by primary key

use super::{apply, check_data, update_row, Compensation, UndoExecutor};
use crate::driver::Conn;
use crate::error::Result;
use crate::undo::SqlUndoLog;

pub struct UpdateUndoExecutor<'a> {
    log: &'a SqlUndoLog,
}

impl<'a> UpdateUndoExecutor<'a> {
    pub fn new(log: &'a SqlUndoLog) -> Self {
        UpdateUndoExecutor { log }
    }
}

impl UndoExecutor for UpdateUndoExecutor<'_> {
    fn compensations(&self) -> Result<Vec<Compensation>> {
        let before = &self.log.before_image;
        let mut compensations = Vec::with_capacity(before.rows.len());
        for row in &before.rows {
            if let Some(c) = update_row(before, row)? {
                compensations.push(c);
            }
        }
        Ok(compensations)
    }

    fn execute_on(&self, conn: &mut dyn Conn) -> Result<()> {
        if check_data(conn, self.log)? {
            apply(conn, &self.compensations()?)?;
        }
        Ok(())
    }
}
