// Undo of REPLACE INTO / INSERT ... ON DUPLICATE KEY UPDATE
//
// Before and after rows are paired by primary key. A row only in the after
// image was inserted, a row in both was updated, and a row only in the before
// image was removed by a REPLACE conflicting on another unique key.

use log::{info, warn};

use super::{apply, delete_row, insert_row, query_current, update_row, Compensation, UndoExecutor};
use crate::common::DataValue;
use crate::driver::Conn;
use crate::error::{AtError, Result};
use crate::undo::{row_equal, RecordImage, RowImage, SqlUndoLog};

pub struct UpsertUndoExecutor<'a> {
    log: &'a SqlUndoLog,
}

/// What a row needs to go back to its before state
enum RowUndo<'r> {
    Delete(&'r RowImage),
    Restore(&'r RowImage),
    Reinsert(&'r RowImage),
}

impl<'a> UpsertUndoExecutor<'a> {
    pub fn new(log: &'a SqlUndoLog) -> Self {
        UpsertUndoExecutor { log }
    }

    /// Image holding the row identity of the entry
    fn key_image(&self) -> &'a RecordImage {
        if self.log.after_image.is_empty() {
            &self.log.before_image
        } else {
            &self.log.after_image
        }
    }

    /// Primary keys present in either image, before image first
    fn keys(&self) -> Result<Vec<Vec<DataValue>>> {
        let mut keys: Vec<Vec<DataValue>> = Vec::new();
        for image in [&self.log.before_image, &self.log.after_image] {
            for row in &image.rows {
                let key = image.pk_values(row)?;
                let seen = keys
                    .iter()
                    .any(|k| k.len() == key.len() && k.iter().zip(&key).all(|(a, b)| a.same_as(b)));
                if !seen {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Per-row plan; `current` is `None` to assume every row holds its after image
    fn plan(&self, current: Option<&[RowImage]>) -> Result<Vec<RowUndo<'a>>> {
        let before = &self.log.before_image;
        let after = &self.log.after_image;
        let key_image = self.key_image();
        let mut plan = Vec::new();

        for key in self.keys()? {
            let b = before.find_by_pk(&key);
            let a = after.find_by_pk(&key);
            let c = match current {
                Some(rows) => rows.iter().find(|row| {
                    key_image
                        .pk_values(row)
                        .map(|k| k.iter().zip(&key).all(|(x, y)| x.same_as(y)))
                        .unwrap_or(false)
                }),
                None => a,
            };

            let step = match (b, a) {
                (None, Some(a)) => match c {
                    Some(c) if row_equal(a, c) => Some(RowUndo::Delete(a)),
                    None => None,
                    Some(_) => return Err(self.dirty(&key)),
                },
                (Some(b), Some(a)) => {
                    if row_equal(b, a) {
                        None
                    } else {
                        match c {
                            Some(c) if row_equal(a, c) => Some(RowUndo::Restore(b)),
                            Some(c) if row_equal(b, c) => None,
                            _ => return Err(self.dirty(&key)),
                        }
                    }
                }
                (Some(b), None) => match c {
                    None => Some(RowUndo::Reinsert(b)),
                    Some(c) if row_equal(b, c) => None,
                    Some(_) => return Err(self.dirty(&key)),
                },
                (None, None) => None,
            };
            if let Some(step) = step {
                plan.push(step);
            }
        }
        Ok(plan)
    }

    fn dirty(&self, key: &[DataValue]) -> AtError {
        let key: Vec<String> = key.iter().map(DataValue::to_string).collect();
        warn!("Dirty data in {} for key {}", self.log.table_name, key.join("_"));
        AtError::DirtyData {
            table: self.log.table_name.clone(),
            detail: format!("row {} differs from the after image", key.join("_")),
        }
    }

    fn to_compensations(&self, plan: &[RowUndo<'_>]) -> Result<Vec<Compensation>> {
        let key_image = self.key_image();
        let mut compensations = Vec::with_capacity(plan.len());
        // Deletes first so reinserted rows cannot collide on a unique key
        let rank = |step: &RowUndo<'_>| match step {
            RowUndo::Delete(_) => 0,
            RowUndo::Restore(_) => 1,
            RowUndo::Reinsert(_) => 2,
        };
        let mut ordered: Vec<&RowUndo<'_>> = plan.iter().collect();
        ordered.sort_by_key(|step| rank(step));
        for step in ordered {
            match step {
                RowUndo::Delete(row) => compensations.push(delete_row(key_image, row)?),
                RowUndo::Restore(row) => {
                    if let Some(c) = update_row(key_image, row)? {
                        compensations.push(c);
                    }
                }
                RowUndo::Reinsert(row) => compensations.push(insert_row(key_image, row)),
            }
        }
        Ok(compensations)
    }
}

impl UndoExecutor for UpsertUndoExecutor<'_> {
    fn compensations(&self) -> Result<Vec<Compensation>> {
        let plan = self.plan(None)?;
        self.to_compensations(&plan)
    }

    fn execute_on(&self, conn: &mut dyn Conn) -> Result<()> {
        let current = query_current(conn, self.key_image(), &self.keys()?)?;
        let plan = self.plan(Some(&current))?;
        if plan.is_empty() {
            info!("Nothing left to undo for {} on {}", self.log.sql_type, self.log.table_name);
            return Ok(());
        }
        apply(conn, &self.to_compensations(&plan)?)
    }
}
