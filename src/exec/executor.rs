// Statement executors
//
// An executor runs one intercepted statement. The AT executor wraps the
// statement with before/after image capture and records the undo entry.

use std::sync::Arc;

use log::debug;

use super::context::ExecContext;
use super::hook::SqlHook;
use crate::driver::ExecResult;
use crate::error::Result;
use crate::undo::{SqlUndoLog, UndoLogBuilder};

/// Runs an intercepted statement
pub trait SqlExecutor: Send + Sync {
    fn exec(&self, ctx: &mut ExecContext<'_>) -> Result<ExecResult>;
}

/// Builds an executor for a statement kind from its builder and hooks
pub type ExecutorFactory =
    Arc<dyn Fn(Option<Arc<dyn UndoLogBuilder>>, Vec<Arc<dyn SqlHook>>) -> Box<dyn SqlExecutor> + Send + Sync>;

/// Executor capturing images when it has a builder, plain otherwise
pub struct AtExecutor {
    builder: Option<Arc<dyn UndoLogBuilder>>,
    hooks: Vec<Arc<dyn SqlHook>>,
}

impl AtExecutor {
    pub fn new(builder: Option<Arc<dyn UndoLogBuilder>>, hooks: Vec<Arc<dyn SqlHook>>) -> Self {
        AtExecutor { builder, hooks }
    }

    /// Executor that only runs the statement and its hooks
    pub fn plain(hooks: Vec<Arc<dyn SqlHook>>) -> Self {
        AtExecutor { builder: None, hooks }
    }

    pub fn factory() -> ExecutorFactory {
        Arc::new(|builder, hooks| Box::new(AtExecutor::new(builder, hooks)) as Box<dyn SqlExecutor>)
    }

    fn run(&self, ctx: &mut ExecContext<'_>) -> Result<ExecResult> {
        let builder = match &self.builder {
            Some(builder) => builder,
            None => {
                let result = ctx.conn.exec(ctx.query, ctx.values)?;
                ctx.exec_result = Some(result.clone());
                return Ok(result);
            }
        };

        let before = builder.before_image(ctx)?;
        ctx.before_image = Some(before.clone());

        let result = ctx.conn.exec(ctx.query, ctx.values)?;
        ctx.exec_result = Some(result.clone());

        let after = builder.after_image(ctx, &before)?;
        ctx.after_image = Some(after.clone());

        if ctx.undo_config.data_validation && before.same_rows(&after) {
            debug!("Images of {} on {} are identical, no undo entry", builder.sql_type(), before.table_name);
            return Ok(result);
        }

        let mut lock_parts = Vec::new();
        for image in [&before, &after] {
            if let Some(key) = image.lock_key()? {
                lock_parts.push(key);
            }
        }
        if let Some(key) = merge_lock_keys(&lock_parts) {
            ctx.tx_ctx.lock_keys.push(key);
        }

        ctx.tx_ctx.undo_logs.push(SqlUndoLog {
            sql_type: builder.sql_type(),
            table_name: after.table_name.clone(),
            before_image: before,
            after_image: after,
        });
        Ok(result)
    }
}

impl SqlExecutor for AtExecutor {
    fn exec(&self, ctx: &mut ExecContext<'_>) -> Result<ExecResult> {
        for hook in &self.hooks {
            hook.before(ctx);
        }
        let result = self.run(ctx);
        for hook in &self.hooks {
            hook.after(ctx);
        }
        result
    }
}

/// Merge `table:k1,k2` keys of one table, dropping duplicate row keys
fn merge_lock_keys(keys: &[String]) -> Option<String> {
    let mut table = None;
    let mut rows: Vec<&str> = Vec::new();
    for key in keys {
        let (t, ids) = key.split_once(':')?;
        table.get_or_insert(t);
        for id in ids.split(',') {
            if !rows.contains(&id) {
                rows.push(id);
            }
        }
    }
    table.map(|t| format!("{}:{}", t, rows.join(",")))
}
