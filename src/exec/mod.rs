// Statement execution with image capture

pub mod context;
pub mod executor;
pub mod hook;

pub use self::context::{ExecContext, TransactionContext};
pub use self::executor::{AtExecutor, ExecutorFactory, SqlExecutor};
pub use self::hook::SqlHook;
