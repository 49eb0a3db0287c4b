// atundo: AT-mode SQL interception and undo logging
//
// Statements issued through a proxy connection inside a global transaction
// have their before and after row images captured and persisted as an undo
// log in the same local transaction. A branch rollback replays that log.

pub mod common;
pub mod config;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod exec;
pub mod parser;
pub mod proxy;
pub mod registry;
pub mod rm;
pub mod undo;

// Re-export key items for convenient access
pub use config::AtConfig;
pub use driver::{Conn, Driver, DriverError, ExecResult, Rows};
pub use error::{AtError, Result};
pub use proxy::{ProxyConn, ProxyDriver};
pub use registry::AtRegistry;
pub use rm::{DataSourceManager, ResourceManagerInbound, ResourceManagerOutbound};
pub use undo::{BranchUndoLog, SqlUndoLog, UndoLogManager};
