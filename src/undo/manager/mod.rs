// Undo log managers

pub mod base;
pub mod mysql;

pub use self::base::BaseUndoLogManager;
pub use self::mysql::MySqlUndoLogManager;
