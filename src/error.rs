// Engine error taxonomy

use thiserror::Error;

use crate::driver::DriverError;
use crate::parser::ParseError;

/// Errors raised by image capture, undo persistence and replay
#[derive(Error, Debug)]
pub enum AtError {
    /// Unsupported or unparseable SQL
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Table or required index could not be resolved
    #[error("Schema error: {0}")]
    Schema(String),

    /// Affected rows or generated keys could not be determined
    #[error("Image capture error: {0}")]
    ImageCapture(String),

    /// Undo log row could not be written or removed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Current row state diverged from the recorded after-image
    #[error("Dirty data in table {table}: {detail}")]
    DirtyData { table: String, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource error: {0}")]
    Resource(String),
}

impl AtError {
    pub fn is_dirty_data(&self) -> bool {
        matches!(self, AtError::DirtyData { .. })
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, AtError>;
