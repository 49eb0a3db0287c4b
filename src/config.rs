// Client configuration
//
// Keys use the kebab-case names of the client's configuration flags. Every
// section has defaults, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::common::BranchType;
use crate::error::{AtError, Result};

/// Serializer names accepted for `log-serialization`
pub const SERIALIZERS: &[&str] = &["json", "jackson", "bincode"];

/// Compressor names accepted for `compress.type`
pub const COMPRESSORS: &[&str] = &["none", "zstd"];

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AtConfig {
    pub application_id: String,
    /// Resource group id used when registering data sources
    pub group_id: String,
    pub branch_type: BranchType,
    pub undo: UndoConfig,
    pub table_meta: TableMetaConfig,
}

impl Default for AtConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            group_id: "DEFAULT_GROUP".to_string(),
            branch_type: BranchType::AT,
            undo: UndoConfig::default(),
            table_meta: TableMetaConfig::default(),
        }
    }
}

/// Undo log capture and persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UndoConfig {
    /// Skip persisting an undo entry whose before and after images are identical
    pub data_validation: bool,
    pub log_serialization: String,
    pub log_table: String,
    /// Capture only the SET columns (plus primary key) of an UPDATE
    pub only_care_update_columns: bool,
    pub compress: CompressConfig,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            data_validation: true,
            log_serialization: "json".to_string(),
            log_table: "undo_log".to_string(),
            only_care_update_columns: true,
            compress: CompressConfig::default(),
        }
    }
}

/// Undo payload compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CompressConfig {
    pub enable: bool,
    #[serde(rename = "type")]
    pub kind: String,
    /// Payloads at or below this many bytes are stored uncompressed
    pub threshold: usize,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enable: true,
            kind: "zstd".to_string(),
            threshold: 64 * 1024, // 64 KB
        }
    }
}

/// Table metadata cache sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TableMetaConfig {
    pub capacity: usize,
    pub expire_secs: u64,
}

impl Default for TableMetaConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            expire_secs: 15 * 60,
        }
    }
}

impl AtConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AtConfig = serde_json::from_str(json).map_err(|e| AtError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let serializer = self.undo.log_serialization.to_ascii_lowercase();
        if !SERIALIZERS.contains(&serializer.as_str()) {
            return Err(AtError::Config(format!(
                "unknown undo log serializer '{}'",
                self.undo.log_serialization
            )));
        }
        let compressor = self.undo.compress.kind.to_ascii_lowercase();
        if !COMPRESSORS.contains(&compressor.as_str()) {
            return Err(AtError::Config(format!(
                "unknown undo log compressor '{}'",
                self.undo.compress.kind
            )));
        }
        if self.undo.log_table.trim().is_empty() {
            return Err(AtError::Config("undo log table name is empty".to_string()));
        }
        if self.table_meta.capacity == 0 {
            return Err(AtError::Config("table meta cache capacity must be positive".to_string()));
        }
        Ok(())
    }
}
