// Undo log serializers
//
// `json` is the default and also answers to `jackson`, the name older
// configurations use. `bincode` is the compact binary form.

use bincode::{deserialize, serialize};

use super::{BranchUndoLog, UndoLogParser};
use crate::error::{AtError, Result};

pub const JSON: &str = "json";
pub const BINCODE: &str = "bincode";

/// Canonical serializer name for a configured one
pub fn normalize_name(name: &str) -> String {
    match name.trim().to_ascii_lowercase().as_str() {
        "jackson" => JSON.to_string(),
        other => other.to_string(),
    }
}

/// JSON encoding via serde_json
#[derive(Debug, Default)]
pub struct JsonParser;

impl UndoLogParser for JsonParser {
    fn name(&self) -> &str {
        JSON
    }

    fn encode(&self, log: &BranchUndoLog) -> Result<Vec<u8>> {
        serde_json::to_vec(log).map_err(|e| AtError::Codec(format!("json encode: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<BranchUndoLog> {
        serde_json::from_slice(bytes).map_err(|e| AtError::Codec(format!("json decode: {}", e)))
    }
}

/// Binary encoding via bincode
#[derive(Debug, Default)]
pub struct BincodeParser;

impl UndoLogParser for BincodeParser {
    fn name(&self) -> &str {
        BINCODE
    }

    fn encode(&self, log: &BranchUndoLog) -> Result<Vec<u8>> {
        serialize(log).map_err(|e| AtError::Codec(format!("bincode encode: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<BranchUndoLog> {
        deserialize(bytes).map_err(|e| AtError::Codec(format!("bincode decode: {}", e)))
    }
}
