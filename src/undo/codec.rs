// Undo log codec
//
// Encodes a branch log with the configured serializer and, above the size
// threshold, the configured compressor. The names of both are written to the
// row's `context` so a row always decodes with what encoded it.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::compressor::{self, NoneCompressor, UndoLogCompressor, ZstdCompressor};
use super::serializer::{self, BincodeParser, JsonParser};
use super::{BranchUndoLog, UndoLogParser};
use crate::config::UndoConfig;
use crate::error::{AtError, Result};

pub const SERIALIZER_KEY: &str = "serializerKey";
pub const COMPRESSOR_KEY: &str = "compressorTypeKey";

/// Serializer and compressor selection for undo payloads
pub struct UndoLogCodec {
    parsers: HashMap<String, Arc<dyn UndoLogParser>>,
    compressors: HashMap<String, Arc<dyn UndoLogCompressor>>,
    serializer: String,
    compressor: String,
    compress_enabled: bool,
    threshold: usize,
}

impl UndoLogCodec {
    /// Codec with the built-in serializers and compressors
    pub fn from_config(config: &UndoConfig) -> Result<Self> {
        let mut codec = UndoLogCodec {
            parsers: HashMap::new(),
            compressors: HashMap::new(),
            serializer: serializer::normalize_name(&config.log_serialization),
            compressor: config.compress.kind.trim().to_ascii_lowercase(),
            compress_enabled: config.compress.enable,
            threshold: config.compress.threshold,
        };
        codec.register_parser(Arc::new(JsonParser));
        codec.register_parser(Arc::new(BincodeParser));
        codec.register_compressor(Arc::new(NoneCompressor));
        codec.register_compressor(Arc::new(ZstdCompressor));

        codec.parser(&codec.serializer)?;
        codec.compressor_named(&codec.compressor)?;
        Ok(codec)
    }

    pub fn register_parser(&mut self, parser: Arc<dyn UndoLogParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    pub fn register_compressor(&mut self, compressor: Arc<dyn UndoLogCompressor>) {
        self.compressors.insert(compressor.name().to_string(), compressor);
    }

    fn parser(&self, name: &str) -> Result<&Arc<dyn UndoLogParser>> {
        self.parsers
            .get(&serializer::normalize_name(name))
            .ok_or_else(|| AtError::NotFound(format!("undo log serializer '{}'", name)))
    }

    fn compressor_named(&self, name: &str) -> Result<&Arc<dyn UndoLogCompressor>> {
        self.compressors
            .get(name)
            .ok_or_else(|| AtError::NotFound(format!("undo log compressor '{}'", name)))
    }

    /// Encode a branch log; returns the row context and the payload
    pub fn encode(&self, log: &BranchUndoLog) -> Result<(String, Vec<u8>)> {
        let parser = self.parser(&self.serializer)?;
        let encoded = parser.encode(log)?;

        let compressor_name = if self.compress_enabled && encoded.len() > self.threshold {
            self.compressor.as_str()
        } else {
            compressor::NONE
        };
        let payload = self.compressor_named(compressor_name)?.compress(&encoded)?;
        debug!(
            "Encoded undo log of branch {} with {}/{}: {} -> {} bytes",
            log.branch_id,
            parser.name(),
            compressor_name,
            encoded.len(),
            payload.len()
        );

        Ok((build_context(parser.name(), compressor_name), payload))
    }

    /// Decode a payload with the serializer and compressor named in `context`
    pub fn decode(&self, context: &str, payload: &[u8]) -> Result<BranchUndoLog> {
        let ctx = parse_context(context);
        let serializer_name = ctx.get(SERIALIZER_KEY).map(String::as_str).unwrap_or(serializer::JSON);
        let compressor_name = ctx.get(COMPRESSOR_KEY).map(String::as_str).unwrap_or(compressor::NONE);

        let raw = self.compressor_named(compressor_name)?.decompress(payload)?;
        self.parser(serializer_name)?.decode(&raw)
    }
}

/// `serializerKey=<s>&compressorTypeKey=<c>`
pub fn build_context(serializer: &str, compressor: &str) -> String {
    format!("{}={}&{}={}", SERIALIZER_KEY, serializer, COMPRESSOR_KEY, compressor)
}

pub fn parse_context(context: &str) -> HashMap<String, String> {
    context
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}
