//! Codec: translates between a document value and one JSON text line.
//!
//! `serde_json::Value`'s default `Map` implementation is a `BTreeMap`
//! (the `preserve_order` feature is not enabled), so object keys always
//! serialize in sorted order. That gives us deterministic, reproducible
//! journal lines for free without the codec having to impose its own field
//! ordering.

use serde_json::Value;

use crate::{error::Result, CollectionName, Error};

/// Header record written as the first line of every collection file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Header {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
}

/// Stateless translator between a document value and a single JSON line.
pub struct Codec;

impl Codec {
    /// Serialize a document to a single line (no trailing newline).
    pub fn encode_line(doc: &Value) -> Result<String> {
        serde_json::to_string(doc).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Parse one document from a single line. `line_no` is used only for
    /// error reporting (1-indexed, counting the header as line 1).
    pub fn decode_line(collection: &CollectionName, line: &str, line_no: usize) -> Result<Value> {
        serde_json::from_str(line).map_err(|e| Error::CorruptCollection {
            collection: collection.clone(),
            line: line_no,
            reason: e.to_string(),
        })
    }

    /// Serialize the header line for a given schema version string.
    pub fn encode_header(schema_version: &str) -> Result<String> {
        serde_json::to_string(&Header {
            schema_version: schema_version.to_string(),
        })
        .map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Parse the header line.
    pub fn decode_header(collection: &CollectionName, line: &str) -> Result<Header> {
        serde_json::from_str(line).map_err(|_| Error::SchemaHeaderMissing(collection.clone()))
    }
}
