//! Error types for the parchment document store.

use crate::config::ConfigError;
use crate::{CollectionName, DocId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the core engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("collection already exists: {0}")]
    CollectionExists(CollectionName),

    #[error("collection is read-only: {0}")]
    CollectionReadOnly(CollectionName),

    #[error("document not found: {collection}/{id}")]
    DocumentNotFound {
        collection: CollectionName,
        id: DocId,
    },

    #[error("duplicate id in {collection}: {id}")]
    DuplicateId {
        collection: CollectionName,
        id: DocId,
    },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("corrupt collection {collection} at line {line}: {reason}")]
    CorruptCollection {
        collection: CollectionName,
        line: usize,
        reason: String,
    },

    #[error("schema header missing in collection: {0}")]
    SchemaHeaderMissing(CollectionName),

    #[error("schema migration failed for {collection}: {reason}")]
    SchemaMigrationFailed {
        collection: CollectionName,
        reason: String,
    },

    #[error("cipher error: {0}")]
    CipherError(String),

    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    #[error(
        "schema version mismatch for {collection}: file has {file}, descriptor declares {declared}"
    )]
    SchemaVersionMismatch {
        collection: CollectionName,
        file: SchemaVersion,
        declared: SchemaVersion,
    },

    #[error("reentrant mutation on collection: {0}")]
    ReentrantMutation(CollectionName),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    ConfigLoad(#[from] ConfigError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("sites".into());
        assert_eq!(err.to_string(), "collection not found: sites");

        let err = Error::DuplicateId {
            collection: "sites".into(),
            id: "s1".into(),
        };
        assert_eq!(err.to_string(), "duplicate id in sites: s1");
    }
}
