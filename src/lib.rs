//! # Parchment
//!
//! An embedded, file-backed document database. Every collection is one
//! newline-delimited JSON file on disk; the whole engine runs in-process,
//! with no server and no background daemon beyond an optional file watcher.
//!
//! ## Design Principles
//!
//! - **Plain files**: one `<collection>.json` per collection, human-readable,
//!   diffable, greppable.
//! - **Type-erased past registration**: application types opt into the
//!   [`Document`] trait once; everything downstream — queries, updates,
//!   migrations — operates on [`serde_json::Value`].
//! - **Copy-on-write reads**: a [`Collection::snapshot`] never blocks a
//!   concurrent writer and is never torn.
//! - **Crash-safe**: full rewrites are atomic (temp file + rename); appends
//!   recover cleanly from a trailing partial write.
//!
//! ## Core Concepts
//!
//! ### Descriptors
//!
//! [`Document`] associated consts declare a type's collection name, schema
//! version, id field path, and any fields that must be encrypted at rest.
//! A [`Registry`] collects these into [`Descriptor`]s the rest of the engine
//! consults.
//!
//! ### Collections
//!
//! A [`store::Collection`] is one open, file-backed collection: insert,
//! save (upsert), remove, `find`/`findOne` via the [`Query`] language, and
//! `findAndModify`/`findAndRemove` with an [`Update`].
//!
//! ### Schema migration
//!
//! If a collection's on-disk schema version is incompatible with what the
//! running code declares, it opens read-only. [`schema::CollectionSchemaUpdate`]
//! describes a declarative, all-or-nothing migration that clears the flag.
//!
//! ### File watching
//!
//! [`Database::on_file_event`] subscribes to debounced notifications when a
//! collection file changes outside this process — another process, a synced
//! folder, a text editor.
//!
//! ## Quick Start
//!
//! ```rust
//! use parchment::{Config, Database, Document, Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Site {
//!     id: String,
//!     location: String,
//! }
//!
//! impl Document for Site {
//!     const COLLECTION: &'static str = "sites";
//!     const SCHEMA_VERSION: (u32, u32) = (1, 0);
//!     const ID_FIELD: &'static str = "id";
//! }
//!
//! # fn main() -> parchment::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let mut registry = Registry::new();
//! registry.register::<Site>()?;
//!
//! let db = Database::open(Config::new(dir.path()), registry)?;
//! db.create_collection("sites")?;
//! db.insert(&Site { id: "s1".into(), location: "US-East".into() })?;
//!
//! let found: Site = db.find_by_id("s1")?.unwrap();
//! assert_eq!(found.location, "US-East");
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod facade;
pub mod journal;
pub mod query;
pub mod schema;
pub mod store;
pub mod update;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use descriptor::{Descriptor, Document, Registry, SchemaVersion};
pub use error::Error;
pub use facade::Database;
pub use query::Query;
pub use schema::{CollectionSchemaUpdate, SchemaFieldOp, TargetType};
pub use store::{Collection, CollectionState, Store};
pub use update::{FieldOp, Update};
pub use watcher::FileEvent;

/// Type aliases for clarity.
pub type CollectionName = String;
pub type DocId = String;

/// Result type used throughout the crate.
pub type Result<T> = error::Result<T>;
