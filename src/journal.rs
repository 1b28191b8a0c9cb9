//! File Journal: the append/rewrite protocol that persists one collection
//! to disk and recovers from partial writes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::codec::Codec;
use crate::descriptor::SchemaVersion;
use crate::error::Result;
use crate::{CollectionName, Error};

/// A collection as read off disk, before the schema guard or cipher have
/// touched it.
pub struct LoadedCollection {
    pub schema_version: SchemaVersion,
    pub docs: Vec<Value>,
}

/// Stateless file-level persistence operations for one collection file.
pub struct Journal;

impl Journal {
    pub fn path_for(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{collection}.json"))
    }

    /// Remove temporary files left behind by a rewrite that crashed before
    /// the final rename. Safe to call at any time; only touches files
    /// matching the naming convention [`Journal::rewrite`] uses for its
    /// scratch files.
    pub fn discard_stale_temp_files(dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(".tmp") {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    /// Atomically replace the collection file's full contents: write a
    /// header line and one line per document to a sibling temp file, sync,
    /// then rename over the target.
    pub fn rewrite(
        dir: &Path,
        collection: &CollectionName,
        schema_version: SchemaVersion,
        docs: &[Value],
    ) -> Result<()> {
        fs::create_dir_all(dir)?;
        let target = Self::path_for(dir, collection);

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{collection}-"))
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let header = Codec::encode_header(&schema_version.to_string())?;
        writeln!(tmp, "{header}")?;
        for doc in docs {
            let line = Codec::encode_line(doc)?;
            writeln!(tmp, "{line}")?;
        }
        tmp.as_file().sync_all()?;

        tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Append-only optimization for pure inserts: appends the given
    /// document lines to an already-existing, already-loaded file and
    /// syncs. Never used for the initial header write.
    pub fn append(dir: &Path, collection: &CollectionName, new_docs: &[Value]) -> Result<()> {
        let target = Self::path_for(dir, collection);
        let mut file = OpenOptions::new().append(true).open(&target)?;
        for doc in new_docs {
            let line = Codec::encode_line(doc)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }

    /// Create a brand new, empty collection file containing only the
    /// header. Fails if a non-empty file already exists at that path.
    pub fn create_empty(
        dir: &Path,
        collection: &CollectionName,
        schema_version: SchemaVersion,
    ) -> Result<()> {
        let target = Self::path_for(dir, collection);
        if target.exists() && fs::metadata(&target)?.len() > 0 {
            return Err(Error::CollectionExists(collection.clone()));
        }
        Self::rewrite(dir, collection, schema_version, &[])
    }

    /// Delete the collection file.
    pub fn delete(dir: &Path, collection: &CollectionName) -> Result<()> {
        let target = Self::path_for(dir, collection);
        fs::remove_file(&target).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CollectionNotFound(collection.clone())
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn exists(dir: &Path, collection: &str) -> bool {
        Self::path_for(dir, collection).is_file()
    }

    /// Read and parse a collection file.
    ///
    /// A trailing line with no terminating newline (the signature of a
    /// crash mid-append) is treated as a partial write and discarded
    /// rather than rejected; every fully-terminated line before it must
    /// still parse, or `CorruptCollection` is returned naming the
    /// offending line.
    pub fn load(dir: &Path, collection: &CollectionName) -> Result<LoadedCollection> {
        let target = Self::path_for(dir, collection);
        let contents = fs::read_to_string(&target).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CollectionNotFound(collection.clone())
            } else {
                Error::Io(e)
            }
        })?;

        let ends_with_newline = contents.ends_with('\n');
        let mut lines: Vec<&str> = contents.split('\n').collect();
        if ends_with_newline {
            lines.pop();
        } else if matches!(lines.last(), Some(last) if !last.is_empty()) {
            lines.pop();
        }

        let mut iter = lines.into_iter();
        let header_line = iter
            .next()
            .ok_or_else(|| Error::SchemaHeaderMissing(collection.clone()))?;
        let header = Codec::decode_header(collection, header_line)?;
        let schema_version = SchemaVersion::from_str(&header.schema_version)?;

        let mut docs = Vec::new();
        for (offset, line) in iter.enumerate() {
            if line.is_empty() {
                continue;
            }
            let value = Codec::decode_line(collection, line, offset + 2)?;
            docs.push(value);
        }

        Ok(LoadedCollection {
            schema_version,
            docs,
        })
    }
}
