//! Schema Guard: schema-version compatibility checks and declarative
//! collection migrations.
//!
//! A collection file's header carries the schema version it was last
//! written with. If that version is incompatible with what the running
//! descriptor declares, the collection is flagged read-only until a
//! migration brings it forward. Migration either succeeds for every
//! document or changes nothing at all.

use serde_json::Value;

use crate::error::Result;
use crate::{CollectionName, Error, SchemaVersion};

/// Whether a collection, as loaded, must be opened read-only.
///
/// A file whose major version differs from the descriptor's declared major
/// version is an incompatible shape change: every field access could be
/// wrong, so the collection stays read-only until `update_schema` migrates
/// it. A file whose minor version is *ahead* of the descriptor is also
/// read-only — the running code was built against an older shape and can't
/// safely guess what a newer minor revision added. A file whose minor
/// version is behind (or equal) is accepted as-is; new minor revisions are
/// expected to be additive and tolerant of missing fields.
pub fn needs_read_only(file_version: SchemaVersion, declared_version: SchemaVersion) -> bool {
    file_version.major != declared_version.major || file_version.minor > declared_version.minor
}

/// One declarative field-shape change applied to every document in a
/// collection during a migration.
#[derive(Debug, Clone)]
pub enum SchemaFieldOp {
    /// Rename a field, preserving its value. A no-op if `from` is absent.
    Rename { from: String, to: String },
    /// Add a field with a default value, if not already present.
    Add { path: String, default: Value },
    /// Remove a field, if present.
    Remove { path: String },
    /// Convert an existing field's value to a new scalar type.
    Retype { path: String, to: TargetType },
}

/// Scalar type a `Retype` operation converts a field's value into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    String,
    Number,
    Bool,
}

/// A full migration: the ordered field operations plus the schema version
/// the collection will carry once they've all been applied successfully.
#[derive(Debug, Clone)]
pub struct CollectionSchemaUpdate {
    pub target_version: SchemaVersion,
    pub ops: Vec<SchemaFieldOp>,
}

impl CollectionSchemaUpdate {
    pub fn new(target_version: SchemaVersion) -> Self {
        Self {
            target_version,
            ops: Vec::new(),
        }
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(SchemaFieldOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn add(mut self, path: impl Into<String>, default: Value) -> Self {
        self.ops.push(SchemaFieldOp::Add {
            path: path.into(),
            default,
        });
        self
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.ops.push(SchemaFieldOp::Remove { path: path.into() });
        self
    }

    pub fn retype(mut self, path: impl Into<String>, to: TargetType) -> Self {
        self.ops.push(SchemaFieldOp::Retype {
            path: path.into(),
            to,
        });
        self
    }

    /// Apply every operation to every document. Either every document in
    /// `docs` migrates cleanly and a full replacement set is returned, or
    /// the first failure aborts the whole migration with
    /// `SchemaMigrationFailed` and `docs` is reported unchanged by the
    /// caller (this function never mutates its input).
    pub fn migrate(&self, collection: &CollectionName, docs: &[Value]) -> Result<Vec<Value>> {
        let mut migrated = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = doc.clone();
            for op in &self.ops {
                apply_op(&mut doc, op).map_err(|reason| Error::SchemaMigrationFailed {
                    collection: collection.clone(),
                    reason,
                })?;
            }
            migrated.push(doc);
        }
        Ok(migrated)
    }
}

fn apply_op(doc: &mut Value, op: &SchemaFieldOp) -> std::result::Result<(), String> {
    match op {
        SchemaFieldOp::Rename { from, to } => {
            if let Some(value) = take_path(doc, from) {
                set_path(doc, to, value);
            }
        }
        SchemaFieldOp::Add { path, default } => {
            if lookup_path(doc, path).is_none() {
                set_path(doc, path, default.clone());
            }
        }
        SchemaFieldOp::Remove { path } => {
            take_path(doc, path);
        }
        SchemaFieldOp::Retype { path, to } => {
            if let Some(value) = lookup_path(doc, path) {
                let converted = retype_scalar(value, *to)
                    .ok_or_else(|| format!("cannot retype field '{path}' to {to:?}"))?;
                set_path(doc, path, converted);
            }
        }
    }
    Ok(())
}

fn retype_scalar(value: &Value, to: TargetType) -> Option<Value> {
    match (value, to) {
        (Value::String(s), TargetType::String) => Some(Value::String(s.clone())),
        (Value::Number(n), TargetType::Number) => Some(Value::Number(n.clone())),
        (Value::Bool(b), TargetType::Bool) => Some(Value::Bool(*b)),
        (Value::String(s), TargetType::Number) => {
            s.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
        }
        (Value::Number(n), TargetType::String) => Some(Value::String(n.to_string())),
        (Value::Bool(b), TargetType::String) => Some(Value::String(b.to_string())),
        (Value::String(s), TargetType::Bool) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn take_path(doc: &mut Value, path: &str) -> Option<Value> {
    let Some((parent, last)) = path.rsplit_once('.') else {
        return doc.as_object_mut()?.remove(path);
    };
    let mut current = doc;
    for segment in parent.split('.') {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    current.as_object_mut()?.remove(last)
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_version_is_writable() {
        assert!(!needs_read_only(SchemaVersion::new(1, 0), SchemaVersion::new(1, 0)));
    }

    #[test]
    fn older_minor_on_disk_is_writable() {
        assert!(!needs_read_only(SchemaVersion::new(1, 0), SchemaVersion::new(1, 2)));
    }

    #[test]
    fn newer_minor_on_disk_is_read_only() {
        assert!(needs_read_only(SchemaVersion::new(1, 3), SchemaVersion::new(1, 2)));
    }

    #[test]
    fn major_mismatch_is_read_only() {
        assert!(needs_read_only(SchemaVersion::new(2, 0), SchemaVersion::new(1, 0)));
    }

    #[test]
    fn rename_preserves_value() {
        let update = CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).rename("loc", "location");
        let docs = vec![json!({"loc": "US-East"})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert_eq!(migrated[0], json!({"location": "US-East"}));
    }

    #[test]
    fn rename_absent_field_is_noop() {
        let update = CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).rename("missing", "x");
        let docs = vec![json!({"id": "s1"})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert_eq!(migrated[0], json!({"id": "s1"}));
    }

    #[test]
    fn add_sets_default_when_absent() {
        let update =
            CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).add("tier", json!("standard"));
        let docs = vec![json!({"id": "s1"}), json!({"id": "s2", "tier": "premium"})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert_eq!(migrated[0]["tier"], "standard");
        assert_eq!(migrated[1]["tier"], "premium");
    }

    #[test]
    fn remove_drops_field() {
        let update = CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).remove("legacy");
        let docs = vec![json!({"id": "s1", "legacy": true})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert!(migrated[0].get("legacy").is_none());
    }

    #[test]
    fn retype_string_to_number() {
        let update =
            CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).retype("port", TargetType::Number);
        let docs = vec![json!({"port": "8080"})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert_eq!(migrated[0]["port"], 8080.0);
    }

    #[test]
    fn failed_migration_leaves_collection_unchanged() {
        let update =
            CollectionSchemaUpdate::new(SchemaVersion::new(1, 1)).retype("port", TargetType::Number);
        let docs = vec![json!({"port": "8080"}), json!({"port": "not-a-number"})];
        let result = update.migrate(&"sites".to_string(), &docs);
        assert!(matches!(result, Err(Error::SchemaMigrationFailed { .. })));
        assert_eq!(docs[0]["port"], "8080");
        assert_eq!(docs[1]["port"], "not-a-number");
    }

    #[test]
    fn ops_apply_in_order() {
        let update = CollectionSchemaUpdate::new(SchemaVersion::new(1, 1))
            .rename("loc", "location")
            .add("location", json!("unknown"));
        let docs = vec![json!({"loc": "US-East"})];
        let migrated = update.migrate(&"sites".to_string(), &docs).unwrap();
        assert_eq!(migrated[0]["location"], "US-East");
    }
}
