//! Entity Descriptor Registry.
//!
//! Maps application entity types to the persistence metadata the rest of
//! the engine needs: collection name, schema version, id field path, and
//! secret field paths. The registry never inspects concrete Rust types past
//! registration time — everything downstream operates on type-erased
//! `serde_json::Value` documents, keyed off the `Descriptor`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{error::Result, CollectionName, Error};

/// A collection's declared schema version, in `<major>.<minor>` form.
///
/// Stored verbatim as `"<x.y>"` in a collection file's header line, per the
/// persisted state layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| Error::BadDescriptor(format!("malformed schema version: {s}")))?;
        let major = major
            .parse()
            .map_err(|_| Error::BadDescriptor(format!("malformed schema version: {s}")))?;
        let minor = minor
            .parse()
            .map_err(|_| Error::BadDescriptor(format!("malformed schema version: {s}")))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SchemaVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SchemaVersion::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// An application entity type that can be persisted in a collection.
///
/// Implementors opt into the registry at compile time; there is no runtime
/// reflection. The associated constants are exactly the metadata §4.A
/// requires a descriptor to carry.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The collection this entity type is stored in.
    const COLLECTION: &'static str;
    /// Declared schema version, as (major, minor).
    const SCHEMA_VERSION: (u32, u32);
    /// Dot-separated path to the identifier field within the JSON shape.
    const ID_FIELD: &'static str;
    /// Dot-separated paths of fields that must be encrypted at rest.
    const SECRET_FIELDS: &'static [&'static str] = &[];
}

/// Type-erased persistence metadata for one collection.
///
/// Immutable once built; the store only ever reads from it.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub collection: CollectionName,
    pub schema_version: SchemaVersion,
    pub id_field: String,
    pub secret_fields: Vec<String>,
    type_name: &'static str,
}

impl Descriptor {
    /// Build a descriptor from a registered entity type.
    pub fn of<T: Document>() -> Result<Self> {
        if T::ID_FIELD.is_empty() {
            return Err(Error::BadDescriptor(format!(
                "{} declares no id field",
                std::any::type_name::<T>()
            )));
        }
        let (major, minor) = T::SCHEMA_VERSION;
        Ok(Self {
            collection: T::COLLECTION.to_string(),
            schema_version: SchemaVersion::new(major, minor),
            id_field: T::ID_FIELD.to_string(),
            secret_fields: T::SECRET_FIELDS.iter().map(|s| s.to_string()).collect(),
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Returns an empty JSON object suitable as a blank document shell.
    pub fn new_empty_document(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    /// Read the identifier out of a document's JSON representation.
    ///
    /// Supports dot-separated nested paths. The found value is coerced to
    /// its stable string form (strings pass through verbatim; numbers and
    /// booleans are rendered via their JSON literal form).
    pub fn get_id(&self, doc: &Value) -> Result<String> {
        let value = lookup_path(doc, &self.id_field).ok_or_else(|| {
            Error::InvalidDocument(format!("missing id field '{}'", self.id_field))
        })?;
        stringify_scalar(value).ok_or_else(|| {
            Error::InvalidDocument(format!(
                "id field '{}' is not a scalar value",
                self.id_field
            ))
        })
    }

    /// Write an identifier into a document's JSON representation, creating
    /// intermediate objects along the path as needed.
    pub fn set_id(&self, doc: &mut Value, id: &str) {
        set_path(doc, &self.id_field, Value::String(id.to_string()));
    }

    /// Fetch a (possibly nested) secret field's current value, if present.
    pub fn get_field<'a>(&self, doc: &'a Value, path: &str) -> Option<&'a Value> {
        lookup_path(doc, path)
    }

    /// Overwrite a (possibly nested) field's value.
    pub fn set_field(&self, doc: &mut Value, path: &str, value: Value) {
        set_path(doc, path, value);
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
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

fn stringify_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Registry of all known entity descriptors, immutable after initialization.
#[derive(Debug, Default)]
pub struct Registry {
    by_collection: HashMap<CollectionName, Descriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            by_collection: HashMap::new(),
        }
    }

    /// Register an entity type. Fails with `BadDescriptor` if the type's
    /// collection name collides with one already registered.
    pub fn register<T: Document>(&mut self) -> Result<()> {
        let descriptor = Descriptor::of::<T>()?;
        if self.by_collection.contains_key(&descriptor.collection) {
            return Err(Error::BadDescriptor(format!(
                "duplicate collection name: {}",
                descriptor.collection
            )));
        }
        self.by_collection.insert(descriptor.collection.clone(), descriptor);
        Ok(())
    }

    /// Look up a descriptor by collection name.
    pub fn describe(&self, name: &str) -> Result<&Descriptor> {
        self.by_collection
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Look up a descriptor by the entity type it was registered under.
    ///
    /// Since registration is keyed by `T::COLLECTION`, this is equivalent to
    /// `describe(T::COLLECTION)`, but validates that the caller's type still
    /// matches the registered one (guards against two types sharing a
    /// collection name by coincidence rather than registration).
    pub fn describe_type<T: Document>(&self) -> Result<&Descriptor> {
        let descriptor = self.describe(T::COLLECTION)?;
        if descriptor.type_name != std::any::type_name::<T>() {
            return Err(Error::BadDescriptor(format!(
                "collection '{}' is registered to {}, not {}",
                T::COLLECTION,
                descriptor.type_name,
                std::any::type_name::<T>()
            )));
        }
        Ok(descriptor)
    }

    /// All registered collection names.
    pub fn names(&self) -> HashSet<&str> {
        self.by_collection.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Site {
        id: String,
        location: String,
    }

    impl Document for Site {
        const COLLECTION: &'static str = "sites";
        const SCHEMA_VERSION: (u32, u32) = (1, 0);
        const ID_FIELD: &'static str = "id";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Account {
        id: String,
        private_key: String,
    }

    impl Document for Account {
        const COLLECTION: &'static str = "accounts";
        const SCHEMA_VERSION: (u32, u32) = (1, 0);
        const ID_FIELD: &'static str = "id";
        const SECRET_FIELDS: &'static [&'static str] = &["private_key"];
    }

    #[test]
    fn schema_version_round_trips() {
        let v = SchemaVersion::new(2, 3);
        assert_eq!(v.to_string(), "2.3");
        assert_eq!(SchemaVersion::from_str("2.3").unwrap(), v);
    }

    #[test]
    fn register_and_describe() {
        let mut registry = Registry::new();
        registry.register::<Site>().unwrap();

        let descriptor = registry.describe("sites").unwrap();
        assert_eq!(descriptor.collection, "sites");
        assert_eq!(descriptor.schema_version, SchemaVersion::new(1, 0));
        assert_eq!(descriptor.id_field, "id");

        let by_type = registry.describe_type::<Site>().unwrap();
        assert_eq!(by_type.collection, "sites");
    }

    #[test]
    fn duplicate_collection_name_rejected() {
        let mut registry = Registry::new();
        registry.register::<Site>().unwrap();

        #[derive(Debug, Serialize, Deserialize)]
        struct OtherSite {
            id: String,
        }
        impl Document for OtherSite {
            const COLLECTION: &'static str = "sites";
            const SCHEMA_VERSION: (u32, u32) = (1, 0);
            const ID_FIELD: &'static str = "id";
        }

        let result = registry.register::<OtherSite>();
        assert!(matches!(result, Err(Error::BadDescriptor(_))));
    }

    #[test]
    fn get_and_set_id() {
        let descriptor = Descriptor::of::<Site>().unwrap();
        let mut doc = serde_json::json!({"id": "s1", "location": "US-East"});

        assert_eq!(descriptor.get_id(&doc).unwrap(), "s1");
        descriptor.set_id(&mut doc, "s2");
        assert_eq!(doc["id"], "s2");
    }

    #[test]
    fn secret_fields_present() {
        let descriptor = Descriptor::of::<Account>().unwrap();
        assert_eq!(descriptor.secret_fields, vec!["private_key".to_string()]);
    }

    #[test]
    fn nested_id_field_path() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Nested {
            meta: Meta,
        }
        #[derive(Debug, Serialize, Deserialize)]
        struct Meta {
            id: String,
        }
        impl Document for Nested {
            const COLLECTION: &'static str = "nested";
            const SCHEMA_VERSION: (u32, u32) = (1, 0);
            const ID_FIELD: &'static str = "meta.id";
        }

        let descriptor = Descriptor::of::<Nested>().unwrap();
        let mut doc = serde_json::json!({"meta": {"id": "n1"}});
        assert_eq!(descriptor.get_id(&doc).unwrap(), "n1");
        descriptor.set_id(&mut doc, "n2");
        assert_eq!(doc["meta"]["id"], "n2");
    }

    #[test]
    fn names_lists_all_collections() {
        let mut registry = Registry::new();
        registry.register::<Site>().unwrap();
        registry.register::<Account>().unwrap();
        let names = registry.names();
        assert!(names.contains("sites"));
        assert!(names.contains("accounts"));
    }
}
