//! Collection Store: the in-memory, indexed, copy-on-write state for every
//! open collection, and the top-level container that owns them all.
//!
//! Each [`Collection`] holds its documents behind `RwLock<Arc<CollectionState>>`.
//! A [`Collection::snapshot`] is just a cheap `Arc` clone; a writer mutates
//! through [`Arc::make_mut`], which only deep-clones the document map if a
//! snapshot reader is still holding a reference to the old one. Readers never
//! block writers and never see a torn state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde_json::Value;

use crate::cipher::Cipher;
use crate::descriptor::{Descriptor, Registry};
use crate::error::Result;
use crate::journal::Journal;
use crate::query::Query;
use crate::schema::{self, CollectionSchemaUpdate};
use crate::update::Update;
use crate::{CollectionName, DocId, Error, SchemaVersion};

/// An immutable, point-in-time view of one collection's documents. Cheap to
/// clone (an `Arc` bump) and safe to hold across an arbitrarily long read
/// operation without blocking concurrent writers.
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub schema_version: SchemaVersion,
    pub read_only: bool,
    /// Insertion-ordered: iteration and on-disk line order both follow the
    /// order documents were first inserted, per the Data Model's "ordered
    /// mapping from identifier to document" invariant.
    pub docs: IndexMap<DocId, Value>,
}

impl CollectionState {
    fn empty(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            read_only: false,
            docs: IndexMap::new(),
        }
    }
}

/// One open, file-backed collection.
pub struct Collection {
    dir: PathBuf,
    name: CollectionName,
    descriptor: Descriptor,
    cipher: Option<Arc<Cipher>>,
    state: RwLock<Arc<CollectionState>>,
}

impl Collection {
    /// Create a brand new, empty collection file and open it.
    pub fn create(dir: &Path, descriptor: Descriptor, cipher: Option<Arc<Cipher>>) -> Result<Self> {
        Journal::create_empty(dir, &descriptor.collection, descriptor.schema_version)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: descriptor.collection.clone(),
            state: RwLock::new(Arc::new(CollectionState::empty(descriptor.schema_version))),
            descriptor,
            cipher,
        })
    }

    /// Load an existing collection file.
    pub fn load(dir: &Path, descriptor: Descriptor, cipher: Option<Arc<Cipher>>) -> Result<Self> {
        let loaded = Journal::load(dir, &descriptor.collection)?;
        let read_only = schema::needs_read_only(loaded.schema_version, descriptor.schema_version);

        let mut docs = IndexMap::new();
        for raw in loaded.docs {
            let doc = decrypt_doc(&descriptor, cipher.as_deref(), raw)?;
            let id = descriptor.get_id(&doc)?;
            if docs.insert(id.clone(), doc).is_some() {
                return Err(Error::DuplicateId {
                    collection: descriptor.collection.clone(),
                    id,
                });
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            name: descriptor.collection.clone(),
            state: RwLock::new(Arc::new(CollectionState {
                schema_version: loaded.schema_version,
                read_only,
                docs,
            })),
            descriptor,
            cipher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// A cheap, consistent, point-in-time view of this collection.
    pub fn snapshot(&self) -> Arc<CollectionState> {
        self.state.read().expect("collection lock poisoned").clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.snapshot().read_only
    }

    pub fn find_by_id(&self, id: &str) -> Option<Value> {
        self.snapshot().docs.get(id).cloned()
    }

    pub fn find(&self, query: &Query) -> Vec<Value> {
        self.snapshot()
            .docs
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect()
    }

    pub fn find_one(&self, query: &Query) -> Option<Value> {
        self.snapshot()
            .docs
            .values()
            .find(|doc| query.matches(doc))
            .cloned()
    }

    /// Insert one brand-new document. Convenience wrapper over
    /// [`Collection::insert_many`] for the common single-document case.
    pub fn insert(&self, doc: Value) -> Result<DocId> {
        Ok(self.insert_many(vec![doc])?.remove(0))
    }

    /// Insert a batch of brand-new documents, all-or-nothing: if any id is
    /// already present (in the collection or elsewhere in the batch), none
    /// are persisted and `DuplicateId` is returned. Uses the append-only
    /// fast path: every encoded line is appended to the existing file in
    /// one sync rather than triggering a full rewrite.
    pub fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<DocId>> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;

        let mut ids = Vec::with_capacity(docs.len());
        let mut seen = std::collections::HashSet::new();
        for doc in &docs {
            let id = self.descriptor.get_id(doc)?;
            if guard.docs.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(Error::DuplicateId {
                    collection: self.name.clone(),
                    id,
                });
            }
            ids.push(id);
        }

        let encrypted: Result<Vec<Value>> = docs
            .iter()
            .map(|doc| encrypt_doc(&self.descriptor, self.cipher.as_deref(), doc))
            .collect();
        Journal::append(&self.dir, &self.name, &encrypted?)?;

        let state = Arc::make_mut(&mut guard);
        for (id, doc) in ids.iter().cloned().zip(docs) {
            state.docs.insert(id, doc);
        }
        Ok(ids)
    }

    /// Replace an existing document by id. Fails with `DocumentNotFound` if
    /// no document with that id exists yet — unlike [`Collection::upsert`],
    /// `save` never creates. Always a full rewrite, since an existing line
    /// can't be patched in place.
    pub fn save(&self, doc: Value) -> Result<DocId> {
        let id = self.descriptor.get_id(&doc)?;
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;
        if !guard.docs.contains_key(&id) {
            return Err(Error::DocumentNotFound {
                collection: self.name.clone(),
                id,
            });
        }

        let state = Arc::make_mut(&mut guard);
        state.docs.insert(id.clone(), doc);
        self.persist(state)?;
        Ok(id)
    }

    /// Insert-or-replace a single document by id: never fails on
    /// pre-existence, unlike [`Collection::save`].
    pub fn upsert(&self, doc: Value) -> Result<DocId> {
        Ok(self.upsert_many(vec![doc])?.remove(0))
    }

    /// Insert-or-replace a batch of documents by id, persisted via one
    /// rewrite. Never fails on pre-existence.
    pub fn upsert_many(&self, docs: Vec<Value>) -> Result<Vec<DocId>> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in &docs {
            ids.push(self.descriptor.get_id(doc)?);
        }

        let state = Arc::make_mut(&mut guard);
        for (id, doc) in ids.iter().cloned().zip(docs) {
            state.docs.insert(id, doc);
        }
        self.persist(state)?;
        Ok(ids)
    }

    /// Remove one document by id. Convenience wrapper over
    /// [`Collection::remove_many`].
    pub fn remove(&self, id: &str) -> Result<()> {
        self.remove_many(&[id])
    }

    /// Remove a batch of documents by id, all-or-nothing: if any id is
    /// missing, none are removed and `DocumentNotFound` is returned naming
    /// the first missing id.
    pub fn remove_many(&self, ids: &[&str]) -> Result<()> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;
        for id in ids {
            if !guard.docs.contains_key(*id) {
                return Err(Error::DocumentNotFound {
                    collection: self.name.clone(),
                    id: id.to_string(),
                });
            }
        }

        let state = Arc::make_mut(&mut guard);
        for id in ids {
            state.docs.shift_remove(*id);
        }
        self.persist(state)?;
        Ok(())
    }

    /// Apply `update` to every document matching `query`. All-or-nothing:
    /// if any matched document fails to update, none are persisted and the
    /// collection is left exactly as it was.
    pub fn find_and_modify(&self, query: &Query, update: &Update) -> Result<usize> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;

        let matched_ids: Vec<DocId> = guard
            .docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, _)| id.clone())
            .collect();
        if matched_ids.is_empty() {
            return Ok(0);
        }

        let mut updated = guard.docs.clone();
        for id in &matched_ids {
            let doc = updated.get_mut(id).expect("matched id must be present");
            update.apply(doc)?;
        }

        let state = Arc::make_mut(&mut guard);
        state.docs = updated;
        self.persist(state)?;
        Ok(matched_ids.len())
    }

    /// Remove every document matching `query`, returning the count removed.
    pub fn find_and_remove(&self, query: &Query) -> Result<usize> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;

        let before = guard.docs.len();
        let state = Arc::make_mut(&mut guard);
        state.docs.retain(|_, doc| !query.matches(doc));
        let removed = before - state.docs.len();
        if removed > 0 {
            self.persist(state)?;
        }
        Ok(removed)
    }

    /// Apply a declarative schema migration. Either every document migrates
    /// and the collection becomes writable at the new version, or nothing
    /// changes and `SchemaMigrationFailed` is returned. Unlike other
    /// mutations, this is allowed even while the collection is read-only —
    /// it's the only way out of that state.
    pub fn update_schema(&self, update: &CollectionSchemaUpdate) -> Result<()> {
        let mut guard = self.state.write().expect("collection lock poisoned");

        let current_docs: Vec<Value> = guard.docs.values().cloned().collect();
        let migrated_docs = update.migrate(&self.name, &current_docs)?;

        let mut docs = IndexMap::new();
        for doc in &migrated_docs {
            let id = self.descriptor.get_id(doc)?;
            docs.insert(id, doc.clone());
        }

        let encrypted: Result<Vec<Value>> = migrated_docs
            .iter()
            .map(|doc| encrypt_doc(&self.descriptor, self.cipher.as_deref(), doc))
            .collect();
        Journal::rewrite(&self.dir, &self.name, update.target_version, &encrypted?)?;

        let state = Arc::make_mut(&mut guard);
        state.schema_version = update.target_version;
        state.read_only = false;
        state.docs = docs;
        Ok(())
    }

    /// Current schema version and encrypted document lines, ready to hand
    /// to [`Journal::rewrite`] for a target directory. Used by `backup`.
    pub fn export_encrypted_docs(&self) -> Result<(SchemaVersion, Vec<Value>)> {
        let snapshot = self.snapshot();
        let docs: Result<Vec<Value>> = snapshot
            .docs
            .values()
            .map(|doc| encrypt_doc(&self.descriptor, self.cipher.as_deref(), doc))
            .collect();
        Ok((snapshot.schema_version, docs?))
    }

    /// Replace the collection's full contents, as used by a non-merging
    /// `restore`.
    pub fn replace_all(&self, schema_version: SchemaVersion, docs: Vec<Value>) -> Result<()> {
        let mut indexed = IndexMap::new();
        for doc in docs {
            let id = self.descriptor.get_id(&doc)?;
            indexed.insert(id, doc);
        }
        let mut guard = self.state.write().expect("collection lock poisoned");
        let state = Arc::make_mut(&mut guard);
        state.schema_version = schema_version;
        state.read_only = false;
        state.docs = indexed;
        self.persist(state)
    }

    /// Upsert every document in `docs` into the collection, as used by a
    /// merging `restore`.
    pub fn merge_all(&self, docs: Vec<Value>) -> Result<()> {
        let mut guard = self.state.write().expect("collection lock poisoned");
        self.reject_if_read_only(&guard)?;
        let state = Arc::make_mut(&mut guard);
        for doc in docs {
            let id = self.descriptor.get_id(&doc)?;
            state.docs.insert(id, doc);
        }
        self.persist(state)
    }

    /// Force a full reload from disk, discarding the in-memory state. Used
    /// after an external-edit notification from the file watcher.
    pub fn reload(&self) -> Result<()> {
        let loaded = Journal::load(&self.dir, &self.name)?;
        let read_only = schema::needs_read_only(loaded.schema_version, self.descriptor.schema_version);

        let mut docs = IndexMap::new();
        for raw in loaded.docs {
            let doc = decrypt_doc(&self.descriptor, self.cipher.as_deref(), raw)?;
            let id = self.descriptor.get_id(&doc)?;
            docs.insert(id, doc);
        }

        let mut guard = self.state.write().expect("collection lock poisoned");
        *guard = Arc::new(CollectionState {
            schema_version: loaded.schema_version,
            read_only,
            docs,
        });
        Ok(())
    }

    fn reject_if_read_only(&self, state: &CollectionState) -> Result<()> {
        if state.read_only {
            return Err(Error::CollectionReadOnly(self.name.clone()));
        }
        Ok(())
    }

    fn persist(&self, state: &CollectionState) -> Result<()> {
        let docs: Result<Vec<Value>> = state
            .docs
            .values()
            .map(|doc| encrypt_doc(&self.descriptor, self.cipher.as_deref(), doc))
            .collect();
        Journal::rewrite(&self.dir, &self.name, state.schema_version, &docs?)
    }
}

fn encrypt_doc(descriptor: &Descriptor, cipher: Option<&Cipher>, doc: &Value) -> Result<Value> {
    if descriptor.secret_fields.is_empty() {
        return Ok(doc.clone());
    }
    let cipher = cipher.ok_or_else(|| {
        Error::CipherError(format!(
            "collection '{}' declares secret fields but no cipher is configured",
            descriptor.collection
        ))
    })?;
    let mut encoded = doc.clone();
    for path in &descriptor.secret_fields {
        if let Some(value) = descriptor.get_field(&encoded, path) {
            let plaintext = value
                .as_str()
                .ok_or_else(|| Error::BadDescriptor(format!("secret field '{path}' is not a string")))?;
            let ciphertext = cipher.encrypt_field(plaintext)?;
            descriptor.set_field(&mut encoded, path, Value::String(ciphertext));
        }
    }
    Ok(encoded)
}

fn decrypt_doc(descriptor: &Descriptor, cipher: Option<&Cipher>, raw: Value) -> Result<Value> {
    if descriptor.secret_fields.is_empty() {
        return Ok(raw);
    }
    let cipher = cipher.ok_or_else(|| {
        Error::CipherError(format!(
            "collection '{}' declares secret fields but no cipher is configured",
            descriptor.collection
        ))
    })?;
    let mut decoded = raw;
    for path in &descriptor.secret_fields {
        if let Some(value) = descriptor.get_field(&decoded, path) {
            let payload = value
                .as_str()
                .ok_or_else(|| Error::BadDescriptor(format!("secret field '{path}' is not a string")))?;
            let plaintext = cipher.decrypt_field(payload)?;
            descriptor.set_field(&mut decoded, path, Value::String(plaintext));
        }
    }
    Ok(decoded)
}

/// The full set of open collections for one database directory.
pub struct Store {
    dir: PathBuf,
    registry: Registry,
    cipher: Option<Arc<Cipher>>,
    collections: RwLock<std::collections::HashMap<CollectionName, Arc<Collection>>>,
}

impl Store {
    pub fn open(dir: PathBuf, registry: Registry, cipher: Option<Arc<Cipher>>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Journal::discard_stale_temp_files(&dir)?;

        let mut collections = std::collections::HashMap::new();
        for name in registry.names() {
            let descriptor = registry.describe(name)?.clone();
            if Journal::exists(&dir, name) {
                let collection = Collection::load(&dir, descriptor, cipher.clone())?;
                collections.insert(name.to_string(), Arc::new(collection));
            }
        }

        Ok(Self {
            dir,
            registry,
            cipher,
            collections: RwLock::new(collections),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create a new, empty collection for an already-registered entity
    /// type/name. Fails if a file already exists for it.
    pub fn create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        let descriptor = self.registry.describe(name)?.clone();
        // `Collection::create` itself rejects a non-empty file on disk, so
        // a collection already tracked in `collections` (and thus backed by
        // a real file) fails there before we ever touch the map.
        let collection = Arc::new(Collection::create(&self.dir, descriptor, self.cipher.clone())?);
        let mut collections = self.collections.write().expect("store lock poisoned");
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().expect("store lock poisoned");
        if !collections.contains_key(name) {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        Journal::delete(&self.dir, &name.to_string())?;
        collections.remove(name);
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .expect("store lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Bring a collection under management if it isn't tracked yet but is
    /// both registered and backed by a file on disk — the case of a
    /// collection file that appeared after `Store::open`, implicitly
    /// becoming visible on first read per the Data Model's lifecycle.
    pub fn ensure_loaded(&self, name: &str) -> Result<Arc<Collection>> {
        if let Ok(existing) = self.collection(name) {
            return Ok(existing);
        }
        let descriptor = self.registry.describe(name)?.clone();
        if !Journal::exists(&self.dir, name) {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        let collection = Arc::new(Collection::load(&self.dir, descriptor, self.cipher.clone())?);
        let mut collections = self.collections.write().expect("store lock poisoned");
        let collection = collections.entry(name.to_string()).or_insert(collection).clone();
        Ok(collection)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.collections.read().expect("store lock poisoned").contains_key(name)
    }

    /// Collection names currently open, in lexicographic order — the fixed
    /// lock-acquisition order used by `backup`/`restore` to make multi-
    /// collection snapshots deadlock-free.
    pub fn names(&self) -> Vec<CollectionName> {
        let mut names: Vec<_> = self
            .collections
            .read()
            .expect("store lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// A consistent snapshot of every open collection, locked in
    /// lexicographic name order.
    pub fn snapshot_all(&self) -> Vec<(CollectionName, Arc<CollectionState>)> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let collection = self.collection(&name).ok()?;
                Some((name, collection.snapshot()))
            })
            .collect()
    }
}
