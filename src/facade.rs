//! Operations Facade: the public surface of the database. Wraps [`Store`]
//! with typed (by entity type) and untyped (by collection name) entry
//! points, file-change listeners, backup/restore, and a reentrancy guard
//! around mutations.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::cipher::Cipher;
use crate::config::Config;
use crate::descriptor::{Document, Registry};
use crate::error::Result;
use crate::journal::Journal;
use crate::query::Query;
use crate::schema::CollectionSchemaUpdate;
use crate::store::{Collection, Store};
use crate::update::Update;
use crate::watcher::{FileEvent, Watcher};
use crate::{CollectionName, DocId, Error};

thread_local! {
    static ACTIVE_MUTATIONS: RefCell<HashSet<CollectionName>> = RefCell::new(HashSet::new());
}

/// Guards one collection against a mutation re-entering itself on the same
/// thread — e.g. a file-change listener calling back into the collection it
/// was invoked for while the original mutation's write lock is still held
/// further up the call stack. Without this the call would deadlock instead
/// of failing cleanly.
struct MutationGuard {
    collection: CollectionName,
}

impl MutationGuard {
    fn enter(collection: &str) -> Result<Self> {
        let acquired = ACTIVE_MUTATIONS.with(|set| set.borrow_mut().insert(collection.to_string()));
        if !acquired {
            return Err(Error::ReentrantMutation(collection.to_string()));
        }
        Ok(Self {
            collection: collection.to_string(),
        })
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        ACTIVE_MUTATIONS.with(|set| {
            set.borrow_mut().remove(&self.collection);
        });
    }
}

type Listener = Box<dyn Fn(FileEvent) + Send + Sync>;

/// An open database: a set of collections plus the ambient machinery
/// (encryption, file watching) that makes them behave like a single
/// embedded store.
pub struct Database {
    store: Arc<Store>,
    cipher: Option<Arc<Cipher>>,
    watcher: Option<Watcher>,
    listeners: RwLock<Vec<Listener>>,
}

impl Database {
    /// Open (creating if necessary) a database directory, with `registry`
    /// describing every entity type the caller will use.
    pub fn open(config: Config, registry: Registry) -> Result<Arc<Self>> {
        for name in registry.names() {
            let descriptor = registry.describe(name)?;
            if !descriptor.secret_fields.is_empty() && config.cipher_secret.is_none() {
                return Err(Error::Config(format!(
                    "collection '{name}' declares secret fields but no cipher_secret was configured"
                )));
            }
        }

        let cipher = config.cipher_secret.as_deref().map(|s| Arc::new(Cipher::new(s)));
        let store = Arc::new(Store::open(config.db_path.clone(), registry, cipher.clone())?);

        let db = Arc::new_cyclic(|weak: &Weak<Database>| {
            let watcher = if config.watch_enabled {
                let weak = weak.clone();
                Some(Watcher::spawn(&config.db_path, config.watch_debounce, move |event| {
                    if let Some(db) = weak.upgrade() {
                        db.handle_file_event(event);
                    }
                }))
            } else {
                None
            };
            Self {
                store,
                cipher,
                watcher,
                listeners: RwLock::new(Vec::new()),
            }
        });

        Ok(db)
    }

    fn handle_file_event(&self, event: FileEvent) {
        let name = match &event {
            FileEvent::Modified(n) | FileEvent::Added(n) | FileEvent::Deleted(n) => n.clone(),
        };
        if matches!(event, FileEvent::Modified(_) | FileEvent::Added(_)) {
            match self.store.collection(&name) {
                Ok(collection) => {
                    if let Err(e) = collection.reload() {
                        tracing::warn!(collection = %name, error = %e, "failed to reload collection after external change");
                    }
                }
                Err(_) => match self.store.ensure_loaded(&name) {
                    Ok(_) => {
                        tracing::info!(collection = %name, "picked up collection file created externally");
                    }
                    Err(e) => {
                        tracing::warn!(collection = %name, error = %e, "external change to untracked collection could not be loaded");
                    }
                },
            }
        }
        let listeners = self.listeners.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(event.clone());
        }
    }

    /// Register a callback invoked for every debounced external change to
    /// any collection file: `onCollectionFileModified`, `...Added`, and
    /// `...Deleted` in one stream, disambiguated by the `FileEvent` variant.
    pub fn on_file_event(&self, listener: impl Fn(FileEvent) + Send + Sync + 'static) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(Box::new(listener));
    }

    pub fn create_collection(&self, name: &str) -> Result<()> {
        self.store.create_collection(name)?;
        Ok(())
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.store.drop_collection(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    pub fn names(&self) -> Vec<CollectionName> {
        self.store.names()
    }

    // -- typed (by entity type) entry points -------------------------------

    pub fn insert<T: Document>(&self, doc: &T) -> Result<DocId> {
        self.insert_value(T::COLLECTION, to_value(doc)?)
    }

    /// Insert a batch of brand-new documents, all-or-nothing.
    pub fn insert_many<T: Document>(&self, docs: &[T]) -> Result<Vec<DocId>> {
        let values = docs.iter().map(to_value).collect::<Result<Vec<_>>>()?;
        self.insert_many_value(T::COLLECTION, values)
    }

    /// Replace an existing document. Fails with `DocumentNotFound` if no
    /// document with that id exists yet.
    pub fn save<T: Document>(&self, doc: &T) -> Result<DocId> {
        self.save_value(T::COLLECTION, to_value(doc)?)
    }

    /// Insert-or-replace a single document: never fails on pre-existence.
    pub fn upsert<T: Document>(&self, doc: &T) -> Result<DocId> {
        self.upsert_value(T::COLLECTION, to_value(doc)?)
    }

    /// Insert-or-replace a batch of documents: never fails on pre-existence.
    pub fn upsert_many<T: Document>(&self, docs: &[T]) -> Result<Vec<DocId>> {
        let values = docs.iter().map(to_value).collect::<Result<Vec<_>>>()?;
        self.upsert_many_value(T::COLLECTION, values)
    }

    pub fn find_by_id<T: Document>(&self, id: &str) -> Result<Option<T>> {
        self.find_by_id_value(T::COLLECTION, id)?.map(from_value).transpose()
    }

    pub fn find<T: Document>(&self, query: &str) -> Result<Vec<T>> {
        self.find_value(T::COLLECTION, query)?.into_iter().map(from_value).collect()
    }

    pub fn find_one<T: Document>(&self, query: &str) -> Result<Option<T>> {
        self.find_one_value(T::COLLECTION, query)?.map(from_value).transpose()
    }

    pub fn remove<T: Document>(&self, id: &str) -> Result<()> {
        self.remove_value(T::COLLECTION, id)
    }

    /// Remove a batch of documents by id, all-or-nothing.
    pub fn remove_many<T: Document>(&self, ids: &[&str]) -> Result<()> {
        self.remove_many_value(T::COLLECTION, ids)
    }

    pub fn find_and_modify<T: Document>(&self, query: &str, update: &Update) -> Result<usize> {
        self.find_and_modify_value(T::COLLECTION, query, update)
    }

    pub fn find_and_remove<T: Document>(&self, query: &str) -> Result<usize> {
        self.find_and_remove_value(T::COLLECTION, query)
    }

    pub fn update_schema<T: Document>(&self, update: &CollectionSchemaUpdate) -> Result<()> {
        self.update_schema_value(T::COLLECTION, update)
    }

    // -- untyped (by collection name) entry points -------------------------

    pub fn insert_value(&self, collection: &str, doc: Value) -> Result<DocId> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.insert(doc)
    }

    pub fn insert_many_value(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocId>> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.insert_many(docs)
    }

    pub fn save_value(&self, collection: &str, doc: Value) -> Result<DocId> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.save(doc)
    }

    pub fn upsert_value(&self, collection: &str, doc: Value) -> Result<DocId> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.upsert(doc)
    }

    pub fn upsert_many_value(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocId>> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.upsert_many(docs)
    }

    pub fn find_by_id_value(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.store.collection(collection)?.find_by_id(id))
    }

    pub fn find_value(&self, collection: &str, query: &str) -> Result<Vec<Value>> {
        let query = Query::parse(query)?;
        Ok(self.store.collection(collection)?.find(&query))
    }

    pub fn find_one_value(&self, collection: &str, query: &str) -> Result<Option<Value>> {
        let query = Query::parse(query)?;
        Ok(self.store.collection(collection)?.find_one(&query))
    }

    pub fn remove_value(&self, collection: &str, id: &str) -> Result<()> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.remove(id)
    }

    pub fn remove_many_value(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.remove_many(ids)
    }

    pub fn find_and_modify_value(&self, collection: &str, query: &str, update: &Update) -> Result<usize> {
        let _guard = MutationGuard::enter(collection)?;
        let query = Query::parse(query)?;
        self.store.collection(collection)?.find_and_modify(&query, update)
    }

    pub fn find_and_remove_value(&self, collection: &str, query: &str) -> Result<usize> {
        let _guard = MutationGuard::enter(collection)?;
        let query = Query::parse(query)?;
        self.store.collection(collection)?.find_and_remove(&query)
    }

    pub fn update_schema_value(&self, collection: &str, update: &CollectionSchemaUpdate) -> Result<()> {
        let _guard = MutationGuard::enter(collection)?;
        self.store.collection(collection)?.update_schema(update)
    }

    // -- whole-database operations ------------------------------------------

    /// Write a self-contained copy of every collection to `dest`, visiting
    /// collections in lexicographic order so concurrent backups and
    /// multi-collection mutations can never deadlock against each other.
    pub fn backup(&self, dest: &std::path::Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        for name in self.store.names() {
            let collection = self.store.collection(&name)?;
            let (schema_version, docs) = collection.export_encrypted_docs()?;
            Journal::rewrite(dest, &name, schema_version, &docs)?;
        }
        Ok(())
    }

    /// Load a database previously written by [`Database::backup`]. With
    /// `merge = false`, each collection present in `src` fully replaces the
    /// corresponding live collection. With `merge = true`, documents are
    /// upserted by id instead.
    pub fn restore(&self, src: &std::path::Path, merge: bool) -> Result<()> {
        for name in self.store.registry().names() {
            if !Journal::exists(src, name) {
                continue;
            }
            let descriptor = self.store.registry().describe(name)?.clone();
            let cipher = if descriptor.secret_fields.is_empty() {
                None
            } else {
                self.cipher.clone()
            };
            let loaded = Collection::load(src, descriptor, cipher)?;
            let snapshot = loaded.snapshot();
            let docs: Vec<Value> = snapshot.docs.values().cloned().collect();

            if !self.store.exists(name) {
                self.store.create_collection(name)?;
            }
            let collection = self.store.collection(name)?;
            let _guard = MutationGuard::enter(name)?;
            if merge {
                collection.merge_all(docs)?;
            } else {
                collection.replace_all(snapshot.schema_version, docs)?;
            }
        }
        Ok(())
    }

    /// Stop the file watcher and drop every listener. Collections remain
    /// readable/writable; this only tears down the ambient machinery.
    pub fn shutdown(&self) {
        tracing::info!("shutting down database");
        self.listeners.write().expect("listener lock poisoned").clear();
    }
}

fn to_value<T: serde::Serialize>(doc: &T) -> Result<Value> {
    serde_json::to_value(doc).map_err(|e| Error::InvalidDocument(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidDocument(e.to_string()))
}
