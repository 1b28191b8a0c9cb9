//! End-to-end scenarios exercising the public `Database` facade against a
//! real temp-directory-backed store.

use parchment::{CollectionSchemaUpdate, Config, Database, Document, Error, FileEvent, Registry, TargetType, Update};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct Site {
    id: String,
    location: String,
    tier: String,
}

impl Document for Site {
    const COLLECTION: &'static str = "sites";
    const SCHEMA_VERSION: (u32, u32) = (1, 0);
    const ID_FIELD: &'static str = "id";
}

#[derive(Debug, Serialize, Deserialize)]
struct Account {
    id: String,
    owner: String,
    private_key: String,
}

impl Document for Account {
    const COLLECTION: &'static str = "accounts";
    const SCHEMA_VERSION: (u32, u32) = (1, 0);
    const ID_FIELD: &'static str = "id";
    const SECRET_FIELDS: &'static [&'static str] = &["private_key"];
}

fn no_watch(dir: &std::path::Path) -> Config {
    Config::new(dir).with_watch_enabled(false)
}

fn sites_registry() -> Registry {
    let mut r = Registry::new();
    r.register::<Site>().unwrap();
    r
}

#[test]
fn create_collection_and_insert_then_find_by_id() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();

    db.insert(&Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    })
    .unwrap();

    let found: Site = db.find_by_id::<Site>("s1").unwrap().unwrap();
    assert_eq!(found.location, "US-East");
    assert!(db.find_by_id::<Site>("missing").unwrap().is_none());
}

#[test]
fn schema_version_ahead_of_descriptor_opens_read_only_until_migrated() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("sites.json"),
        "{\"schemaVersion\":\"1.7\"}\n{\"id\":\"s1\",\"location\":\"US-East\",\"tier\":\"standard\"}\n",
    )
    .unwrap();

    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    let insert_result = db.insert(&Site {
        id: "s2".into(),
        location: "US-West".into(),
        tier: "standard".into(),
    });
    assert!(matches!(insert_result, Err(Error::CollectionReadOnly(_))));

    let migration = CollectionSchemaUpdate::new(parchment::SchemaVersion::new(1, 0))
        .add("tier", serde_json::json!("standard"));
    db.update_schema::<Site>(&migration).unwrap();

    db.insert(&Site {
        id: "s2".into(),
        location: "US-West".into(),
        tier: "standard".into(),
    })
    .unwrap();
    let found: Site = db.find_by_id::<Site>("s2").unwrap().unwrap();
    assert_eq!(found.location, "US-West");
}

#[test]
fn secret_field_is_encrypted_at_rest_and_readable_through_the_database() {
    let dir = tempdir().unwrap();
    let mut registry = Registry::new();
    registry.register::<Account>().unwrap();
    let config = no_watch(dir.path()).with_cipher_secret("integration-test-secret");
    let db = Database::open(config, registry).unwrap();
    db.create_collection("accounts").unwrap();

    db.insert(&Account {
        id: "a1".into(),
        owner: "alice".into(),
        private_key: "sk-live-abcdef".into(),
    })
    .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("accounts.json")).unwrap();
    assert!(!raw.contains("sk-live-abcdef"));

    let found: Account = db.find_by_id::<Account>("a1").unwrap().unwrap();
    assert_eq!(found.private_key, "sk-live-abcdef");
}

#[test]
fn query_selects_matching_documents_only() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();

    for (id, location, tier) in [
        ("s1", "US-East", "premium"),
        ("s2", "US-West", "standard"),
        ("s3", "EU-Central", "premium"),
    ] {
        db.insert(&Site {
            id: id.into(),
            location: location.into(),
            tier: tier.into(),
        })
        .unwrap();
    }

    let premium: Vec<Site> = db.find::<Site>("/.[tier = 'premium']").unwrap();
    let mut ids: Vec<_> = premium.iter().map(|s| s.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["s1".to_string(), "s3".to_string()]);
}

#[test]
fn find_and_modify_reports_the_number_of_matched_documents() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();

    for (id, tier) in [("s1", "standard"), ("s2", "standard"), ("s3", "premium")] {
        db.insert(&Site {
            id: id.into(),
            location: "US-East".into(),
            tier: tier.into(),
        })
        .unwrap();
    }

    let update = Update::new().set("tier", serde_json::json!("premium"));
    let count = db.find_and_modify::<Site>("/.[tier = 'standard']", &update).unwrap();
    assert_eq!(count, 2);

    let remaining_standard: Vec<Site> = db.find::<Site>("/.[tier = 'standard']").unwrap();
    assert!(remaining_standard.is_empty());
}

#[test]
fn external_edit_is_picked_up_by_the_file_watcher() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path())
        .with_watch_enabled(true)
        .with_watch_debounce(std::time::Duration::from_millis(50));
    let db = Database::open(config, sites_registry()).unwrap();
    db.create_collection("sites").unwrap();
    db.insert(&Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    })
    .unwrap();

    let seen: Arc<Mutex<Vec<FileEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    db.on_file_event(move |event| seen_clone.lock().unwrap().push(event));

    // Simulate an external process (editor, sync client) rewriting the
    // collection file directly on disk.
    std::fs::write(
        dir.path().join("sites.json"),
        "{\"schemaVersion\":\"1.0\"}\n{\"id\":\"s1\",\"location\":\"EU-Central\",\"tier\":\"standard\"}\n",
    )
    .unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while seen.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(25));
    }

    assert!(!seen.lock().unwrap().is_empty(), "expected at least one file event");
    let found: Site = db.find_by_id::<Site>("s1").unwrap().unwrap();
    assert_eq!(found.location, "EU-Central");
}

#[test]
fn backup_then_restore_into_a_fresh_database_round_trips() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();
    db.insert(&Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    })
    .unwrap();

    let backup_dir = tempdir().unwrap();
    db.backup(backup_dir.path()).unwrap();

    let restore_dir = tempdir().unwrap();
    let restored = Database::open(no_watch(restore_dir.path()), sites_registry()).unwrap();
    restored.restore(backup_dir.path(), false).unwrap();

    let found: Site = restored.find_by_id::<Site>("s1").unwrap().unwrap();
    assert_eq!(found.location, "US-East");
}

#[test]
fn remove_missing_document_reports_not_found() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();
    let result = db.remove::<Site>("missing");
    assert!(matches!(result, Err(Error::DocumentNotFound { .. })));
}

#[test]
fn save_requires_an_existing_document_while_upsert_does_not() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();

    let missing = Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    };
    assert!(matches!(db.save(&missing), Err(Error::DocumentNotFound { .. })));

    db.upsert(&missing).unwrap();
    let found: Site = db.find_by_id::<Site>("s1").unwrap().unwrap();
    assert_eq!(found.location, "US-East");

    db.save(&Site {
        location: "EU-West".into(),
        ..missing
    })
    .unwrap();
    let found: Site = db.find_by_id::<Site>("s1").unwrap().unwrap();
    assert_eq!(found.location, "EU-West");
}

#[test]
fn batch_insert_and_remove_are_all_or_nothing() {
    let dir = tempdir().unwrap();
    let db = Database::open(no_watch(dir.path()), sites_registry()).unwrap();
    db.create_collection("sites").unwrap();

    db.insert(&Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    })
    .unwrap();

    let batch = vec![
        Site {
            id: "s2".into(),
            location: "US-West".into(),
            tier: "standard".into(),
        },
        Site {
            id: "s1".into(),
            location: "duplicate".into(),
            tier: "standard".into(),
        },
    ];
    assert!(db.insert_many(&batch).is_err());
    assert!(db.find_by_id::<Site>("s2").unwrap().is_none());

    assert!(db.remove_many::<Site>(&["s1", "missing"]).is_err());
    assert!(db.find_by_id::<Site>("s1").unwrap().is_some());
}

#[test]
fn retype_migration_converts_scalar_fields_across_every_document() {
    let dir = tempdir().unwrap();
    #[derive(Debug, Serialize, Deserialize)]
    struct Server {
        id: String,
        port: f64,
    }
    impl Document for Server {
        const COLLECTION: &'static str = "servers";
        const SCHEMA_VERSION: (u32, u32) = (1, 0);
        const ID_FIELD: &'static str = "id";
    }
    let mut registry = Registry::new();
    registry.register::<Server>().unwrap();

    // Written by an older minor version where `port` was still a string.
    std::fs::write(
        dir.path().join("servers.json"),
        "{\"schemaVersion\":\"1.0\"}\n{\"id\":\"sv1\",\"port\":\"8080\"}\n{\"id\":\"sv2\",\"port\":\"9090\"}\n",
    )
    .unwrap();

    let db = Database::open(no_watch(dir.path()), registry).unwrap();
    let migration = CollectionSchemaUpdate::new(parchment::SchemaVersion::new(1, 0))
        .retype("port", TargetType::Number);
    db.update_schema::<Server>(&migration).unwrap();

    let found: Server = db.find_by_id::<Server>("sv1").unwrap().unwrap();
    assert_eq!(found.port, 8080.0);
    let found2: Server = db.find_by_id::<Server>("sv2").unwrap().unwrap();
    assert_eq!(found2.port, 9090.0);
}
