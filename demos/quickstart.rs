//! A short tour of parchment: open a database, register a type, insert,
//! query, and migrate a schema.

use parchment::{CollectionSchemaUpdate, Config, Database, Document, Registry};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize)]
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

fn main() -> parchment::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir().expect("create temp dir");

    let mut registry = Registry::new();
    registry.register::<Site>()?;
    registry.register::<Account>()?;

    let config = Config::new(dir.path()).with_cipher_secret("demo-only-secret");
    let db = Database::open(config, registry)?;

    db.create_collection("sites")?;
    db.create_collection("accounts")?;

    db.insert(&Site {
        id: "s1".into(),
        location: "US-East".into(),
        tier: "standard".into(),
    })?;
    db.insert(&Site {
        id: "s2".into(),
        location: "EU-Central".into(),
        tier: "premium".into(),
    })?;
    db.insert(&Account {
        id: "a1".into(),
        owner: "alice".into(),
        private_key: "sk-live-demo".into(),
    })?;

    let premium: Vec<Site> = db.find::<Site>("/.[tier = 'premium']")?;
    println!("premium sites: {premium:?}");

    let count = db.find_and_modify::<Site>(
        "/.[tier = 'standard']",
        &parchment::Update::new().set("tier", json!("premium")),
    )?;
    println!("upgraded {count} site(s) to premium");

    // Declarative, all-or-nothing schema migration: add a `region` field
    // defaulting to "unknown" for every existing document.
    let migration = CollectionSchemaUpdate::new(parchment::SchemaVersion::new(1, 1))
        .add("region", json!("unknown"));
    db.update_schema::<Site>(&migration)?;

    let backup_dir = dir.path().join("backup");
    db.backup(&backup_dir)?;
    println!("backed up to {}", backup_dir.display());

    db.shutdown();
    Ok(())
}
