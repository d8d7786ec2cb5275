use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sealdb::codec::Codec;
use sealdb::config::BackupPolicy;
use sealdb::{DbConfig, Pipeline, Query, SealDbError, Store, TableConfig};
use serde_json::{json, Value};
use std::collections::HashSet;
use tempfile::TempDir;

fn open_store(tmp: &TempDir) -> Store {
    let config = DbConfig::new(tmp.path().join("app.sdb"), "integration-key")
        .with_table("users", TableConfig::default().with_unique("email"))
        .with_table("sales", TableConfig::default());
    Store::open(config).unwrap()
}

#[test]
fn juan_gets_the_first_key() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    store
        .insert("usuarios", json!({"nombre": "Juan", "edad": 25}))
        .unwrap();
    let juan = store.find_by_id("usuarios", 1).unwrap();
    assert_eq!(juan["nombre"], "Juan");
    assert_eq!(juan["edad"], json!(25));
}

#[test]
fn second_insert_with_same_email_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);

    let first = store
        .insert("users", json!({"name": "Ana", "email": "ana@example.com"}))
        .unwrap();
    let err = store
        .insert("users", json!({"name": "Impostor", "email": "ana@example.com"}))
        .unwrap_err();

    assert!(matches!(err, SealDbError::Uniqueness { .. }));
    assert_eq!(store.find_all("users"), vec![first]);
}

#[test]
fn sales_pipeline_orders_reps_by_total() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);
    let seed = [
        ("west", "ana", 100),
        ("west", "bo", 250),
        ("east", "ana", 900),
        ("west", "ana", 75),
        ("west", "cy", 40),
        ("west", "bo", 10),
    ];
    for (region, rep, amount) in seed {
        store
            .insert("sales", json!({"region": region, "rep": rep, "amount": amount}))
            .unwrap();
    }

    let pipeline = Pipeline::from_json(&json!([
        {"$match": {"region": "west"}},
        {"$group": {"_id": "$rep", "total": {"$sum": "$amount"}}},
        {"$sort": {"total": -1}}
    ]))
    .unwrap();
    let totals: Vec<(Value, Value)> = store
        .aggregate("sales", &pipeline)
        .into_iter()
        .map(|d| (d["_id"].clone(), d["total"].clone()))
        .collect();

    assert_eq!(
        totals,
        vec![
            (json!("bo"), json!(260)),
            (json!("ana"), json!(175)),
            (json!("cy"), json!(40)),
        ]
    );
}

#[test]
fn failed_transaction_leaves_table_untouched() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);
    store.insert("users", json!({"name": "Ana"})).unwrap();
    let before = store.find_all("users");

    let outcome = store.transaction(|s| {
        s.insert("users", json!({"name": "Bo", "email": "bo@example.com"}))?;
        s.update("users", 1, json!({"name": "Changed"}))?;
        s.insert("users", json!({"name": "Cy", "email": "bo@example.com"}))
    });

    assert!(matches!(outcome, Err(SealDbError::Uniqueness { .. })));
    assert_eq!(store.find_all("users"), before);

    // Reopening shows nothing from the failed transaction reached disk
    let config = store.config().clone();
    store.close();
    let store = Store::open(config).unwrap();
    assert_eq!(store.find_all("users"), before);
}

#[test]
fn random_workload_keeps_invariants() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);
    store.create_index("users", "team").unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut last_key = 0u64;

    for step in 0..300 {
        let email = format!("u{}@example.com", rng.gen_range(0..40));
        let team = format!("t{}", rng.gen_range(0..5));
        let wanted = json!(team);
        match rng.gen_range(0..3) {
            0 => {
                if let Ok(doc) = store.insert("users", json!({"email": email, "team": team, "step": step})) {
                    let key = doc["id"].as_u64().unwrap();
                    assert!(key > last_key, "key {key} after {last_key}");
                    last_key = key;
                }
            }
            1 => {
                let id = rng.gen_range(1..=last_key.max(1));
                let _ = store.update("users", id, json!({"email": email, "team": team}));
            }
            _ => {
                let id = rng.gen_range(1..=last_key.max(1));
                store.delete("users", id).unwrap();
            }
        }

        let docs = store.find_all("users");
        let mut emails = HashSet::new();
        for doc in &docs {
            assert!(emails.insert(doc["email"].to_string()), "duplicate email at step {step}");
        }
        // Index lookups agree with a full scan
        let via_index = store.find("users", &Query::all().eq("team", wanted.clone()));
        let via_scan: Vec<_> = docs.iter().filter(|d| d["team"] == wanted).cloned().collect();
        assert_eq!(via_index, via_scan);
    }
}

#[test]
fn file_is_encrypted_and_reloads() {
    let tmp = TempDir::new().unwrap();
    let mut store = open_store(&tmp);
    store
        .insert("users", json!({"name": "Secretive", "email": "s@example.com"}))
        .unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(!raw.contains("Secretive"));
    assert_eq!(raw.matches(':').count(), 1);

    let codec = Codec::new("integration-key");
    let db = codec.decode(raw.as_bytes()).unwrap();
    assert_eq!(db.table("users").unwrap()[0]["name"], "Secretive");
}

#[test]
fn configured_backup_policy_loads_from_yaml() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("sealdb.yaml");
    std::fs::write(
        &config_path,
        format!(
            "file: {}\nencryptionKey: k\nconnectionTimeout: 5000\nbackups:\n  - interval: 1\n",
            tmp.path().join("cfg.sdb").display()
        ),
    )
    .unwrap();

    let store = Store::open_path(&config_path).unwrap();
    assert_eq!(store.config().backups, vec![BackupPolicy::every_days(1.0)]);
    assert_eq!(store.stats().connection_timeout, Some(5000));
    store.close();
}
