use crate::codec;
use crate::config::TableConfig;
use crate::document::{
    get_path, now_timestamp, strip_metadata, value_key, Document, CREATED_AT, UPDATED_AT,
};
use crate::error::{Result, SealDbError};
use crate::store::{Database, KeyAllocator, Store};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// How imported tables combine with the existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Add documents to the existing tables, matched by primary key.
    #[default]
    Merge,
    /// Discard the whole database and take the imported one.
    Replace,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// In merge mode, replace documents whose primary key already exists.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Tables to export; all tables when `None`.
    pub tables: Option<Vec<String>>,
    pub exclude_metadata: bool,
}

impl Store {
    /// Load documents from a JSON file shaped `{ "table": [ {..}, .. ], .. }`.
    ///
    /// Documents whose primary key is taken are skipped, or replace the holder
    /// when `overwrite` is set. Documents that would repeat a unique value held
    /// by another document are skipped. Imported rows are not schema-validated.
    pub fn import_from_json(&mut self, path: &Path, options: ImportOptions) -> Result<ImportReport> {
        let content = std::fs::read_to_string(path)?;
        let source: Value = serde_json::from_str(&content)?;
        let tables = parse_import(&source)?;

        let mut report = ImportReport::default();
        match options.mode {
            ImportMode::Replace => {
                let mut db = Database::new();
                for (table, docs) in tables {
                    let config = self.table_config(&table);
                    let mut rows = Vec::with_capacity(docs.len());
                    merge_into(&mut rows, &table, &config, docs, false, &mut self.keys, &mut report);
                    db.insert_table(&table, rows);
                }
                self.db = db;
                for name in self.config.tables.keys() {
                    self.db.create(name);
                }
            }
            ImportMode::Merge => {
                for (table, docs) in tables {
                    let config = self.table_config(&table);
                    self.db.create(&table);
                    let rows = self
                        .db
                        .table_mut(&table)
                        .ok_or_else(|| SealDbError::TableNotFound(table.clone()))?;
                    merge_into(rows, &table, &config, docs, options.overwrite, &mut self.keys, &mut report);
                }
            }
        }

        self.rebuild_derived();
        self.persist()?;
        log::info!(
            "Imported {}: {} inserted, {} replaced, {} skipped",
            path.display(),
            report.inserted,
            report.replaced,
            report.skipped
        );
        Ok(report)
    }

    /// Write tables as pretty JSON in the shape [`import_from_json`](Self::import_from_json)
    /// reads. Returns the number of documents written.
    pub fn export_to_json(&self, path: &Path, options: ExportOptions) -> Result<usize> {
        let names: Vec<String> = match options.tables {
            Some(names) => names,
            None => self.table_names(),
        };

        let mut out = Map::new();
        let mut written = 0;
        for name in names {
            let docs = self
                .db
                .table(&name)
                .ok_or_else(|| SealDbError::TableNotFound(name.clone()))?;
            let rows: Vec<Value> = docs
                .iter()
                .cloned()
                .map(|mut doc| {
                    if options.exclude_metadata {
                        strip_metadata(&mut doc);
                    }
                    Value::Object(doc)
                })
                .collect();
            written += rows.len();
            out.insert(name, Value::Array(rows));
        }

        let json = serde_json::to_string_pretty(&Value::Object(out))?;
        codec::write_file(path, json.as_bytes())?;
        log::info!("Exported {written} documents to {}", path.display());
        Ok(written)
    }
}

/// Check the whole import shape before anything is touched.
fn parse_import(source: &Value) -> Result<Vec<(String, Vec<Document>)>> {
    let Some(tables) = source.as_object() else {
        return Err(SealDbError::Validation(
            "Import file must be a JSON object of table name to document array".to_string(),
        ));
    };
    let mut parsed = Vec::with_capacity(tables.len());
    for (table, docs) in tables {
        let Some(docs) = docs.as_array() else {
            return Err(SealDbError::Validation(format!(
                "Import table '{table}' must be an array of documents"
            )));
        };
        let mut rows = Vec::with_capacity(docs.len());
        for (i, doc) in docs.iter().enumerate() {
            match doc {
                Value::Object(map) => rows.push(map.clone()),
                _ => {
                    return Err(SealDbError::Validation(format!(
                        "Import table '{table}' entry {i} is not an object"
                    )))
                }
            }
        }
        parsed.push((table.clone(), rows));
    }
    Ok(parsed)
}

fn merge_into(
    rows: &mut Vec<Document>,
    table: &str,
    config: &TableConfig,
    incoming: Vec<Document>,
    overwrite: bool,
    keys: &mut KeyAllocator,
    report: &mut ImportReport,
) {
    let pk = config.primary_key.as_str();
    let mut positions: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.get(pk).filter(|v| !v.is_null()).map(|v| (value_key(v), i)))
        .collect();
    // Unique values already in the table, with the position holding each
    let mut taken: HashMap<(&str, String), usize> = HashMap::new();
    for (i, doc) in rows.iter().enumerate() {
        for held in unique_keys(doc, &config.unique) {
            taken.entry(held).or_insert(i);
        }
    }

    // Explicit keys first, so allocated ones cannot collide with them
    for doc in &incoming {
        if let Some(key) = doc.get(pk) {
            keys.observe(table, key);
        }
    }

    for doc in incoming {
        let doc = with_key_and_stamps(doc, table, pk, keys);
        let key = doc.get(pk).map(value_key).unwrap_or_default();
        let target = match positions.get(&key) {
            Some(_) if !overwrite => {
                report.skipped += 1;
                continue;
            }
            found => found.copied(),
        };

        let claimed = unique_keys(&doc, &config.unique);
        if let Some((field, _)) = claimed
            .iter()
            .find(|held| matches!(taken.get(*held), Some(&i) if Some(i) != target))
        {
            log::debug!("Skipped import into {table}: {field} value already taken");
            report.skipped += 1;
            continue;
        }

        let position = match target {
            Some(i) => {
                for held in unique_keys(&rows[i], &config.unique) {
                    if taken.get(&held) == Some(&i) {
                        taken.remove(&held);
                    }
                }
                rows[i] = doc;
                report.replaced += 1;
                i
            }
            None => {
                positions.insert(key, rows.len());
                rows.push(doc);
                report.inserted += 1;
                rows.len() - 1
            }
        };
        for held in claimed {
            taken.insert(held, position);
        }
    }
}

/// Value keys of the non-null unique fields of `doc`.
fn unique_keys<'f>(doc: &Document, fields: &'f [String]) -> Vec<(&'f str, String)> {
    fields
        .iter()
        .filter_map(|field| {
            get_path(doc, field)
                .filter(|v| !v.is_null())
                .map(|v| (field.as_str(), value_key(v)))
        })
        .collect()
}

fn with_key_and_stamps(doc: Document, table: &str, pk: &str, keys: &mut KeyAllocator) -> Document {
    let mut doc = if doc.get(pk).map_or(true, Value::is_null) {
        let mut keyed = Map::new();
        keyed.insert(pk.to_string(), Value::from(keys.allocate(table)));
        keyed.extend(doc.into_iter().filter(|(field, _)| field != pk));
        keyed
    } else {
        doc
    };

    if !doc.contains_key(CREATED_AT) {
        doc.insert(CREATED_AT.to_string(), Value::String(now_timestamp()));
    }
    if !doc.contains_key(UPDATED_AT) {
        let created = doc.get(CREATED_AT).cloned().unwrap_or(Value::Null);
        doc.insert(UPDATED_AT.to_string(), created);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, TableConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_store(tmp: &TempDir) -> Store {
        let config = DbConfig::new(tmp.path().join("data.sdb"), "transfer-key")
            .with_table("users", TableConfig::default().with_unique("email"));
        Store::open(config).unwrap()
    }

    fn write_json(tmp: &TempDir, name: &str, value: Value) -> std::path::PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_merge_skips_existing_keys() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"name": "Ana", "email": "ana@x.io"})).unwrap();

        let source = write_json(
            &tmp,
            "in.json",
            json!({"users": [
                {"id": 1, "name": "Other Ana"},
                {"id": 5, "name": "Bo"},
                {"name": "Cy"}
            ]}),
        );
        let report = store.import_from_json(&source, ImportOptions::default()).unwrap();
        assert_eq!(report, ImportReport { inserted: 2, replaced: 0, skipped: 1 });

        assert_eq!(store.find_by_id("users", 1).unwrap()["name"], "Ana");
        assert_eq!(store.find_by_id("users", 5).unwrap()["name"], "Bo");
        // Keyless documents are keyed past every explicit key
        let cy = store.find_one("users", &crate::query::Query::all().eq("name", json!("Cy"))).unwrap();
        assert_eq!(cy["id"], json!(6));
        assert!(cy.contains_key(CREATED_AT));
        assert_eq!(cy[CREATED_AT], cy[UPDATED_AT]);
    }

    #[test]
    fn test_merge_overwrite_replaces() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"name": "Ana"})).unwrap();

        let source = write_json(&tmp, "in.json", json!({"users": [{"id": 1, "name": "Ana B"}]}));
        let report = store
            .import_from_json(&source, ImportOptions { mode: ImportMode::Merge, overwrite: true })
            .unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(store.count("users", None), 1);
        assert_eq!(store.find_by_id("users", 1).unwrap()["name"], "Ana B");
    }

    #[test]
    fn test_merge_skips_taken_unique_values() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"email": "a@x"})).unwrap();

        let source = write_json(
            &tmp,
            "in.json",
            json!({"users": [
                {"id": 9, "email": "a@x"},
                {"id": 10, "email": "b@x"},
                {"id": 11, "email": "b@x"}
            ]}),
        );
        let report = store.import_from_json(&source, ImportOptions::default()).unwrap();
        assert_eq!(report, ImportReport { inserted: 1, replaced: 0, skipped: 2 });
        assert!(store.find_by_id("users", 9).is_none());

        // Updates and inserts still see each value as taken exactly once
        assert!(store.update("users", 10, json!({"email": "a@x"})).is_err());
        assert!(store.insert("users", json!({"email": "a@x"})).is_err());
        store.delete("users", 1).unwrap();
        store.insert("users", json!({"email": "a@x"})).unwrap();
        let holders = store.find("users", &crate::query::Query::all().eq("email", json!("a@x")));
        assert_eq!(holders.len(), 1);
    }

    #[test]
    fn test_overwrite_keeps_unique_values_distinct() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"email": "a@x"})).unwrap();
        store.insert("users", json!({"email": "b@x"})).unwrap();

        let source = write_json(
            &tmp,
            "in.json",
            json!({"users": [{"id": 1, "email": "a@x", "name": "kept"}, {"id": 2, "email": "a@x"}]}),
        );
        let report = store
            .import_from_json(&source, ImportOptions { mode: ImportMode::Merge, overwrite: true })
            .unwrap();
        // Replacing a document with its own value is fine; taking another's is not
        assert_eq!(report, ImportReport { inserted: 0, replaced: 1, skipped: 1 });
        assert_eq!(store.find_by_id("users", 1).unwrap()["name"], "kept");
        assert_eq!(store.find_by_id("users", 2).unwrap()["email"], "b@x");
    }

    #[test]
    fn test_replace_discards_existing_tables() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("notes", json!({"text": "gone"})).unwrap();

        let source = write_json(&tmp, "in.json", json!({"items": [{"sku": "a"}, {"sku": "b"}]}));
        let report = store
            .import_from_json(&source, ImportOptions { mode: ImportMode::Replace, overwrite: false })
            .unwrap();
        assert_eq!(report.inserted, 2);
        assert!(!store.has_table("notes"));
        // Configured tables come back empty
        assert!(store.has_table("users"));
        assert_eq!(store.count("items", None), 2);
        assert_eq!(store.find_by_id("items", 2).unwrap()["sku"], "b");
    }

    #[test]
    fn test_import_rejects_bad_shape_without_changes() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"name": "Ana"})).unwrap();

        let source = write_json(&tmp, "bad.json", json!({"users": [{"id": 9}, 42]}));
        let err = store.import_from_json(&source, ImportOptions::default()).unwrap_err();
        assert!(matches!(err, SealDbError::Validation(_)));
        assert_eq!(store.count("users", None), 1);
    }

    #[test]
    fn test_export_then_import_into_fresh_store() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"name": "Ana", "email": "ana@x.io"})).unwrap();
        store.insert("users", json!({"name": "Bo", "email": "bo@x.io"})).unwrap();

        let out = tmp.path().join("out.json");
        assert_eq!(store.export_to_json(&out, ExportOptions::default()).unwrap(), 2);

        let other = TempDir::new().unwrap();
        let mut fresh = setup_store(&other);
        fresh.import_from_json(&out, ImportOptions::default()).unwrap();
        assert_eq!(fresh.find_all("users"), store.find_all("users"));

        // Registry rebuilt from imported rows
        let err = fresh
            .insert("users", json!({"name": "Dup", "email": "bo@x.io"}))
            .unwrap_err();
        assert!(matches!(err, SealDbError::Uniqueness { .. }));
    }

    #[test]
    fn test_export_selected_tables_without_metadata() {
        let tmp = TempDir::new().unwrap();
        let mut store = setup_store(&tmp);
        store.insert("users", json!({"name": "Ana"})).unwrap();
        store.insert("notes", json!({"text": "hi"})).unwrap();

        let out = tmp.path().join("notes.json");
        let options = ExportOptions {
            tables: Some(vec!["notes".to_string()]),
            exclude_metadata: true,
        };
        store.export_to_json(&out, options).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written, json!({"notes": [{"id": 1, "text": "hi"}]}));
    }

    #[test]
    fn test_export_unknown_table() {
        let tmp = TempDir::new().unwrap();
        let store = setup_store(&tmp);
        let options = ExportOptions {
            tables: Some(vec!["ghosts".to_string()]),
            exclude_metadata: false,
        };
        let err = store.export_to_json(&tmp.path().join("x.json"), options).unwrap_err();
        assert!(matches!(err, SealDbError::TableNotFound(t) if t == "ghosts"));
    }
}
