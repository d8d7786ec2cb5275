mod database;
mod keys;
mod transaction;

pub use database::Database;
pub use keys::KeyAllocator;

use crate::aggregate::Pipeline;
use crate::backup::BackupScheduler;
use crate::codec::{self, Codec};
use crate::config::{parse_config, validate_config, validate_table, DbConfig, TableConfig};
use crate::document::{
    display_value, now_timestamp, values_equal, Document, CREATED_AT, UPDATED_AT,
};
use crate::error::{Result, SealDbError};
use crate::index::IndexManager;
use crate::query::Query;
use crate::unique::UniquenessRegistry;
use crate::validation;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The main entry point for SealDB.
/// Owns the decrypted database, its derived indexes and uniqueness registry,
/// and rewrites the encrypted file after every mutation.
pub struct Store {
    pub(crate) config: DbConfig,
    pub(crate) path: PathBuf,
    pub(crate) codec: Codec,
    pub(crate) db: Database,
    pub(crate) table_configs: HashMap<String, TableConfig>,
    pub(crate) indexes: IndexManager,
    pub(crate) unique: UniquenessRegistry,
    pub(crate) keys: KeyAllocator,
    /// Held while the data file is written or copied.
    pub(crate) file_lock: Arc<Mutex<()>>,
    pub(crate) tx_depth: usize,
    pub(crate) schedulers: Vec<BackupScheduler>,
}

/// Per-table figures reported by [`Store::stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub documents: usize,
    pub primary_key: String,
    pub indexes: Vec<String>,
    pub unique: Vec<String>,
    pub next_id: u64,
}

/// Store-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub file: PathBuf,
    pub file_size: u64,
    pub tables: usize,
    pub documents: usize,
    pub table_stats: BTreeMap<String, TableStats>,
    pub connection_timeout: Option<u64>,
}

impl Store {
    /// Open the store described by `config`, decrypting the data file if it exists.
    /// A missing file starts an empty database and is written immediately.
    pub fn open(config: DbConfig) -> Result<Self> {
        validate_config(&config)?;
        let path = config.file.clone();
        let codec = Codec::new(&config.encryption_key);

        let existing = path.exists();
        let db = if existing {
            let bytes = std::fs::read(&path).map_err(|e| {
                SealDbError::Load(format!("cannot read {}: {e}", path.display()))
            })?;
            codec.decode(&bytes).map_err(|e| {
                SealDbError::Load(format!("cannot decode {}: {e}", path.display()))
            })?
        } else {
            Database::new()
        };

        let mut store = Store {
            table_configs: config.tables.clone(),
            config,
            path,
            codec,
            db,
            indexes: IndexManager::new(),
            unique: UniquenessRegistry::new(),
            keys: KeyAllocator::new(),
            file_lock: Arc::new(Mutex::new(())),
            tx_depth: 0,
            schedulers: Vec::new(),
        };

        store.load_runtime_tables()?;
        store.create_configured_tables();
        store.rebuild_derived();

        if !existing {
            store.save_now()?;
        }

        let periods = store
            .config
            .backups
            .iter()
            .map(|p| p.period())
            .collect::<Result<Vec<Duration>>>()?;
        for period in periods {
            store.start_backup_scheduler(period)?;
        }

        log::info!(
            "Opened {} ({} tables, {} documents)",
            store.path.display(),
            store.db.len(),
            store.db.total_documents()
        );
        Ok(store)
    }

    /// Parse a YAML/JSON configuration file and open the store it describes.
    pub fn open_path(config_path: &Path) -> Result<Self> {
        let config = parse_config(config_path)?;
        Self::open(config)
    }

    /// Stop background backups and release the store.
    pub fn close(mut self) {
        for scheduler in &mut self.schedulers {
            scheduler.stop();
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn table_names(&self) -> Vec<String> {
        self.db.names().map(str::to_string).collect()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.db.contains(table)
    }

    /// Effective configuration of a table (runtime override, configured, or default).
    pub fn table_config(&self, table: &str) -> TableConfig {
        self.table_configs
            .get(table)
            .cloned()
            .unwrap_or_else(|| self.config.table(table))
    }

    fn create_configured_tables(&mut self) {
        let names: Vec<String> = self.config.tables.keys().cloned().collect();
        for name in names {
            self.db.create(&name);
        }
    }

    /// Rebuild indexes, the uniqueness registry and key counters from the
    /// database. User-created indexes survive; the primary key is always indexed.
    pub(crate) fn rebuild_derived(&mut self) {
        let mut indexes = IndexManager::new();
        let mut unique = UniquenessRegistry::new();

        for (name, docs) in self.db.tables() {
            let config = self
                .table_configs
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.config.table(name));

            let mut fields = self.indexes.indexed_fields(name);
            if !fields.contains(&config.primary_key) {
                fields.push(config.primary_key.clone());
            }
            for field in &fields {
                indexes.create(name, field, docs);
            }

            unique.rebuild_table(name, &config.unique, docs);
            self.keys.recalculate(name, &config.primary_key, docs);
        }

        self.indexes = indexes;
        self.unique = unique;
        log::debug!("Rebuilt derived state for {} tables", self.db.len());
    }

    /// Write the database unless a transaction defers it.
    pub(crate) fn persist(&mut self) -> Result<()> {
        if self.tx_depth > 0 {
            return Ok(());
        }
        self.save_now()
    }

    /// Encrypt and rewrite the data file. On failure the in-memory state is
    /// already changed and stays ahead of the file until the next successful save.
    pub(crate) fn save_now(&self) -> Result<()> {
        let bytes = self
            .codec
            .encode(&self.db)
            .map_err(|e| SealDbError::Save(format!("cannot encode database: {e}")))?;
        let runtime = self.runtime_tables();
        let sidecar = if runtime.is_empty() {
            None
        } else {
            let plaintext = serde_json::to_vec(&runtime)?;
            Some(self.codec.encrypt(&plaintext).map_err(|e| {
                SealDbError::Save(format!("cannot encode table settings: {e}"))
            })?)
        };

        let _guard = self.file_lock.lock();
        codec::write_file(&self.path, &bytes)
            .map_err(|e| SealDbError::Save(format!("cannot write {}: {e}", self.path.display())))?;

        let sidecar_path = self.runtime_tables_path();
        let written = match sidecar {
            Some(payload) => codec::write_file(&sidecar_path, payload.as_bytes()),
            None if sidecar_path.exists() => std::fs::remove_file(&sidecar_path),
            None => Ok(()),
        };
        written.map_err(|e| {
            SealDbError::Save(format!("cannot write {}: {e}", sidecar_path.display()))
        })?;

        log::debug!("Saved {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }

    /// Encrypted file beside the data file holding the settings of tables
    /// created at runtime: `<file>.tables`.
    pub fn runtime_tables_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tables");
        PathBuf::from(name)
    }

    /// Settings of tables that exist but are not declared in the configuration.
    fn runtime_tables(&self) -> BTreeMap<&str, &TableConfig> {
        self.table_configs
            .iter()
            .filter(|(name, _)| !self.config.tables.contains_key(*name) && self.db.contains(name))
            .map(|(name, table)| (name.as_str(), table))
            .collect()
    }

    fn load_runtime_tables(&mut self) -> Result<()> {
        let path = self.runtime_tables_path();
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| SealDbError::Load(format!("cannot read {}: {e}", path.display())))?;
        let plaintext = self
            .codec
            .decrypt(&bytes)
            .map_err(|e| SealDbError::Load(format!("cannot decode {}: {e}", path.display())))?;
        let tables: BTreeMap<String, TableConfig> = serde_json::from_slice(&plaintext)
            .map_err(|e| SealDbError::Load(format!("cannot parse {}: {e}", path.display())))?;

        for (name, table) in tables {
            // Declared settings win; settings of vanished tables are dropped on the next save
            if self.config.tables.contains_key(&name) || !self.db.contains(&name) {
                continue;
            }
            log::debug!("Loaded runtime settings for table {name}");
            self.table_configs.insert(name, table);
        }
        Ok(())
    }

    /// Start an extra periodic backup beside the configured ones.
    pub fn start_backup_scheduler(&mut self, interval: Duration) -> Result<()> {
        let scheduler = BackupScheduler::start(
            interval,
            self.path.clone(),
            self.config.resolved_backup_dir(),
            Arc::clone(&self.file_lock),
        )?;
        self.schedulers.push(scheduler);
        Ok(())
    }

    // ── Tables ───────────────────────────────────────────────────────

    /// Create a table. `config` overrides the default table settings and is
    /// saved beside the data file so it survives a reopen. A table declared in
    /// the configuration keeps its declared settings.
    /// Returns false if the table already exists.
    pub fn create_table(&mut self, table: &str, config: Option<TableConfig>) -> Result<bool> {
        if let Some(config) = &config {
            validate_table(table, config)?;
            if let Some(declared) = self.config.tables.get(table) {
                if declared != config {
                    return Err(SealDbError::Configuration(format!(
                        "table '{table}' is declared in the configuration with other settings"
                    )));
                }
            }
        }
        if self.db.contains(table) {
            return Ok(false);
        }
        if let Some(config) = config {
            self.table_configs.insert(table.to_string(), config);
        }
        self.create_table_in_memory(table);
        self.persist()?;
        Ok(true)
    }

    fn create_table_in_memory(&mut self, table: &str) {
        let config = self.table_config(table);
        self.db.create(table);
        self.indexes.create(table, &config.primary_key, &[]);
        self.unique.rebuild_table(table, &config.unique, &[]);
        self.keys.recalculate(table, &config.primary_key, &[]);
    }

    /// Drop a table with its indexes, unique registry and key counter.
    pub fn drop_table(&mut self, table: &str) -> Result<bool> {
        if !self.db.drop_table(table) {
            return Ok(false);
        }
        self.indexes.drop_table(table);
        self.unique.drop_table(table);
        self.keys.drop_table(table);
        if !self.config.tables.contains_key(table) {
            self.table_configs.remove(table);
        }
        self.persist()?;
        Ok(true)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a document, creating the table on first use. Returns the stored
    /// document with its primary key and timestamps.
    pub fn insert(&mut self, table: &str, doc: Value) -> Result<Document> {
        let data = into_document(doc)?;
        let config = self.table_config(table);
        let pk = config.primary_key.as_str();

        let supplied_key = data.get(pk).filter(|v| !v.is_null()).cloned();
        let key = match &supplied_key {
            Some(key) => {
                if self.position_of(table, key).is_some() {
                    return Err(SealDbError::Uniqueness {
                        table: table.to_string(),
                        field: pk.to_string(),
                        value: display_value(key),
                    });
                }
                key.clone()
            }
            None => {
                // Skip counter values an explicit key already occupies
                while self
                    .position_of(table, &Value::from(self.keys.peek(table)))
                    .is_some()
                {
                    self.keys.allocate(table);
                }
                Value::from(self.keys.peek(table))
            }
        };

        // Primary key first, then the caller's fields in their order
        let mut doc = Map::new();
        doc.insert(pk.to_string(), key.clone());
        for (field, value) in data {
            if field != pk {
                doc.insert(field, value);
            }
        }

        validation::ensure_valid(table, &config, &doc)?;
        if let Some((field, value)) = self.unique.find_conflict(table, &doc) {
            return Err(SealDbError::Uniqueness {
                table: table.to_string(),
                field,
                value: display_value(&value),
            });
        }

        // Checks passed: from here on the insert happens
        match &supplied_key {
            Some(k) => self.keys.observe(table, k),
            None => {
                self.keys.allocate(table);
            }
        }
        let now = now_timestamp();
        doc.insert(CREATED_AT.to_string(), Value::String(now.clone()));
        doc.insert(UPDATED_AT.to_string(), Value::String(now));

        if !self.db.contains(table) {
            self.create_table_in_memory(table);
        }
        let docs = self
            .db
            .table_mut(table)
            .ok_or_else(|| SealDbError::TableNotFound(table.to_string()))?;
        let position = docs.len();
        docs.push(doc.clone());
        self.indexes.add_document(table, position, &doc);
        self.unique.add_document(table, &doc);

        self.persist()?;
        Ok(doc)
    }

    /// Insert any serializable value as a document.
    pub fn insert_as<T: Serialize>(&mut self, table: &str, data: &T) -> Result<Document> {
        let value = serde_json::to_value(data)?;
        self.insert(table, value)
    }

    /// Merge `patch` into the document with primary key `id`.
    /// Returns `None` if no such document exists.
    pub fn update(
        &mut self,
        table: &str,
        id: impl Into<Value>,
        patch: Value,
    ) -> Result<Option<Document>> {
        let id = id.into();
        let patch = into_document(patch)?;
        let Some(position) = self.position_of(table, &id) else {
            return Ok(None);
        };
        let config = self.table_config(table);
        let pk = config.primary_key.as_str();

        let old = match self.db.table(table).and_then(|docs| docs.get(position)) {
            Some(doc) => doc.clone(),
            None => return Ok(None),
        };

        if let Some(new_key) = patch.get(pk) {
            let current = old.get(pk).unwrap_or(&Value::Null);
            if !values_equal(new_key, current) {
                return Err(SealDbError::Validation(format!(
                    "Primary key '{pk}' of {table}/{} cannot be changed",
                    display_value(current)
                )));
            }
        }

        let mut merged = old.clone();
        for (field, value) in patch {
            if field == CREATED_AT || field == pk {
                continue;
            }
            merged.insert(field, value);
        }

        validation::ensure_valid(table, &config, &merged)?;
        if let Some((field, value)) = self.unique.find_update_conflict(table, &old, &merged) {
            return Err(SealDbError::Uniqueness {
                table: table.to_string(),
                field,
                value: display_value(&value),
            });
        }

        merged.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));

        self.indexes.remove_document(table, position, &old);
        if let Some(slot) = self.db.table_mut(table).and_then(|docs| docs.get_mut(position)) {
            *slot = merged.clone();
        }
        self.indexes.add_document(table, position, &merged);
        self.unique.replace_document(table, &old, &merged);

        self.persist()?;
        Ok(Some(merged))
    }

    /// Delete by primary key. Returns false if no such document exists.
    pub fn delete(&mut self, table: &str, id: impl Into<Value>) -> Result<bool> {
        let id = id.into();
        let Some(position) = self.position_of(table, &id) else {
            return Ok(false);
        };
        let Some(docs) = self.db.table_mut(table) else {
            return Ok(false);
        };
        let removed = docs.remove(position);
        self.unique.remove_document(table, &removed);
        // Later documents shifted down by one: patching is not enough
        if let Some(docs) = self.db.table(table) {
            self.indexes.rebuild_table(table, docs);
        }

        self.persist()?;
        Ok(true)
    }

    /// Clear every table and re-create the configured ones empty.
    pub fn reset(&mut self) -> Result<()> {
        self.db = Database::new();
        self.table_configs = self.config.tables.clone();
        self.indexes.clear();
        self.unique.clear();
        self.keys.clear();
        self.create_configured_tables();
        self.rebuild_derived();
        log::info!("Reset {}", self.path.display());
        self.persist()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Position of the document whose primary key equals `id`.
    fn position_of(&self, table: &str, id: &Value) -> Option<usize> {
        let docs = self.db.table(table)?;
        let pk = self.table_config(table).primary_key;
        if let Some(positions) = self.indexes.lookup(table, &pk, id) {
            return positions.first().copied();
        }
        docs.iter()
            .position(|d| d.get(&pk).map(|v| values_equal(v, id)).unwrap_or(false))
    }

    /// Positions matching `query`, in table order. A single equality on an
    /// indexed field is answered from the index; everything else scans.
    fn matching_positions(&self, table: &str, query: &Query) -> Vec<usize> {
        let Some(docs) = self.db.table(table) else {
            return Vec::new();
        };
        if let Some((field, value)) = query.single_equality() {
            if let Some(positions) = self.indexes.lookup(table, field, value) {
                return positions;
            }
        }
        docs.iter()
            .enumerate()
            .filter(|(_, d)| query.matches(d))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn find_all(&self, table: &str) -> Vec<Document> {
        self.db
            .table(table)
            .map(|docs| docs.to_vec())
            .unwrap_or_default()
    }

    pub fn find(&self, table: &str, query: &Query) -> Vec<Document> {
        let Some(docs) = self.db.table(table) else {
            return Vec::new();
        };
        self.matching_positions(table, query)
            .into_iter()
            .filter_map(|i| docs.get(i).cloned())
            .collect()
    }

    /// [`find`](Self::find) with a JSON query.
    pub fn find_where(&self, table: &str, filter: &Value) -> Result<Vec<Document>> {
        let query = Query::from_json(filter)?;
        Ok(self.find(table, &query))
    }

    pub fn find_one(&self, table: &str, query: &Query) -> Option<Document> {
        let docs = self.db.table(table)?;
        self.matching_positions(table, query)
            .first()
            .and_then(|&i| docs.get(i).cloned())
    }

    pub fn find_by_id(&self, table: &str, id: impl Into<Value>) -> Option<Document> {
        let id = id.into();
        let position = self.position_of(table, &id)?;
        self.db.table(table)?.get(position).cloned()
    }

    /// Typed variant of [`find_by_id`](Self::find_by_id).
    pub fn find_by_id_as<T: DeserializeOwned>(
        &self,
        table: &str,
        id: impl Into<Value>,
    ) -> Result<Option<T>> {
        match self.find_by_id(table, id) {
            Some(doc) => Ok(Some(serde_json::from_value(Value::Object(doc))?)),
            None => Ok(None),
        }
    }

    /// Every field name used in the table, in first-seen order.
    pub fn get_all_columns(&self, table: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for doc in self.db.table(table).unwrap_or_default() {
            for field in doc.keys() {
                if !seen.iter().any(|s| s == field) {
                    seen.push(field.clone());
                }
            }
        }
        seen
    }

    pub fn count(&self, table: &str, query: Option<&Query>) -> usize {
        match query {
            Some(q) if !q.is_empty() => self.matching_positions(table, q).len(),
            _ => self.db.table(table).map(|d| d.len()).unwrap_or(0),
        }
    }

    /// Run an aggregation pipeline over the whole table.
    pub fn aggregate(&self, table: &str, pipeline: &Pipeline) -> Vec<Document> {
        pipeline.run(self.find_all(table))
    }

    /// [`aggregate`](Self::aggregate) with a JSON pipeline.
    pub fn aggregate_json(&self, table: &str, pipeline: &Value) -> Result<Vec<Document>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        Ok(self.aggregate(table, &pipeline))
    }

    // ── Indexes ──────────────────────────────────────────────────────

    /// Index `field` of `table`. Returns false if the index already exists.
    pub fn create_index(&mut self, table: &str, field: &str) -> Result<bool> {
        let docs = self
            .db
            .table(table)
            .ok_or_else(|| SealDbError::TableNotFound(table.to_string()))?;
        if self.indexes.has_index(table, field) {
            return Ok(false);
        }
        self.indexes.create(table, field, docs);
        log::debug!("Created index {table}.{field}");
        Ok(true)
    }

    /// Drop a secondary index. The primary-key index cannot be dropped.
    pub fn drop_index(&mut self, table: &str, field: &str) -> Result<bool> {
        if !self.db.contains(table) {
            return Err(SealDbError::TableNotFound(table.to_string()));
        }
        if self.table_config(table).primary_key == field {
            return Err(SealDbError::Validation(format!(
                "The primary-key index {table}.{field} cannot be dropped"
            )));
        }
        Ok(self.indexes.drop_index(table, field))
    }

    pub fn indexed_fields(&self, table: &str) -> Vec<String> {
        self.indexes.indexed_fields(table)
    }

    pub fn stats(&self) -> DbStats {
        let file_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let table_stats = self
            .db
            .tables()
            .map(|(name, docs)| {
                let config = self.table_config(name);
                (
                    name.to_string(),
                    TableStats {
                        documents: docs.len(),
                        primary_key: config.primary_key,
                        indexes: self.indexes.indexed_fields(name),
                        unique: config.unique,
                        next_id: self.keys.peek(name),
                    },
                )
            })
            .collect();

        DbStats {
            file: self.path.clone(),
            file_size,
            tables: self.db.len(),
            documents: self.db.total_documents(),
            table_stats,
            connection_timeout: self.config.connection_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }
}

fn into_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SealDbError::Validation(format!(
            "Document must be a JSON object, got {}",
            display_value(&other)
        ))),
    }
}
