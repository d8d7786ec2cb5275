use crate::error::{Result, SealDbError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the primary-key field when a table does not configure one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Top-level store configuration, parsed from YAML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    pub file: PathBuf,
    pub encryption_key: String,
    #[serde(default)]
    pub tables: HashMap<String, TableConfig>,
    #[serde(default)]
    pub backups: Vec<BackupPolicy>,
    /// Directory for backup copies. Defaults to `backups/` next to `file`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// Accepted for compatibility; no operation enforces it.
    #[serde(default)]
    pub connection_timeout: Option<u64>,
}

/// Per-table configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub unique: Vec<String>,
    #[serde(default)]
    pub schema: HashMap<String, FieldDefinition>,
}

/// Definition of a single field in a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "text")]
    String,
    Number,
    Boolean,
    Date,
    Object,
    #[serde(alias = "list")]
    Array,
    Path,
}

/// A periodic backup policy. `interval` is in days; fractions are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub interval: f64,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            primary_key: default_primary_key(),
            unique: Vec::new(),
            schema: HashMap::new(),
        }
    }
}

impl TableConfig {
    pub fn with_primary_key(mut self, field: &str) -> Self {
        self.primary_key = field.to_string();
        self
    }

    pub fn with_unique(mut self, field: &str) -> Self {
        if !self.unique.iter().any(|f| f == field) {
            self.unique.push(field.to_string());
        }
        self
    }

    pub fn with_field(mut self, name: &str, field_type: FieldType, required: bool) -> Self {
        self.schema.insert(
            name.to_string(),
            FieldDefinition {
                field_type,
                required,
            },
        );
        self
    }
}

impl BackupPolicy {
    pub fn every_days(days: f64) -> Self {
        BackupPolicy { interval: days }
    }

    /// The interval as a duration. Fails for intervals that are not positive
    /// or too long to represent.
    pub fn period(&self) -> Result<Duration> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(SealDbError::Configuration(format!(
                "backup interval must be a positive number of days, got {}",
                self.interval
            )));
        }
        Duration::try_from_secs_f64(self.interval * SECONDS_PER_DAY).map_err(|e| {
            SealDbError::Configuration(format!("backup interval {} days: {e}", self.interval))
        })
    }
}

impl DbConfig {
    pub fn new(file: impl Into<PathBuf>, encryption_key: &str) -> Self {
        DbConfig {
            file: file.into(),
            encryption_key: encryption_key.to_string(),
            tables: HashMap::new(),
            backups: Vec::new(),
            backup_dir: None,
            connection_timeout: None,
        }
    }

    pub fn with_table(mut self, name: &str, table: TableConfig) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn with_backup_policy(mut self, policy: BackupPolicy) -> Self {
        self.backups.push(policy);
        self
    }

    /// Configuration for a table, falling back to the defaults.
    pub fn table(&self, name: &str) -> TableConfig {
        self.tables.get(name).cloned().unwrap_or_default()
    }

    /// The effective backup directory.
    pub fn resolved_backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .file
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups")),
        }
    }
}
