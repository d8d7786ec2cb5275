use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealDbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Save error: {0}")]
    Save(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unique constraint violated: {table}.{field} already contains {value}")]
    Uniqueness {
        table: String,
        field: String,
        value: String,
    },

    #[error("Document not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Backup file not found: {}", .0.display())]
    BackupNotFound(std::path::PathBuf),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SealDbError {
    /// True for failures raised before any state was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SealDbError::Validation(_) | SealDbError::Uniqueness { .. } | SealDbError::Query(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SealDbError>;
