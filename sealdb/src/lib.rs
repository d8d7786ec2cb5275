pub mod aggregate;
pub mod backup;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod store;
pub mod unique;
pub mod validation;

pub use aggregate::Pipeline;
pub use backup::{BackupInfo, ExportOptions, ImportMode, ImportOptions, ImportReport};
pub use config::{DbConfig, TableConfig};
pub use document::Document;
pub use error::{Result, SealDbError};
pub use query::Query;
pub use store::{Database, DbStats, Store, TableStats};
