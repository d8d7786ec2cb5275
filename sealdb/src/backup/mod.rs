//! Backups, restore, and JSON import/export.
//!
//! A backup is a verbatim copy of the encrypted data file, named after the
//! time it was taken:
//!
//! ```text
//! <backup_dir>/backup-20261019-142501-337-000.sdb
//! ```

mod scheduler;
mod transfer;

pub use scheduler::BackupScheduler;
pub use transfer::{ExportOptions, ImportMode, ImportOptions, ImportReport};

use crate::codec;
use crate::error::{Result, SealDbError};
use crate::store::Store;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

const BACKUP_PREFIX: &str = "backup-";
const BACKUP_EXTENSION: &str = "sdb";

/// Metadata about a backup file.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Copy `source` into a new timestamp-named file in `backup_dir` while holding
/// `lock`, so the copy never overlaps a save.
pub fn copy_backup(source: &Path, backup_dir: &Path, lock: &Mutex<()>) -> Result<PathBuf> {
    std::fs::create_dir_all(backup_dir)?;
    let _guard = lock.lock();

    // The sequence number keeps names unique, and in creation order, within one millisecond
    let stamp = Utc::now().format("%Y%m%d-%H%M%S-%3f").to_string();
    let mut seq = 0u32;
    let mut target = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}-{seq:03}.{BACKUP_EXTENSION}"));
    while target.exists() {
        seq += 1;
        target = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}-{seq:03}.{BACKUP_EXTENSION}"));
    }

    std::fs::copy(source, &target)?;
    Ok(target)
}

/// Backups in `backup_dir`, newest first.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupInfo>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = format!(
        "{}/{BACKUP_PREFIX}*.{BACKUP_EXTENSION}",
        glob::Pattern::escape(&backup_dir.to_string_lossy())
    );
    let mut backups = Vec::new();
    for path in glob::glob(&pattern)
        .map_err(|e| SealDbError::Other(format!("Glob error: {e}")))?
        .filter_map(|r| r.ok())
    {
        let meta = std::fs::metadata(&path)?;
        let created_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        backups.push(BackupInfo {
            path,
            size_bytes: meta.len(),
            created_at,
        });
    }
    // Names embed the timestamp, so name order is creation order
    backups.sort_by(|a, b| b.path.cmp(&a.path));
    Ok(backups)
}

impl Store {
    /// Copy the current encrypted file into the backup directory.
    pub fn backup(&self) -> Result<PathBuf> {
        if !self.path.exists() {
            self.save_now()?;
        }
        let target = copy_backup(
            &self.path,
            &self.config.resolved_backup_dir(),
            &self.file_lock,
        )?;
        log::info!("Backed up {} to {}", self.path.display(), target.display());
        Ok(target)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        list_backups(&self.config.resolved_backup_dir())
    }

    /// Replace the live file with `backup_file` and reload from it.
    /// A safety backup of the current state is taken first; its path is returned.
    pub fn restore(&mut self, backup_file: &Path) -> Result<PathBuf> {
        if !backup_file.exists() {
            return Err(SealDbError::BackupNotFound(backup_file.to_path_buf()));
        }
        let bytes = std::fs::read(backup_file)?;
        // Decode before touching anything so an unreadable backup changes nothing
        let restored = self.codec.decode(&bytes).map_err(|e| {
            SealDbError::Load(format!("cannot decode {}: {e}", backup_file.display()))
        })?;

        let safety = self.backup()?;
        {
            let _guard = self.file_lock.lock();
            codec::write_file(&self.path, &bytes).map_err(|e| {
                SealDbError::Save(format!("cannot write {}: {e}", self.path.display()))
            })?;
        }

        self.db = restored;
        for name in self.config.tables.keys() {
            self.db.create(name);
        }
        self.rebuild_derived();
        log::info!(
            "Restored {} from {} (safety backup {})",
            self.path.display(),
            backup_file.display(),
            safety.display()
        );
        Ok(safety)
    }
}
