use super::copy_backup;
use crate::error::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A background thread that copies the data file into the backup directory
/// once per interval, until stopped or dropped.
pub struct BackupScheduler {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl BackupScheduler {
    /// Spawn the backup thread. `lock` is the store's file lock, so a copy
    /// never reads a half-written file.
    pub fn start(
        interval: Duration,
        source: PathBuf,
        backup_dir: PathBuf,
        lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("sealdb-backup".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        match copy_backup(&source, &backup_dir, &lock) {
                            Ok(path) => log::info!("Scheduled backup written to {}", path.display()),
                            Err(e) => log::warn!("Scheduled backup of {} failed: {e}", source.display()),
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        log::debug!("Backup scheduler started, every {interval:?}");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it to finish. Calling twice is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Backup scheduler thread panicked");
            }
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
