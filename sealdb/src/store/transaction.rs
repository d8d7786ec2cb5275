use super::Store;
use crate::error::Result;

impl Store {
    /// Run `f` against the live store as one all-or-nothing unit.
    ///
    /// Writes made inside `f` are held in memory and saved once when `f`
    /// returns `Ok`. If `f` returns `Err`, the database is put back to its
    /// state before the call, nothing is written, and the error is returned.
    /// Indexes and the uniqueness registry are rebuilt from the restored data.
    /// Primary keys handed out inside a rolled-back transaction stay used.
    ///
    /// Nested calls join the enclosing transaction: only the outermost one saves.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T>,
    {
        let snapshot = self.db.clone();
        let table_configs = self.table_configs.clone();
        let keys = self.keys.clone();

        self.tx_depth += 1;
        let outcome = f(self);
        self.tx_depth -= 1;

        match outcome {
            Ok(value) => {
                if self.tx_depth == 0 {
                    self.save_now()?;
                }
                Ok(value)
            }
            Err(err) => {
                log::debug!("Transaction failed, rolling back: {err}");
                self.db = snapshot;
                self.table_configs = table_configs;
                self.rebuild_derived();
                // A drop or reset inside `f` discarded counters; keys retired before stay retired
                self.keys.restore_floor(&keys);
                Err(err)
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0
    }
}
