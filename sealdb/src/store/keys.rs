use crate::document::Document;
use serde_json::Value;
use std::collections::HashMap;

/// Per-table counters for auto-assigned integer primary keys.
#[derive(Debug, Clone, Default)]
pub struct KeyAllocator {
    next: HashMap<String, u64>,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key that [`allocate`](Self::allocate) would hand out.
    pub fn peek(&self, table: &str) -> u64 {
        self.next.get(table).copied().unwrap_or(1)
    }

    pub fn allocate(&mut self, table: &str) -> u64 {
        let slot = self.next.entry(table.to_string()).or_insert(1);
        let key = *slot;
        *slot += 1;
        key
    }

    /// Move the counter past an explicitly supplied integer key.
    /// Integral floats such as `3.0` count as integers.
    pub fn observe(&mut self, table: &str, key: &Value) {
        if let Some(k) = integral_key(key) {
            let slot = self.next.entry(table.to_string()).or_insert(1);
            if k >= *slot {
                *slot = k + 1;
            }
        }
    }

    /// Derive the counter from the table contents. The counter never moves
    /// backwards, so keys handed out earlier in this process stay retired.
    pub fn recalculate(&mut self, table: &str, primary_key: &str, docs: &[Document]) {
        let from_data = docs
            .iter()
            .filter_map(|d| d.get(primary_key).and_then(integral_key))
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        let slot = self.next.entry(table.to_string()).or_insert(1);
        *slot = (*slot).max(from_data);
    }

    pub fn drop_table(&mut self, table: &str) {
        self.next.remove(table);
    }

    /// Raise every counter to at least its value in `earlier`.
    pub fn restore_floor(&mut self, earlier: &KeyAllocator) {
        for (table, &next) in &earlier.next {
            let slot = self.next.entry(table.clone()).or_insert(1);
            *slot = (*slot).max(next);
        }
    }

    pub fn clear(&mut self) {
        self.next.clear();
    }
}

fn integral_key(key: &Value) -> Option<u64> {
    if let Some(k) = key.as_u64() {
        return Some(k);
    }
    let f = key.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
