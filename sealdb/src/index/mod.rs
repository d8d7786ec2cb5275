use crate::document::{get_path, value_key, Document};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Canonical value key -> positions of the documents holding that value.
type FieldIndex = HashMap<String, BTreeSet<usize>>;

/// Per-table, per-field hash indexes over document positions.
///
/// Indexes are a cache of the table contents: they are patched on append and
/// in-place update, and rebuilt whenever positions shift. Documents whose
/// indexed field is missing or null are not indexed.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    tables: HashMap<String, HashMap<String, FieldIndex>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or rebuild) the index on `field` from the table's documents.
    pub fn create(&mut self, table: &str, field: &str, docs: &[Document]) {
        let index = build_field_index(field, docs);
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(field.to_string(), index);
    }

    /// Drop one index. Returns false if it did not exist.
    pub fn drop_index(&mut self, table: &str, field: &str) -> bool {
        self.tables
            .get_mut(table)
            .map(|fields| fields.remove(field).is_some())
            .unwrap_or(false)
    }

    pub fn drop_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn has_index(&self, table: &str, field: &str) -> bool {
        self.tables
            .get(table)
            .map(|fields| fields.contains_key(field))
            .unwrap_or(false)
    }

    /// Indexed fields of a table, sorted.
    pub fn indexed_fields(&self, table: &str) -> Vec<String> {
        let mut fields: Vec<String> = self
            .tables
            .get(table)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }

    /// Positions holding `value` on `field`, or `None` if the field is not indexed.
    pub fn lookup(&self, table: &str, field: &str, value: &Value) -> Option<Vec<usize>> {
        let index = self.tables.get(table)?.get(field)?;
        Some(
            index
                .get(&value_key(value))
                .map(|positions| positions.iter().copied().collect())
                .unwrap_or_default(),
        )
    }

    /// Register a document at `position` in every index of the table.
    pub fn add_document(&mut self, table: &str, position: usize, doc: &Document) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, index) in fields.iter_mut() {
            if let Some(key) = indexable_key(doc, field) {
                index.entry(key).or_default().insert(position);
            }
        }
    }

    /// Remove a document's entries at `position` from every index of the table.
    pub fn remove_document(&mut self, table: &str, position: usize, doc: &Document) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, index) in fields.iter_mut() {
            if let Some(key) = indexable_key(doc, field) {
                if let Some(positions) = index.get_mut(&key) {
                    positions.remove(&position);
                    if positions.is_empty() {
                        index.remove(&key);
                    }
                }
            }
        }
    }

    /// Rebuild every index of a table after positions changed.
    pub fn rebuild_table(&mut self, table: &str, docs: &[Document]) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, index) in fields.iter_mut() {
            *index = build_field_index(field, docs);
        }
        log::debug!("Rebuilt {} index(es) for table '{table}'", fields.len());
    }

    /// Every (key, positions) pair of one index, for consistency checks.
    pub fn entries(&self, table: &str, field: &str) -> Vec<(String, Vec<usize>)> {
        self.tables
            .get(table)
            .and_then(|fields| fields.get(field))
            .map(|index| {
                index
                    .iter()
                    .map(|(k, p)| (k.clone(), p.iter().copied().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn indexable_key(doc: &Document, field: &str) -> Option<String> {
    match get_path(doc, field) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value_key(value)),
    }
}

fn build_field_index(field: &str, docs: &[Document]) -> FieldIndex {
    let mut index = FieldIndex::new();
    for (position, doc) in docs.iter().enumerate() {
        if let Some(key) = indexable_key(doc, field) {
            index.entry(key).or_default().insert(position);
        }
    }
    index
}
