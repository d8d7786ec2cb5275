use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table name -> ordered documents. The root aggregate that gets persisted.
///
/// Each table sits behind an `Arc`, so cloning the database (for a
/// transaction snapshot) is shallow and a table is only copied the first
/// time it is written afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Database {
    tables: BTreeMap<String, Arc<Vec<Document>>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table(&self, table: &str) -> Option<&[Document]> {
        self.tables.get(table).map(|docs| docs.as_slice())
    }

    /// Mutable access to a table, copying it first if a snapshot still shares it.
    pub fn table_mut(&mut self, table: &str) -> Option<&mut Vec<Document>> {
        self.tables.get_mut(table).map(Arc::make_mut)
    }

    /// Create an empty table. Returns false if it already exists.
    pub fn create(&mut self, table: &str) -> bool {
        if self.tables.contains_key(table) {
            return false;
        }
        self.tables.insert(table.to_string(), Arc::new(Vec::new()));
        true
    }

    pub fn drop_table(&mut self, table: &str) -> bool {
        self.tables.remove(table).is_some()
    }

    pub fn insert_table(&mut self, table: &str, docs: Vec<Document>) {
        self.tables.insert(table.to_string(), Arc::new(docs));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn total_documents(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// True when both databases share the same allocation for `table`.
    pub fn shares_table_with(&self, other: &Database, table: &str) -> bool {
        match (self.tables.get(table), other.tables.get(table)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_snapshot_is_copy_on_write() {
        let mut db = Database::new();
        db.insert_table("a", vec![doc(json!({"id": 1}))]);
        db.insert_table("b", vec![doc(json!({"id": 1}))]);

        let snapshot = db.clone();
        assert!(db.shares_table_with(&snapshot, "a"));

        db.table_mut("a").unwrap().push(doc(json!({"id": 2})));
        assert!(!db.shares_table_with(&snapshot, "a"));
        assert!(db.shares_table_with(&snapshot, "b"));
        assert_eq!(snapshot.table("a").unwrap().len(), 1);
        assert_eq!(db.table("a").unwrap().len(), 2);
    }

    #[test]
    fn test_serializes_as_plain_mapping() {
        let mut db = Database::new();
        db.insert_table("t", vec![doc(json!({"id": 1}))]);
        let text = serde_json::to_string(&db).unwrap();
        assert_eq!(text, r#"{"t":[{"id":1}]}"#);
    }

    #[test]
    fn test_create_and_drop() {
        let mut db = Database::new();
        assert!(db.create("t"));
        assert!(!db.create("t"));
        assert_eq!(db.len(), 1);
        assert!(db.drop_table("t"));
        assert!(db.is_empty());
    }
}
