use crate::document::{get_path, value_key, Document};
use serde_json::Value;
use std::collections::HashMap;

/// Values held per table and field with their holder counts.
type FieldValues = HashMap<String, HashMap<String, usize>>;

/// Occupied values of unique-constrained fields, per table and field.
/// Null and missing values are exempt from the constraint. A value counts its
/// holders, so data loaded with duplicates keeps it taken until the last one goes.
#[derive(Debug, Clone, Default)]
pub struct UniquenessRegistry {
    tables: HashMap<String, FieldValues>,
}

impl UniquenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset a table's sub-registry for the given fields and fill it from `docs`.
    pub fn rebuild_table(&mut self, table: &str, fields: &[String], docs: &[Document]) {
        let mut registry: FieldValues = fields
            .iter()
            .map(|f| (f.clone(), HashMap::new()))
            .collect();
        for doc in docs {
            for (field, values) in registry.iter_mut() {
                if let Some(key) = unique_key(doc, field) {
                    hold(values, key);
                }
            }
        }
        self.tables.insert(table.to_string(), registry);
    }

    pub fn drop_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// First constrained field of `doc` whose value is already taken.
    pub fn find_conflict(&self, table: &str, doc: &Document) -> Option<(String, Value)> {
        let fields = self.tables.get(table)?;
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();
        for field in names {
            if let Some(value) = constrained_value(doc, field) {
                if fields[field].contains_key(&value_key(value)) {
                    return Some((field.clone(), value.clone()));
                }
            }
        }
        None
    }

    /// Like [`find_conflict`](Self::find_conflict) but only for fields whose value
    /// differs between `old` and `new`, so a document never collides with itself.
    pub fn find_update_conflict(
        &self,
        table: &str,
        old: &Document,
        new: &Document,
    ) -> Option<(String, Value)> {
        let fields = self.tables.get(table)?;
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();
        for field in names {
            let Some(value) = constrained_value(new, field) else {
                continue;
            };
            if unique_key(old, field).as_deref() == Some(value_key(value).as_str()) {
                continue;
            }
            if fields[field].contains_key(&value_key(value)) {
                return Some((field.clone(), value.clone()));
            }
        }
        None
    }

    pub fn add_document(&mut self, table: &str, doc: &Document) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, values) in fields.iter_mut() {
            if let Some(key) = unique_key(doc, field) {
                hold(values, key);
            }
        }
    }

    pub fn remove_document(&mut self, table: &str, doc: &Document) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, values) in fields.iter_mut() {
            if let Some(key) = unique_key(doc, field) {
                release(values, &key);
            }
        }
    }

    /// Move registrations from `old` to `new`, touching only changed fields.
    pub fn replace_document(&mut self, table: &str, old: &Document, new: &Document) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, values) in fields.iter_mut() {
            let before = unique_key(old, field);
            let after = unique_key(new, field);
            if before == after {
                continue;
            }
            if let Some(key) = before {
                release(values, &key);
            }
            if let Some(key) = after {
                hold(values, key);
            }
        }
    }

    pub fn contains(&self, table: &str, field: &str, value: &Value) -> bool {
        self.tables
            .get(table)
            .and_then(|fields| fields.get(field))
            .map(|values| values.contains_key(&value_key(value)))
            .unwrap_or(false)
    }

    /// Number of occupied values for a constrained field.
    pub fn occupied(&self, table: &str, field: &str) -> usize {
        self.tables
            .get(table)
            .and_then(|fields| fields.get(field))
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

fn hold(values: &mut HashMap<String, usize>, key: String) {
    *values.entry(key).or_insert(0) += 1;
}

fn release(values: &mut HashMap<String, usize>, key: &str) {
    if let Some(holders) = values.get_mut(key) {
        *holders -= 1;
        if *holders == 0 {
            values.remove(key);
        }
    }
}

fn constrained_value<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    match get_path(doc, field) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    }
}

fn unique_key(doc: &Document, field: &str) -> Option<String> {
    constrained_value(doc, field).map(value_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> UniquenessRegistry {
        let mut reg = UniquenessRegistry::new();
        reg.rebuild_table(
            "users",
            &["email".to_string()],
            &[doc(json!({"id": 1, "email": "a@x.com"})), doc(json!({"id": 2}))],
        );
        reg
    }

    #[test]
    fn test_conflict_detected() {
        let reg = registry();
        let conflict = reg.find_conflict("users", &doc(json!({"email": "a@x.com"})));
        assert_eq!(conflict, Some(("email".to_string(), json!("a@x.com"))));
        assert!(reg.find_conflict("users", &doc(json!({"email": "b@x.com"}))).is_none());
    }

    #[test]
    fn test_null_and_missing_exempt() {
        let mut reg = registry();
        reg.add_document("users", &doc(json!({"email": null})));
        assert!(reg.find_conflict("users", &doc(json!({"email": null}))).is_none());
        assert!(reg.find_conflict("users", &doc(json!({}))).is_none());
        assert_eq!(reg.occupied("users", "email"), 1);
    }

    #[test]
    fn test_update_conflict_ignores_own_value() {
        let reg = registry();
        let old = doc(json!({"id": 1, "email": "a@x.com"}));
        let same = doc(json!({"id": 1, "email": "a@x.com", "name": "A"}));
        assert!(reg.find_update_conflict("users", &old, &same).is_none());

        let other = doc(json!({"id": 2}));
        let stealing = doc(json!({"id": 2, "email": "a@x.com"}));
        assert!(reg.find_update_conflict("users", &other, &stealing).is_some());
    }

    #[test]
    fn test_replace_document_moves_value() {
        let mut reg = registry();
        let old = doc(json!({"email": "a@x.com"}));
        let new = doc(json!({"email": "c@x.com"}));
        reg.replace_document("users", &old, &new);
        assert!(!reg.contains("users", "email", &json!("a@x.com")));
        assert!(reg.contains("users", "email", &json!("c@x.com")));
    }

    #[test]
    fn test_remove_document_frees_value() {
        let mut reg = registry();
        reg.remove_document("users", &doc(json!({"email": "a@x.com"})));
        assert!(reg.find_conflict("users", &doc(json!({"email": "a@x.com"}))).is_none());
    }

    #[test]
    fn test_value_held_twice_stays_taken() {
        let mut reg = UniquenessRegistry::new();
        let held = doc(json!({"email": "a@x.com"}));
        reg.rebuild_table("users", &["email".to_string()], &[held.clone(), held.clone()]);
        assert_eq!(reg.occupied("users", "email"), 1);

        reg.remove_document("users", &held);
        assert!(reg.contains("users", "email", &json!("a@x.com")));
        reg.replace_document("users", &held, &doc(json!({"email": "b@x.com"})));
        assert!(!reg.contains("users", "email", &json!("a@x.com")));
        assert!(reg.contains("users", "email", &json!("b@x.com")));
    }
}
