//! Filter predicates over documents.
//!
//! A query is a JSON object mapping field names to either a literal (equality)
//! or an operator object such as `{"$gte": 18, "$lt": 65}`. Every constraint
//! must hold; there is no disjunction.

use crate::document::{compare_same_kind, display_value, get_path, values_equal, Document};
use crate::error::{Result, SealDbError};
use serde_json::Value;
use std::cmp::Ordering;

/// One comparison applied to a field value
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

/// All conditions attached to one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub conditions: Vec<Condition>,
}

/// A conjunction of field filters. The empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<FieldFilter>,
}

impl Condition {
    fn parse(tag: &str, operand: &Value) -> Result<Self> {
        let condition = match tag {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(array_operand(tag, operand)?),
            "$nin" => Condition::Nin(array_operand(tag, operand)?),
            other => {
                return Err(SealDbError::Query(format!("Unknown query operator '{other}'")));
            }
        };
        Ok(condition)
    }

    /// Evaluate against a field value; missing fields arrive as `Null`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Eq(expected) => values_equal(value, expected),
            Condition::Ne(expected) => !values_equal(value, expected),
            Condition::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
            Condition::In(set) => set.iter().any(|v| values_equal(value, v)),
            Condition::Nin(set) => !set.iter().any(|v| values_equal(value, v)),
        }
    }
}

// Null never orders against anything, including null.
fn ordered(value: &Value, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    if value.is_null() || bound.is_null() {
        return false;
    }
    compare_same_kind(value, bound).map(accept).unwrap_or(false)
}

fn array_operand(tag: &str, operand: &Value) -> Result<Vec<Value>> {
    operand.as_array().cloned().ok_or_else(|| {
        SealDbError::Query(format!(
            "Operator '{tag}' expects an array, got {}",
            display_value(operand)
        ))
    })
}

fn is_operator_object(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => !map.is_empty() && map.keys().any(|k| k.starts_with('$')),
        None => false,
    }
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse the JSON query grammar. Operator objects must use only known `$` tags.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Query::all()),
            Value::Object(map) => map,
            other => {
                return Err(SealDbError::Query(format!(
                    "Query must be an object, got {}",
                    display_value(other)
                )));
            }
        };

        let mut filters = Vec::with_capacity(map.len());
        for (field, spec) in map {
            if field.starts_with('$') {
                return Err(SealDbError::Query(format!(
                    "Unsupported top-level operator '{field}'"
                )));
            }
            let conditions = if is_operator_object(spec) {
                let mut conditions = Vec::new();
                for (tag, operand) in spec.as_object().into_iter().flatten() {
                    if !tag.starts_with('$') {
                        return Err(SealDbError::Query(format!(
                            "Field '{field}' mixes operators with the plain key '{tag}'"
                        )));
                    }
                    conditions.push(Condition::parse(tag, operand)?);
                }
                conditions
            } else {
                vec![Condition::Eq(spec.clone())]
            };
            filters.push(FieldFilter {
                field: field.clone(),
                conditions,
            });
        }
        Ok(Query { filters })
    }

    /// Add an equality constraint.
    pub fn eq(self, field: &str, value: Value) -> Self {
        self.with(field, Condition::Eq(value))
    }

    /// Add any condition on a field, merging with existing conditions on it.
    pub fn with(mut self, field: &str, condition: Condition) -> Self {
        match self.filters.iter_mut().find(|f| f.field == field) {
            Some(filter) => filter.conditions.push(condition),
            None => self.filters.push(FieldFilter {
                field: field.to_string(),
                conditions: vec![condition],
            }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|filter| {
            let value = get_path(doc, &filter.field).unwrap_or(&Value::Null);
            filter.conditions.iter().all(|c| c.matches(value))
        })
    }

    /// `(field, value)` when the query is a single non-null equality, the only
    /// shape answered from an index.
    pub fn single_equality(&self) -> Option<(&str, &Value)> {
        match self.filters.as_slice() {
            [filter] => match filter.conditions.as_slice() {
                [Condition::Eq(value)] if !value.is_null() => Some((filter.field.as_str(), value)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl TryFrom<Value> for Query {
    type Error = SealDbError;

    fn try_from(value: Value) -> Result<Self> {
        Query::from_json(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn q(value: Value) -> Query {
        Query::from_json(&value).unwrap()
    }

    #[test]
    fn test_equality() {
        let d = doc(json!({"name": "Ana", "age": 30}));
        assert!(q(json!({"name": "Ana"})).matches(&d));
        assert!(q(json!({"age": 30.0})).matches(&d));
        assert!(!q(json!({"name": "Ana", "age": 31})).matches(&d));
    }

    #[test]
    fn test_comparison_operators() {
        let d = doc(json!({"age": 30, "name": "Marta"}));
        assert!(q(json!({"age": {"$gt": 29}})).matches(&d));
        assert!(!q(json!({"age": {"$gt": 30}})).matches(&d));
        assert!(q(json!({"age": {"$gte": 30, "$lte": 30}})).matches(&d));
        assert!(q(json!({"age": {"$lt": 31}})).matches(&d));
        assert!(q(json!({"age": {"$ne": 31}})).matches(&d));
        assert!(q(json!({"name": {"$gt": "M"}})).matches(&d));
    }

    #[test]
    fn test_set_operators() {
        let d = doc(json!({"role": "admin"}));
        assert!(q(json!({"role": {"$in": ["admin", "owner"]}})).matches(&d));
        assert!(!q(json!({"role": {"$nin": ["admin"]}})).matches(&d));
        assert!(q(json!({"missing": {"$nin": ["x"]}})).matches(&d));
    }

    #[test]
    fn test_mixed_kinds_never_order() {
        let d = doc(json!({"age": "30"}));
        assert!(!q(json!({"age": {"$gt": 1}})).matches(&d));
        assert!(!q(json!({"age": {"$lt": 100}})).matches(&d));
    }

    #[test]
    fn test_missing_field_is_null() {
        let d = doc(json!({"a": 1}));
        assert!(q(json!({"b": null})).matches(&d));
        assert!(!q(json!({"b": {"$gte": 0}})).matches(&d));
    }

    #[test]
    fn test_nested_path_and_object_literal() {
        let d = doc(json!({"address": {"city": "Lima", "zip": "15001"}}));
        assert!(q(json!({"address.city": "Lima"})).matches(&d));
        assert!(q(json!({"address": {"city": "Lima", "zip": "15001"}})).matches(&d));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Query::from_json(&json!({"age": {"$regex": "x"}})).unwrap_err();
        assert!(err.to_string().contains("$regex"));
        assert!(Query::from_json(&json!({"age": {"$in": 3}})).is_err());
        assert!(Query::from_json(&json!({"$or": []})).is_err());
        assert!(Query::from_json(&json!({"a": {"$gt": 1, "b": 2}})).is_err());
        assert!(Query::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_single_equality_detection() {
        assert_eq!(
            q(json!({"email": "a@x.com"})).single_equality(),
            Some(("email", &json!("a@x.com")))
        );
        assert!(q(json!({"a": 1, "b": 2})).single_equality().is_none());
        assert!(q(json!({"a": {"$gt": 1}})).single_equality().is_none());
        assert!(q(json!({"a": null})).single_equality().is_none());
    }

    #[test]
    fn test_builder() {
        let query = Query::all()
            .eq("region", json!("west"))
            .with("amount", Condition::Gte(json!(10)));
        assert!(query.matches(&doc(json!({"region": "west", "amount": 12}))));
        assert!(!query.matches(&doc(json!({"region": "west", "amount": 2}))));
    }
}
