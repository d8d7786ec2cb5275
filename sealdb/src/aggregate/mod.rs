//! Aggregation pipelines.
//!
//! A pipeline is an ordered list of stages, each written as a single-key JSON
//! object (`{"$match": {...}}`, `{"$group": {...}}`, ...). Stages run strictly
//! in the given order over the running result.

use crate::document::{compare_values, display_value, get_path, value_key, Document};
use crate::error::{Result, SealDbError};
use crate::query::Query;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Field holding the group key in `$group` output.
pub const GROUP_KEY: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Query),
    Project(Vec<String>),
    Group(GroupSpec),
    Sort(Vec<SortKey>),
    Limit(usize),
    Skip(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    /// Field whose value keys the groups. `None` puts everything in one group.
    pub key: Option<String>,
    pub accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(SumOperand),
    Avg(String),
    Min(String),
    Max(String),
    Push(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SumOperand {
    Field(String),
    /// Added once per document; `{"$sum": 1}` counts.
    Constant(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    /// Parse a JSON array of stage objects.
    pub fn from_json(value: &Value) -> Result<Self> {
        let stages = value.as_array().ok_or_else(|| {
            SealDbError::Query(format!(
                "Pipeline must be an array of stages, got {}",
                display_value(value)
            ))
        })?;
        let stages = stages.iter().map(Stage::from_json).collect::<Result<_>>()?;
        Ok(Pipeline { stages })
    }

    pub fn run(&self, mut docs: Vec<Document>) -> Vec<Document> {
        for stage in &self.stages {
            docs = stage.apply(docs);
        }
        docs
    }
}

impl Stage {
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| {
                SealDbError::Query(format!(
                    "Pipeline stage must be an object with exactly one key, got {}",
                    display_value(value)
                ))
            })?;
        let (name, spec) = map.iter().next().ok_or_else(|| {
            SealDbError::Query("Pipeline stage is empty".into())
        })?;

        match name.as_str() {
            "$match" => Ok(Stage::Match(Query::from_json(spec)?)),
            "$project" => parse_project(spec).map(Stage::Project),
            "$group" => parse_group(spec).map(Stage::Group),
            "$sort" => parse_sort(spec).map(Stage::Sort),
            "$limit" => parse_count(name, spec).map(Stage::Limit),
            "$skip" => parse_count(name, spec).map(Stage::Skip),
            other => Err(SealDbError::Query(format!(
                "Unknown pipeline stage '{other}'"
            ))),
        }
    }

    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        match self {
            Stage::Match(query) => docs.into_iter().filter(|d| query.matches(d)).collect(),
            Stage::Project(fields) => docs.iter().map(|d| project(d, fields)).collect(),
            Stage::Group(spec) => group(docs, spec),
            Stage::Sort(keys) => {
                let mut docs = docs;
                // sort_by is stable: ties keep their incoming order
                docs.sort_by(|a, b| compare_by_keys(a, b, keys));
                docs
            }
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
        }
    }
}

fn field_name(spec: &Value, context: &str) -> Result<String> {
    match spec.as_str() {
        Some(s) if !s.is_empty() => Ok(s.strip_prefix('$').unwrap_or(s).to_string()),
        _ => Err(SealDbError::Query(format!(
            "{context} expects a field name, got {}",
            display_value(spec)
        ))),
    }
}

fn parse_project(spec: &Value) -> Result<Vec<String>> {
    match spec {
        Value::Array(items) => items.iter().map(|v| field_name(v, "$project")).collect(),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, flag)| is_truthy(flag))
            .map(|(field, _)| field.clone())
            .collect()),
        other => Err(SealDbError::Query(format!(
            "$project expects an object or array, got {}",
            display_value(other)
        ))),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

fn parse_group(spec: &Value) -> Result<GroupSpec> {
    let map = spec.as_object().ok_or_else(|| {
        SealDbError::Query(format!("$group expects an object, got {}", display_value(spec)))
    })?;

    let key = match map.get(GROUP_KEY) {
        None | Some(Value::Null) => None,
        Some(v) => Some(field_name(v, "$group._id")?),
    };

    let mut accumulators = Vec::new();
    for (output, acc_spec) in map {
        if output == GROUP_KEY {
            continue;
        }
        accumulators.push((output.clone(), parse_accumulator(output, acc_spec)?));
    }

    Ok(GroupSpec { key, accumulators })
}

fn parse_accumulator(output: &str, spec: &Value) -> Result<Accumulator> {
    let (op, source) = spec
        .as_object()
        .filter(|m| m.len() == 1)
        .and_then(|m| m.iter().next())
        .ok_or_else(|| {
            SealDbError::Query(format!(
                "Accumulator '{output}' must be an object with one operator"
            ))
        })?;

    let context = format!("{op} in '{output}'");
    match op.as_str() {
        "$sum" => match source {
            Value::Number(n) => Ok(Accumulator::Sum(SumOperand::Constant(
                n.as_f64().unwrap_or(0.0),
            ))),
            _ => Ok(Accumulator::Sum(SumOperand::Field(field_name(source, &context)?))),
        },
        "$avg" => Ok(Accumulator::Avg(field_name(source, &context)?)),
        "$min" => Ok(Accumulator::Min(field_name(source, &context)?)),
        "$max" => Ok(Accumulator::Max(field_name(source, &context)?)),
        "$push" => Ok(Accumulator::Push(field_name(source, &context)?)),
        other => Err(SealDbError::Query(format!(
            "Unknown accumulator '{other}' in '{output}'"
        ))),
    }
}

fn parse_sort(spec: &Value) -> Result<Vec<SortKey>> {
    let map = spec.as_object().ok_or_else(|| {
        SealDbError::Query(format!("$sort expects an object, got {}", display_value(spec)))
    })?;
    map.iter()
        .map(|(field, dir)| {
            let direction = match dir {
                Value::Number(n) if n.as_f64() == Some(1.0) => SortDirection::Ascending,
                Value::Number(n) if n.as_f64() == Some(-1.0) => SortDirection::Descending,
                Value::String(s) if s == "asc" => SortDirection::Ascending,
                Value::String(s) if s == "desc" => SortDirection::Descending,
                other => {
                    return Err(SealDbError::Query(format!(
                        "$sort direction for '{field}' must be 1 or -1, got {}",
                        display_value(other)
                    )));
                }
            };
            Ok(SortKey {
                field: field.clone(),
                direction,
            })
        })
        .collect()
}

fn parse_count(stage: &str, spec: &Value) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| {
            SealDbError::Query(format!(
                "{stage} expects a non-negative integer, got {}",
                display_value(spec)
            ))
        })
}

fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = get_path(doc, field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

fn compare_by_keys(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = get_path(a, &key.field).unwrap_or(&Value::Null);
        let right = get_path(b, &key.field).unwrap_or(&Value::Null);
        let ord = compare_values(left, right);
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Running state of one accumulator within one group, tied to its operand
#[derive(Debug)]
enum AccState<'a> {
    Sum { operand: &'a SumOperand, total: f64 },
    Avg { field: &'a str, sum: f64, count: u64 },
    Min { field: &'a str, current: Option<Value> },
    Max { field: &'a str, current: Option<Value> },
    Push { field: &'a str, values: Vec<Value> },
}

impl<'a> AccState<'a> {
    fn new(acc: &'a Accumulator) -> Self {
        match acc {
            Accumulator::Sum(operand) => AccState::Sum { operand, total: 0.0 },
            Accumulator::Avg(field) => AccState::Avg { field, sum: 0.0, count: 0 },
            Accumulator::Min(field) => AccState::Min { field, current: None },
            Accumulator::Max(field) => AccState::Max { field, current: None },
            Accumulator::Push(field) => AccState::Push { field, values: Vec::new() },
        }
    }

    fn fold(&mut self, doc: &Document) {
        match self {
            AccState::Sum { operand: SumOperand::Constant(c), total } => *total += *c,
            AccState::Sum { operand: SumOperand::Field(f), total } => {
                if let Some(n) = get_path(doc, f).and_then(Value::as_f64) {
                    *total += n;
                }
            }
            AccState::Avg { field, sum, count } => {
                if let Some(n) = get_path(doc, field).and_then(Value::as_f64) {
                    *sum += n;
                    *count += 1;
                }
            }
            AccState::Min { field, current } => {
                fold_extreme(current, get_path(doc, field), Ordering::Less);
            }
            AccState::Max { field, current } => {
                fold_extreme(current, get_path(doc, field), Ordering::Greater);
            }
            AccState::Push { field, values } => {
                if let Some(v) = get_path(doc, field) {
                    values.push(v.clone());
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum { total, .. } => number_value(total),
            // No numeric input means no average, not a division by a fake count
            AccState::Avg { count: 0, .. } => Value::Null,
            AccState::Avg { sum, count, .. } => number_value(sum / count as f64),
            AccState::Min { current, .. } | AccState::Max { current, .. } => {
                current.unwrap_or(Value::Null)
            }
            AccState::Push { values, .. } => Value::Array(values),
        }
    }
}

fn fold_extreme(current: &mut Option<Value>, candidate: Option<&Value>, keep: Ordering) {
    let Some(candidate) = candidate.filter(|v| !v.is_null()) else {
        return;
    };
    let replace = match current {
        None => true,
        Some(existing) => compare_values(candidate, existing) == keep,
    };
    if replace {
        *current = Some(candidate.clone());
    }
}

/// Integral results are emitted as integers so sums of counts stay `3`, not `3.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn group(docs: Vec<Document>, spec: &GroupSpec) -> Vec<Document> {
    let mut order: Vec<(Value, Vec<AccState<'_>>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for doc in &docs {
        let key = match &spec.key {
            Some(field) => get_path(doc, field).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        };
        let slot = *positions.entry(value_key(&key)).or_insert_with(|| {
            let states = spec.accumulators.iter().map(|(_, a)| AccState::new(a)).collect();
            order.push((key, states));
            order.len() - 1
        });
        for state in order[slot].1.iter_mut() {
            state.fold(doc);
        }
    }

    order
        .into_iter()
        .map(|(key, states)| {
            let mut out = Map::new();
            out.insert(GROUP_KEY.to_string(), key);
            for ((name, _), state) in spec.accumulators.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect()
}
