//! Aggregation pipeline evaluation for the in-memory store.
//!
//! Supports the stage set the planner prompt permits: `$match`, `$group`,
//! `$sort`, `$limit`, `$skip`, `$project`, `$count`, `$unwind` and
//! `$lookup`. Anything else is an invalid-query error, never a silent
//! no-op.

use super::filter::{compare_values, lookup_path, matches, values_equal};
use super::StoreError;
use serde_json::{json, Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Run a pipeline over the starting document set. `collections` provides
/// the foreign sides for `$lookup`.
pub fn run(
    docs: Vec<Value>,
    pipeline: &[Value],
    collections: &HashMap<String, Vec<Value>>,
) -> Result<Vec<Value>, StoreError> {
    let mut current = docs;
    for stage in pipeline {
        let Value::Object(spec) = stage else {
            return Err(StoreError::InvalidQuery(
                "pipeline stage must be an object".to_string(),
            ));
        };
        if spec.len() != 1 {
            return Err(StoreError::InvalidQuery(
                "pipeline stage must have exactly one operator".to_string(),
            ));
        }
        let (name, body) = spec.iter().next().expect("one entry");

        current = match name.as_str() {
            "$match" => current.into_iter().filter(|d| matches(d, body)).collect(),
            "$group" => group(current, body)?,
            "$sort" => sort(current, body)?,
            "$limit" => {
                let n = stage_usize(body, "$limit")?;
                current.into_iter().take(n).collect()
            }
            "$skip" => {
                let n = stage_usize(body, "$skip")?;
                current.into_iter().skip(n).collect()
            }
            "$project" => project(current, body)?,
            "$count" => {
                let name = body.as_str().ok_or_else(|| {
                    StoreError::InvalidQuery("$count expects a field name".to_string())
                })?;
                vec![json!({ name: current.len() })]
            }
            "$unwind" => unwind(current, body)?,
            "$lookup" => lookup(current, body, collections)?,
            other => {
                return Err(StoreError::InvalidQuery(format!(
                    "unsupported pipeline stage '{}'",
                    other
                )))
            }
        };
    }
    Ok(current)
}

fn stage_usize(body: &Value, stage: &str) -> Result<usize, StoreError> {
    body.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::InvalidQuery(format!("{} expects a number", stage)))
}

/// Evaluate a `$group` expression against one document: `"$field"` paths
/// resolve into the document, everything else is a literal.
fn eval_expr(doc: &Value, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            lookup_path(doc, &s[1..]).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: u64,
    min: Option<Value>,
    max: Option<Value>,
}

fn group(docs: Vec<Value>, body: &Value) -> Result<Vec<Value>, StoreError> {
    let Value::Object(spec) = body else {
        return Err(StoreError::InvalidQuery("$group expects an object".to_string()));
    };
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| StoreError::InvalidQuery("$group requires _id".to_string()))?;

    // (group key, per-metric accumulators), first-seen order preserved.
    let mut groups: Vec<(Value, HashMap<String, Accumulator>)> = Vec::new();

    for doc in &docs {
        let key = eval_expr(doc, id_expr);
        let idx = match groups.iter().position(|(k, _)| *k == key) {
            Some(i) => i,
            None => {
                groups.push((key, HashMap::new()));
                groups.len() - 1
            }
        };
        let entry = &mut groups[idx].1;

        for (field, acc_spec) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
            let Value::Object(acc_body) = acc_spec else {
                return Err(StoreError::InvalidQuery(format!(
                    "accumulator for '{}' must be an object",
                    field
                )));
            };
            let (op, operand) = acc_body.iter().next().ok_or_else(|| {
                StoreError::InvalidQuery(format!("empty accumulator for '{}'", field))
            })?;
            let acc = entry.entry(field.clone()).or_default();
            let value = eval_expr(doc, operand);

            match op.as_str() {
                "$sum" | "$avg" => {
                    if let Some(n) = value.as_f64() {
                        acc.sum += n;
                        acc.count += 1;
                    }
                }
                "$min" => {
                    let replace = match &acc.min {
                        Some(current) => {
                            compare_values(&value, current) == Some(Ordering::Less)
                        }
                        None => !value.is_null(),
                    };
                    if replace {
                        acc.min = Some(value);
                    }
                }
                "$max" => {
                    let replace = match &acc.max {
                        Some(current) => {
                            compare_values(&value, current) == Some(Ordering::Greater)
                        }
                        None => !value.is_null(),
                    };
                    if replace {
                        acc.max = Some(value);
                    }
                }
                other => {
                    return Err(StoreError::InvalidQuery(format!(
                        "unsupported accumulator '{}'",
                        other
                    )))
                }
            }
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, mut accs)| {
            let mut row = Map::new();
            row.insert("_id".to_string(), key);
            for (field, acc_spec) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
                let op = acc_spec
                    .as_object()
                    .and_then(|o| o.keys().next())
                    .cloned()
                    .unwrap_or_default();
                let acc = accs.remove(field).unwrap_or_default();
                let value = match op.as_str() {
                    "$sum" => number(acc.sum),
                    "$avg" => {
                        if acc.count == 0 {
                            Value::Null
                        } else {
                            number(acc.sum / acc.count as f64)
                        }
                    }
                    "$min" => acc.min.unwrap_or(Value::Null),
                    "$max" => acc.max.unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                row.insert(field.clone(), value);
            }
            Value::Object(row)
        })
        .collect();
    Ok(rows)
}

/// Keep integral results as integers so counts render without decimals.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn sort(mut docs: Vec<Value>, body: &Value) -> Result<Vec<Value>, StoreError> {
    let Value::Object(keys) = body else {
        return Err(StoreError::InvalidQuery("$sort expects an object".to_string()));
    };
    docs.sort_by(|a, b| {
        for (path, direction) in keys {
            let descending = direction.as_i64().unwrap_or(1) < 0;
            let (va, vb) = (
                lookup_path(a, path).unwrap_or(&Value::Null),
                lookup_path(b, path).unwrap_or(&Value::Null),
            );
            let ord = compare_values(va, vb).unwrap_or(Ordering::Equal);
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn project(docs: Vec<Value>, body: &Value) -> Result<Vec<Value>, StoreError> {
    let Value::Object(spec) = body else {
        return Err(StoreError::InvalidQuery("$project expects an object".to_string()));
    };

    let exclusion_only = spec
        .iter()
        .all(|(k, v)| k == "_id" || matches_falsy(v));

    let projected = docs
        .into_iter()
        .map(|doc| {
            if exclusion_only {
                let mut out = doc.as_object().cloned().unwrap_or_default();
                for (k, v) in spec {
                    if matches_falsy(v) {
                        out.remove(k);
                    }
                }
                Value::Object(out)
            } else {
                let mut out = Map::new();
                let id_excluded = spec.get("_id").map(matches_falsy).unwrap_or(false);
                if !id_excluded {
                    if let Some(id) = doc.get("_id") {
                        out.insert("_id".to_string(), id.clone());
                    }
                }
                for (k, v) in spec {
                    if k == "_id" || matches_falsy(v) {
                        continue;
                    }
                    let value = match v {
                        Value::String(s) if s.starts_with('$') => eval_expr(&doc, v),
                        _ => lookup_path(&doc, k).cloned().unwrap_or(Value::Null),
                    };
                    if !value.is_null() {
                        out.insert(k.clone(), value);
                    }
                }
                Value::Object(out)
            }
        })
        .collect();
    Ok(projected)
}

fn matches_falsy(v: &Value) -> bool {
    v == &json!(0) || v == &json!(false)
}

fn unwind(docs: Vec<Value>, body: &Value) -> Result<Vec<Value>, StoreError> {
    let path = match body {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o.get("path").and_then(|p| p.as_str()).ok_or_else(|| {
            StoreError::InvalidQuery("$unwind expects a path".to_string())
        })?,
        _ => {
            return Err(StoreError::InvalidQuery(
                "$unwind expects a path".to_string(),
            ))
        }
    };
    let field = path.strip_prefix('$').ok_or_else(|| {
        StoreError::InvalidQuery("$unwind path must start with $".to_string())
    })?;

    let mut out = Vec::new();
    for doc in docs {
        match lookup_path(&doc, field).cloned() {
            Some(Value::Array(items)) => {
                for item in items {
                    let mut clone = doc.clone();
                    set_path(&mut clone, field, item);
                    out.push(clone);
                }
            }
            Some(Value::Null) | None => {} // dropped, matching store semantics
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let Value::Object(map) = current else { return };
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = match map.get_mut(*segment) {
            Some(v) => v,
            None => return,
        };
    }
}

fn lookup(
    docs: Vec<Value>,
    body: &Value,
    collections: &HashMap<String, Vec<Value>>,
) -> Result<Vec<Value>, StoreError> {
    let spec = body
        .as_object()
        .ok_or_else(|| StoreError::InvalidQuery("$lookup expects an object".to_string()))?;
    let get = |key: &str| -> Result<&str, StoreError> {
        spec.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
            StoreError::InvalidQuery(format!("$lookup requires string field '{}'", key))
        })
    };
    let from = get("from")?;
    let local_field = get("localField")?;
    let foreign_field = get("foreignField")?;
    let as_field = get("as")?;

    let foreign = collections
        .get(from)
        .ok_or_else(|| StoreError::UnknownCollection(from.to_string()))?;

    let joined = docs
        .into_iter()
        .map(|mut doc| {
            let local = lookup_path(&doc, local_field).cloned().unwrap_or(Value::Null);
            let matched: Vec<Value> = foreign
                .iter()
                .filter(|f| {
                    let fv = lookup_path(f, foreign_field).unwrap_or(&Value::Null);
                    values_equal(fv, &local)
                })
                .cloned()
                .collect();
            if let Value::Object(map) = &mut doc {
                map.insert(as_field.to_string(), Value::Array(matched));
            }
            doc
        })
        .collect();
    Ok(joined)
}
