//! Filter matching for the in-memory store.
//!
//! Implements the operator subset the planner prompt permits: implicit
//! equality, `$eq`/`$ne`, the four range operators, `$in`/`$nin`,
//! `$regex` (+`$options`), `$exists`, and `$and`/`$or`. Extended-JSON
//! wrappers (`$oid`, `$date`) compare as their underlying values.

use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;

/// Resolve a (possibly dotted) field path against a document.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Unwrap `{"$oid": ...}` / `{"$date": ...}` to the inner scalar.
fn unwrap_extended(v: &Value) -> &Value {
    if let Value::Object(map) = v {
        if map.len() == 1 {
            if let Some(inner) = map.get("$oid").or_else(|| map.get("$date")) {
                return inner;
            }
        }
    }
    v
}

fn as_datetime_millis(v: &Value) -> Option<i64> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
}

/// Three-way comparison across the scalar types that can appear in
/// filters. Dates wrapped as `$date` strings order chronologically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    let (a, b) = (unwrap_extended(a), unwrap_extended(b));
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().and_then(|x| y.as_f64().map(|y| (x, y)))
                .and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::String(_), Value::String(_)) => {
            // Both RFC 3339 timestamps compare as instants, otherwise
            // plain lexicographic order.
            match (as_datetime_millis(a), as_datetime_millis(b)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(a.as_str()?.cmp(b.as_str()?)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    let (ua, ub) = (unwrap_extended(a), unwrap_extended(b));
    if ua == ub {
        return true;
    }
    matches!(compare_values(ua, ub), Some(Ordering::Equal))
}

/// True when `doc` satisfies `filter`. A non-object filter matches nothing;
/// an empty object matches everything.
pub fn matches(doc: &Value, filter: &Value) -> bool {
    let Value::Object(clauses) = filter else {
        return false;
    };

    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .map(|subs| subs.iter().all(|f| matches(doc, f)))
            .unwrap_or(false),
        "$or" => condition
            .as_array()
            .map(|subs| subs.iter().any(|f| matches(doc, f)))
            .unwrap_or(false),
        _ => field_matches(doc, key, condition),
    })
}

fn field_matches(doc: &Value, path: &str, condition: &Value) -> bool {
    let field = lookup_path(doc, path);

    // Operator object vs. direct equality.
    if let Value::Object(ops) = condition {
        let is_operator_object = ops.keys().any(|k| k.starts_with('$'))
            && !ops.contains_key("$oid")
            && !ops.contains_key("$date");
        if is_operator_object {
            let options = ops.get("$options").and_then(|o| o.as_str());
            return ops
                .iter()
                .filter(|(op, _)| op.as_str() != "$options")
                .all(|(op, operand)| apply_operator(field, op, operand, options));
        }
    }

    match field {
        Some(value) => scalar_or_element_eq(value, condition),
        None => condition.is_null(),
    }
}

/// Equality with document-database array semantics: an array field matches
/// when any element equals the operand.
fn scalar_or_element_eq(field: &Value, operand: &Value) -> bool {
    if values_equal(field, operand) {
        return true;
    }
    if let Value::Array(items) = field {
        return items.iter().any(|item| values_equal(item, operand));
    }
    false
}

fn apply_operator(
    field: Option<&Value>,
    op: &str,
    operand: &Value,
    options: Option<&str>,
) -> bool {
    match op {
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            field.is_some() == wanted
        }
        _ => {
            let Some(field) = field else { return false };
            match op {
                "$eq" => scalar_or_element_eq(field, operand),
                "$ne" => !scalar_or_element_eq(field, operand),
                "$lt" => ordered(field, operand, |o| o == Ordering::Less),
                "$lte" => ordered(field, operand, |o| o != Ordering::Greater),
                "$gt" => ordered(field, operand, |o| o == Ordering::Greater),
                "$gte" => ordered(field, operand, |o| o != Ordering::Less),
                "$in" => operand
                    .as_array()
                    .map(|set| set.iter().any(|v| scalar_or_element_eq(field, v)))
                    .unwrap_or(false),
                "$nin" => operand
                    .as_array()
                    .map(|set| !set.iter().any(|v| scalar_or_element_eq(field, v)))
                    .unwrap_or(false),
                "$regex" => regex_match(field, operand, options),
                // Unknown operators match nothing rather than everything.
                _ => false,
            }
        }
    }
}

fn ordered(field: &Value, operand: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Value::Array(items) => items
            .iter()
            .any(|item| compare_values(item, operand).map(&pred).unwrap_or(false)),
        _ => compare_values(field, operand).map(pred).unwrap_or(false),
    }
}

fn regex_match(field: &Value, pattern: &Value, options: Option<&str>) -> bool {
    let Some(text) = unwrap_extended(field).as_str() else {
        return false;
    };
    let Some(pattern_str) = pattern.as_str() else {
        return false;
    };
    let case_insensitive = options.map(|o| o.contains('i')).unwrap_or(true);
    regex::RegexBuilder::new(pattern_str)
        .case_insensitive(case_insensitive)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
