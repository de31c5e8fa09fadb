//! Query evaluation.
//!
//! A query is itself a document: top-level `$`-keys are logical operators,
//! every other key names a (possibly dotted) field carrying either a
//! literal to deep-compare or an object of comparison operators. When the
//! target field holds an array, a predicate matches if any element
//! matches, except for whole-array literals and the array-specific
//! operators (`$size`, `$elemMatch`) which see the array itself.

use crate::compare::{are_things_equal, compare_things, get_dot_value};
use crate::error::{ModelError, ModelResult};
use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;

/// Evaluates `query` against `doc`.
///
/// Malformed queries (an unknown operator, `$or` without an array, ...)
/// are errors, not mismatches.
///
/// # Example
///
/// ```
/// use jotdb_model::{doc, match_query};
///
/// let target = doc! { "planet" => "mars", "order" => 4 };
/// assert!(match_query(&target, &doc! { "planet" => "mars" }).unwrap());
/// assert!(match_query(&target, &doc! { "order" => doc! { "$gte" => 4 } }).unwrap());
/// assert!(!match_query(&target, &doc! { "order" => doc! { "$gt" => 4 } }).unwrap());
/// ```
pub fn match_query(doc: &Value, query: &Value) -> ModelResult<bool> {
    // A non-object on either side collapses to a single-value comparison.
    // This also serves `$pull`, which matches array elements directly.
    if !doc.is_object() || !query.is_object() {
        return match_part(doc, query, false);
    }

    let clauses = query.as_object().expect("query is an object");
    for (key, value) in clauses {
        if key.starts_with('$') {
            if !match_logical(doc, key, value)? {
                return Ok(false);
            }
        } else if !match_field(doc, key, value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn match_logical(doc: &Value, operator: &str, arg: &Value) -> ModelResult<bool> {
    match operator {
        "$or" => {
            let subqueries = arg
                .as_array()
                .ok_or_else(|| ModelError::invalid_query("$or operator used without an array"))?;
            for sub in subqueries {
                if match_query(doc, sub)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$and" => {
            let subqueries = arg
                .as_array()
                .ok_or_else(|| ModelError::invalid_query("$and operator used without an array"))?;
            for sub in subqueries {
                if !match_query(doc, sub)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$not" => Ok(!match_query(doc, arg)?),
        "$where" => match arg {
            Value::Where(predicate) => Ok(predicate.matches(doc)),
            _ => Err(ModelError::invalid_query(
                "$where operator used without a predicate function",
            )),
        },
        other => Err(ModelError::invalid_query(format!(
            "unknown logical operator {other}"
        ))),
    }
}

fn match_field(doc: &Value, path: &str, query_value: &Value) -> ModelResult<bool> {
    let field_value = get_dot_value(doc, path);
    match_part(&field_value, query_value, false)
}

/// Operators that apply to an array field as a whole rather than to its
/// elements.
fn uses_array_operator(query_value: &Value) -> bool {
    match query_value.as_object() {
        Some(entries) => entries
            .iter()
            .any(|(k, _)| k == "$size" || k == "$elemMatch"),
        None => false,
    }
}

fn match_part(value: &Value, query_value: &Value, treat_array_as_value: bool) -> ModelResult<bool> {
    if let Value::Array(items) = value {
        if !treat_array_as_value {
            // A whole-array literal requires exact element-wise equality.
            if query_value.is_array() {
                return match_part(value, query_value, true);
            }
            if uses_array_operator(query_value) {
                return match_part(value, query_value, true);
            }
            // Otherwise at least one element must satisfy the predicate.
            for item in items {
                if match_part(item, query_value, false)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
    }

    if let Value::Object(entries) = query_value {
        let operators = entries.iter().filter(|(k, _)| k.starts_with('$')).count();
        if operators != 0 {
            if operators != entries.len() {
                return Err(ModelError::invalid_query(
                    "you cannot mix operators and normal fields in a query part",
                ));
            }
            for (operator, arg) in entries {
                if !match_comparison(operator, value, arg)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }

    Ok(are_things_equal(value, query_value))
}

/// True when the two values may be ordered against each other: comparison
/// operators only ever compare within number, string or datetime.
fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::DateTime(_), Value::DateTime(_))
    )
}

fn ordered(value: &Value, arg: &Value, accept: &[Ordering]) -> bool {
    comparable(value, arg) && accept.contains(&compare_things(value, arg))
}

fn match_comparison(operator: &str, value: &Value, arg: &Value) -> ModelResult<bool> {
    match operator {
        "$lt" => Ok(ordered(value, arg, &[Ordering::Less])),
        "$lte" => Ok(ordered(value, arg, &[Ordering::Less, Ordering::Equal])),
        "$gt" => Ok(ordered(value, arg, &[Ordering::Greater])),
        "$gte" => Ok(ordered(value, arg, &[Ordering::Greater, Ordering::Equal])),
        "$eq" => Ok(are_things_equal(value, arg)),
        "$ne" => {
            if value.is_undefined() {
                return Ok(true);
            }
            Ok(!are_things_equal(value, arg))
        }
        "$in" => {
            let candidates = arg
                .as_array()
                .ok_or_else(|| ModelError::invalid_query("$in operator called with a non-array"))?;
            Ok(candidates.iter().any(|c| are_things_equal(value, c)))
        }
        "$nin" => {
            let candidates = arg.as_array().ok_or_else(|| {
                ModelError::invalid_query("$nin operator called with a non-array")
            })?;
            Ok(!candidates.iter().any(|c| are_things_equal(value, c)))
        }
        "$exists" => {
            if arg.is_truthy() {
                Ok(!value.is_undefined())
            } else {
                Ok(value.is_undefined())
            }
        }
        "$regex" => {
            let pattern = arg.as_str().ok_or_else(|| {
                ModelError::invalid_query("$regex operator called with a non-string pattern")
            })?;
            let regex = Regex::new(pattern).map_err(|e| {
                ModelError::invalid_query(format!("$regex pattern does not compile: {e}"))
            })?;
            Ok(match value {
                Value::String(s) => regex.is_match(s),
                _ => false,
            })
        }
        "$size" => {
            let n = arg.as_number().ok_or_else(|| {
                ModelError::invalid_query("$size operator called without an integer")
            })?;
            if n.fract() != 0.0 {
                return Err(ModelError::invalid_query(
                    "$size operator called without an integer",
                ));
            }
            Ok(match value {
                Value::Array(items) => items.len() as f64 == n,
                _ => false,
            })
        }
        "$elemMatch" => match value {
            Value::Array(items) => {
                for item in items {
                    if match_query(item, arg)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        },
        other => Err(ModelError::invalid_query(format!(
            "unknown comparison operator {other}"
        ))),
    }
}
