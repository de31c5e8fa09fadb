//! Update application.
//!
//! An update document is either a pure replacement (no `$` keys at the
//! top level) or pure modifiers (`$set`, `$inc`, ...). [`modify`] computes
//! the new body of a document without touching the original; the caller
//! decides what to do with it.

use crate::compare::{are_things_equal, compare_things};
use crate::error::{ModelError, ModelResult};
use crate::query::match_query;
use crate::serialize::check_object;
use crate::value::Value;
use std::cmp::Ordering;

/// Computes the new version of `doc` under `update`.
///
/// Replacement updates keep the original `_id`; modifier updates apply
/// each operator to a deep copy. Any attempt to change `_id`, any unknown
/// modifier, and any mixing of the two styles is an error. The result is
/// validated for forbidden field names before being returned.
///
/// # Example
///
/// ```
/// use jotdb_model::{doc, modify, Value};
///
/// let before = doc! { "_id" => "a1", "count" => 1 };
/// let after = modify(&before, &doc! { "$inc" => doc! { "count" => 2 } }).unwrap();
/// assert_eq!(after.get("count"), Some(&Value::Number(3.0)));
/// // The original document is untouched.
/// assert_eq!(before.get("count"), Some(&Value::Number(1.0)));
/// ```
pub fn modify(doc: &Value, update: &Value) -> ModelResult<Value> {
    let entries = update
        .as_object()
        .ok_or_else(|| ModelError::invalid_modifier("update must be an object"))?;

    if let Some(new_id) = update.get("_id") {
        let old_id = doc.get("_id").unwrap_or(&Value::Undefined);
        if !are_things_equal(new_id, old_id) {
            return Err(ModelError::invalid_modifier(
                "you cannot change a document's _id",
            ));
        }
    }

    let modifier_count = entries.iter().filter(|(k, _)| k.starts_with('$')).count();
    if modifier_count != 0 && modifier_count != entries.len() {
        return Err(ModelError::invalid_modifier(
            "you cannot mix modifiers and normal fields",
        ));
    }

    let new_doc = if modifier_count == 0 {
        // Full replacement, _id carried over.
        let mut replacement = update.clone();
        if let Some(id) = doc.get("_id") {
            replacement.set("_id", id.clone());
        }
        replacement
    } else {
        let mut target = doc.clone();
        for (operator, arg) in entries {
            let modifier = Modifier::parse(operator)?;
            let fields = arg.as_object().ok_or_else(|| {
                ModelError::invalid_modifier(format!(
                    "modifier {operator} requires an object argument"
                ))
            })?;
            for (path, value) in fields {
                apply_modifier(&mut target, modifier, path, value)?;
            }
        }
        target
    };

    check_object(&new_doc)?;
    let ids_equal = match (doc.get("_id"), new_doc.get("_id")) {
        (None, None) => true,
        (Some(a), Some(b)) => are_things_equal(a, b),
        _ => false,
    };
    if !ids_equal {
        return Err(ModelError::invalid_modifier(
            "you cannot change a document's _id",
        ));
    }
    Ok(new_doc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Set,
    Unset,
    Inc,
    Min,
    Max,
    Push,
    AddToSet,
    Pop,
    Pull,
}

impl Modifier {
    fn parse(operator: &str) -> ModelResult<Self> {
        match operator {
            "$set" => Ok(Self::Set),
            "$unset" => Ok(Self::Unset),
            "$inc" => Ok(Self::Inc),
            "$min" => Ok(Self::Min),
            "$max" => Ok(Self::Max),
            "$push" => Ok(Self::Push),
            "$addToSet" => Ok(Self::AddToSet),
            "$pop" => Ok(Self::Pop),
            "$pull" => Ok(Self::Pull),
            other => Err(ModelError::invalid_modifier(format!(
                "unknown modifier {other}"
            ))),
        }
    }
}

/// Walks the dot path and applies the modifier at the last step.
///
/// Missing intermediate objects are created (except for `$unset`); a
/// defined non-object parent is never replaced, the modifier silently
/// does nothing instead.
fn apply_modifier(
    target: &mut Value,
    modifier: Modifier,
    path: &str,
    arg: &Value,
) -> ModelResult<()> {
    let parts: Vec<&str> = path.split('.').collect();
    apply_at_path(target, modifier, &parts, arg)
}

fn apply_at_path(
    target: &mut Value,
    modifier: Modifier,
    parts: &[&str],
    arg: &Value,
) -> ModelResult<()> {
    let (head, rest) = parts.split_first().expect("path has at least one segment");
    if rest.is_empty() {
        return apply_last_step(target, modifier, head, arg);
    }

    match target {
        Value::Object(_) => {
            if target.get(head).is_none() {
                if modifier == Modifier::Unset {
                    return Ok(());
                }
                target.set(*head, Value::object());
            }
            let child = target.get_mut(head).expect("field was just ensured");
            apply_at_path(child, modifier, rest, arg)
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(i) if i < items.len() => apply_at_path(&mut items[i], modifier, rest, arg),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

fn apply_last_step(
    target: &mut Value,
    modifier: Modifier,
    field: &str,
    arg: &Value,
) -> ModelResult<()> {
    match modifier {
        Modifier::Set => {
            set_field(target, field, arg.clone());
            Ok(())
        }
        Modifier::Unset => {
            match target {
                Value::Object(_) => {
                    target.remove_field(field);
                }
                Value::Array(items) => {
                    // Unsetting an array slot leaves a null hole rather than
                    // shifting later elements.
                    if let Ok(i) = field.parse::<usize>() {
                        if let Some(slot) = items.get_mut(i) {
                            *slot = Value::Null;
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        }
        Modifier::Inc => {
            let increment = arg.as_number().ok_or_else(|| {
                ModelError::invalid_modifier(format!("{} must be a number to $inc", arg.kind()))
            })?;
            match field_value(target, field) {
                Some(Value::Number(current)) => {
                    let next = current + increment;
                    set_field(target, field, Value::Number(next));
                    Ok(())
                }
                Some(Value::Undefined) | None => {
                    set_field(target, field, Value::Number(increment));
                    Ok(())
                }
                Some(_) => Err(ModelError::invalid_modifier(
                    "cannot use the $inc modifier on non-number fields",
                )),
            }
        }
        Modifier::Min | Modifier::Max => {
            match field_value(target, field) {
                Some(Value::Undefined) | None => set_field(target, field, arg.clone()),
                Some(current) => {
                    let replace = match modifier {
                        Modifier::Min => compare_things(arg, &current) == Ordering::Less,
                        _ => compare_things(arg, &current) == Ordering::Greater,
                    };
                    if replace {
                        set_field(target, field, arg.clone());
                    }
                }
            }
            Ok(())
        }
        Modifier::Push => apply_push(target, field, arg),
        Modifier::AddToSet => apply_add_to_set(target, field, arg),
        Modifier::Pop => {
            let Some(Value::Array(_)) = field_value(target, field) else {
                return Err(ModelError::invalid_modifier(
                    "cannot $pop an element from non-array values",
                ));
            };
            let n = arg.as_number().ok_or_else(|| {
                ModelError::invalid_modifier(format!(
                    "{} is not an integer, cannot use it with $pop",
                    arg.kind()
                ))
            })?;
            if n != 1.0 && n != -1.0 {
                return Err(ModelError::invalid_modifier(
                    "$pop expects 1 to remove the last element or -1 to remove the first",
                ));
            }
            if let Some(Value::Array(items)) = field_value_mut(target, field) {
                if n > 0.0 {
                    items.pop();
                } else if !items.is_empty() {
                    items.remove(0);
                }
            }
            Ok(())
        }
        Modifier::Pull => {
            let Some(Value::Array(_)) = field_value(target, field) else {
                return Err(ModelError::invalid_modifier(
                    "cannot $pull an element from non-array values",
                ));
            };
            // Evaluate matches first so a malformed sub-query errors out
            // before any element is removed.
            let kept = {
                let Some(Value::Array(items)) = field_value(target, field) else {
                    unreachable!()
                };
                let mut kept = Vec::with_capacity(items.len());
                for item in &items {
                    kept.push(!match_query(item, arg)?);
                }
                kept
            };
            if let Some(Value::Array(items)) = field_value_mut(target, field) {
                let mut keep = kept.iter().copied();
                items.retain(|_| keep.next().unwrap_or(true));
            }
            Ok(())
        }
    }
}

fn apply_push(target: &mut Value, field: &str, arg: &Value) -> ModelResult<()> {
    ensure_array_field(target, field, "$push")?;

    // { $each: [..], $slice: n } pushes many then truncates.
    let (each, slice) = parse_each_argument(arg, "$push", true)?;
    let Some(Value::Array(items)) = field_value_mut(target, field) else {
        return Ok(());
    };
    match each {
        Some(values) => items.extend(values.iter().cloned()),
        None => items.push(arg.clone()),
    }
    if let Some(n) = slice {
        apply_slice(items, n);
    }
    Ok(())
}

fn apply_add_to_set(target: &mut Value, field: &str, arg: &Value) -> ModelResult<()> {
    ensure_array_field(target, field, "$addToSet")?;

    let (each, _) = parse_each_argument(arg, "$addToSet", false)?;
    let to_add: Vec<&Value> = match &each {
        Some(values) => values.iter().collect(),
        None => vec![arg],
    };
    let Some(Value::Array(items)) = field_value_mut(target, field) else {
        return Ok(());
    };
    for value in to_add {
        if !items.iter().any(|existing| {
            compare_things(existing, value) == Ordering::Equal
        }) {
            items.push(value.clone());
        }
    }
    Ok(())
}

/// Creates the field as an empty array if missing; errors when it exists
/// with a non-array value.
fn ensure_array_field(target: &mut Value, field: &str, operator: &str) -> ModelResult<()> {
    match field_value(target, field) {
        Some(Value::Array(_)) => Ok(()),
        Some(Value::Undefined) | None => {
            set_field(target, field, Value::Array(Vec::new()));
            // A non-container parent swallows the set; that is still fine,
            // the operator becomes a no-op further down.
            Ok(())
        }
        Some(_) => Err(ModelError::invalid_modifier(format!(
            "cannot {operator} an element on non-array values"
        ))),
    }
}

/// Recognizes a `{ $each: [...], $slice: n }` argument.
///
/// Returns `(elements, slice)`. A plain value returns `(None, None)`.
/// Unauthorized sub-operators are errors.
fn parse_each_argument<'a>(
    arg: &'a Value,
    operator: &str,
    allow_slice: bool,
) -> ModelResult<(Option<&'a [Value]>, Option<f64>)> {
    let Some(entries) = arg.as_object() else {
        return Ok((None, None));
    };
    let has_each = arg.get("$each").is_some();
    let has_slice = arg.get("$slice").is_some();
    if !has_each && !has_slice {
        return Ok((None, None));
    }

    for (key, _) in entries {
        let authorized = key == "$each" || (allow_slice && key == "$slice");
        if !authorized {
            return Err(ModelError::invalid_modifier(format!(
                "cannot use another field in conjunction with $each in {operator}"
            )));
        }
    }

    let each = match arg.get("$each") {
        Some(value) => Some(value.as_array().ok_or_else(|| {
            ModelError::invalid_modifier("$each requires an array value")
        })?),
        None => Some(&[] as &[Value]),
    };
    let slice = match arg.get("$slice") {
        Some(value) => {
            let n = value.as_number().ok_or_else(|| {
                ModelError::invalid_modifier("$slice requires an integer value")
            })?;
            Some(n)
        }
        None => None,
    };
    Ok((each, slice))
}

fn apply_slice(items: &mut Vec<Value>, n: f64) {
    if n == 0.0 {
        items.clear();
    } else if n > 0.0 {
        items.truncate(n as usize);
    } else {
        let keep = (-n) as usize;
        if items.len() > keep {
            let drop = items.len() - keep;
            items.drain(..drop);
        }
    }
}

/// Reads a field on an object, or an element on an array addressed by a
/// numeric segment.
fn field_value(target: &Value, field: &str) -> Option<Value> {
    match target {
        Value::Object(_) => target.get(field).cloned(),
        Value::Array(items) => field
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned(),
        _ => None,
    }
}

fn field_value_mut<'a>(target: &'a mut Value, field: &str) -> Option<&'a mut Value> {
    match target {
        Value::Object(_) => target.get_mut(field),
        Value::Array(items) => field
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn set_field(target: &mut Value, field: &str, value: Value) {
    match target {
        Value::Object(_) => target.set(field, value),
        Value::Array(items) => {
            if let Ok(i) = field.parse::<usize>() {
                if let Some(slot) = items.get_mut(i) {
                    *slot = value;
                }
            }
        }
        _ => {}
    }
}
