//! Deep comparison and dot-path extraction.
//!
//! One total order covers every value kind so that sorting and the index
//! tree share a single comparator. The kind ranks are:
//! undefined < null < number < string < boolean < datetime < array < object.

use crate::value::Value;
use std::cmp::Ordering;

fn kind_rank(v: &Value) -> u8 {
    match v {
        // Predicates never reach disk or an index; rank them with undefined.
        Value::Undefined | Value::Where(_) => 0,
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Bool(_) => 4,
        Value::DateTime(_) => 5,
        Value::Array(_) => 6,
        Value::Object(_) => 7,
    }
}

/// Totally orders two values.
///
/// Values of different kinds order by kind rank. Within a kind: numbers
/// and strings by natural order (NaN sorts with itself), booleans
/// false before true, datetimes by instant, arrays lexicographically by
/// element, objects by their (key, value) pairs taken in sorted-key order.
#[must_use]
pub fn compare_things(a: &Value, b: &Value) -> Ordering {
    let rank = kind_rank(a).cmp(&kind_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_things(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xs: Vec<&(String, Value)> = x.iter().collect();
            let mut ys: Vec<&(String, Value)> = y.iter().collect();
            xs.sort_by(|p, q| p.0.cmp(&q.0));
            ys.sort_by(|p, q| p.0.cmp(&q.0));
            for ((xk, xv), (yk, yv)) in xs.iter().zip(ys.iter()) {
                let ord = xk.cmp(yk).then_with(|| compare_things(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => Ordering::Equal,
    }
}

/// Strict deep equality, with the match-time rules:
/// mismatched kinds are unequal, anything involving `Undefined` is
/// unequal (including `Undefined` against itself), and objects compare
/// their field sets regardless of insertion order.
#[must_use]
pub fn are_things_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        (Value::Where(_), _) | (_, Value::Where(_)) => false,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(xv, yv)| are_things_equal(xv, yv))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, xv)| match b.get(k) {
                    Some(yv) => are_things_equal(xv, yv),
                    None => false,
                })
                && y.iter().all(|(k, _)| a.get(k).is_some())
        }
        _ => false,
    }
}

/// Extracts the value at a dot-notation path.
///
/// Numeric segments index into arrays. A non-numeric segment applied
/// across an array element projects the remainder of the path over every
/// element, yielding an array (`planets.name` over an array of planets
/// gives the array of names). Missing fields yield `Undefined`.
#[must_use]
pub fn get_dot_value(doc: &Value, path: &str) -> Value {
    let parts: Vec<&str> = path.split('.').collect();
    dot_value_parts(doc, &parts)
}

fn dot_value_parts(obj: &Value, parts: &[&str]) -> Value {
    let Some((head, rest)) = parts.split_first() else {
        return obj.clone();
    };

    match obj {
        Value::Object(_) => {
            let child = obj.get(head);
            if rest.is_empty() {
                return child.cloned().unwrap_or(Value::Undefined);
            }
            match child {
                Some(Value::Array(items)) => {
                    // An integer segment picks one element; anything else
                    // projects the rest of the path over all elements.
                    if let Ok(i) = rest[0].parse::<usize>() {
                        match items.get(i) {
                            Some(el) => dot_value_parts(el, &rest[1..]),
                            None => Value::Undefined,
                        }
                    } else {
                        Value::Array(items.iter().map(|el| dot_value_parts(el, rest)).collect())
                    }
                }
                Some(child) => dot_value_parts(child, rest),
                None => Value::Undefined,
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(i) => match items.get(i) {
                Some(el) => dot_value_parts(el, rest),
                None => Value::Undefined,
            },
            Err(_) => Value::Undefined,
        },
        _ => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array, doc};

    #[test]
    fn kinds_order_by_rank() {
        let ordered = [
            Value::Undefined,
            Value::Null,
            Value::Number(9.0),
            Value::String("z".into()),
            Value::Bool(false),
            Value::DateTime(0),
            Value::Array(vec![]),
            Value::object(),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_things(&pair[0], &pair[1]), Ordering::Less);
            assert_eq!(compare_things(&pair[1], &pair[0]), Ordering::Greater);
        }
    }

    #[test]
    fn numbers_and_strings_natural_order() {
        assert_eq!(
            compare_things(&Value::Number(1.5), &Value::Number(2.0)),
            Ordering::Less
        );
        assert_eq!(
            compare_things(&Value::String("abc".into()), &Value::String("abd".into())),
            Ordering::Less
        );
        assert_eq!(
            compare_things(&Value::Bool(false), &Value::Bool(true)),
            Ordering::Less
        );
        assert_eq!(
            compare_things(&Value::DateTime(10), &Value::DateTime(20)),
            Ordering::Less
        );
    }

    #[test]
    fn arrays_compare_lexicographically() {
        assert_eq!(
            compare_things(&array![1, 2], &array![1, 3]),
            Ordering::Less
        );
        assert_eq!(compare_things(&array![1], &array![1, 0]), Ordering::Less);
        assert_eq!(compare_things(&array![2], &array![1, 9]), Ordering::Greater);
    }

    #[test]
    fn objects_compare_by_sorted_pairs() {
        assert_eq!(
            compare_things(&doc! { "a" => 1 }, &doc! { "a" => 2 }),
            Ordering::Less
        );
        // Key names decide before values do.
        assert_eq!(
            compare_things(&doc! { "a" => 9 }, &doc! { "b" => 1 }),
            Ordering::Less
        );
        // Insertion order is irrelevant.
        assert_eq!(
            compare_things(&doc! { "a" => 1, "b" => 2 }, &doc! { "b" => 2, "a" => 1 }),
            Ordering::Equal
        );
    }

    #[test]
    fn equality_is_strict() {
        assert!(are_things_equal(&Value::Number(2.0), &Value::Number(2.0)));
        assert!(!are_things_equal(&Value::Number(2.0), &Value::String("2".into())));
        assert!(!are_things_equal(&Value::Null, &Value::Undefined));
        assert!(!are_things_equal(&Value::Undefined, &Value::Undefined));
        assert!(!are_things_equal(&Value::Bool(true), &Value::Number(1.0)));
    }

    #[test]
    fn equality_on_containers() {
        assert!(are_things_equal(&array![1, 2], &array![1, 2]));
        assert!(!are_things_equal(&array![1, 2], &array![2, 1]));
        assert!(!are_things_equal(&array![1], &Value::Number(1.0)));
        assert!(are_things_equal(
            &doc! { "a" => 1, "b" => 2 },
            &doc! { "b" => 2, "a" => 1 }
        ));
        assert!(!are_things_equal(&doc! { "a" => 1 }, &doc! { "a" => 1, "b" => 2 }));
    }

    #[test]
    fn dot_value_walks_nested_objects() {
        let d = doc! { "a" => doc! { "b" => doc! { "c" => 7 } } };
        assert_eq!(get_dot_value(&d, "a.b.c"), Value::Number(7.0));
        assert_eq!(get_dot_value(&d, "a.b"), doc! { "c" => 7 });
        assert_eq!(get_dot_value(&d, "a.x.c"), Value::Undefined);
    }

    #[test]
    fn dot_value_indexes_arrays() {
        let d = doc! { "tags" => array!["red", "green", "blue"] };
        assert_eq!(get_dot_value(&d, "tags.1"), Value::String("green".into()));
        assert_eq!(get_dot_value(&d, "tags.9"), Value::Undefined);
    }

    #[test]
    fn dot_value_projects_across_arrays() {
        let d = doc! {
            "planets" => array![
                doc! { "name" => "mercury", "moons" => 0 },
                doc! { "name" => "mars", "moons" => 2 },
            ]
        };
        assert_eq!(
            get_dot_value(&d, "planets.name"),
            array!["mercury", "mars"]
        );
        assert_eq!(get_dot_value(&d, "planets.1.moons"), Value::Number(2.0));
    }
}
