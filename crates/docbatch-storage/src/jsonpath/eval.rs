//! Lax-mode evaluation of parsed predicates.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Accessor, CmpOp, Operand, Path, Predicate};

/// Three-valued predicate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    fn and(self, other: Truth) -> Self {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Truth) -> Self {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

pub(crate) fn evaluate(predicate: &Predicate, root: &Value) -> Truth {
    match predicate {
        Predicate::Compare(lhs, op, rhs) => {
            compare_sequences(&operand_values(lhs, root), *op, &operand_values(rhs, root))
        }
        Predicate::Exists(path) => Truth::from(!select(path, root).is_empty()),
        Predicate::PathValue(path) => match select(path, root).as_slice() {
            [Value::Bool(b)] => Truth::from(*b),
            _ => Truth::Unknown,
        },
        Predicate::Literal(b) => Truth::from(*b),
        Predicate::Not(inner) => evaluate(inner, root).not(),
        Predicate::And(lhs, rhs) => {
            let left = evaluate(lhs, root);
            if left == Truth::False {
                return Truth::False;
            }
            left.and(evaluate(rhs, root))
        }
        Predicate::Or(lhs, rhs) => {
            let left = evaluate(lhs, root);
            if left == Truth::True {
                return Truth::True;
            }
            left.or(evaluate(rhs, root))
        }
    }
}

/// Selects the sequence of values a path addresses.
pub(crate) fn select<'a>(path: &Path, root: &'a Value) -> Vec<&'a Value> {
    let mut current = vec![root];
    for accessor in &path.accessors {
        let mut next = Vec::new();
        for item in current {
            match (accessor, item) {
                (Accessor::Member(key), Value::Object(map)) => next.extend(map.get(key)),
                (Accessor::Member(key), Value::Array(items)) => next.extend(
                    items
                        .iter()
                        .filter_map(|element| element.as_object().and_then(|m| m.get(key))),
                ),
                (Accessor::AnyMember, Value::Object(map)) => next.extend(map.values()),
                (Accessor::AnyMember, Value::Array(items)) => {
                    for element in items {
                        if let Value::Object(map) = element {
                            next.extend(map.values());
                        }
                    }
                }
                (Accessor::AnyElement, Value::Array(items)) => next.extend(items.iter()),
                (Accessor::AnyElement, other) => next.push(other),
                (Accessor::Element(index), Value::Array(items)) => next.extend(items.get(*index)),
                (Accessor::Element(0), other) => next.push(other),
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Operand values with arrays unwrapped, as lax comparison does.
fn operand_values<'a>(operand: &'a Operand, root: &'a Value) -> Vec<&'a Value> {
    match operand {
        Operand::Literal(value) => vec![value],
        Operand::Path(path) => select(path, root)
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .collect(),
        // Rejected at parse time.
        Operand::Variable(_) => Vec::new(),
    }
}

fn compare_sequences(lhs: &[&Value], op: CmpOp, rhs: &[&Value]) -> Truth {
    let mut unknown = false;
    for left in lhs {
        for right in rhs {
            match compare(left, op, right) {
                Some(true) => return Truth::True,
                Some(false) => {}
                None => unknown = true,
            }
        }
    }
    if unknown {
        Truth::Unknown
    } else {
        Truth::False
    }
}

/// Compares two scalars. `None` means the pair is not comparable.
fn compare(left: &Value, op: CmpOp, right: &Value) -> Option<bool> {
    let ordering = match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) | (_, Value::Null) => {
            return Some(op == CmpOp::Ne);
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?)?,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => return None,
    };
    Some(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(Truth::Unknown.and(Truth::False), Truth::False);
        assert_eq!(Truth::Unknown.and(Truth::True), Truth::Unknown);
        assert_eq!(Truth::Unknown.or(Truth::True), Truth::True);
        assert_eq!(Truth::Unknown.or(Truth::False), Truth::Unknown);
        assert_eq!(Truth::Unknown.not(), Truth::Unknown);
    }

    #[test]
    fn test_null_only_equals_null() {
        assert_eq!(compare(&Value::Null, CmpOp::Eq, &Value::Null), Some(true));
        assert_eq!(
            compare(&Value::Null, CmpOp::Eq, &Value::from(1)),
            Some(false)
        );
        assert_eq!(
            compare(&Value::Null, CmpOp::Ne, &Value::from("x")),
            Some(true)
        );
    }

    #[test]
    fn test_objects_are_not_comparable() {
        let object = serde_json::json!({"a": 1});
        assert_eq!(compare(&object, CmpOp::Eq, &object), None);
    }
}
