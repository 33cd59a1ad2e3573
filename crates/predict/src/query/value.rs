//! JSON value comparison used by filter predicates.
//!
//! Numbers compare by numeric value, so `30` and `30.0` are equal. Ordering
//! is only defined between two numbers or two strings.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Hashable form of a JSON scalar, used for set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    Null,
    Bool(bool),
    /// Any number with an integral value, including `4.0`.
    Integer(i128),
    /// Bit pattern of a number with a fractional part.
    Float(u64),
    String(String),
}

impl ScalarKey {
    /// Returns None for arrays and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => Some(number_key(number)),
            Value::String(text) => Some(Self::String(text.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn number_key(number: &Number) -> ScalarKey {
    if let Some(int) = number.as_i64() {
        return ScalarKey::Integer(i128::from(int));
    }
    if let Some(uint) = number.as_u64() {
        return ScalarKey::Integer(i128::from(uint));
    }
    let float = number.as_f64().unwrap_or(f64::NAN);
    if float.fract() == 0.0 && float.abs() < 1e38 {
        ScalarKey::Integer(float as i128)
    } else {
        ScalarKey::Float(float.to_bits())
    }
}

fn integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

/// Numeric ordering of two JSON numbers.
pub fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (integer(left), integer(right)) {
        return Some(left.cmp(&right));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

/// Ordering between two values of the same comparable kind.
///
/// Strings compare by bytes. Any other pairing yields None.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => compare_numbers(left, right),
        (Value::String(left), Value::String(right)) => Some(left.as_bytes().cmp(right.as_bytes())),
        _ => None,
    }
}

/// Structural equality with numeric comparison of numbers at every depth.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            compare_numbers(left, right) == Some(Ordering::Equal)
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left.iter().zip(right).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, a)| right.get(key).is_some_and(|b| values_equal(a, b)))
        }
        _ => left == right,
    }
}

/// True for values that may bound a range: numbers and strings.
#[inline]
pub fn is_orderable(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::String(_))
}

/// True when both values are orderable and of the same kind.
#[inline]
pub fn same_orderable_kind(left: &Value, right: &Value) -> bool {
    matches!(
        (left, right),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_numbers_share_a_key() {
        assert_eq!(
            ScalarKey::from_value(&json!(30)),
            ScalarKey::from_value(&json!(30.0))
        );
        assert_ne!(
            ScalarKey::from_value(&json!(30)),
            ScalarKey::from_value(&json!(30.5))
        );
        assert_eq!(
            ScalarKey::from_value(&json!(u64::MAX)),
            Some(ScalarKey::Integer(i128::from(u64::MAX)))
        );
    }

    #[test]
    fn composites_have_no_key() {
        assert_eq!(ScalarKey::from_value(&json!([1])), None);
        assert_eq!(ScalarKey::from_value(&json!({"a": 1})), None);
        assert_eq!(ScalarKey::from_value(&json!(null)), Some(ScalarKey::Null));
    }

    #[test]
    fn compare_only_within_kind() {
        assert_eq!(compare(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!(-3), &json!(-3.0)), Some(Ordering::Equal));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!("1"), &json!(1)), None);
        assert_eq!(compare(&json!(true), &json!(false)), None);
    }

    #[test]
    fn equality_is_numeric_at_depth() {
        assert!(values_equal(&json!(30), &json!(30.0)));
        assert!(values_equal(&json!([1, {"a": 2}]), &json!([1.0, {"a": 2.0}])));
        assert!(!values_equal(&json!([1, 2]), &json!([1])));
        assert!(!values_equal(&json!("30"), &json!(30)));
    }
}
