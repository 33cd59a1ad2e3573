//! Field predicates and their compilation from query JSON.
//!
//! A filter payload takes one of these shapes:
//! - `null`, `{}` or `[]`: no filter
//! - an unsigned integer `n`: the item id equals `n`
//! - an array of unsigned integers: the item id is one of them
//! - an object with one entry per field, all of which must hold:
//!   - `"f": scalar` (or `null`) for equality
//!   - `"f": [v, ...]` for membership
//!   - `"f": {"$eq": v, "$ne": v, "$in": [..], "$min": v, "$max": v}`
//!
//! A field is treated as missing when it is absent or holds `null`, so
//! `{"$ne": null}` rejects a document whose field is stored as `null`.
//!
//! `$min` and `$max` must both be numbers or both be strings; a range mixing
//! the two is rejected as malformed rather than matching nothing.

use fnv::FnvHashSet;
use serde_json::{Map, Value};

use super::value::{compare, is_orderable, same_orderable_kind, values_equal, ScalarKey};
use crate::error::{PredictError, Result};

/// Set of values for `In` predicates.
///
/// Scalars are hashed. Arrays and objects fall back to a linear scan.
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    scalars: FnvHashSet<ScalarKey>,
    composites: Vec<Value>,
}

impl ValueSet {
    pub fn new(values: &[Value]) -> Self {
        let mut set = Self::default();
        for value in values {
            match ScalarKey::from_value(value) {
                Some(key) => {
                    set.scalars.insert(key);
                }
                None => set.composites.push(value.clone()),
            }
        }
        set
    }

    #[inline]
    fn has_null(&self) -> bool {
        self.scalars.contains(&ScalarKey::Null)
    }

    fn contains(&self, value: &Value) -> bool {
        match ScalarKey::from_value(value) {
            Some(key) => self.scalars.contains(&key),
            None => self
                .composites
                .iter()
                .any(|candidate| values_equal(candidate, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.scalars.len() + self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Equal {
        field: String,
        value: Value,
    },
    Unequal {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: ValueSet,
    },
    /// Inclusive bounds; a missing bound is open.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Self::Equal { field, .. }
            | Self::Unequal { field, .. }
            | Self::In { field, .. }
            | Self::Range { field, .. } => field,
        }
    }

    /// Relative evaluation cost; cheaper predicates run first.
    fn cost(&self) -> u8 {
        match self {
            Self::Equal { .. } | Self::Unequal { .. } => 0,
            Self::In { .. } => 1,
            Self::Range { .. } => 2,
        }
    }

    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let actual = document.get(self.field()).filter(|value| !value.is_null());
        match self {
            Self::Equal { value, .. } => match actual {
                None => value.is_null(),
                Some(actual) => values_equal(actual, value),
            },
            Self::Unequal { value, .. } => match actual {
                None => !value.is_null(),
                Some(actual) => !values_equal(actual, value),
            },
            Self::In { values, .. } => match actual {
                None => values.has_null(),
                Some(actual) => values.contains(actual),
            },
            Self::Range { min, max, .. } => {
                let Some(actual) = actual else {
                    return false;
                };
                let above = min
                    .as_ref()
                    .map_or(true, |min| compare(actual, min).is_some_and(|order| order.is_ge()));
                let below = max
                    .as_ref()
                    .map_or(true, |max| compare(actual, max).is_some_and(|order| order.is_le()));
                above && below
            }
        }
    }
}

/// Conjunction of predicates, ordered cheapest first.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    predicates: Vec<Predicate>,
}

impl FilterChain {
    pub fn new(mut predicates: Vec<Predicate>) -> Self {
        reorder_by_cost(&mut predicates);
        Self { predicates }
    }

    /// Compiles a filter payload. Returns None when it imposes no constraint.
    ///
    /// `id_key` names the field that bare integers and integer arrays refer to.
    pub fn compile(payload: &Value, id_key: &str) -> Result<Option<Self>> {
        let predicates = match payload {
            Value::Null => return Ok(None),
            Value::Number(number) => {
                if number.as_u64().is_none() {
                    return Err(malformed("filter id must be an unsigned integer"));
                }
                vec![Predicate::Equal {
                    field: id_key.to_string(),
                    value: payload.clone(),
                }]
            }
            Value::Array(ids) if ids.is_empty() => return Ok(None),
            Value::Array(ids) => {
                if !ids.iter().all(|id| id.as_u64().is_some()) {
                    return Err(malformed("filter id list must hold unsigned integers"));
                }
                vec![Predicate::In {
                    field: id_key.to_string(),
                    values: ValueSet::new(ids),
                }]
            }
            Value::Object(tree) if tree.is_empty() => return Ok(None),
            Value::Object(tree) => compile_tree(tree)?,
            Value::Bool(_) | Value::String(_) => {
                return Err(malformed(
                    "filter must be an object, an array or an unsigned integer",
                ))
            }
        };
        Ok(Some(Self::new(predicates)))
    }

    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(document))
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

fn compile_tree(tree: &Map<String, Value>) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(tree.len());
    for (field, condition) in tree {
        match condition {
            Value::Object(operators) => compile_operators(field, operators, &mut predicates)?,
            Value::Array(values) => predicates.push(Predicate::In {
                field: field.clone(),
                values: ValueSet::new(values),
            }),
            scalar => predicates.push(Predicate::Equal {
                field: field.clone(),
                value: scalar.clone(),
            }),
        }
    }
    Ok(predicates)
}

fn compile_operators(
    field: &str,
    operators: &Map<String, Value>,
    predicates: &mut Vec<Predicate>,
) -> Result<()> {
    if operators.is_empty() {
        return Err(malformed(&format!("no operator given for field '{field}'")));
    }

    let mut min = None;
    let mut max = None;
    for (operator, argument) in operators {
        match operator.as_str() {
            "$eq" => predicates.push(Predicate::Equal {
                field: field.to_string(),
                value: argument.clone(),
            }),
            "$ne" => predicates.push(Predicate::Unequal {
                field: field.to_string(),
                value: argument.clone(),
            }),
            "$in" => {
                let Value::Array(values) = argument else {
                    return Err(malformed(&format!("'$in' of '{field}' must be an array")));
                };
                predicates.push(Predicate::In {
                    field: field.to_string(),
                    values: ValueSet::new(values),
                });
            }
            "$min" | "$max" => {
                if !is_orderable(argument) {
                    return Err(malformed(&format!(
                        "'{operator}' of '{field}' must be a number or a string"
                    )));
                }
                if operator == "$min" {
                    min = Some(argument.clone());
                } else {
                    max = Some(argument.clone());
                }
            }
            unknown => {
                return Err(malformed(&format!(
                    "unknown operator '{unknown}' for field '{field}'"
                )))
            }
        }
    }

    if let (Some(low), Some(high)) = (&min, &max) {
        if !same_orderable_kind(low, high) {
            return Err(malformed(&format!(
                "range bounds of '{field}' must have the same type"
            )));
        }
    }
    if min.is_some() || max.is_some() {
        predicates.push(Predicate::Range {
            field: field.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

/// Stable sort by cost, so predicates of equal cost keep payload order.
fn reorder_by_cost(predicates: &mut [Predicate]) {
    if predicates.len() > 1 {
        predicates.sort_by_key(Predicate::cost);
    }
}

fn malformed(message: &str) -> PredictError {
    PredictError::QueryParse(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn chain(payload: Value) -> FilterChain {
        FilterChain::compile(&payload, "id")
            .expect("filter should compile")
            .expect("filter should not be empty")
    }

    #[test]
    fn empty_payloads_mean_no_filter() {
        for payload in [json!(null), json!({}), json!([])] {
            assert!(FilterChain::compile(&payload, "id").unwrap().is_none());
        }
    }

    #[test]
    fn wrong_payload_types_are_rejected() {
        for payload in [json!("abc"), json!(true), json!(-1), json!(1.5), json!([1, "x"])] {
            assert!(
                FilterChain::compile(&payload, "id").is_err(),
                "{payload} should be rejected"
            );
        }
    }

    #[test]
    fn bare_ids_match_the_id_field() {
        let single = chain(json!(7));
        assert!(single.matches(&doc(json!({"id": 7}))));
        assert!(!single.matches(&doc(json!({"id": 8}))));

        let list = chain(json!([1, 3]));
        assert!(list.matches(&doc(json!({"id": 3}))));
        assert!(!list.matches(&doc(json!({"id": 2}))));
    }

    #[test]
    fn null_equality_tests_absence() {
        let absent = chain(json!({"gender": null}));
        assert!(absent.matches(&doc(json!({"id": 1}))));
        assert!(absent.matches(&doc(json!({"id": 1, "gender": null}))));
        assert!(!absent.matches(&doc(json!({"id": 1, "gender": "f"}))));

        let present = chain(json!({"gender": {"$ne": null}}));
        assert!(present.matches(&doc(json!({"gender": "f"}))));
        assert!(!present.matches(&doc(json!({"id": 1}))));
        assert!(!present.matches(&doc(json!({"id": 1, "gender": null}))));
    }

    #[test]
    fn unequal_accepts_missing_field() {
        let filter = chain(json!({"type": {"$ne": "video"}}));
        assert!(filter.matches(&doc(json!({"id": 1}))));
        assert!(filter.matches(&doc(json!({"type": "audio"}))));
        assert!(!filter.matches(&doc(json!({"type": "video"}))));
    }

    #[test]
    fn membership_with_null_matches_missing() {
        let filter = chain(json!({"tag": ["a", null, [1, 2]]}));
        assert!(filter.matches(&doc(json!({"tag": "a"}))));
        assert!(filter.matches(&doc(json!({"id": 1}))));
        assert!(filter.matches(&doc(json!({"tag": [1, 2.0]}))));
        assert!(!filter.matches(&doc(json!({"tag": "b"}))));

        let strict = chain(json!({"tag": {"$in": ["a"]}}));
        assert!(!strict.matches(&doc(json!({"id": 1}))));
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let filter = chain(json!({"age": 30}));
        assert!(filter.matches(&doc(json!({"age": 30.0}))));
        let set = chain(json!({"age": [30.0, 31]}));
        assert!(set.matches(&doc(json!({"age": 30}))));
    }

    #[test]
    fn range_is_inclusive_and_typed() {
        let filter = chain(json!({"age": {"$min": 18, "$max": 30}}));
        assert!(filter.matches(&doc(json!({"age": 18}))));
        assert!(filter.matches(&doc(json!({"age": 30.0}))));
        assert!(!filter.matches(&doc(json!({"age": 31}))));
        assert!(!filter.matches(&doc(json!({"age": "20"}))));
        assert!(!filter.matches(&doc(json!({"id": 1}))));

        let open = chain(json!({"name": {"$min": "m"}}));
        assert!(open.matches(&doc(json!({"name": "zed"}))));
        assert!(!open.matches(&doc(json!({"name": "alice"}))));
    }

    #[test]
    fn malformed_operator_objects_are_rejected() {
        for payload in [
            json!({"age": {}}),
            json!({"age": {"$gt": 1}}),
            json!({"age": {"$in": 3}}),
            json!({"age": {"$min": [1]}}),
            json!({"age": {"$min": true}}),
            json!({"age": {"$min": 1, "$max": "z"}}),
        ] {
            assert!(
                FilterChain::compile(&payload, "id").is_err(),
                "{payload} should be rejected"
            );
        }
    }

    #[test]
    fn operators_combine_conjunctively() {
        let filter = chain(json!({"age": {"$ne": 25, "$min": 20, "$max": 30}, "kind": "a"}));
        assert_eq!(filter.len(), 3);
        assert!(filter.matches(&doc(json!({"age": 24, "kind": "a"}))));
        assert!(!filter.matches(&doc(json!({"age": 25, "kind": "a"}))));
        assert!(!filter.matches(&doc(json!({"age": 24, "kind": "b"}))));
    }

    #[test]
    fn cheaper_predicates_run_first() {
        let filter = chain(json!({
            "a": {"$min": 1},
            "b": ["x", "y"],
            "c": "z",
        }));
        let order: Vec<_> = filter
            .predicates()
            .iter()
            .map(|predicate| predicate.cost())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
