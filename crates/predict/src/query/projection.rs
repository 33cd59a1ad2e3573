//! Response field projection.

use serde_json::{Map, Value};

use crate::config::PredictConfig;
use crate::error::{PredictError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Return documents untouched.
    Whole,
    /// Return only these fields, in this order.
    Include(Vec<String>),
    /// Return every field except these.
    Exclude(Vec<String>),
}

impl Projection {
    /// Combines the fields a query asked for with the configured visibility.
    pub fn resolve(requested: Option<&[String]>, config: &PredictConfig) -> Result<Self> {
        let hidden = |field: &String| config.invisible_fields.contains(field);

        let projection = match requested {
            None if config.visible_all => {
                if config.invisible_fields.is_empty() {
                    Self::Whole
                } else {
                    Self::Exclude(config.invisible_fields.clone())
                }
            }
            None => Self::Include(
                dedup(config.visible_fields.iter())
                    .into_iter()
                    .filter(|field| !hidden(field))
                    .collect(),
            ),
            Some(requested) => Self::Include(
                dedup(requested.iter())
                    .into_iter()
                    .filter(|field| {
                        !hidden(field)
                            && (config.visible_all || config.visible_fields.contains(field))
                    })
                    .collect(),
            ),
        };

        if matches!(&projection, Self::Include(fields) if fields.is_empty()) {
            return Err(PredictError::QueryParse(
                "none of the requested fields are visible".to_string(),
            ));
        }
        Ok(projection)
    }

    pub fn apply(&self, document: &Map<String, Value>) -> Value {
        let projected = match self {
            Self::Whole => document.clone(),
            Self::Include(fields) => fields
                .iter()
                .filter_map(|field| {
                    document
                        .get(field)
                        .map(|value| (field.clone(), value.clone()))
                })
                .collect(),
            Self::Exclude(fields) => document
                .iter()
                .filter(|(field, _)| !fields.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        };
        Value::Object(projected)
    }
}

fn dedup<'a>(fields: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for field in fields {
        if !unique.contains(field) {
            unique.push(field.clone());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn config(visible_all: bool, visible: &[&str], invisible: &[&str]) -> PredictConfig {
        PredictConfig {
            visible_all,
            visible_fields: fields(visible),
            invisible_fields: fields(invisible),
            ..PredictConfig::default()
        }
    }

    #[test]
    fn default_is_whole_document() {
        let projection = Projection::resolve(None, &PredictConfig::default()).unwrap();
        assert_eq!(projection, Projection::Whole);
    }

    #[test]
    fn deny_list_without_request_excludes() {
        let projection = Projection::resolve(None, &config(true, &[], &["secret"])).unwrap();
        assert_eq!(projection, Projection::Exclude(fields(&["secret"])));
    }

    #[test]
    fn allow_list_without_request_includes_visible() {
        let projection =
            Projection::resolve(None, &config(false, &["id", "name", "secret"], &["secret"]))
                .unwrap();
        assert_eq!(projection, Projection::Include(fields(&["id", "name"])));
    }

    #[test]
    fn requested_fields_are_filtered() {
        let requested = fields(&["name", "secret", "age", "name"]);
        let open = Projection::resolve(Some(&requested), &config(true, &[], &["secret"])).unwrap();
        assert_eq!(open, Projection::Include(fields(&["name", "age"])));

        let closed =
            Projection::resolve(Some(&requested), &config(false, &["age"], &["secret"])).unwrap();
        assert_eq!(closed, Projection::Include(fields(&["age"])));
    }

    #[test]
    fn empty_include_is_rejected() {
        let requested = fields(&["secret"]);
        let result = Projection::resolve(Some(&requested), &config(true, &[], &["secret"]));
        assert!(matches!(result, Err(PredictError::QueryParse(_))));
    }

    #[test]
    fn apply_keeps_requested_order() {
        let document = json!({"id": 1, "name": "wumch", "age": 30, "secret": "x"});
        let Value::Object(document) = document else {
            unreachable!()
        };

        let include = Projection::Include(fields(&["name", "id", "missing"]));
        let projected = include.apply(&document);
        let keys: Vec<_> = projected.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, fields(&["name", "id"]));

        let exclude = Projection::Exclude(fields(&["secret"]));
        assert_eq!(
            exclude.apply(&document),
            json!({"id": 1, "name": "wumch", "age": 30})
        );
        assert_eq!(Projection::Whole.apply(&document), Value::Object(document));
    }
}
