//! Query payload compilation.
//!
//! Turns a JSON query payload into a validated [`Query`]. Compilation never
//! touches the index, so it runs before any lock is taken.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::filter::FilterChain;
use super::projection::Projection;
use crate::config::PredictConfig;
use crate::error::{PredictError, Result};

/// A compiled, read-only query.
#[derive(Debug, Clone)]
pub struct Query {
    pub prefix: String,
    pub filters: Option<FilterChain>,
    pub excludes: Option<FilterChain>,
    pub projection: Projection,
    /// Maximum number of items to return, already clamped.
    pub num: usize,
    /// Opaque value returned with the response.
    pub echo: Option<Value>,
}

impl Query {
    /// Filters pass (when present) and excludes do not (when present).
    pub fn accepts(&self, document: &Map<String, Value>) -> bool {
        let included = self
            .filters
            .as_ref()
            .map_or(true, |filters| filters.matches(document));
        included
            && !self
                .excludes
                .as_ref()
                .is_some_and(|excludes| excludes.matches(document))
    }
}

#[derive(Debug, Clone)]
pub struct QueryCompiler {
    config: Arc<PredictConfig>,
}

impl QueryCompiler {
    pub fn new(config: Arc<PredictConfig>) -> Self {
        Self { config }
    }

    /// Compiles a raw JSON payload, enforcing the configured size limit.
    pub fn compile_bytes(&self, payload: &[u8]) -> Result<Query> {
        let limit = self.config.query_max_bytes;
        if limit > 0 && payload.len() > limit {
            return Err(PredictError::QueryParse(format!(
                "query payload is {} bytes, limit is {limit}",
                payload.len()
            )));
        }
        let value: Value = serde_json::from_slice(payload)
            .map_err(|error| PredictError::QueryParse(format!("invalid query JSON: {error}")))?;
        self.compile(&value)
    }

    pub fn compile(&self, payload: &Value) -> Result<Query> {
        let Value::Object(payload) = payload else {
            return Err(malformed("query must be a JSON object"));
        };
        let config = &*self.config;
        let keys = &config.query_keys;

        let prefix = self.prefix(payload.get(&keys.prefix))?;
        let filters = compile_chain(payload.get(&keys.filters), &config.id_key, &keys.filters)?;
        let excludes = compile_chain(payload.get(&keys.excludes), &config.id_key, &keys.excludes)?;
        let requested = requested_fields(payload.get(&keys.fields), &keys.fields)?;
        let projection = Projection::resolve(requested.as_deref(), config)?;
        let num = self.num(payload.get(&keys.num))?;
        let echo = payload.get(&keys.echo).cloned();

        Ok(Query {
            prefix,
            filters,
            excludes,
            projection,
            num,
            echo,
        })
    }

    fn prefix(&self, value: Option<&Value>) -> Result<String> {
        let name = &self.config.query_keys.prefix;
        let Some(value) = value else {
            return Err(malformed(&format!("'{name}' is required")));
        };
        let Value::String(prefix) = value else {
            return Err(malformed(&format!("'{name}' must be a string")));
        };
        let (min, max) = (self.config.prefix_min_len, self.config.prefix_max_len);
        if prefix.len() < min || prefix.len() > max {
            return Err(malformed(&format!(
                "'{name}' must be {min} to {max} bytes long, got {}",
                prefix.len()
            )));
        }
        Ok(prefix.clone())
    }

    fn num(&self, value: Option<&Value>) -> Result<usize> {
        let requested = match value {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| {
                    malformed(&format!(
                        "'{}' must be an unsigned integer",
                        self.config.query_keys.num
                    ))
                })?
                .try_into()
                .unwrap_or(usize::MAX),
        };
        Ok(match requested {
            0 => self.config.default_matches,
            n => n.min(self.config.max_matches),
        })
    }
}

fn compile_chain(value: Option<&Value>, id_key: &str, name: &str) -> Result<Option<FilterChain>> {
    match value {
        None => Ok(None),
        Some(value) => FilterChain::compile(value, id_key).map_err(|error| match error {
            PredictError::QueryParse(message) => malformed(&format!("'{name}': {message}")),
            other => other,
        }),
    }
}

/// Field names asked for by the query. None when the query did not ask.
fn requested_fields(value: Option<&Value>, name: &str) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(field)) => Ok(Some(vec![field.clone()])),
        Some(Value::Array(fields)) if fields.is_empty() => Ok(None),
        Some(Value::Array(fields)) => fields
            .iter()
            .map(|field| {
                field
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(&format!("'{name}' must only hold strings")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(malformed(&format!(
            "'{name}' must be a string or an array of strings"
        ))),
    }
}

fn malformed(message: &str) -> PredictError {
    PredictError::QueryParse(message.to_string())
}
