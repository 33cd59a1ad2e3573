//! Core identifier and item types shared by the index, the farm and queries.

use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PredictError, Result};

/// Item identifier declared by the submitted document.
pub type ItemId = u32;

/// Stable identifier of a key in the prefix trie.
///
/// The two topmost values of the u32 space are reserved: `u32::MAX` marks
/// "no value stored at this node" and `u32::MAX - 1` marks "no such path".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FunnelId(u32);

impl FunnelId {
    /// Sentinel for a trie node that exists but carries no key.
    pub const NO_VALUE: u32 = u32::MAX;
    /// Sentinel for a path that does not exist in the trie.
    pub const NO_PATH: u32 = u32::MAX - 1;
    /// Number of allocatable funnel ids.
    pub const CAPACITY: u32 = Self::NO_PATH;

    /// Creates a funnel id from a raw value.
    ///
    /// # Panics
    /// Panics if `raw` collides with one of the sentinels.
    #[inline]
    pub fn new(raw: u32) -> Self {
        assert!(raw < Self::NO_PATH, "funnel id collides with a sentinel");
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Serialize for FunnelId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunnelId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        if value >= Self::NO_PATH {
            return Err(D::Error::custom("FunnelId cannot be a sentinel value"));
        }
        Ok(Self(value))
    }
}

/// An optional funnel id packed into 4 bytes, using `FunnelId::NO_VALUE` as None.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct OptionFunnelId(u32);

impl OptionFunnelId {
    #[inline]
    pub fn none() -> Self {
        Self(FunnelId::NO_VALUE)
    }

    #[inline]
    pub fn some(id: FunnelId) -> Self {
        Self(id.0)
    }

    #[inline]
    pub fn to_option(self) -> Option<FunnelId> {
        if self.0 >= FunnelId::NO_PATH {
            None
        } else {
            Some(FunnelId(self.0))
        }
    }

    #[inline]
    pub fn is_some(self) -> bool {
        self.to_option().is_some()
    }
}

impl Default for OptionFunnelId {
    fn default() -> Self {
        Self::none()
    }
}

/// A stored record: the declared id plus the full JSON object it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub document: Map<String, Value>,
}

impl Item {
    /// Builds an item from a submitted document, reading the id from `id_key`.
    pub fn from_document(document: Value, id_key: &str) -> Result<Self> {
        let Value::Object(document) = document else {
            return Err(PredictError::InvalidInput(
                "item must be a JSON object".to_string(),
            ));
        };
        let id = extract_item_id(&document, id_key)?;
        Ok(Self { id, document })
    }

    /// Parses an item from raw JSON text.
    pub fn from_json(text: &str, id_key: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text).map_err(|error| {
            PredictError::InvalidInput(format!("failed to parse item: {error}"))
        })?;
        Self::from_document(document, id_key)
    }

    /// Looks up a top-level field of the document.
    #[inline]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }
}

/// Reads the unsigned 32-bit id declared under `id_key`.
pub fn extract_item_id(document: &Map<String, Value>, id_key: &str) -> Result<ItemId> {
    let value = document.get(id_key).ok_or_else(|| {
        PredictError::InvalidInput(format!("item must have an '{id_key}'"))
    })?;
    value
        .as_u64()
        .and_then(|raw| ItemId::try_from(raw).ok())
        .ok_or_else(|| {
            PredictError::InvalidInput(format!(
                "value of '{id_key}' must be an unsigned 32-bit integer"
            ))
        })
}

/// Point-in-time counters describing the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Number of distinct keys in the trie.
    pub keys: usize,
    /// Number of trie nodes, including interior ones.
    pub nodes: usize,
    /// Number of non-empty funnels.
    pub funnels: usize,
    /// Number of stored items.
    pub items: usize,
}
