//! Write path: attaching items to keys and detaching them.

use std::sync::Arc;

use fnv::FnvHashSet;

use crate::config::PredictConfig;
use crate::error::{PredictError, Result};
use crate::shared::SharedIndex;
use crate::types::{Item, ItemId};

/// Applies attach and detach requests to the shared index.
///
/// Each request takes the write lock once, so readers never observe a
/// partially applied multi-key operation.
#[derive(Debug, Clone)]
pub struct Keeper {
    shared: Arc<SharedIndex>,
    config: Arc<PredictConfig>,
}

impl Keeper {
    pub fn new(shared: Arc<SharedIndex>, config: Arc<PredictConfig>) -> Self {
        Self { shared, config }
    }

    /// Attaches `item` under every key.
    ///
    /// Returns true when a new membership was created, or when `upsert` is
    /// set. Limits are checked before anything is modified.
    pub fn attach<K: AsRef<[u8]>>(&self, keys: &[K], item: Item, upsert: bool) -> Result<bool> {
        let keys = unique_keys(keys)?;
        let id = item.id;
        let item = Arc::new(item);

        let mut data = self.shared.write();

        let max_items = self.config.max_items;
        if max_items > 0 && !data.farm.contains_item(id) && data.farm.item_count() >= max_items {
            return Err(PredictError::Capacity(format!(
                "item limit of {max_items} reached"
            )));
        }
        let new_keys = keys
            .iter()
            .filter(|key| data.trie.lookup(key).is_none())
            .count();
        if new_keys as u64 > data.trie.remaining_funnels() {
            return Err(PredictError::Capacity(
                "funnel id space exhausted".to_string(),
            ));
        }

        let mut changed = false;
        for key in &keys {
            let funnel = data.trie.ensure(key)?;
            changed |= data.farm.attach(funnel, Arc::clone(&item), upsert);
        }
        drop(data);

        if changed {
            self.shared.mark_dirty();
        }
        tracing::debug!(item = id, keys = keys.len(), new_keys, changed, "Attached item");
        Ok(changed)
    }

    /// Detaches item `id` from every key. Unknown keys are skipped.
    ///
    /// Keys whose funnel empties are erased; the item leaves the store with
    /// its last membership.
    pub fn detach<K: AsRef<[u8]>>(&self, keys: &[K], id: ItemId) -> Result<bool> {
        let keys = unique_keys(keys)?;

        let mut data = self.shared.write();
        let mut detached = false;
        for key in &keys {
            let Some(funnel) = data.trie.lookup(key) else {
                continue;
            };
            if !data.farm.detach(funnel, id) {
                continue;
            }
            detached = true;
            if data.farm.funnel(funnel).is_empty() {
                data.trie.erase(key);
            }
        }
        drop(data);

        if detached {
            self.shared.mark_dirty();
        }
        tracing::debug!(item = id, keys = keys.len(), detached, "Detached item");
        Ok(detached)
    }
}

/// Rejects empty requests and empty keys, dropping repeated keys.
fn unique_keys<K: AsRef<[u8]>>(keys: &[K]) -> Result<Vec<&[u8]>> {
    if keys.is_empty() {
        return Err(PredictError::InvalidInput(
            "at least one key is required".to_string(),
        ));
    }
    let mut seen = FnvHashSet::default();
    let mut unique = Vec::with_capacity(keys.len());
    for key in keys {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(PredictError::InvalidInput(
                "keys must not be empty".to_string(),
            ));
        }
        if seen.insert(key) {
            unique.push(key);
        }
    }
    Ok(unique)
}
