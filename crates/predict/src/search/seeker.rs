//! Read path: bounded, deduplicating prefix traversal.

use std::sync::Arc;

use fnv::FnvHashSet;

use crate::config::PredictConfig;
use crate::query::Query;
use crate::shared::{IndexData, SharedIndex};
use crate::types::Item;

/// Items matched by one query, in traversal order.
#[derive(Debug, Clone, Default)]
pub struct SeekResult {
    pub items: Vec<Arc<Item>>,
    /// Funnels visited by the traversal.
    pub visited: usize,
    /// True when the traversal budget ran out first.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct Seeker {
    shared: Arc<SharedIndex>,
    config: Arc<PredictConfig>,
}

impl Seeker {
    pub fn new(shared: Arc<SharedIndex>, config: Arc<PredictConfig>) -> Self {
        Self { shared, config }
    }

    /// Runs `query` under the read lock.
    pub fn seek(&self, query: &Query) -> SeekResult {
        let data = self.shared.read();
        let result = seek_index_data(&data, query, self.config.max_iterations);
        drop(data);

        if result.exhausted {
            tracing::debug!(
                prefix = %query.prefix,
                visited = result.visited,
                found = result.items.len(),
                "Traversal budget exhausted, returning partial result"
            );
        }
        result
    }
}

/// Collects up to `query.num` accepted items below `query.prefix`.
///
/// Funnels are visited in trie enumeration order and their members in
/// ascending id order. An item reachable through several keys is considered
/// once. At most `budget` funnels are visited.
pub fn seek_index_data(data: &IndexData, query: &Query, budget: usize) -> SeekResult {
    let mut items: Vec<Arc<Item>> = Vec::with_capacity(query.num.min(64));
    let mut seen = FnvHashSet::default();

    let enumeration = data.trie.enumerate(query.prefix.as_bytes(), budget, |funnel| {
        for id in data.farm.funnel(funnel).iter() {
            if !seen.insert(id) {
                continue;
            }
            let Some(item) = data.farm.item(id) else {
                tracing::warn!(item = id, funnel = funnel.get(), "Funnel references a missing item");
                continue;
            };
            if query.accepts(&item.document) {
                items.push(Arc::clone(item));
                if items.len() >= query.num {
                    return false;
                }
            }
        }
        true
    });

    SeekResult {
        items,
        visited: enumeration.visited,
        exhausted: enumeration.exhausted,
    }
}
