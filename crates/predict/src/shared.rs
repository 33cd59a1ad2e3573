//! Shared index state.
//!
//! The trie and the farm live behind one `RwLock`, so a multi-key attach or
//! detach is observed by readers either completely or not at all.

use std::sync::atomic::{AtomicU64, Ordering};

use fnv::FnvHashSet;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{PredictError, Result};
use crate::index::PrefixTrie;
use crate::storage::Farm;
use crate::types::IndexStats;

/// Trie plus membership storage. Every trie key has a non-empty funnel in
/// the farm and every funnel belongs to a trie key.
#[derive(Debug, Default)]
pub struct IndexData {
    pub trie: PrefixTrie,
    pub farm: Farm,
}

impl IndexData {
    /// Pairs a restored trie with a restored farm, checking they agree.
    pub fn from_parts(trie: PrefixTrie, farm: Farm) -> Result<Self> {
        trie.validate()?;
        let keyed: FnvHashSet<_> = trie.entries().into_iter().map(|(_, id)| id).collect();
        if keyed.len() != farm.funnel_count() {
            return Err(PredictError::Integrity(format!(
                "trie has {} keys but the farm has {} funnels",
                keyed.len(),
                farm.funnel_count()
            )));
        }
        if let Some((orphan, _)) = farm.funnels().find(|(id, _)| !keyed.contains(id)) {
            return Err(PredictError::Integrity(format!(
                "funnel {} has no key",
                orphan.get()
            )));
        }
        Ok(Self { trie, farm })
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            keys: self.trie.len(),
            nodes: self.trie.node_count(),
            funnels: self.farm.funnel_count(),
            items: self.farm.item_count(),
        }
    }
}

/// Index state shared between writers, readers and the snapshot worker.
#[derive(Debug, Default)]
pub struct SharedIndex {
    data: RwLock<IndexData>,
    /// Bumped after every mutating write; lets snapshots skip clean state.
    generation: AtomicU64,
}

impl SharedIndex {
    pub fn new(data: IndexData) -> Self {
        Self {
            data: RwLock::new(data),
            generation: AtomicU64::new(0),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexData> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexData> {
        self.data.write()
    }

    /// Records that the state changed.
    pub fn mark_dirty(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> IndexStats {
        self.read().stats()
    }
}
