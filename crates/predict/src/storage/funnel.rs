//! Sorted set of item ids attached to one key.

use serde::{Deserialize, Serialize};
use thin_vec::ThinVec;

use crate::types::ItemId;

/// Item ids kept in ascending order without duplicates.
///
/// Backed by a `ThinVec` so an empty funnel is a single null pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Funnel {
    ids: ThinVec<ItemId>,
}

impl Funnel {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_single(id: ItemId) -> Self {
        Self {
            ids: ThinVec::from_iter([id]),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates over member ids in ascending order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ids.iter().copied()
    }

    #[inline]
    pub fn contains(&self, id: ItemId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Inserts in sorted position. Returns false if already present.
    pub fn insert(&mut self, id: ItemId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Removes an id, returning true if it was present.
    pub fn remove(&mut self, id: ItemId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// True when ids are strictly ascending. Checked on data read from disk.
    pub fn is_strictly_sorted(&self) -> bool {
        self.ids.windows(2).all(|pair| pair[0] < pair[1])
    }
}

impl FromIterator<ItemId> for Funnel {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        let mut ids: ThinVec<ItemId> = ThinVec::from_iter(iter);
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}
