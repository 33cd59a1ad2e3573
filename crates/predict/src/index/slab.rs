//! Free-list slab holding trie nodes.
//!
//! Node slots are addressed by a compact 32-bit [`NodeIndex`]. Removed slots
//! are threaded onto a free list and reused by later inserts, so node indices
//! held by live parents stay valid across erasures.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// A compact 32-bit index into the node slab.
///
/// `u32::MAX` is reserved as the end-of-freelist marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct NodeIndex(u32);

impl NodeIndex {
    const END: u32 = u32::MAX;

    /// Creates a node index from a slot position.
    ///
    /// # Panics
    /// Panics if `index >= u32::MAX`.
    #[inline]
    pub fn new(index: usize) -> Self {
        assert!(
            index < Self::END as usize,
            "node index must be less than u32::MAX"
        );
        Self(index as u32)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Slot state: free (with the next free slot) or holding a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Entry<T> {
    Vacant(u32),
    Occupied(T),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSlab<T> {
    entries: Vec<Entry<T>>,
    /// Head of the freelist, `NodeIndex::END` when empty.
    next_free: u32,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Default for NodeSlab<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_free: NodeIndex::END,
            len: 0,
        }
    }
}

impl<T> NodeSlab<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, reusing a vacant slot when one exists.
    pub fn insert(&mut self, value: T) -> NodeIndex {
        self.len += 1;
        if self.next_free != NodeIndex::END {
            let index = self.next_free as usize;
            let Entry::Vacant(next) = &self.entries[index] else {
                unreachable!("freelist head points at an occupied slot");
            };
            self.next_free = *next;
            self.entries[index] = Entry::Occupied(value);
            return NodeIndex::new(index);
        }
        let index = NodeIndex::new(self.entries.len());
        self.entries.push(Entry::Occupied(value));
        index
    }

    /// Frees a slot, returning its value if it was occupied.
    pub fn remove(&mut self, index: NodeIndex) -> Option<T> {
        let slot = self.entries.get_mut(index.get())?;
        if matches!(slot, Entry::Vacant(_)) {
            return None;
        }
        let previous = std::mem::replace(slot, Entry::Vacant(self.next_free));
        self.next_free = index.0;
        self.len -= 1;
        match previous {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, index: NodeIndex) -> Option<&T> {
        match self.entries.get(index.get()) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks that the freelist only links vacant slots and covers all of them.
    ///
    /// Used after deserialization, where the slab comes from an untrusted file.
    pub fn freelist_is_consistent(&self) -> bool {
        let occupied = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, Entry::Occupied(_)))
            .count();
        if occupied != self.len {
            return false;
        }
        let vacant = self.entries.len() - occupied;
        let mut cursor = self.next_free;
        let mut steps = 0usize;
        while cursor != NodeIndex::END {
            if steps == vacant {
                return false;
            }
            match self.entries.get(cursor as usize) {
                Some(Entry::Vacant(next)) => cursor = *next,
                _ => return false,
            }
            steps += 1;
        }
        steps == vacant
    }
}

impl<T> Index<NodeIndex> for NodeSlab<T> {
    type Output = T;

    fn index(&self, index: NodeIndex) -> &T {
        self.get(index).expect("trie node slot must be occupied")
    }
}

impl<T> IndexMut<NodeIndex> for NodeSlab<T> {
    fn index_mut(&mut self, index: NodeIndex) -> &mut T {
        match self.entries.get_mut(index.get()) {
            Some(Entry::Occupied(value)) => value,
            _ => panic!("trie node slot must be occupied"),
        }
    }
}
