//! Path-compressed prefix trie mapping byte-string keys to funnel ids.
//!
//! Every non-root node carries the edge label leading into it. Structural
//! invariants, restored after each erase:
//! - the root has an empty label and never carries a funnel
//! - children are sorted by the first byte of their label (unique per parent)
//! - a non-root node without a funnel has at least two children
//!
//! Enumeration walks the subtree depth-first in ascending byte order, which
//! gives a deterministic order for a fixed trie state.

use fnv::FnvHashSet;
use serde::{Deserialize, Serialize};
use thin_vec::ThinVec;

use super::slab::{NodeIndex, NodeSlab};
use crate::error::{PredictError, Result};
use crate::types::{FunnelId, OptionFunnelId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrieNode {
    label: Box<[u8]>,
    children: ThinVec<NodeIndex>,
    funnel: OptionFunnelId,
}

/// Where a key lands when walked from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Descent {
    /// The key ends exactly at this node.
    Exact(NodeIndex),
    /// The key ends part-way through the edge leading into this node.
    Inside(NodeIndex),
    Missing,
}

/// Outcome of a bounded subtree enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Number of funnel ids handed to the visitor.
    pub visited: usize,
    /// True when the budget ran out before the subtree was exhausted.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixTrie {
    nodes: NodeSlab<TrieNode>,
    root: NodeIndex,
    /// Next never-used funnel id.
    next_funnel: u32,
    /// Funnel ids released by `erase`, reused before `next_funnel`.
    free_funnels: Vec<FunnelId>,
    keys: usize,
}

impl Default for PrefixTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixTrie {
    pub fn new() -> Self {
        let mut nodes = NodeSlab::new();
        let root = nodes.insert(TrieNode::default());
        Self {
            nodes,
            root,
            next_funnel: 0,
            free_funnels: Vec::new(),
            keys: 0,
        }
    }

    /// Number of keys stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    /// Number of nodes, including the root and interior nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of funnel ids that can still be handed out.
    pub fn remaining_funnels(&self) -> u64 {
        u64::from(FunnelId::CAPACITY.saturating_sub(self.next_funnel))
            + self.free_funnels.len() as u64
    }

    /// Returns the funnel id of `key`, inserting the key if it is new.
    pub fn ensure(&mut self, key: &[u8]) -> Result<FunnelId> {
        if key.is_empty() {
            return Err(PredictError::InvalidInput(
                "key must not be empty".to_string(),
            ));
        }
        if let Some(funnel) = self.lookup(key) {
            return Ok(funnel);
        }
        let funnel = self.allocate_funnel()?;
        self.insert(key, funnel);
        self.keys += 1;
        Ok(funnel)
    }

    /// Exact-match lookup.
    pub fn lookup(&self, key: &[u8]) -> Option<FunnelId> {
        if key.is_empty() {
            return None;
        }
        match self.descend(key) {
            Descent::Exact(node) => self.nodes[node].funnel.to_option(),
            Descent::Inside(_) | Descent::Missing => None,
        }
    }

    /// Visits the funnel of `prefix` itself, then every funnel below it.
    ///
    /// Stops when `visit` returns false or after `budget` funnels.
    pub fn enumerate<F>(&self, prefix: &[u8], budget: usize, mut visit: F) -> Enumeration
    where
        F: FnMut(FunnelId) -> bool,
    {
        let mut outcome = Enumeration::default();
        let mut stack: Vec<NodeIndex> = Vec::new();

        match self.descend(prefix) {
            Descent::Missing => return outcome,
            Descent::Exact(node) => {
                let entry = &self.nodes[node];
                if let Some(funnel) = entry.funnel.to_option() {
                    if !step(&mut outcome, budget, funnel, &mut visit) {
                        return outcome;
                    }
                }
                stack.extend(entry.children.iter().rev().copied());
            }
            Descent::Inside(node) => stack.push(node),
        }

        while let Some(node) = stack.pop() {
            let entry = &self.nodes[node];
            if let Some(funnel) = entry.funnel.to_option() {
                if !step(&mut outcome, budget, funnel, &mut visit) {
                    break;
                }
            }
            stack.extend(entry.children.iter().rev().copied());
        }

        outcome
    }

    /// Removes `key`, pruning nodes that no longer lead to any key.
    ///
    /// Returns false if the key was not stored.
    pub fn erase(&mut self, key: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }

        let mut path = vec![self.root];
        let mut node = self.root;
        let mut pos = 0;
        while pos < key.len() {
            let Ok(slot) = self.child_position(node, key[pos]) else {
                return false;
            };
            let child = self.nodes[node].children[slot];
            let label = &self.nodes[child].label;
            if !key[pos..].starts_with(label) {
                return false;
            }
            pos += label.len();
            node = child;
            path.push(node);
        }

        let Some(funnel) = self.nodes[node].funnel.to_option() else {
            return false;
        };
        self.nodes[node].funnel = OptionFunnelId::none();
        self.free_funnels.push(funnel);
        self.keys -= 1;
        self.compact(&path);
        true
    }

    /// All stored keys with their funnel ids, in enumeration order.
    pub fn entries(&self) -> Vec<(Vec<u8>, FunnelId)> {
        let mut entries = Vec::with_capacity(self.keys);
        let mut stack = vec![(self.root, Vec::new())];
        while let Some((node, key)) = stack.pop() {
            let entry = &self.nodes[node];
            if let Some(funnel) = entry.funnel.to_option() {
                entries.push((key.clone(), funnel));
            }
            for child in entry.children.iter().rev() {
                let mut child_key = key.clone();
                child_key.extend_from_slice(&self.nodes[*child].label);
                stack.push((*child, child_key));
            }
        }
        entries
    }

    /// Checks structural invariants of a trie that was read back from disk.
    pub fn validate(&self) -> Result<()> {
        let corrupt =
            |message: &str| -> Result<()> { Err(PredictError::Integrity(format!("trie: {message}"))) };

        if !self.nodes.freelist_is_consistent() {
            return corrupt("node freelist is inconsistent");
        }
        if self.next_funnel > FunnelId::CAPACITY {
            return corrupt("next funnel id is beyond the id space");
        }
        let Some(root) = self.nodes.get(self.root) else {
            return corrupt("root node is missing");
        };
        if !root.label.is_empty() || root.funnel.is_some() {
            return corrupt("root node must have an empty label and no funnel");
        }

        let mut reachable = 0usize;
        let mut funnels = FnvHashSet::default();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            reachable += 1;
            if reachable > self.nodes.len() {
                return corrupt("node graph contains a cycle or shared child");
            }
            let entry = &self.nodes[node];
            if let Some(funnel) = entry.funnel.to_option() {
                if funnel.get() >= self.next_funnel || !funnels.insert(funnel) {
                    return corrupt("funnel id is out of range or duplicated");
                }
            } else if node != self.root && entry.children.len() < 2 {
                return corrupt("interior node is not compressed");
            }
            let mut previous: Option<u8> = None;
            for child in &entry.children {
                let Some(child_entry) = self.nodes.get(*child) else {
                    return corrupt("child points at a vacant slot");
                };
                let Some(&first) = child_entry.label.first() else {
                    return corrupt("non-root node has an empty label");
                };
                if previous.is_some_and(|byte| byte >= first) {
                    return corrupt("children are not sorted by first byte");
                }
                previous = Some(first);
                stack.push(*child);
            }
        }

        if reachable != self.nodes.len() {
            return corrupt("slab holds unreachable nodes");
        }
        if funnels.len() != self.keys {
            return corrupt("key count does not match stored funnels");
        }
        let mut released = FnvHashSet::default();
        for free in &self.free_funnels {
            if free.get() >= self.next_funnel || funnels.contains(free) {
                return corrupt("released funnel id is still in use");
            }
            if !released.insert(*free) {
                return corrupt("released funnel id is listed twice");
            }
        }
        Ok(())
    }

    fn descend(&self, key: &[u8]) -> Descent {
        let mut node = self.root;
        let mut pos = 0;
        loop {
            if pos == key.len() {
                return Descent::Exact(node);
            }
            let Ok(slot) = self.child_position(node, key[pos]) else {
                return Descent::Missing;
            };
            let child = self.nodes[node].children[slot];
            let label = &self.nodes[child].label;
            let rest = &key[pos..];
            let common = common_prefix_len(label, rest);
            if common == label.len() {
                node = child;
                pos += common;
            } else if common == rest.len() {
                return Descent::Inside(child);
            } else {
                return Descent::Missing;
            }
        }
    }

    fn insert(&mut self, key: &[u8], funnel: FunnelId) {
        let mut node = self.root;
        let mut pos = 0;
        loop {
            if pos == key.len() {
                self.nodes[node].funnel = OptionFunnelId::some(funnel);
                return;
            }
            let child = match self.child_position(node, key[pos]) {
                Ok(slot) => self.nodes[node].children[slot],
                Err(slot) => {
                    let leaf = self.nodes.insert(TrieNode {
                        label: key[pos..].into(),
                        children: ThinVec::new(),
                        funnel: OptionFunnelId::some(funnel),
                    });
                    self.nodes[node].children.insert(slot, leaf);
                    return;
                }
            };
            let label_len = self.nodes[child].label.len();
            let common = common_prefix_len(&self.nodes[child].label, &key[pos..]);
            node = if common < label_len {
                self.split(node, child, common)
            } else {
                child
            };
            pos += common;
        }
    }

    /// Splits the edge into `child` after `at` bytes, returning the new middle node.
    fn split(&mut self, parent: NodeIndex, child: NodeIndex, at: usize) -> NodeIndex {
        let label = std::mem::take(&mut self.nodes[child].label);
        let (head, tail) = label.split_at(at);
        self.nodes[child].label = tail.into();
        let middle = self.nodes.insert(TrieNode {
            label: head.into(),
            children: ThinVec::from_iter([child]),
            funnel: OptionFunnelId::none(),
        });
        self.replace_child(parent, child, middle);
        middle
    }

    /// Restores the compression invariants along `path` after its last node lost its funnel.
    fn compact(&mut self, path: &[NodeIndex]) {
        let depth = path.len();
        let target = path[depth - 1];
        let parent = path[depth - 2];
        match self.nodes[target].children.len() {
            0 => {
                self.remove_child(parent, target);
                self.nodes.remove(target);
                let parent_entry = &self.nodes[parent];
                if parent != self.root
                    && !parent_entry.funnel.is_some()
                    && parent_entry.children.len() == 1
                {
                    self.merge_with_only_child(path[depth - 3], parent);
                }
            }
            1 => self.merge_with_only_child(parent, target),
            _ => {}
        }
    }

    /// Folds `node` into its single child, prepending its label.
    fn merge_with_only_child(&mut self, parent: NodeIndex, node: NodeIndex) {
        let child = self.nodes[node].children[0];
        let mut label = std::mem::take(&mut self.nodes[node].label).into_vec();
        label.extend_from_slice(&self.nodes[child].label);
        self.nodes[child].label = label.into_boxed_slice();
        self.replace_child(parent, node, child);
        self.nodes.remove(node);
    }

    fn child_position(&self, node: NodeIndex, byte: u8) -> std::result::Result<usize, usize> {
        self.nodes[node]
            .children
            .binary_search_by(|child| self.nodes[*child].label[0].cmp(&byte))
    }

    fn replace_child(&mut self, parent: NodeIndex, old: NodeIndex, new: NodeIndex) {
        let children = &mut self.nodes[parent].children;
        if let Some(slot) = children.iter_mut().find(|child| **child == old) {
            *slot = new;
        }
    }

    fn remove_child(&mut self, parent: NodeIndex, child: NodeIndex) {
        let children = &mut self.nodes[parent].children;
        if let Some(pos) = children.iter().position(|existing| *existing == child) {
            children.remove(pos);
        }
    }

    fn allocate_funnel(&mut self) -> Result<FunnelId> {
        if let Some(funnel) = self.free_funnels.pop() {
            return Ok(funnel);
        }
        if self.next_funnel >= FunnelId::CAPACITY {
            return Err(PredictError::Capacity(
                "funnel id space exhausted".to_string(),
            ));
        }
        let funnel = FunnelId::new(self.next_funnel);
        self.next_funnel += 1;
        Ok(funnel)
    }
}

fn step<F>(outcome: &mut Enumeration, budget: usize, funnel: FunnelId, visit: &mut F) -> bool
where
    F: FnMut(FunnelId) -> bool,
{
    if outcome.visited >= budget {
        outcome.exhausted = true;
        return false;
    }
    outcome.visited += 1;
    visit(funnel)
}

fn common_prefix_len(left: &[u8], right: &[u8]) -> usize {
    left.iter()
        .zip(right)
        .take_while(|(a, b)| a == b)
        .count()
}
