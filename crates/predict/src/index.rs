//! Prefix index: a path-compressed trie over byte-string keys.
//!
//! - `slab` - Free-list node storage addressed by `NodeIndex`
//! - `trie` - `PrefixTrie` with ensure / lookup / enumerate / erase

mod slab;
mod trie;

pub use trie::{Enumeration, PrefixTrie};
