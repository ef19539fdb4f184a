use std::collections::{btree_map::Entry, BTreeMap};

use bitvec::prelude::*;
use log::{debug, trace};

use super::{basic_node::BasicNode, TreeError};
use crate::{
    dump::DumpContext,
    module::ModuleDescriptor,
    pattern::{Key, Pattern},
};

/// a collision bucket: every basic node with the same `(crc16, leading length)`.
///
/// crc16 collisions across unrelated functions are rare, so buckets tend to be
/// small, but nothing here assumes a bound.
pub struct HashNode {
    key:    Key,
    bucket: BTreeMap<Pattern, BasicNode>,
}

impl HashNode {
    pub fn new(key: Key) -> HashNode {
        HashNode {
            key,
            bucket: Default::default(),
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn basic_nodes(&self) -> impl Iterator<Item = &BasicNode> {
        self.bucket.values()
    }

    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
    }

    /// file the module under the basic node with the same masked pattern,
    /// creating the node if this is the first such module.
    pub fn insert(&mut self, module: ModuleDescriptor) -> Result<(), TreeError> {
        debug_assert_eq!(module.key(), self.key);

        let collision = !self.bucket.is_empty();
        match self.bucket.entry(module.pattern()) {
            Entry::Occupied(entry) => {
                trace!("hash node {}: existing basic node for {}", self.key, module);
                entry.into_mut().insert(module)
            }
            Entry::Vacant(entry) => {
                if collision {
                    debug!("hash node {}: crc16 collision, new basic node for {}", self.key, module);
                }
                entry.insert(BasicNode::from_module(module));
                Ok(())
            }
        }
    }

    /// basic nodes whose pattern matches the window.
    pub fn matches<'a, 'w>(
        &'a self,
        window: &'w [u8],
        hints: &'w BitSlice,
    ) -> impl Iterator<Item = &'a BasicNode> + 'w
    where
        'a: 'w,
    {
        self.bucket.values().filter(move |node| node.is_match(window, hints))
    }

    pub fn size(&self) -> usize {
        self.bucket.values().map(|node| node.size()).sum()
    }

    pub fn debug_dump<W: std::fmt::Write>(&self, ctx: &DumpContext, index: usize, out: &mut W) -> std::fmt::Result {
        writeln!(
            out,
            "{}{}) CRC16:0x{:04X} leadingLength:0x{:02X}",
            ctx.prefix, index, self.key.crc16, self.key.leading_length
        )?;

        let ctx = ctx.nested();
        for (i, node) in self.bucket.values().enumerate() {
            node.debug_dump(&ctx, i, out)?;
        }

        Ok(())
    }
}

impl PartialEq for HashNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HashNode {}

impl PartialOrd for HashNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// hash nodes are ordered by crc16, then leading length.
impl Ord for HashNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}
