//! the signature tree.
//!
//! a tree is built once from a signature database, and then queried:
//!
//! ```
//! use std::collections::BTreeSet;
//! use flirt_sigtree::{Config, ModuleDescriptor, SignatureTreeBuilder};
//!
//! let config = Config::default();
//! let mut builder = SignatureTreeBuilder::new(config.clone());
//! builder
//!     .insert(ModuleDescriptor::from_bytes("g", b"\xE8\x00\x00\x00\x00\xC3", [1, 2, 3, 4], &config))
//!     .unwrap();
//! let tree = builder.build();
//!
//! let hints: BTreeSet<usize> = [1, 2, 3, 4].into_iter().collect();
//! let m = tree.r#match(b"\xE8\xDE\xAD\xBE\xEF\xC3", &hints);
//! assert_eq!(m.names(), vec!["g"]);
//! ```
//!
//! the two phases are distinct types: a `SignatureTreeBuilder` accepts inserts,
//! and `build()` turns it into an immutable `SignatureTree` that can be shared
//! across threads and queried concurrently.
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

use bitvec::prelude::*;
use log::{debug, trace, warn};
use thiserror::Error;

pub mod basic_node;
pub mod hash_node;
pub mod policy;

use self::{
    hash_node::HashNode,
    policy::{Disambiguate, KeepAll},
};
use crate::{config::Config, dump::DumpContext, module::ModuleDescriptor, pattern::Key};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("duplicate signature: {0}")]
    DuplicateSignature(String),
    #[error("malformed module descriptor: {0}")]
    MalformedDescriptor(String),
}

/// the outcome of matching a byte window.
#[derive(Debug, Clone)]
pub enum MatchResult<'a> {
    None,
    Unique(&'a ModuleDescriptor),
    /// clones, or distinct patterns that all fit the window.
    Ambiguous(Vec<&'a ModuleDescriptor>),
}

impl<'a> MatchResult<'a> {
    fn from_candidates(mut candidates: Vec<&'a ModuleDescriptor>) -> MatchResult<'a> {
        match candidates.len() {
            0 => MatchResult::None,
            1 => MatchResult::Unique(candidates.remove(0)),
            _ => MatchResult::Ambiguous(candidates),
        }
    }

    pub fn candidates(&self) -> Vec<&'a ModuleDescriptor> {
        match self {
            MatchResult::None => vec![],
            MatchResult::Unique(m) => vec![*m],
            MatchResult::Ambiguous(ms) => ms.clone(),
        }
    }

    pub fn names(&self) -> Vec<&'a str> {
        self.candidates()
            .into_iter()
            .map(|m| m.name().unwrap_or_default())
            .collect()
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MatchResult::None)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, MatchResult::Unique(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, MatchResult::Ambiguous(_))
    }
}

/// counts describing the contents of a tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub hash_nodes:  usize,
    pub basic_nodes: usize,
    pub modules:     usize,
    /// sum of the sizes of all catalogued functions.
    pub bytes:       usize,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hash nodes: {} basic nodes: {} modules: {} bytes: {:#x}",
            self.hash_nodes, self.basic_nodes, self.modules, self.bytes
        )
    }
}

/// the outcome of loading a batch of descriptors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted:   usize,
    pub duplicates: usize,
    pub malformed:  usize,
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {} duplicates: {} malformed: {}",
            self.inserted, self.duplicates, self.malformed
        )
    }
}

/// the queryable tree.
///
/// built by `SignatureTreeBuilder::build`; read-only from then on.
pub struct SignatureTree {
    config: Config,
    nodes:  BTreeMap<Key, HashNode>,
}

impl SignatureTree {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hash_nodes(&self) -> impl Iterator<Item = &HashNode> {
        self.nodes.values()
    }

    pub fn get(&self, key: &Key) -> Option<&HashNode> {
        self.nodes.get(key)
    }

    /// match a function body against the tree, reporting all candidates.
    ///
    /// `window` spans exactly the candidate function.
    /// `hints` are offsets into `window` known to be relocated;
    /// they are derived into the key exactly as a catalogued function's
    /// relocations are, and are not compared.
    pub fn r#match(&self, window: &[u8], hints: &BTreeSet<usize>) -> MatchResult {
        self.match_with(window, hints, &KeepAll)
    }

    /// like `match`, but narrow down multiple candidates with `policy`.
    pub fn match_with(&self, window: &[u8], hints: &BTreeSet<usize>, policy: &dyn Disambiguate) -> MatchResult {
        if window.is_empty() {
            return MatchResult::None;
        }

        let (key, _) = self.config.key(window, hints);
        let node = match self.nodes.get(&key) {
            None => {
                trace!("match: no hash node for {key}");
                return MatchResult::None;
            }
            Some(node) => node,
        };

        let mut mask = bitvec![0; window.len()];
        for &hint in hints.range(..window.len()) {
            mask.set(hint, true);
        }

        let candidates: Vec<&ModuleDescriptor> = node
            .matches(window, &mask)
            .flat_map(|basic_node| basic_node.members().iter())
            .collect();
        trace!("match: {key}: {} candidates", candidates.len());

        if candidates.len() > 1 {
            MatchResult::from_candidates(policy.resolve(candidates))
        } else {
            MatchResult::from_candidates(candidates)
        }
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            hash_nodes: self.nodes.len(),
            ..Default::default()
        };

        for node in self.nodes.values() {
            stats.basic_nodes += node.len();
            for basic_node in node.basic_nodes() {
                stats.modules += basic_node.members().len();
            }
            stats.bytes += node.size();
        }

        stats
    }

    /// total number of catalogued bytes.
    pub fn size(&self) -> usize {
        self.nodes.values().map(|node| node.size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn debug_dump<W: std::fmt::Write>(&self, ctx: &DumpContext, out: &mut W) -> std::fmt::Result {
        for (i, node) in self.nodes.values().enumerate() {
            node.debug_dump(ctx, i, out)?;
        }
        Ok(())
    }

    /// render the tree as text, one line per node/module.
    pub fn dump(&self, ctx: &DumpContext) -> String {
        let mut s = String::new();
        // writing to a String doesn't fail.
        let _ = self.debug_dump(ctx, &mut s);
        s
    }
}

impl std::fmt::Debug for SignatureTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.debug_dump(&DumpContext::default(), f)
    }
}

/// a tree under construction.
pub struct SignatureTreeBuilder {
    tree: SignatureTree,
}

impl Default for SignatureTreeBuilder {
    fn default() -> Self {
        SignatureTreeBuilder::new(Config::default())
    }
}

impl SignatureTreeBuilder {
    pub fn new(config: Config) -> SignatureTreeBuilder {
        SignatureTreeBuilder {
            tree: SignatureTree {
                config,
                nodes: Default::default(),
            },
        }
    }

    pub fn config(&self) -> &Config {
        &self.tree.config
    }

    /// add a catalogued function.
    ///
    /// on error, the tree is left as it was before the call.
    pub fn insert(&mut self, module: ModuleDescriptor) -> Result<(), TreeError> {
        module.validate(&self.tree.config)?;

        let key = module.key();
        match self.tree.nodes.entry(key) {
            Entry::Occupied(entry) => entry.into_mut().insert(module),
            Entry::Vacant(entry) => {
                debug!("new hash node {key} for {module}");
                let mut node = HashNode::new(key);
                node.insert(module)?;
                entry.insert(node);
                Ok(())
            }
        }
    }

    /// insert each descriptor, logging and counting rejects rather than
    /// stopping at the first one.
    pub fn load<I: IntoIterator<Item = ModuleDescriptor>>(&mut self, modules: I) -> LoadReport {
        let mut report = LoadReport::default();

        for module in modules.into_iter() {
            match self.insert(module) {
                Ok(()) => report.inserted += 1,
                Err(e @ TreeError::DuplicateSignature(_)) => {
                    warn!("{e}");
                    report.duplicates += 1;
                }
                Err(e @ TreeError::MalformedDescriptor(_)) => {
                    warn!("{e}");
                    report.malformed += 1;
                }
            }
        }

        debug!("load: {report}");
        report
    }

    pub fn stats(&self) -> Stats {
        self.tree.stats()
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn debug_dump<W: std::fmt::Write>(&self, ctx: &DumpContext, out: &mut W) -> std::fmt::Result {
        self.tree.debug_dump(ctx, out)
    }

    /// finish construction.
    pub fn build(self) -> SignatureTree {
        debug!("built signature tree: {}", self.tree.stats());
        self.tree
    }
}
