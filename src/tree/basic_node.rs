use bitvec::prelude::*;
use log::trace;
use smallvec::SmallVec;

use super::TreeError;
use crate::{
    dump::DumpContext,
    module::ModuleDescriptor,
    pattern::{Key, Pattern},
};

/// one distinct masked pattern, and the catalogued functions that share it.
///
/// members are clones: the same bytes, modulo relocations, under different
/// names. most nodes have exactly one member.
pub struct BasicNode {
    pattern: Pattern,
    key:     Key,
    members: SmallVec<[ModuleDescriptor; 1]>,
}

impl BasicNode {
    pub fn from_module(module: ModuleDescriptor) -> BasicNode {
        let mut members = SmallVec::new();
        let pattern = module.pattern();
        let key = module.key();
        members.push(module);

        BasicNode { pattern, key, members }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn members(&self) -> &[ModuleDescriptor] {
        &self.members
    }

    /// add a clone to this node.
    ///
    /// errors with `DuplicateSignature` when a member with the same name is
    /// already present, which means the same signature was loaded twice.
    pub fn insert(&mut self, module: ModuleDescriptor) -> Result<(), TreeError> {
        debug_assert_eq!(module.pattern(), self.pattern);
        debug_assert_eq!(module.key(), self.key);

        let name = module.name().unwrap_or_default();
        if self.members.iter().any(|member| member.name() == module.name()) {
            trace!("basic node {}: double insert of {}", self.pattern, name);
            return Err(TreeError::DuplicateSignature(name.to_string()));
        }

        trace!("basic node {}: adding clone {}", self.pattern, name);
        self.members.push(module);
        Ok(())
    }

    pub fn is_match(&self, window: &[u8], hints: &BitSlice) -> bool {
        self.pattern.is_match(window, hints)
    }

    /// total number of catalogued bytes held by this node.
    pub fn size(&self) -> usize {
        self.members.iter().map(|member| member.len()).sum()
    }

    pub fn debug_dump<W: std::fmt::Write>(&self, ctx: &DumpContext, index: usize, out: &mut W) -> std::fmt::Result {
        writeln!(out, "{}{}) {}", ctx.prefix, index, self.pattern)?;

        let ctx = ctx.nested();
        for member in self.members.iter() {
            write!(out, "{}{} ({:#x} bytes)", ctx.prefix, member.name().unwrap_or_default(), member.len())?;
            if let Some(description) = &member.description {
                write!(out, ": {description}")?;
            }
            writeln!(out)?;
        }

        Ok(())
    }
}
