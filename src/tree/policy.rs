//! tie-breaking between candidates when several catalogued functions match.
use std::collections::BTreeSet;

use log::trace;

use crate::module::ModuleDescriptor;

pub trait Disambiguate {
    /// narrow down the candidates for a single match.
    ///
    /// implementations should not return an empty list when given a
    /// non-empty one; a match that can't be decided stays ambiguous.
    fn resolve<'a>(&self, candidates: Vec<&'a ModuleDescriptor>) -> Vec<&'a ModuleDescriptor>;
}

/// report every candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepAll;

impl Disambiguate for KeepAll {
    fn resolve<'a>(&self, candidates: Vec<&'a ModuleDescriptor>) -> Vec<&'a ModuleDescriptor> {
        candidates
    }
}

/// drop candidates that reference a function not (yet) identified under the
/// referenced name.
///
/// for example, when `__EH_prolog3_GS` and `__EH_prolog3` share a body but
/// only the former references `___security_cookie`, knowing that
/// `___security_cookie` was found nearby picks the former.
///
/// if every candidate is dropped, all are returned.
#[derive(Debug, Default, Clone)]
pub struct PreferResolvedReferences {
    known: BTreeSet<String>,
}

impl PreferResolvedReferences {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(known: I) -> Self {
        PreferResolvedReferences {
            known: known.into_iter().map(|name| name.into()).collect(),
        }
    }

    pub fn add(&mut self, name: &str) {
        self.known.insert(name.to_string());
    }

    fn is_resolved(&self, candidate: &ModuleDescriptor) -> bool {
        candidate.references().all(|reference| self.known.contains(&reference.name))
    }
}

impl Disambiguate for PreferResolvedReferences {
    fn resolve<'a>(&self, candidates: Vec<&'a ModuleDescriptor>) -> Vec<&'a ModuleDescriptor> {
        let resolved: Vec<&'a ModuleDescriptor> = candidates
            .iter()
            .cloned()
            .filter(|candidate| self.is_resolved(candidate))
            .collect();

        if resolved.is_empty() {
            trace!("no candidate has resolved references, keeping {}", candidates.len());
            candidates
        } else {
            resolved
        }
    }
}
