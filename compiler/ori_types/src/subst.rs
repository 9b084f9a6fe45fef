//! Generic parameter substitutions.

use smallvec::SmallVec;

use crate::{GenericParamId, Idx};

/// Replacement types for generic parameters, kept sorted by parameter.
///
/// Used both for bound generic types (`Box<Int32>` maps `Box`'s `T` to
/// `Int32`) and for specialized conformances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubstitutionMap {
    entries: SmallVec<[(GenericParamId, Idx); 2]>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(parameter, replacement)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (GenericParamId, Idx)>) -> Self {
        let mut map = Self::new();
        for (param, ty) in pairs {
            map.insert(param, ty);
        }
        map
    }

    /// Set the replacement for `param`, overwriting any previous one.
    pub fn insert(&mut self, param: GenericParamId, ty: Idx) {
        match self.entries.binary_search_by_key(&param, |&(p, _)| p) {
            Ok(pos) => self.entries[pos].1 = ty,
            Err(pos) => self.entries.insert(pos, (param, ty)),
        }
    }

    pub fn lookup(&self, param: GenericParamId) -> Option<Idx> {
        self.entries
            .binary_search_by_key(&param, |&(p, _)| p)
            .ok()
            .map(|pos| self.entries[pos].1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GenericParamId, Idx)> + '_ {
        self.entries.iter().copied()
    }
}
