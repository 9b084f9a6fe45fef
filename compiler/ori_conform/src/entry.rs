//! Conformance entries: candidate "this context conforms to P" facts.
//!
//! Entries live in one arena per compilation and refer to each other by
//! [`EntryId`]. An implied entry points at the entry that implied it, so
//! every implied entry can be traced back to the declaration that started
//! the chain (its *declared* conformance).

use std::fmt;

use ori_ir::SourceLoc;
use ori_types::{DeclContext, DeclId, ProtoId};

use crate::ConformanceId;

/// Handle to a [`ConformanceEntry`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryId(u32);

impl EntryId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

/// Where an entry came from.
///
/// Declaration order doubles as the ranking order: lower kinds win.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ConformanceEntryKind {
    /// Copied from a superclass.
    Inherited,
    /// Written in an inheritance clause.
    Explicit,
    /// Required by a protocol some other entry conforms to.
    Implied,
    /// Added by the compiler.
    Synthesized,
}

impl ConformanceEntryKind {
    /// Implied and synthesized entries may be silently dropped in favor of
    /// a better one; the others are user-visible declarations.
    pub const fn is_replaceable(self) -> bool {
        matches!(
            self,
            ConformanceEntryKind::Implied | ConformanceEntryKind::Synthesized
        )
    }
}

/// The origin of an entry, with the link needed to find its context.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConformanceSource {
    /// Declared in this type or extension's inheritance clause.
    Explicit(DeclContext),
    /// Inherited by this class from its superclass.
    Inherited(DeclId),
    /// Implied by the given entry.
    Implied(EntryId),
    /// Synthesized for this type.
    Synthesized(DeclId),
}

impl ConformanceSource {
    pub const fn kind(self) -> ConformanceEntryKind {
        match self {
            ConformanceSource::Explicit(_) => ConformanceEntryKind::Explicit,
            ConformanceSource::Inherited(_) => ConformanceEntryKind::Inherited,
            ConformanceSource::Implied(_) => ConformanceEntryKind::Implied,
            ConformanceSource::Synthesized(_) => ConformanceEntryKind::Synthesized,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConformanceEntry {
    /// Where the conformance is stated (or the superclass is named).
    pub loc: SourceLoc,
    pub protocol: ProtoId,
    pub source: ConformanceSource,
    /// The conformance object, once built or registered.
    pub conformance: Option<ConformanceId>,
    pub superseded_by: Option<EntryId>,
}

impl ConformanceEntry {
    pub fn kind(&self) -> ConformanceEntryKind {
        self.source.kind()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Fixed entries cannot lose a ranking against non-fixed ones.
    pub fn is_fixed(&self) -> bool {
        self.conformance.is_some() || self.kind() == ConformanceEntryKind::Inherited
    }
}

/// Owner of every entry created during a compilation.
#[derive(Clone, Debug, Default)]
pub struct EntryArena {
    entries: Vec<ConformanceEntry>,
}

impl EntryArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loc: SourceLoc, protocol: ProtoId, source: ConformanceSource) -> EntryId {
        let raw = match u32::try_from(self.entries.len()) {
            Ok(raw) => raw,
            Err(_) => panic!("conformance entry arena overflow"),
        };
        self.entries.push(ConformanceEntry {
            loc,
            protocol,
            source,
            conformance: None,
            superseded_by: None,
        });
        EntryId(raw)
    }

    #[inline]
    pub fn get(&self, id: EntryId) -> &ConformanceEntry {
        &self.entries[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntryId) -> &mut ConformanceEntry {
        &mut self.entries[id.index()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follow implied links back to the entry that started the chain.
    pub fn declared_conformance(&self, mut id: EntryId) -> EntryId {
        while let ConformanceSource::Implied(parent) = self.get(id).source {
            id = parent;
        }
        id
    }

    /// The kind used for ranking: an entry implied by a synthesized
    /// conformance ranks as synthesized.
    pub fn ranking_kind(&self, id: EntryId) -> ConformanceEntryKind {
        let kind = self.get(id).kind();
        if kind == ConformanceEntryKind::Implied
            && self.get(self.declared_conformance(id)).kind() == ConformanceEntryKind::Synthesized
        {
            ConformanceEntryKind::Synthesized
        } else {
            kind
        }
    }

    /// The type or extension the entry is attributed to.
    pub fn declaration_context(&self, id: EntryId) -> DeclContext {
        match self.get(self.declared_conformance(id)).source {
            ConformanceSource::Explicit(dc) => dc,
            ConformanceSource::Inherited(class) => DeclContext::Nominal(class),
            ConformanceSource::Synthesized(nominal) => DeclContext::Nominal(nominal),
            ConformanceSource::Implied(_) => {
                unreachable!("declared conformance is never implied")
            }
        }
    }
}
