//! Per-type conformance lookup tables.

use ori_types::{AssocTypeId, DeclContext, DeclId, ExtId, ProtoId, ValueDeclId};
use rustc_hash::FxHashMap;

use crate::config::ConformanceConfig;
use crate::entry::{EntryArena, EntryId};
use crate::ConformanceArena;

/// How far a table has been brought up to date.
///
/// Each stage implies the ones before it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ConformanceStage {
    /// Explicit conformances from inheritance clauses are recorded.
    RecordedExplicit,
    /// Conformances of the superclass are copied in.
    Inherited,
    /// Conformances implied by protocol inheritance are added.
    ExpandedImplied,
    /// Competing entries are ranked and losers removed.
    Resolved,
}

impl ConformanceStage {
    pub(crate) const COUNT: usize = 4;

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Per-(decl, stage) progress: whether the declaration body was visited
/// and how many of its extensions.
#[derive(Copy, Clone, Default, Debug)]
pub(crate) struct LastProcessed {
    pub(crate) nominal_done: bool,
    pub(crate) next_extension: usize,
}

/// A protocol requirement satisfied by some member.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum SatisfiedRequirement {
    Value(ValueDeclId),
    AssocType(AssocTypeId),
}

/// The conformance entries recorded for one nominal type.
#[derive(Clone, Debug)]
pub struct ConformanceLookupTable {
    nominal: DeclId,
    /// Candidate entries per protocol, in protocol first-seen order.
    conformances: Vec<(ProtoId, Vec<EntryId>)>,
    protocol_index: FxHashMap<ProtoId, usize>,
    /// Entries per declaring context, in context first-seen order.
    all_conformances: Vec<(DeclContext, Vec<EntryId>)>,
    context_index: FxHashMap<DeclContext, usize>,
    /// Keyed by the declaration being walked: this type or a superclass.
    pub(crate) last_processed: FxHashMap<DeclId, [LastProcessed; ConformanceStage::COUNT]>,
    /// Source extensions skipped for lack of a resolver.
    pub(crate) delayed: [Vec<ExtId>; ConformanceStage::COUNT],
    pub(crate) superseded_diagnostics: FxHashMap<DeclContext, Vec<EntryId>>,
    /// Member -> requirements it satisfies, filled per member on demand.
    pub(crate) conforming_decl_map: FxHashMap<ValueDeclId, Vec<SatisfiedRequirement>>,
    pub(crate) visiting_superclass: bool,
}

impl ConformanceLookupTable {
    pub(crate) fn new(nominal: DeclId) -> Self {
        ConformanceLookupTable {
            nominal,
            conformances: Vec::new(),
            protocol_index: FxHashMap::default(),
            all_conformances: Vec::new(),
            context_index: FxHashMap::default(),
            last_processed: FxHashMap::default(),
            delayed: Default::default(),
            superseded_diagnostics: FxHashMap::default(),
            conforming_decl_map: FxHashMap::default(),
            visiting_superclass: false,
        }
    }

    pub fn nominal(&self) -> DeclId {
        self.nominal
    }

    /// Surviving candidate entries for `protocol`.
    pub fn entries_for(&self, protocol: ProtoId) -> &[EntryId] {
        match self.protocol_index.get(&protocol) {
            Some(&i) => &self.conformances[i].1,
            None => &[],
        }
    }

    /// Entries declared by `dc` (implied entries count toward the context
    /// of the entry that implied them).
    pub fn context_entries(&self, dc: DeclContext) -> &[EntryId] {
        match self.context_index.get(&dc) {
            Some(&i) => &self.all_conformances[i].1,
            None => &[],
        }
    }

    pub fn protocols(&self) -> impl Iterator<Item = ProtoId> + '_ {
        self.conformances.iter().map(|(p, _)| *p)
    }

    pub fn contexts(&self) -> impl Iterator<Item = DeclContext> + '_ {
        self.all_conformances.iter().map(|(dc, _)| *dc)
    }

    /// Every entry, grouped by context.
    pub fn all_entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.all_conformances.iter().flat_map(|(_, list)| list.iter().copied())
    }

    pub(crate) fn push(&mut self, protocol: ProtoId, dc: DeclContext, entry: EntryId) {
        let next = self.conformances.len();
        let i = *self.protocol_index.entry(protocol).or_insert(next);
        if i == next {
            self.conformances.push((protocol, Vec::new()));
        }
        self.conformances[i].1.push(entry);

        let next = self.all_conformances.len();
        let i = *self.context_index.entry(dc).or_insert(next);
        if i == next {
            self.all_conformances.push((dc, Vec::new()));
        }
        self.all_conformances[i].1.push(entry);
    }

    pub(crate) fn retain_for_protocol(&mut self, protocol: ProtoId, mut keep: impl FnMut(EntryId) -> bool) {
        if let Some(&i) = self.protocol_index.get(&protocol) {
            self.conformances[i].1.retain(|&e| keep(e));
        }
    }

    pub(crate) fn retain_context(&mut self, dc: DeclContext, mut keep: impl FnMut(EntryId) -> bool) {
        if let Some(&i) = self.context_index.get(&dc) {
            self.all_conformances[i].1.retain(|&e| keep(e));
        }
    }

    pub(crate) fn retain_all(&mut self, mut keep: impl FnMut(EntryId) -> bool) {
        for (_, list) in &mut self.all_conformances {
            list.retain(|&e| keep(e));
        }
    }
}

/// Every type's lookup table, plus the arenas they point into.
#[derive(Clone, Debug, Default)]
pub struct ConformanceTables {
    pub(crate) config: ConformanceConfig,
    pub(crate) tables: FxHashMap<DeclId, ConformanceLookupTable>,
    pub(crate) entries: EntryArena,
    pub(crate) conformances: ConformanceArena,
}

impl ConformanceTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConformanceConfig) -> Self {
        ConformanceTables {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ConformanceConfig {
        &self.config
    }

    pub fn entries(&self) -> &EntryArena {
        &self.entries
    }

    pub fn conformances(&self) -> &ConformanceArena {
        &self.conformances
    }

    pub fn conformances_mut(&mut self) -> &mut ConformanceArena {
        &mut self.conformances
    }

    /// The table for `nominal`, if one has been prepared.
    pub fn table(&self, nominal: DeclId) -> Option<&ConformanceLookupTable> {
        self.tables.get(&nominal)
    }

    pub(crate) fn table_mut(&mut self, nominal: DeclId) -> &mut ConformanceLookupTable {
        self.tables
            .entry(nominal)
            .or_insert_with(|| ConformanceLookupTable::new(nominal))
    }

    pub(crate) fn table_ref(&self, nominal: DeclId) -> &ConformanceLookupTable {
        match self.tables.get(&nominal) {
            Some(table) => table,
            None => panic!("no conformance table prepared for {nominal:?}"),
        }
    }
}
