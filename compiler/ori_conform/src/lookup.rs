//! Conformance queries.
//!
//! Every query brings the relevant table only as far through the stage
//! pipeline as it needs: a single-protocol lookup stops at `Inherited` when
//! the protocol is already recorded and resolves just that protocol.

use ori_ir::SourceLoc;
use ori_types::{DeclContext, DeclId, Idx, ProtoId, TypeData, ValueDeclId};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

use crate::entry::{ConformanceEntryKind, ConformanceSource, EntryId};
use crate::table::{ConformanceStage, ConformanceTables, SatisfiedRequirement};
use crate::{ConformanceId, ConformanceRef, ProtocolConformance, ResolutionContext};

/// Which entries [`ConformanceTables::lookup_conformances`] reports.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConformanceLookupKind {
    All,
    /// Explicit and synthesized entries only; implied and inherited ones
    /// are resolved but not reported.
    OnlyExplicit,
}

/// An entry that lost to another one in a way the user should hear about.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ConformanceDiagnostic {
    pub protocol: ProtoId,
    /// Where the losing entry's declared conformance was written.
    pub loc: SourceLoc,
    pub kind: ConformanceEntryKind,
    /// The protocol the user wrote that led to the losing entry.
    pub explicit_protocol: ProtoId,
    pub superseded_by_context: DeclContext,
    pub superseded_by_kind: ConformanceEntryKind,
    pub superseded_by_explicit_protocol: ProtoId,
}

/// Everything one declaration context contributes.
#[derive(Clone, Default, Debug)]
pub struct ConformanceLookupResult {
    pub protocols: Vec<ProtoId>,
    pub conformances: Vec<ConformanceId>,
    pub diagnostics: Vec<ConformanceDiagnostic>,
}

impl ConformanceTables {
    /// Whether `ty` conforms to `protocol`, and how.
    ///
    /// Bound generic types get a specialized conformance; generic
    /// parameters conform abstractly through their requirements.
    #[tracing::instrument(level = "debug", skip_all, fields(ty = ?ty, protocol = ?protocol))]
    pub fn lookup_conformance(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        ty: Idx,
        protocol: ProtoId,
    ) -> Option<ConformanceRef> {
        match rcx.ast.types.get(ty).clone() {
            TypeData::GenericParam(param) => {
                let conforms = rcx.ast.generic_param(param).conforms_to.iter().any(|&p| {
                    p == protocol || rcx.ast.protocol_inherits_from(p, protocol)
                });
                conforms.then_some(ConformanceRef::Abstract(protocol))
            }
            TypeData::Nominal { decl, args } => {
                let conformance = self.lookup_nominal_conformance(rcx, decl, protocol)?;
                if args.is_empty() || self.conformances.ty(conformance) == ty {
                    return Some(ConformanceRef::Concrete(conformance));
                }
                let substitutions = rcx.ast.substitutions_for(ty);
                Some(ConformanceRef::Concrete(self.conformances.specialized(
                    ty,
                    conformance,
                    substitutions,
                )))
            }
            _ => None,
        }
    }

    /// The winning conformance of `nominal` to `protocol`.
    pub fn lookup_nominal_conformance(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        protocol: ProtoId,
    ) -> Option<ConformanceId> {
        self.prepare_table(rcx, nominal);
        self.update_lookup_table(rcx, nominal, ConformanceStage::Inherited);
        if self.table_ref(nominal).entries_for(protocol).is_empty() {
            self.update_lookup_table(rcx, nominal, ConformanceStage::ExpandedImplied);
        }
        self.resolve_conformances(rcx, nominal, protocol);

        let candidates: SmallVec<[EntryId; 2]> =
            self.table_ref(nominal).entries_for(protocol).iter().copied().collect();
        candidates
            .into_iter()
            .find_map(|entry| self.get_conformance(rcx, nominal, entry))
    }

    /// Everything `dc` (a type body or one extension) contributes, with the
    /// redundancy diagnostics recorded against it. The diagnostics are
    /// handed out once.
    pub fn lookup_conformances(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        dc: DeclContext,
        kind: ConformanceLookupKind,
    ) -> ConformanceLookupResult {
        let nominal = rcx.ast.context_nominal(dc);
        self.prepare_table(rcx, nominal);
        self.update_lookup_table(rcx, nominal, ConformanceStage::ExpandedImplied);

        let candidates: Vec<EntryId> = self.table_ref(nominal).context_entries(dc).to_vec();
        for &entry in &candidates {
            let protocol = self.entries.get(entry).protocol;
            self.resolve_conformances(rcx, nominal, protocol);
        }
        let entries = &self.entries;
        if let Some(table) = self.tables.get_mut(&nominal) {
            table.retain_context(dc, |e| !entries.get(e).is_superseded());
        }

        let mut result = ConformanceLookupResult::default();
        let survivors: Vec<EntryId> = self.table_ref(nominal).context_entries(dc).to_vec();
        for entry in survivors {
            let entry_kind = self.entries.get(entry).kind();
            if kind == ConformanceLookupKind::OnlyExplicit
                && !matches!(
                    entry_kind,
                    ConformanceEntryKind::Explicit | ConformanceEntryKind::Synthesized
                )
            {
                continue;
            }
            result.protocols.push(self.entries.get(entry).protocol);
            if let Some(conformance) = self.get_conformance(rcx, nominal, entry) {
                result.conformances.push(conformance);
            }
        }

        let superseded = self
            .table_mut(nominal)
            .superseded_diagnostics
            .remove(&dc)
            .unwrap_or_default();
        for entry in superseded {
            result.diagnostics.push(self.describe_superseded(entry));
        }
        result
    }

    fn describe_superseded(&self, entry: EntryId) -> ConformanceDiagnostic {
        let entries = &self.entries;
        let loser = entries.get(entry);
        let declared = entries.get(entries.declared_conformance(entry));
        let Some(winner) = loser.superseded_by else {
            panic!("superseded diagnostic for {entry:?} without a winner");
        };
        ConformanceDiagnostic {
            protocol: loser.protocol,
            loc: declared.loc,
            kind: loser.kind(),
            explicit_protocol: declared.protocol,
            superseded_by_context: entries.declaration_context(winner),
            superseded_by_kind: entries.get(winner).kind(),
            superseded_by_explicit_protocol: entries.get(entries.declared_conformance(winner)).protocol,
        }
    }

    /// Every protocol `nominal` has at least one entry for, implied ones
    /// included.
    pub fn get_all_protocols(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        sorted: bool,
    ) -> Vec<ProtoId> {
        self.prepare_table(rcx, nominal);
        self.update_lookup_table(rcx, nominal, ConformanceStage::ExpandedImplied);
        let table = self.table_ref(nominal);
        let mut protocols: Vec<ProtoId> = table
            .protocols()
            .filter(|&p| !table.entries_for(p).is_empty())
            .collect();
        if sorted {
            protocols.sort_by_key(|&p| (rcx.ast.protocol_name(p), p));
        }
        protocols
    }

    /// Every conformance of `nominal`, across all its contexts.
    ///
    /// Sorted order puts normal conformances with a known location first,
    /// by file then position; the rest follow by protocol name.
    pub fn get_all_conformances(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        sorted: bool,
    ) -> Vec<ConformanceId> {
        self.prepare_table(rcx, nominal);
        self.update_lookup_table(rcx, nominal, ConformanceStage::Resolved);

        let entries = &self.entries;
        let all: Vec<EntryId> = self
            .table_ref(nominal)
            .all_entries()
            .filter(|&e| !entries.get(e).is_superseded())
            .collect();
        let mut conformances: Vec<ConformanceId> = all
            .into_iter()
            .filter_map(|entry| self.get_conformance(rcx, nominal, entry))
            .collect();

        if sorted {
            let ast = &*rcx.ast;
            let arena = &self.conformances;
            conformances.sort_by_cached_key(|&c| {
                let protocol = arena.protocol(c);
                let located = match arena.get(c) {
                    ProtocolConformance::Normal(normal) => normal.loc.file().map(|file| {
                        (ast.interner.lookup(ast.file(file).name), normal.loc.offset())
                    }),
                    _ => None,
                };
                (
                    located.is_none(),
                    located,
                    ast.protocol_name(protocol),
                    protocol,
                    c,
                )
            });
        }
        conformances
    }

    /// Protocols the compiler synthesized for `nominal`'s own body.
    pub fn get_implicit_protocols(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId) -> Vec<ProtoId> {
        self.prepare_table(rcx, nominal);
        self.table_ref(nominal)
            .context_entries(DeclContext::Nominal(nominal))
            .iter()
            .map(|&e| self.entries.get(e))
            .filter(|e| e.kind() == ConformanceEntryKind::Synthesized)
            .map(|e| e.protocol)
            .collect()
    }

    /// Record a compiler-provided conformance. Returns `false` when a
    /// better entry already makes it redundant.
    pub fn add_synthesized_conformance(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        protocol: ProtoId,
    ) -> bool {
        self.prepare_table(rcx, nominal);
        self.synthesize(rcx.ast, nominal, protocol)
    }

    /// The requirements (of any of `nominal`'s valid conformances) that
    /// `member` is the witness for. Cached per member.
    pub fn get_satisfied_protocol_requirements_for_member(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        member: ValueDeclId,
        nominal: DeclId,
        sorted: bool,
    ) -> Vec<SatisfiedRequirement> {
        if let Some(cached) = self
            .tables
            .get(&nominal)
            .and_then(|t| t.conforming_decl_map.get(&member))
        {
            return cached.clone();
        }

        let conformances = self.get_all_conformances(rcx, nominal, sorted);
        let mut satisfied = Vec::new();
        for conformance in conformances {
            if self.conformances.is_invalid(conformance) {
                continue;
            }
            self.for_each_type_witness(rcx, conformance, |assoc, witness| {
                if witness.type_decl == Some(member) {
                    satisfied.push(SatisfiedRequirement::AssocType(assoc));
                }
                false
            });
            self.for_each_value_witness(rcx, conformance, |requirement, witness| {
                if witness.is_some_and(|w| w.decl == member) {
                    satisfied.push(SatisfiedRequirement::Value(requirement));
                }
            });
        }
        debug!(?member, count = satisfied.len(), "computed satisfied requirements");
        self.table_mut(nominal)
            .conforming_decl_map
            .insert(member, satisfied.clone());
        satisfied
    }

    // === Entry -> conformance ===

    /// The context whose declaration ultimately provides `entry`, digging
    /// through inherited entries into superclasses.
    fn get_conforming_context(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        entry: EntryId,
    ) -> Option<DeclContext> {
        let protocol = self.entries.get(entry).protocol;
        let mut nominal = nominal;
        let mut entry = entry;
        let mut visited = FxHashSet::default();

        while self.entries.get(entry).kind() == ConformanceEntryKind::Inherited {
            if !visited.insert(nominal) {
                return None;
            }
            let superclass = rcx.ast.superclass_decl(nominal)?;
            if !self.table_ref(nominal).visiting_superclass {
                self.table_mut(nominal).visiting_superclass = true;
                self.prepare_table(rcx, superclass);
                self.resolve_conformances(rcx, superclass, protocol);
                self.table_mut(nominal).visiting_superclass = false;
            }
            entry = *self.tables.get(&superclass)?.entries_for(protocol).first()?;
            nominal = superclass;
        }
        Some(self.entries.declaration_context(entry))
    }

    /// The conformance object for `entry`, built on first request.
    pub(crate) fn get_conformance(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        entry: EntryId,
    ) -> Option<ConformanceId> {
        if let Some(conformance) = self.entries.get(entry).conformance {
            return Some(conformance);
        }
        let protocol = self.entries.get(entry).protocol;
        let conforming_dc = self.get_conforming_context(rcx, nominal, entry)?;
        let conforming_nominal = rcx.ast.context_nominal(conforming_dc);

        let conformance = if let ConformanceSource::Inherited(_) = self.entries.get(entry).source {
            let ty = rcx.ast.declared_type(nominal);
            let mut superclass_ty = rcx.ast.superclass_of_type(ty)?;
            let mut visited = FxHashSet::default();
            while rcx.ast.types.nominal_decl(superclass_ty) != Some(conforming_nominal) {
                if !visited.insert(superclass_ty) {
                    return None;
                }
                superclass_ty = rcx.ast.superclass_of_type(superclass_ty)?;
            }
            match self.lookup_conformance(rcx, superclass_ty, protocol)? {
                ConformanceRef::Concrete(base) => self.conformances.inherited(ty, base),
                ConformanceRef::Abstract(_) => return None,
            }
        } else {
            let ty = rcx.ast.context_declared_type(conforming_dc);
            let loc = rcx.ast.context_loc(conforming_dc);
            self.conformances.normal(ty, protocol, conforming_dc, loc)
        };

        self.entries.get_mut(entry).conformance = Some(conformance);
        Some(conformance)
    }

    // === Debugging ===

    /// Human-readable listing of `nominal`'s table, grouped by context.
    pub fn dump(&self, ast: &ori_types::AstContext, nominal: DeclId) -> String {
        let Some(table) = self.tables.get(&nominal) else {
            return format!("no conformance table for '{}'\n", ast.nominal_name(nominal));
        };
        let mut out = String::new();
        for dc in table.contexts() {
            let header = match dc {
                DeclContext::Nominal(decl) => format!("conformances in '{}':\n", ast.nominal_name(decl)),
                DeclContext::Extension(ext) => format!(
                    "conformances in extension of '{}' at {:?}:\n",
                    ast.nominal_name(ast.extension(ext).extended),
                    ast.extension(ext).loc
                ),
            };
            out.push_str(&header);
            for &id in table.context_entries(dc) {
                let entry = self.entries.get(id);
                out.push_str(&format!("  {id:?} {}", ast.protocol_name(entry.protocol)));
                if entry.loc.is_valid() {
                    out.push_str(&format!(" at {:?}", entry.loc));
                }
                match entry.source {
                    ConformanceSource::Explicit(_) => out.push_str(" explicit"),
                    ConformanceSource::Inherited(_) => out.push_str(" inherited"),
                    ConformanceSource::Implied(by) => out.push_str(&format!(" implied by {by:?}")),
                    ConformanceSource::Synthesized(_) => out.push_str(" synthesized"),
                }
                if let Some(conformance) = entry.conformance {
                    out.push_str(&format!(" -> {conformance:?}"));
                }
                if let Some(winner) = entry.superseded_by {
                    out.push_str(&format!(" superseded by {winner:?}"));
                }
                out.push('\n');
            }
        }
        out
    }
}
