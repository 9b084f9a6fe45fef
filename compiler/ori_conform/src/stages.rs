//! The staged pipeline that brings a lookup table up to date.
//!
//! Each stage walks the type body and then each extension not yet seen by
//! that stage. Progress is kept per (declaration, stage), so extensions
//! added later are picked up by the next query without redoing earlier
//! work.

use ori_diagnostic::{DiagnosticContext, DiagnosticKind};
use ori_ir::SourceLoc;
use ori_types::{
    ensure_sufficient_stack, AstContext, DeclContext, DeclFlags, DeclId, ExtId, FileKind,
    InheritedEntry, KnownProtocol, ProtoId,
};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::entry::{ConformanceEntryKind, ConformanceSource, EntryId};
use crate::ranking::compare_entries;
use crate::table::{ConformanceLookupTable, ConformanceStage, ConformanceTables};
use crate::{ConformanceId, ResolutionContext};

/// What a stage still has to visit for one declaration.
#[derive(Default)]
struct StageWork {
    nominal: bool,
    extensions: SmallVec<[ExtId; 4]>,
}

impl StageWork {
    fn is_empty(&self) -> bool {
        !self.nominal && self.extensions.is_empty()
    }
}

/// An enum with no payload cases at all.
fn has_only_payload_free_cases(ast: &AstContext, nominal: DeclId) -> bool {
    ast.nominal(nominal).enum_cases().iter().all(|case| case.payload.is_none())
}

fn inherited_clause(ast: &AstContext, dc: DeclContext) -> Vec<InheritedEntry> {
    match dc {
        DeclContext::Nominal(decl) => ast.nominal(decl).inherited.clone(),
        DeclContext::Extension(ext) => ast.extension(ext).inherited.clone(),
    }
}

impl ConformanceTables {
    /// Create the table for `nominal` on first use, seeding it with the
    /// conformances the compiler provides for free.
    pub(crate) fn prepare_table(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId) {
        if self.tables.contains_key(&nominal) {
            return;
        }
        self.tables.insert(nominal, ConformanceLookupTable::new(nominal));

        let file = rcx.ast.nominal(nominal).file;
        if !matches!(rcx.ast.file_kind(file), FileKind::Source | FileKind::Imported) {
            return;
        }

        if rcx.ast.nominal(nominal).is_class() {
            self.synthesize_known(rcx.ast, nominal, KnownProtocol::AnyObject);
        }

        if rcx.ast.nominal(nominal).is_enum() {
            if has_only_payload_free_cases(rcx.ast, nominal) {
                self.synthesize_known(rcx.ast, nominal, KnownProtocol::Equatable);
                self.synthesize_known(rcx.ast, nominal, KnownProtocol::Hashable);
            }
            if let Some(resolver) = rcx.resolver.as_deref_mut() {
                resolver.resolve_raw_type(rcx.ast, nominal);
            }
            if rcx.ast.nominal(nominal).raw_type().is_some() {
                self.synthesize_known(rcx.ast, nominal, KnownProtocol::RawRepresentable);
            }
        }
    }

    fn synthesize_known(&mut self, ast: &AstContext, nominal: DeclId, known: KnownProtocol) {
        if let Some(protocol) = ast.known_protocol(known) {
            self.synthesize(ast, nominal, protocol);
        }
    }

    pub(crate) fn synthesize(&mut self, ast: &AstContext, nominal: DeclId, protocol: ProtoId) -> bool {
        let loc = ast.nominal(nominal).loc;
        self.add_protocol(nominal, protocol, loc, ConformanceSource::Synthesized(nominal))
    }

    /// Record a candidate entry. Implied and synthesized entries that could
    /// never win are dropped here instead of during ranking.
    pub(crate) fn add_protocol(
        &mut self,
        nominal: DeclId,
        protocol: ProtoId,
        loc: SourceLoc,
        source: ConformanceSource,
    ) -> bool {
        let kind = source.kind();
        if kind.is_replaceable() {
            let existing = self.tables.get(&nominal).map_or(&[][..], |t| t.entries_for(protocol));
            let dominated = existing.iter().any(|&e| match self.entries.get(e).kind() {
                ConformanceEntryKind::Explicit
                | ConformanceEntryKind::Inherited
                | ConformanceEntryKind::Implied => true,
                ConformanceEntryKind::Synthesized => kind == ConformanceEntryKind::Synthesized,
            });
            if dominated {
                return false;
            }
        }

        let dc = match source {
            ConformanceSource::Explicit(dc) => dc,
            ConformanceSource::Inherited(class) => DeclContext::Nominal(class),
            ConformanceSource::Synthesized(decl) => DeclContext::Nominal(decl),
            ConformanceSource::Implied(entry) => self.entries.declaration_context(entry),
        };
        let entry = self.entries.push(loc, protocol, source);
        trace!(?nominal, ?protocol, ?kind, ?entry, "record conformance entry");
        self.table_mut(nominal).push(protocol, dc, entry);
        true
    }

    /// Add one entry per protocol named in `clause`, flattening
    /// compositions. Non-protocol entries (a superclass) are skipped.
    fn add_protocols(
        &mut self,
        ast: &AstContext,
        nominal: DeclId,
        clause: &[InheritedEntry],
        source: ConformanceSource,
    ) {
        for inherited in clause {
            let mut protocols: SmallVec<[ProtoId; 2]> = SmallVec::new();
            ast.visit_protocols(inherited.ty, &mut |p| protocols.push(p));
            for protocol in protocols {
                self.add_protocol(nominal, protocol, inherited.loc, source);
            }
        }
    }

    // === Stage driver ===

    #[tracing::instrument(level = "debug", skip_all, fields(nominal = ?nominal, stage = ?stage))]
    pub(crate) fn update_lookup_table(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        stage: ConformanceStage,
    ) {
        ensure_sufficient_stack(|| self.update_stage(rcx, nominal, stage));
    }

    fn update_stage(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId, stage: ConformanceStage) {
        match stage {
            ConformanceStage::RecordedExplicit => {
                let work = self.collect_stage_work(rcx, nominal, stage, nominal);
                if work.nominal {
                    self.record_explicit(rcx, nominal, DeclContext::Nominal(nominal));
                }
                for ext in work.extensions {
                    self.record_explicit(rcx, nominal, DeclContext::Extension(ext));
                }
            }

            ConformanceStage::Inherited => {
                self.update_lookup_table(rcx, nominal, ConformanceStage::RecordedExplicit);
                self.inherit_from_superclasses(rcx, nominal);
            }

            ConformanceStage::ExpandedImplied => {
                self.update_lookup_table(rcx, nominal, ConformanceStage::Inherited);
                let work = self.collect_stage_work(rcx, nominal, stage, nominal);
                if work.nominal {
                    self.expand_implied(rcx, nominal, DeclContext::Nominal(nominal));
                }
                for ext in work.extensions {
                    self.expand_implied(rcx, nominal, DeclContext::Extension(ext));
                }
            }

            ConformanceStage::Resolved => {
                self.update_lookup_table(rcx, nominal, ConformanceStage::ExpandedImplied);
                let work = self.collect_stage_work(rcx, nominal, stage, nominal);
                if work.is_empty() {
                    return;
                }
                let protocols: Vec<ProtoId> = self.table_ref(nominal).protocols().collect();
                let mut any_superseded = false;
                for protocol in protocols {
                    any_superseded |= self.resolve_conformances(rcx, nominal, protocol);
                }
                if any_superseded {
                    let entries = &self.entries;
                    if let Some(table) = self.tables.get_mut(&nominal) {
                        table.retain_all(|e| !entries.get(e).is_superseded());
                    }
                }
            }
        }
    }

    /// Advance `owner`'s cursor for `decl` at `stage`, loading serialized
    /// conformances and resolving extensions on the way.
    ///
    /// `decl` is `owner` itself or one of its superclasses.
    fn collect_stage_work(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        owner: DeclId,
        stage: ConformanceStage,
        decl: DeclId,
    ) -> StageWork {
        let slot = stage.index();
        let mut cursor = self
            .table_mut(owner)
            .last_processed
            .entry(decl)
            .or_default()[slot];
        let mut work = StageWork::default();

        if !cursor.nominal_done {
            cursor.nominal_done = true;
            let loaded = self.load_conformances(rcx, DeclContext::Nominal(decl));
            if !loaded && rcx.ast.file_kind(rcx.ast.nominal(decl).file) == FileKind::Source {
                if let Some(resolver) = rcx.resolver.as_deref_mut() {
                    resolver.resolve_decl_signature(rcx.ast, decl);
                }
            }
            work.nominal = true;
        }

        while let Some(&ext) = rcx.ast.nominal(decl).extensions.get(cursor.next_extension) {
            cursor.next_extension += 1;
            let loaded = self.load_conformances(rcx, DeclContext::Extension(ext));
            if !loaded && rcx.ast.file_kind(rcx.ast.extension(ext).file) == FileKind::Source {
                match rcx.resolver.as_deref_mut() {
                    Some(resolver) => resolver.resolve_extension(rcx.ast, ext),
                    None if !rcx.ast.extension(ext).inheritance_checked => {
                        trace!(?ext, ?stage, "delaying unchecked extension");
                        self.table_mut(owner).delayed[slot].push(ext);
                        continue;
                    }
                    None => {}
                }
            }
            work.extensions.push(ext);
        }

        if rcx.has_resolver() {
            let delayed = std::mem::take(&mut self.table_mut(owner).delayed[slot]);
            for ext in delayed {
                if let Some(resolver) = rcx.resolver.as_deref_mut() {
                    resolver.resolve_extension(rcx.ast, ext);
                }
                work.extensions.push(ext);
            }
        }

        if let Some(progress) = self.table_mut(owner).last_processed.get_mut(&decl) {
            progress[slot] = cursor;
        }
        work
    }

    /// Consume `dc`'s loader token, if any, and register what it yields.
    fn load_conformances(&mut self, rcx: &mut ResolutionContext<'_>, dc: DeclContext) -> bool {
        let slot = match dc {
            DeclContext::Nominal(decl) => &mut rcx.ast.nominal_mut(decl).conformance_loader,
            DeclContext::Extension(ext) => &mut rcx.ast.extension_mut(ext).conformance_loader,
        };
        let Some(token) = slot.take() else {
            return false;
        };
        let Some(loader) = rcx.loader.as_deref_mut() else {
            panic!("{dc:?} carries a conformance loader token but no loader was supplied");
        };
        let loaded = loader.load_all_conformances(rcx.ast, &mut self.conformances, dc, token);
        debug!(?dc, count = loaded.len(), "loaded serialized conformances");
        for conformance in loaded {
            self.register_conformance(rcx, conformance);
        }
        true
    }

    // === RecordedExplicit ===

    fn record_explicit(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId, dc: DeclContext) {
        if let Some(resolver) = rcx.resolver.as_deref_mut() {
            resolver.resolve_inheritance_clause(rcx.ast, dc);
        }
        let clause = inherited_clause(rcx.ast, dc);
        self.add_protocols(rcx.ast, nominal, &clause, ConformanceSource::Explicit(dc));
    }

    // === Inherited ===

    fn inherit_from_superclasses(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId) {
        if !rcx.ast.nominal(nominal).is_class() {
            return;
        }
        if let Some(resolver) = rcx.resolver.as_deref_mut() {
            resolver.resolve_superclass(rcx.ast, nominal);
        }
        let Some(superclass) = rcx.ast.superclass_decl(nominal) else {
            return;
        };
        if self.table_ref(nominal).visiting_superclass {
            return;
        }
        self.table_mut(nominal).visiting_superclass = true;

        self.prepare_table(rcx, superclass);
        self.update_lookup_table(rcx, superclass, ConformanceStage::Resolved);

        let mut current = Some(superclass);
        let mut hare = rcx.ast.superclass_decl(superclass);
        while let Some(class) = current {
            self.prepare_table(rcx, class);
            let work = self.collect_stage_work(rcx, nominal, ConformanceStage::Inherited, class);
            if work.nominal {
                self.inherit_conformances(rcx.ast, nominal, class, DeclContext::Nominal(class));
            }
            for ext in work.extensions {
                self.inherit_conformances(rcx.ast, nominal, class, DeclContext::Extension(ext));
            }

            current = rcx.ast.superclass_decl(class);
            hare = hare
                .and_then(|c| rcx.ast.superclass_decl(c))
                .and_then(|c| rcx.ast.superclass_decl(c));
            if current.is_some() && current == hare {
                let loc = rcx
                    .ast
                    .nominal(nominal)
                    .superclass()
                    .map_or(rcx.ast.nominal(nominal).loc, |s| s.loc);
                let subject = format!("'{}'", rcx.ast.nominal_name(nominal));
                rcx.sink.record(
                    DiagnosticKind::CircularClassInheritance,
                    loc,
                    DiagnosticContext::new(subject),
                );
                break;
            }
        }

        self.table_mut(nominal).visiting_superclass = false;
    }

    /// Copy the surviving entries `superclass` declares in `super_dc` into
    /// `class` as inherited entries.
    fn inherit_conformances(
        &mut self,
        ast: &AstContext,
        class: DeclId,
        superclass: DeclId,
        super_dc: DeclContext,
    ) {
        let loc = ast
            .nominal(class)
            .superclass()
            .map(|s| s.loc)
            .filter(|loc| loc.is_valid())
            .unwrap_or(ast.nominal(superclass).loc);

        let Some(super_table) = self.tables.get(&superclass) else {
            return;
        };
        let mut protocols: SmallVec<[ProtoId; 8]> = SmallVec::new();
        for &entry in super_table.context_entries(super_dc) {
            let entry = self.entries.get(entry);
            if !entry.is_superseded() && !protocols.contains(&entry.protocol) {
                protocols.push(entry.protocol);
            }
        }
        for protocol in protocols {
            self.add_protocol(class, protocol, loc, ConformanceSource::Inherited(class));
        }
    }

    // === ExpandedImplied ===

    fn expand_implied(&mut self, rcx: &mut ResolutionContext<'_>, nominal: DeclId, dc: DeclContext) {
        if let Some(resolver) = rcx.resolver.as_deref_mut() {
            resolver.resolve_inheritance_clause(rcx.ast, dc);
        }
        let bridges_error = {
            let decl = rcx.ast.nominal(nominal);
            decl.is_enum()
                && decl.flags.contains(DeclFlags::C_COMPATIBLE)
                && has_only_payload_free_cases(rcx.ast, nominal)
        };

        let cap = self.config.implied_expansion_cap;
        let mut i = 0;
        // Entries appended below land in the same list and are expanded in turn.
        while let Some(&entry) = self.table_ref(nominal).context_entries(dc).get(i) {
            let protocol = self.entries.get(entry).protocol;
            if i >= cap {
                let subject = format!("'{}'", rcx.ast.protocol_name(protocol));
                rcx.sink.record(
                    DiagnosticKind::CircularProtocolInheritance,
                    self.entries.get(entry).loc,
                    DiagnosticContext::new(subject),
                );
                break;
            }

            if bridges_error && rcx.ast.protocol(protocol).known == Some(KnownProtocol::Error) {
                if let Some(bridged) = rcx.ast.known_protocol(KnownProtocol::BridgedError) {
                    self.add_protocol(nominal, bridged, SourceLoc::INVALID, ConformanceSource::Implied(entry));
                }
            }

            let clause = rcx.ast.protocol(protocol).inherited.clone();
            self.add_protocols(rcx.ast, nominal, &clause, ConformanceSource::Implied(entry));
            i += 1;
        }
    }

    // === Resolved ===

    /// Rank the entries for `protocol`, marking every loser superseded.
    /// Returns whether anything was superseded.
    #[tracing::instrument(level = "trace", skip_all, fields(protocol = ?protocol))]
    pub(crate) fn resolve_conformances(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        protocol: ProtoId,
    ) -> bool {
        let candidates: SmallVec<[EntryId; 4]> =
            self.table_ref(nominal).entries_for(protocol).iter().copied().collect();
        let mut any_superseded = false;

        for &entry in &candidates {
            if self.entries.get(entry).is_superseded() {
                any_superseded = true;
                continue;
            }
            for &other in &candidates {
                if other == entry {
                    continue;
                }
                if self.entries.get(other).is_superseded() {
                    any_superseded = true;
                    continue;
                }
                let ranking = compare_entries(rcx.ast, &self.entries, entry, other);
                any_superseded = true;
                if ranking.left_wins() {
                    self.mark_superseded(rcx, nominal, other, entry, ranking.diagnose);
                } else {
                    self.mark_superseded(rcx, nominal, entry, other, ranking.diagnose);
                    break;
                }
            }
        }

        if any_superseded {
            let entries = &self.entries;
            if let Some(table) = self.tables.get_mut(&nominal) {
                table.retain_for_protocol(protocol, |e| !entries.get(e).is_superseded());
            }
        }
        any_superseded
    }

    fn mark_superseded(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        nominal: DeclId,
        loser: EntryId,
        winner: EntryId,
        diagnose: bool,
    ) {
        self.entries.get_mut(loser).superseded_by = Some(winner);
        trace!(?loser, ?winner, diagnose, "conformance entry superseded");
        if !diagnose {
            return;
        }

        let dc = self.entries.declaration_context(loser);
        self.table_mut(nominal)
            .superseded_diagnostics
            .entry(dc)
            .or_default()
            .push(loser);

        let kind = if self.entries.ranking_kind(winner) == ConformanceEntryKind::Inherited {
            DiagnosticKind::ConformanceOverridesInherited
        } else {
            DiagnosticKind::RedundantConformance
        };
        let protocol = self.entries.get(loser).protocol;
        let subject = format!(
            "'{}' to '{}'",
            rcx.ast.nominal_name(nominal),
            rcx.ast.protocol_name(protocol)
        );
        let context = DiagnosticContext::new(subject).with_related(self.entries.get(winner).loc);
        rcx.sink.record(kind, self.entries.get(loser).loc, context);
    }

    // === Registration ===

    /// Merge an externally built conformance into its type's table.
    ///
    /// An existing entry for the same protocol in the same context adopts
    /// it; otherwise a new entry is appended.
    pub fn register_conformance(&mut self, rcx: &mut ResolutionContext<'_>, conformance: ConformanceId) {
        let ty = self.conformances.ty(conformance);
        let protocol = self.conformances.protocol(conformance);
        let inherited = self.conformances.get(conformance).is_inherited();
        let Some(nominal) = rcx.ast.types.nominal_decl(ty) else {
            panic!("registered conformance for non-nominal type {}", rcx.ast.display_type(ty));
        };
        let dc = if inherited {
            DeclContext::Nominal(nominal)
        } else {
            self.conformances.decl_context(conformance)
        };
        self.prepare_table(rcx, nominal);

        let existing = self
            .table_ref(nominal)
            .context_entries(dc)
            .iter()
            .copied()
            .find(|&e| self.entries.get(e).protocol == protocol);
        if let Some(entry) = existing {
            let slot = &mut self.entries.get_mut(entry).conformance;
            assert!(
                slot.is_none() || *slot == Some(conformance),
                "mismatched conformance registered for {protocol:?}"
            );
            *slot = Some(conformance);
            return;
        }

        let source = if inherited {
            ConformanceSource::Inherited(nominal)
        } else {
            ConformanceSource::Explicit(dc)
        };
        let entry = self.entries.push(SourceLoc::INVALID, protocol, source);
        self.entries.get_mut(entry).conformance = Some(conformance);
        self.table_mut(nominal).push(protocol, dc, entry);
        debug!(?nominal, ?protocol, ?conformance, "registered conformance");
    }
}
