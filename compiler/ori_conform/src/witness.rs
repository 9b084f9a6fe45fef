//! Witness queries on conformances.
//!
//! Reads go through the root normal conformance. A lazily loaded root runs
//! its loader on first read. Missing witnesses are requested from the
//! resolver when there is one. Specialized conformances substitute the
//! generic answers and cache them.

use ori_types::{AssocTypeId, Idx, ProtoId, SubstitutionMap, ValueDeclId};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::table::ConformanceTables;
use crate::{
    ConformanceId, ConformanceRef, ConformanceState, ProtocolConformance, ResolutionContext,
    TypeWitness, Witness,
};

impl ConformanceTables {
    /// Run the deferred loader of `conformance`'s root, if it has one.
    fn resolve_lazy_info(&mut self, rcx: &mut ResolutionContext<'_>, conformance: ConformanceId) {
        let root = self.conformances.root_normal(conformance);
        let Some(token) = self.conformances.take_lazy_loader(root) else {
            return;
        };
        let Some(loader) = rcx.loader.as_deref_mut() else {
            panic!("{root:?} was loaded lazily but no loader was supplied");
        };
        trace!(?root, "finishing lazily loaded conformance");
        self.conformances.set_state(root, ConformanceState::Incomplete);
        loader.finish_normal_conformance(rcx.ast, &mut self.conformances, root, token);
        self.conformances.set_state(root, ConformanceState::Complete);
    }

    // === Type witnesses ===

    pub fn has_type_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        assoc: AssocTypeId,
    ) -> bool {
        if let ProtocolConformance::Specialized(s) = self.conformances.get(conformance) {
            if s.cached_type_witness(assoc).is_some() {
                return true;
            }
        }
        let root = self.conformances.root_normal(conformance);
        self.resolve_lazy_info(rcx, root);
        if self.conformances.normal_conformance(root).type_witness(assoc).is_some() {
            return true;
        }
        if let Some(resolver) = rcx.resolver.as_deref_mut() {
            resolver.resolve_type_witness(rcx.ast, &mut self.conformances, root, assoc);
        }
        self.conformances.normal_conformance(root).type_witness(assoc).is_some()
    }

    /// The witness for `assoc`, as seen from `conformance`'s type.
    ///
    /// `None` when it is not known and there is no resolver to ask.
    pub fn type_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        assoc: AssocTypeId,
    ) -> Option<TypeWitness> {
        match self.conformances.get(conformance) {
            ProtocolConformance::Normal(_) => self.normal_type_witness(rcx, conformance, assoc),
            ProtocolConformance::Inherited(inherited) => {
                let base = inherited.base;
                self.type_witness(rcx, base, assoc)
            }
            ProtocolConformance::Specialized(specialized) => {
                if let Some(cached) = specialized.cached_type_witness(assoc) {
                    return Some(cached.clone());
                }
                let generic = specialized.generic;
                let substitutions = specialized.substitutions.clone();
                let generic_witness = self.type_witness(rcx, generic, assoc)?;
                let witness = self.specialize_type_witness(rcx, assoc, generic_witness, &substitutions);
                self.conformances
                    .cache_specialized_witness(conformance, assoc, witness.clone());
                Some(witness)
            }
        }
    }

    fn normal_type_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        assoc: AssocTypeId,
    ) -> Option<TypeWitness> {
        self.resolve_lazy_info(rcx, conformance);
        if let Some(known) = self.conformances.normal_conformance(conformance).type_witness(assoc) {
            return Some(known.clone());
        }
        let resolver = rcx.resolver.as_deref_mut()?;
        resolver.resolve_type_witness(rcx.ast, &mut self.conformances, conformance, assoc);
        match self.conformances.normal_conformance(conformance).type_witness(assoc) {
            Some(known) => Some(known.clone()),
            None => panic!("resolver did not produce a type witness for {assoc:?} in {conformance:?}"),
        }
    }

    /// Push a generic type witness through a specialization. An unchanged
    /// replacement keeps the generic witness as is.
    fn specialize_type_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        assoc: AssocTypeId,
        generic: TypeWitness,
        substitutions: &SubstitutionMap,
    ) -> TypeWitness {
        let replacement = rcx.ast.types.subst(generic.replacement, substitutions);
        if replacement == generic.replacement {
            return generic;
        }
        let requirements = rcx.ast.assoc_type(assoc).conforms_to.clone();
        let conformances = requirements
            .into_iter()
            .map(|protocol| {
                self.lookup_conformance(rcx, replacement, protocol)
                    .unwrap_or(ConformanceRef::Abstract(protocol))
            })
            .collect();
        TypeWitness {
            replacement,
            conformances,
            type_decl: generic.type_decl,
        }
    }

    // === Value witnesses ===

    pub fn has_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        requirement: ValueDeclId,
    ) -> bool {
        self.resolve_lazy_info(rcx, conformance);
        self.conformances
            .normal_conformance(conformance)
            .witness(requirement)
            .is_some()
    }

    /// The declaration satisfying `requirement`, as seen from
    /// `conformance`'s type. `None` for a requirement without a witness,
    /// or one not yet known to an incomplete conformance.
    pub fn witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        requirement: ValueDeclId,
    ) -> Option<Witness> {
        let root = self.conformances.root_normal(conformance);
        let witness = self.normal_witness(rcx, root, requirement)?;
        match self.conformances.get(conformance) {
            ProtocolConformance::Specialized(specialized) => {
                let outer = specialized.substitutions.clone();
                let substitutions = witness
                    .substitutions
                    .iter()
                    .map(|(param, ty)| (param, rcx.ast.types.subst(ty, &outer)))
                    .collect::<Vec<_>>();
                Some(Witness {
                    decl: witness.decl,
                    substitutions: SubstitutionMap::from_pairs(substitutions),
                })
            }
            ProtocolConformance::Normal(_) | ProtocolConformance::Inherited(_) => Some(witness),
        }
    }

    fn normal_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        root: ConformanceId,
        requirement: ValueDeclId,
    ) -> Option<Witness> {
        self.resolve_lazy_info(rcx, root);
        if let Some(known) = self.conformances.normal_conformance(root).witness(requirement) {
            return known.clone();
        }
        if let Some(resolver) = rcx.resolver.as_deref_mut() {
            resolver.resolve_witness(rcx.ast, &mut self.conformances, root, requirement);
        }
        let normal = self.conformances.normal_conformance(root);
        match normal.witness(requirement) {
            Some(known) => known.clone(),
            None => {
                assert!(
                    normal.state() != ConformanceState::Complete || normal.is_invalid(),
                    "complete conformance {root:?} has no witness for {requirement:?}"
                );
                None
            }
        }
    }

    // === Iteration ===

    /// Visit each associated type of the protocol with its witness, in
    /// declaration order, until `f` returns `true`. Without a resolver,
    /// associated types with no recorded witness are skipped.
    pub fn for_each_type_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        mut f: impl FnMut(AssocTypeId, &TypeWitness) -> bool,
    ) -> bool {
        let protocol = self.conformances.protocol(conformance);
        let assoc_types = rcx.ast.protocol(protocol).assoc_types.clone();
        for assoc in assoc_types {
            if !rcx.has_resolver() && !self.has_type_witness(rcx, conformance, assoc) {
                continue;
            }
            if let Some(witness) = self.type_witness(rcx, conformance, assoc) {
                if f(assoc, &witness) {
                    return true;
                }
            }
        }
        false
    }

    /// Visit each value requirement with its witness, in declaration order.
    pub fn for_each_value_witness(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        mut f: impl FnMut(ValueDeclId, Option<&Witness>),
    ) {
        let protocol = self.conformances.protocol(conformance);
        let requirements = rcx.ast.protocol(protocol).requirements.clone();
        for requirement in requirements {
            if !rcx.has_resolver() && !self.has_witness(rcx, conformance, requirement) {
                continue;
            }
            let witness = self.witness(rcx, conformance, requirement);
            f(requirement, witness.as_ref());
        }
    }

    pub fn uses_default_definition(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        assoc: AssocTypeId,
    ) -> bool {
        self.resolve_lazy_info(rcx, conformance);
        self.conformances.uses_default_definition(conformance, assoc)
    }

    // === Inherited protocols ===

    /// The conformance to `protocol` (which the conformed protocol
    /// inherits from) for the same type as `conformance`.
    pub fn inherited_conformance(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        protocol: ProtoId,
    ) -> Option<ConformanceId> {
        match self.conformances.get(conformance) {
            ProtocolConformance::Inherited(inherited) => {
                let (ty, base) = (inherited.ty, inherited.base);
                let found = self.inherited_conformance(rcx, base, protocol)?;
                Some(self.conformances.inherited(ty, found))
            }
            ProtocolConformance::Specialized(specialized) => {
                let (ty, generic) = (specialized.ty, specialized.generic);
                let substitutions = specialized.substitutions.clone();
                let found = self.inherited_conformance(rcx, generic, protocol)?;
                Some(self.subst(rcx, found, ty, &substitutions))
            }
            ProtocolConformance::Normal(_) => {
                self.resolve_lazy_info(rcx, conformance);
                let direct = self.conformances.inherited_conformances(conformance).to_vec();
                if let Some(&(_, found)) = direct.iter().find(|(p, _)| *p == protocol) {
                    return Some(found);
                }
                let parent = direct
                    .iter()
                    .find(|(p, _)| rcx.ast.protocol_inherits_from(*p, protocol))
                    .map(|&(_, c)| c)?;
                self.inherited_conformance(rcx, parent, protocol)
            }
        }
    }

    /// Re-express `conformance` for `subst_type`, an instance of the same
    /// type with `substitutions` applied.
    pub fn subst(
        &mut self,
        rcx: &mut ResolutionContext<'_>,
        conformance: ConformanceId,
        subst_type: Idx,
        substitutions: &SubstitutionMap,
    ) -> ConformanceId {
        if self.conformances.ty(conformance) == subst_type {
            return conformance;
        }
        match self.conformances.get(conformance) {
            ProtocolConformance::Normal(normal) => {
                let types = &rcx.ast.types;
                assert_eq!(
                    types.nominal_decl(normal.ty),
                    types.nominal_decl(subst_type),
                    "substitution mapped a conformance to a different type"
                );
                assert!(
                    types.has_generic_params(normal.ty),
                    "substitution changed a non-generic conformance"
                );
                let gathered = rcx.ast.substitutions_for(subst_type);
                self.conformances.specialized(subst_type, conformance, gathered)
            }
            ProtocolConformance::Inherited(inherited) => {
                let base = inherited.base;
                let base_ty = self.conformances.ty(base);
                let new_base = if rcx.ast.types.has_generic_params(base_ty) {
                    match self.superclass_matching(rcx, subst_type, base_ty) {
                        Some(superclass_ty) => self.subst(rcx, base, superclass_ty, substitutions),
                        None => base,
                    }
                } else {
                    base
                };
                self.conformances.inherited(subst_type, new_base)
            }
            ProtocolConformance::Specialized(specialized) => {
                let generic = specialized.generic;
                let inner = specialized.substitutions.clone();
                let composed = inner
                    .iter()
                    .map(|(param, ty)| (param, rcx.ast.types.subst(ty, substitutions)))
                    .collect::<Vec<_>>();
                self.conformances.specialized(
                    subst_type,
                    generic,
                    SubstitutionMap::from_pairs(composed),
                )
            }
        }
    }

    /// Walk `ty`'s superclass chain to the instance of `target`'s class.
    fn superclass_matching(&mut self, rcx: &mut ResolutionContext<'_>, ty: Idx, target: Idx) -> Option<Idx> {
        let class = rcx.ast.types.nominal_decl(target)?;
        let mut current = rcx.ast.superclass_of_type(ty)?;
        let mut visited = FxHashSet::default();
        while rcx.ast.types.nominal_decl(current) != Some(class) {
            if !visited.insert(current) {
                return None;
            }
            current = rcx.ast.superclass_of_type(current)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests;
