use ori_ir::SourceLoc;
use ori_types::{
    AssocTypeDecl, AssocTypeId, AstContext, DeclContext, DeclId, FileKind, GenericParamDecl, GenericParamId, Idx,
    LoaderToken, NominalDecl, NominalKind, ProtoId, SubstitutionMap, Superclass, ValueDecl, ValueDeclId,
    ValueOwner,
};
use pretty_assertions::assert_eq;

use crate::test_support::Fixture;
use crate::{
    ConformanceArena, ConformanceId, ConformanceRef, ConformanceState, LazyMemberLoader, LazyResolver,
    ProtocolConformance, ResolutionContext, TypeWitness, Witness,
};

fn assoc_type(fx: &mut Fixture, protocol: ProtoId, name: &str, conforms_to: Vec<ProtoId>) -> AssocTypeId {
    let name = fx.ast.intern(name);
    fx.ast.add_assoc_type(AssocTypeDecl {
        name,
        protocol,
        conforms_to,
    })
}

fn value(fx: &mut Fixture, name: &str, owner: ValueOwner) -> ValueDeclId {
    let name = fx.ast.intern(name);
    fx.ast.add_value(ValueDecl {
        name,
        loc: SourceLoc::INVALID,
        owner,
    })
}

fn generic_param(fx: &mut Fixture, name: &str) -> (GenericParamId, Idx) {
    let name = fx.ast.intern(name);
    fx.ast.add_generic_param(GenericParamDecl {
        name,
        conforms_to: Vec::new(),
    })
}

/// Records preset witnesses when asked.
#[derive(Default)]
struct PresetResolver {
    type_witnesses: Vec<(AssocTypeId, Idx)>,
    witnesses: Vec<(ValueDeclId, Witness)>,
}

impl LazyResolver for PresetResolver {
    fn resolve_type_witness(
        &mut self,
        _ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        conformance: ConformanceId,
        assoc: AssocTypeId,
    ) {
        if let Some(&(_, ty)) = self.type_witnesses.iter().find(|(a, _)| *a == assoc) {
            conformances.set_type_witness(conformance, assoc, TypeWitness::new(ty));
        }
    }

    fn resolve_witness(
        &mut self,
        _ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        conformance: ConformanceId,
        requirement: ValueDeclId,
    ) {
        if let Some((_, witness)) = self.witnesses.iter().find(|(r, _)| *r == requirement) {
            conformances.set_witness(conformance, requirement, Some(witness.clone()));
        }
    }
}

/// Serves one conformance to `protocol` and fills in its witness later.
struct SerializedModule {
    protocol: ProtoId,
    assoc: AssocTypeId,
    finish_calls: usize,
    state_during_finish: Option<ConformanceState>,
}

impl LazyMemberLoader for SerializedModule {
    fn load_all_conformances(
        &mut self,
        ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        dc: DeclContext,
        _token: LoaderToken,
    ) -> Vec<ConformanceId> {
        let ty = ast.context_declared_type(dc);
        let loc = ast.context_loc(dc);
        let conformance = conformances.normal(ty, self.protocol, dc, loc);
        conformances.set_lazy_loader(conformance, LoaderToken(7));
        vec![conformance]
    }

    fn finish_normal_conformance(
        &mut self,
        _ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        conformance: ConformanceId,
        token: LoaderToken,
    ) {
        assert_eq!(token, LoaderToken(7));
        self.finish_calls += 1;
        self.state_during_finish = Some(conformances.state(conformance));
        conformances.set_type_witness(conformance, self.assoc, TypeWitness::new(Idx::INT64));
    }
}

fn serialized_struct(fx: &mut Fixture, name: &str) -> DeclId {
    let file = fx.ast.add_file("Lib.orimodule", FileKind::Serialized);
    let name = fx.ast.intern(name);
    let decl = NominalDecl::new_struct(name, file).with_conformance_loader(LoaderToken(1));
    fx.ast.add_nominal(decl)
}

#[test]
fn test_lazy_conformance_is_finished_once() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let assoc = assoc_type(&mut fx, p, "Element", Vec::new());
    let s = serialized_struct(&mut fx, "S");
    let mut module = SerializedModule {
        protocol: p,
        assoc,
        finish_calls: 0,
        state_during_finish: None,
    };

    let mut rcx = ResolutionContext::new(&mut fx.ast, &mut fx.queue).with_loader(&mut module);
    let Some(conformance) = fx.tables.lookup_nominal_conformance(&mut rcx, s, p) else {
        panic!("the loader provides S: P");
    };
    assert!(fx.tables.conformances().normal_conformance(conformance).has_lazy_loader());
    let first = fx.tables.type_witness(&mut rcx, conformance, assoc);
    let second = fx.tables.type_witness(&mut rcx, conformance, assoc);
    drop(rcx);

    assert_eq!(first.map(|w| w.replacement), Some(Idx::INT64));
    assert_eq!(second.map(|w| w.replacement), Some(Idx::INT64));
    assert_eq!(module.finish_calls, 1);
    assert_eq!(module.state_during_finish, Some(ConformanceState::Incomplete));
    let arena = fx.tables.conformances();
    assert!(arena.is_complete(conformance));
    assert!(!arena.normal_conformance(conformance).has_lazy_loader());
}

#[test]
#[should_panic(expected = "no loader was supplied")]
fn test_loader_token_without_loader_panics() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let s = serialized_struct(&mut fx, "S");
    fx.lookup(s, p);
}

#[test]
fn test_type_witness_needs_a_resolver() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let assoc = assoc_type(&mut fx, p, "Element", Vec::new());
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };

    let without = fx.run(|tables, rcx| {
        (
            tables.has_type_witness(rcx, conformance, assoc),
            tables.type_witness(rcx, conformance, assoc),
        )
    });
    assert_eq!(without, (false, None));

    let mut resolver = PresetResolver {
        type_witnesses: vec![(assoc, Idx::INT16)],
        ..PresetResolver::default()
    };
    let mut with = None;
    fx.run_with(&mut resolver, |tables, rcx| {
        with = Some(tables.has_type_witness(rcx, conformance, assoc));
    });
    assert_eq!(with, Some(true));
    let recorded = fx.run(|tables, rcx| tables.type_witness(rcx, conformance, assoc));
    assert_eq!(recorded, Some(TypeWitness::new(Idx::INT16)));
}

#[test]
fn test_specialized_type_witness_is_substituted_and_cached() {
    let mut fx = Fixture::new();
    let q = fx.protocol("Q", &[]);
    let p = fx.protocol("P", &[]);
    let element = assoc_type(&mut fx, p, "Element", vec![q]);
    let index = assoc_type(&mut fx, p, "Index", Vec::new());
    let (param, t) = generic_param(&mut fx, "T");
    let boxed = fx.struct_decl("Box", 10, &[(p, 16)]);
    fx.ast.nominal_mut(boxed).generic_params.push(param);
    let item = fx.struct_decl("Item", 40, &[(q, 46)]);
    let item_ty = fx.ty(item);
    let bound = fx.ast.types.nominal(boxed, vec![item_ty]);

    let mut resolver = PresetResolver {
        type_witnesses: vec![(element, t), (index, Idx::INT64)],
        ..PresetResolver::default()
    };
    let mut results = None;
    fx.run_with(&mut resolver, |tables, rcx| {
        let Some(ConformanceRef::Concrete(specialized)) = tables.lookup_conformance(rcx, bound, p) else {
            panic!("Box<Item>: P");
        };
        let item_q = tables.lookup_nominal_conformance(rcx, item, q);
        let element_witness = tables.type_witness(rcx, specialized, element);
        let index_witness = tables.type_witness(rcx, specialized, index);
        results = Some((specialized, item_q, element_witness, index_witness));
    });
    let Some((specialized, Some(item_q), Some(element_witness), Some(index_witness))) = results else {
        panic!("all witnesses resolve");
    };

    assert_eq!(element_witness.replacement, item_ty);
    assert_eq!(element_witness.conformances, vec![ConformanceRef::Concrete(item_q)]);
    assert_eq!(index_witness, TypeWitness::new(Idx::INT64));

    let ProtocolConformance::Specialized(s) = fx.tables.conformances().get(specialized) else {
        panic!("expected a specialized conformance");
    };
    assert_eq!(s.cached_type_witness(element), Some(&element_witness));
    // Cached answers need no resolver.
    let again = fx.run(|tables, rcx| tables.type_witness(rcx, specialized, element));
    assert_eq!(again, Some(element_witness));
}

#[test]
fn test_value_witness_substitutions_follow_specialization() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let requirement = value(&mut fx, "make", ValueOwner::Protocol(p));
    let (param, t) = generic_param(&mut fx, "T");
    let boxed = fx.struct_decl("Box", 10, &[(p, 16)]);
    fx.ast.nominal_mut(boxed).generic_params.push(param);
    let member = value(&mut fx, "make", ValueOwner::Context(DeclContext::Nominal(boxed)));
    let bound = fx.ast.types.nominal(boxed, vec![Idx::BOOL]);

    let mut resolver = PresetResolver {
        witnesses: vec![(
            requirement,
            Witness {
                decl: member,
                substitutions: SubstitutionMap::from_pairs([(param, t)]),
            },
        )],
        ..PresetResolver::default()
    };
    let mut found = None;
    fx.run_with(&mut resolver, |tables, rcx| {
        if let Some(ConformanceRef::Concrete(specialized)) = tables.lookup_conformance(rcx, bound, p) {
            found = tables.witness(rcx, specialized, requirement);
        }
    });
    let Some(witness) = found else {
        panic!("Box<Bool> has a witness for make");
    };
    assert_eq!(witness.decl, member);
    assert_eq!(witness.substitutions.lookup(param), Some(Idx::BOOL));
}

#[test]
#[should_panic(expected = "has no witness")]
fn test_complete_conformance_without_witness_panics() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let requirement = value(&mut fx, "run", ValueOwner::Protocol(p));
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };
    fx.tables.conformances_mut().set_state(conformance, ConformanceState::Complete);
    fx.run(|tables, rcx| tables.witness(rcx, conformance, requirement));
}

#[test]
fn test_missing_witness_is_tolerated_when_incomplete_or_invalid() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let requirement = value(&mut fx, "run", ValueOwner::Protocol(p));
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };

    let incomplete = fx.run(|tables, rcx| tables.witness(rcx, conformance, requirement));
    assert_eq!(incomplete, None);

    let arena = fx.tables.conformances_mut();
    arena.set_state(conformance, ConformanceState::Complete);
    arena.set_invalid(conformance);
    let invalid = fx.run(|tables, rcx| tables.witness(rcx, conformance, requirement));
    assert_eq!(invalid, None);
}

#[test]
fn test_for_each_type_witness_stops_early() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let first = assoc_type(&mut fx, p, "First", Vec::new());
    let second = assoc_type(&mut fx, p, "Second", Vec::new());
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };

    let mut unresolved = Vec::new();
    let stopped = fx.run(|tables, rcx| {
        tables.for_each_type_witness(rcx, conformance, |assoc, _| {
            unresolved.push(assoc);
            false
        })
    });
    assert!(!stopped);
    assert!(unresolved.is_empty());

    let mut resolver = PresetResolver {
        type_witnesses: vec![(first, Idx::INT8), (second, Idx::INT16)],
        ..PresetResolver::default()
    };
    let mut visited = Vec::new();
    let mut stopped = false;
    fx.run_with(&mut resolver, |tables, rcx| {
        stopped = tables.for_each_type_witness(rcx, conformance, |assoc, witness| {
            visited.push((assoc, witness.replacement));
            true
        });
    });
    assert!(stopped);
    assert_eq!(visited, vec![(first, Idx::INT8)]);
}

#[test]
fn test_for_each_value_witness_reports_recorded_entries() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let optional = value(&mut fx, "optional", ValueOwner::Protocol(p));
    let unknown = value(&mut fx, "unknown", ValueOwner::Protocol(p));
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };
    fx.tables.conformances_mut().set_witness(conformance, optional, None);

    let mut seen = Vec::new();
    fx.run(|tables, rcx| {
        tables.for_each_value_witness(rcx, conformance, |requirement, witness| {
            seen.push((requirement, witness.cloned()));
        });
    });
    assert_eq!(seen, vec![(optional, None)]);
    assert!(!seen.iter().any(|(r, _)| *r == unknown));
}

#[test]
fn test_uses_default_definition() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let defaulted = assoc_type(&mut fx, p, "Defaulted", Vec::new());
    let explicit = assoc_type(&mut fx, p, "Explicit", Vec::new());
    let s = fx.struct_decl("S", 10, &[(p, 14)]);
    let Some(conformance) = fx.lookup(s, p) else {
        panic!("S: P");
    };
    fx.tables.conformances_mut().add_default_definition(conformance, defaulted);

    let answers = fx.run(|tables, rcx| {
        (
            tables.uses_default_definition(rcx, conformance, defaulted),
            tables.uses_default_definition(rcx, conformance, explicit),
        )
    });
    assert_eq!(answers, (true, false));
}

#[test]
fn test_inherited_conformance_walks_parent_protocols() {
    let mut fx = Fixture::new();
    let base = fx.protocol("Base", &[]);
    let mid = fx.protocol("Mid", &[base]);
    let top = fx.protocol("Top", &[mid]);
    let unrelated = fx.protocol("Unrelated", &[]);
    let class = fx.class_decl("C", 10, None, &[(top, 14)]);
    let subclass = fx.class_decl("D", 30, Some(class), &[]);

    let (Some(c_top), Some(c_mid), Some(c_base)) =
        (fx.lookup(class, top), fx.lookup(class, mid), fx.lookup(class, base))
    else {
        panic!("C conforms to the whole hierarchy");
    };
    let arena = fx.tables.conformances_mut();
    arena.set_inherited_conformance(c_top, mid, c_mid);
    arena.set_inherited_conformance(c_mid, base, c_base);

    let Some(d_top) = fx.lookup(subclass, top) else {
        panic!("D inherits Top");
    };
    let d_ty = fx.ty(subclass);
    let (direct, through_subclass, missing) = fx.run(|tables, rcx| {
        (
            tables.inherited_conformance(rcx, c_top, base),
            tables.inherited_conformance(rcx, d_top, mid),
            tables.inherited_conformance(rcx, c_top, unrelated),
        )
    });
    assert_eq!(direct, Some(c_base));
    assert_eq!(missing, None);

    let Some(through_subclass) = through_subclass else {
        panic!("D: Mid through C");
    };
    let ProtocolConformance::Inherited(wrapper) = fx.tables.conformances().get(through_subclass) else {
        panic!("expected an inherited conformance");
    };
    assert_eq!(wrapper.ty, d_ty);
    assert_eq!(wrapper.base, c_mid);
}

#[test]
fn test_subst_specializes_and_composes() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let (t_param, _) = generic_param(&mut fx, "T");
    let (u_param, u) = generic_param(&mut fx, "U");
    let boxed = fx.struct_decl("Box", 10, &[(p, 16)]);
    fx.ast.nominal_mut(boxed).generic_params.push(t_param);
    let declared = fx.ty(boxed);
    let over_u = fx.ast.types.nominal(boxed, vec![u]);
    let over_int = fx.ast.types.nominal(boxed, vec![Idx::INT32]);

    let (normal, same, via_u, composed, direct) = fx.run(|tables, rcx| {
        let Some(normal) = tables.lookup_nominal_conformance(rcx, boxed, p) else {
            panic!("Box: P");
        };
        let same = tables.subst(rcx, normal, declared, &SubstitutionMap::new());
        let via_u = tables.subst(rcx, normal, over_u, &SubstitutionMap::from_pairs([(t_param, u)]));
        let composed = tables.subst(rcx, via_u, over_int, &SubstitutionMap::from_pairs([(u_param, Idx::INT32)]));
        let direct = tables.lookup_conformance(rcx, over_int, p);
        (normal, same, via_u, composed, direct)
    });

    assert_eq!(same, normal);
    assert_ne!(via_u, normal);
    assert_eq!(direct, Some(ConformanceRef::Concrete(composed)));
    let ProtocolConformance::Specialized(s) = fx.tables.conformances().get(composed) else {
        panic!("expected a specialized conformance");
    };
    assert_eq!(s.generic, normal);
    assert_eq!(s.substitutions.lookup(t_param), Some(Idx::INT32));
}

#[test]
fn test_subst_inherited_follows_superclass_chain() {
    let mut fx = Fixture::new();
    let p = fx.protocol("P", &[]);
    let (t_param, _) = generic_param(&mut fx, "T");
    let (u_param, u) = generic_param(&mut fx, "U");
    let base = fx.class_decl("Base", 10, None, &[(p, 16)]);
    fx.ast.nominal_mut(base).generic_params.push(t_param);
    let derived = fx.class_decl("Derived", 30, None, &[]);
    let base_over_u = fx.ast.types.nominal(base, vec![u]);
    let loc = fx.loc(31);
    let derived_decl = fx.ast.nominal_mut(derived);
    derived_decl.generic_params.push(u_param);
    derived_decl.kind = NominalKind::Class {
        superclass: Some(Superclass { ty: base_over_u, loc }),
        fields: Vec::new(),
    };
    let derived_over_int = fx.ast.types.nominal(derived, vec![Idx::INT32]);
    let base_over_int = fx.ast.types.nominal(base, vec![Idx::INT32]);

    let substituted = fx.run(|tables, rcx| {
        let inherited = tables.lookup_nominal_conformance(rcx, derived, p)?;
        let subs = SubstitutionMap::from_pairs([(u_param, Idx::INT32)]);
        Some(tables.subst(rcx, inherited, derived_over_int, &subs))
    });
    let Some(substituted) = substituted else {
        panic!("Derived inherits P");
    };

    let arena = fx.tables.conformances();
    let ProtocolConformance::Inherited(wrapper) = arena.get(substituted) else {
        panic!("expected an inherited conformance");
    };
    assert_eq!(wrapper.ty, derived_over_int);
    assert_eq!(arena.ty(wrapper.base), base_over_int);
    let ProtocolConformance::Specialized(s) = arena.get(wrapper.base) else {
        panic!("expected a specialized base");
    };
    assert_eq!(s.substitutions.lookup(t_param), Some(Idx::INT32));
}
