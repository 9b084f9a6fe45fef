//! Conformance objects and their arena.
//!
//! Three shapes share one handle type:
//!
//! - [`NormalConformance`]: the root, declared by a type or extension. Owns
//!   the witness tables and moves through [`ConformanceState`].
//! - [`SpecializedConformance`]: a generic conformance with its parameters
//!   bound. Type witnesses are derived on demand and cached.
//! - [`InheritedConformance`]: a subclass reusing its superclass's
//!   conformance.
//!
//! Every chain of specialized/inherited wrappers bottoms out in a normal
//! conformance ([`ConformanceArena::root_normal`]). The arena uniques
//! wrappers, so asking twice for the same specialization yields the same id.

use std::fmt;

use ori_ir::SourceLoc;
use ori_types::{AssocTypeId, DeclContext, Idx, LoaderToken, ProtoId, SubstitutionMap, ValueDeclId};
use rustc_hash::{FxHashMap, FxHashSet};

/// Handle to a [`ProtocolConformance`] in a [`ConformanceArena`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ConformanceId(u32);

impl ConformanceId {
    pub const fn from_raw(raw: u32) -> Self {
        ConformanceId(raw)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ConformanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConformanceId({})", self.0)
    }
}

/// Checking progress of a normal conformance.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ConformanceState {
    Incomplete,
    CheckingTypeWitnesses,
    Checking,
    Complete,
}

/// A conformance that may be known only abstractly.
///
/// Generic parameters conform abstractly: the requirement is known to hold
/// but there is no conformance object to inspect.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConformanceRef {
    Abstract(ProtoId),
    Concrete(ConformanceId),
}

/// The type chosen for an associated type, plus how it meets the associated
/// type's own requirements.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TypeWitness {
    pub replacement: Idx,
    /// One per protocol the associated type is required to conform to, in
    /// declaration order.
    pub conformances: Vec<ConformanceRef>,
    /// The member (type alias, nested type) that provided the witness.
    pub type_decl: Option<ValueDeclId>,
}

impl TypeWitness {
    pub fn new(replacement: Idx) -> Self {
        TypeWitness {
            replacement,
            conformances: Vec::new(),
            type_decl: None,
        }
    }

    #[must_use]
    pub fn with_conformances(mut self, conformances: Vec<ConformanceRef>) -> Self {
        self.conformances = conformances;
        self
    }

    #[must_use]
    pub fn with_type_decl(mut self, decl: ValueDeclId) -> Self {
        self.type_decl = Some(decl);
        self
    }
}

/// A declaration satisfying a value requirement, with the substitutions
/// needed to use it from the conforming type.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Witness {
    pub decl: ValueDeclId,
    pub substitutions: SubstitutionMap,
}

impl Witness {
    pub fn new(decl: ValueDeclId) -> Self {
        Witness {
            decl,
            substitutions: SubstitutionMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NormalConformance {
    pub ty: Idx,
    pub protocol: ProtoId,
    pub dc: DeclContext,
    pub loc: SourceLoc,
    state: ConformanceState,
    invalid: bool,
    type_witnesses: FxHashMap<AssocTypeId, TypeWitness>,
    /// `None` records a requirement known to have no witness (an optional
    /// requirement left unimplemented).
    witnesses: FxHashMap<ValueDeclId, Option<Witness>>,
    /// Conformances to directly inherited protocols, in insertion order.
    inherited: Vec<(ProtoId, ConformanceId)>,
    default_definitions: FxHashSet<AssocTypeId>,
    loader: Option<LoaderToken>,
}

impl NormalConformance {
    pub fn state(&self) -> ConformanceState {
        self.state
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn has_lazy_loader(&self) -> bool {
        self.loader.is_some()
    }

    pub(crate) fn type_witness(&self, assoc: AssocTypeId) -> Option<&TypeWitness> {
        self.type_witnesses.get(&assoc)
    }

    pub(crate) fn witness(&self, requirement: ValueDeclId) -> Option<&Option<Witness>> {
        self.witnesses.get(&requirement)
    }

    pub(crate) fn inherited(&self) -> &[(ProtoId, ConformanceId)] {
        &self.inherited
    }
}

#[derive(Clone, Debug)]
pub struct SpecializedConformance {
    pub ty: Idx,
    pub generic: ConformanceId,
    pub substitutions: SubstitutionMap,
    type_witnesses: FxHashMap<AssocTypeId, TypeWitness>,
}

impl SpecializedConformance {
    pub(crate) fn cached_type_witness(&self, assoc: AssocTypeId) -> Option<&TypeWitness> {
        self.type_witnesses.get(&assoc)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct InheritedConformance {
    pub ty: Idx,
    /// Never itself an inherited conformance.
    pub base: ConformanceId,
}

#[derive(Clone, Debug)]
pub enum ProtocolConformance {
    Normal(NormalConformance),
    Specialized(SpecializedConformance),
    Inherited(InheritedConformance),
}

impl ProtocolConformance {
    pub fn ty(&self) -> Idx {
        match self {
            ProtocolConformance::Normal(n) => n.ty,
            ProtocolConformance::Specialized(s) => s.ty,
            ProtocolConformance::Inherited(i) => i.ty,
        }
    }

    pub fn is_inherited(&self) -> bool {
        matches!(self, ProtocolConformance::Inherited(_))
    }
}

/// Owner of every conformance object in a compilation.
#[derive(Clone, Debug, Default)]
pub struct ConformanceArena {
    items: Vec<ProtocolConformance>,
    normals: FxHashMap<(Idx, ProtoId, DeclContext), ConformanceId>,
    specialized: FxHashMap<(Idx, ConformanceId), ConformanceId>,
    inherited: FxHashMap<(Idx, ConformanceId), ConformanceId>,
}

impl ConformanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, conformance: ProtocolConformance) -> ConformanceId {
        let raw = match u32::try_from(self.items.len()) {
            Ok(raw) => raw,
            Err(_) => panic!("conformance arena overflow"),
        };
        self.items.push(conformance);
        ConformanceId(raw)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // === Construction ===

    /// The normal conformance of `ty` to `protocol` declared in `dc`,
    /// created in the `Incomplete` state on first request.
    pub fn normal(&mut self, ty: Idx, protocol: ProtoId, dc: DeclContext, loc: SourceLoc) -> ConformanceId {
        if let Some(&id) = self.normals.get(&(ty, protocol, dc)) {
            return id;
        }
        let id = self.push(ProtocolConformance::Normal(NormalConformance {
            ty,
            protocol,
            dc,
            loc,
            state: ConformanceState::Incomplete,
            invalid: false,
            type_witnesses: FxHashMap::default(),
            witnesses: FxHashMap::default(),
            inherited: Vec::new(),
            default_definitions: FxHashSet::default(),
            loader: None,
        }));
        self.normals.insert((ty, protocol, dc), id);
        id
    }

    /// `generic` with its parameters bound as in `ty`.
    pub fn specialized(&mut self, ty: Idx, generic: ConformanceId, substitutions: SubstitutionMap) -> ConformanceId {
        assert!(
            !matches!(self.get(generic), ProtocolConformance::Specialized(_)),
            "cannot specialize an already specialized conformance"
        );
        if let Some(&id) = self.specialized.get(&(ty, generic)) {
            return id;
        }
        let id = self.push(ProtocolConformance::Specialized(SpecializedConformance {
            ty,
            generic,
            substitutions,
            type_witnesses: FxHashMap::default(),
        }));
        self.specialized.insert((ty, generic), id);
        id
    }

    /// `ty` (a subclass) reusing `base`. Nested inheritance collapses onto
    /// the innermost base.
    pub fn inherited(&mut self, ty: Idx, base: ConformanceId) -> ConformanceId {
        let mut base = base;
        while let ProtocolConformance::Inherited(inner) = self.get(base) {
            base = inner.base;
        }
        if self.ty(base) == ty {
            return base;
        }
        if let Some(&id) = self.inherited.get(&(ty, base)) {
            return id;
        }
        let id = self.push(ProtocolConformance::Inherited(InheritedConformance { ty, base }));
        self.inherited.insert((ty, base), id);
        id
    }

    // === Queries ===

    #[inline]
    pub fn get(&self, id: ConformanceId) -> &ProtocolConformance {
        &self.items[id.index()]
    }

    pub fn ty(&self, id: ConformanceId) -> Idx {
        self.get(id).ty()
    }

    /// The normal conformance at the bottom of `id`'s wrapper chain.
    pub fn root_normal(&self, mut id: ConformanceId) -> ConformanceId {
        loop {
            match self.get(id) {
                ProtocolConformance::Normal(_) => return id,
                ProtocolConformance::Specialized(s) => id = s.generic,
                ProtocolConformance::Inherited(i) => id = i.base,
            }
        }
    }

    pub fn normal_conformance(&self, id: ConformanceId) -> &NormalConformance {
        match self.get(self.root_normal(id)) {
            ProtocolConformance::Normal(normal) => normal,
            _ => unreachable!("root_normal returned a wrapper"),
        }
    }

    fn root_normal_mut(&mut self, id: ConformanceId) -> &mut NormalConformance {
        let root = self.root_normal(id);
        match &mut self.items[root.index()] {
            ProtocolConformance::Normal(normal) => normal,
            _ => unreachable!("root_normal returned a wrapper"),
        }
    }

    fn normal_mut(&mut self, id: ConformanceId) -> &mut NormalConformance {
        match &mut self.items[id.index()] {
            ProtocolConformance::Normal(normal) => normal,
            other => panic!("expected a normal conformance, found {other:?}"),
        }
    }

    pub fn protocol(&self, id: ConformanceId) -> ProtoId {
        self.normal_conformance(id).protocol
    }

    /// The context that declared the underlying conformance.
    pub fn decl_context(&self, id: ConformanceId) -> DeclContext {
        self.normal_conformance(id).dc
    }

    pub fn loc(&self, id: ConformanceId) -> SourceLoc {
        self.normal_conformance(id).loc
    }

    pub fn state(&self, id: ConformanceId) -> ConformanceState {
        self.normal_conformance(id).state
    }

    pub fn is_complete(&self, id: ConformanceId) -> bool {
        self.state(id) == ConformanceState::Complete
    }

    pub fn is_invalid(&self, id: ConformanceId) -> bool {
        self.normal_conformance(id).invalid
    }

    /// Directly inherited conformances recorded on the root.
    pub fn inherited_conformances(&self, id: ConformanceId) -> &[(ProtoId, ConformanceId)] {
        self.normal_conformance(id).inherited()
    }

    // === Mutation (normal conformances only) ===

    pub fn set_state(&mut self, id: ConformanceId, state: ConformanceState) {
        self.normal_mut(id).state = state;
    }

    pub fn set_invalid(&mut self, id: ConformanceId) {
        self.normal_mut(id).invalid = true;
    }

    /// Record the witness for `assoc`. Each associated type is set once,
    /// and never after the conformance is complete (unless invalid).
    pub fn set_type_witness(&mut self, id: ConformanceId, assoc: AssocTypeId, witness: TypeWitness) {
        let normal = self.normal_mut(id);
        assert!(
            !normal.type_witnesses.contains_key(&assoc),
            "type witness for {assoc:?} already recorded"
        );
        assert!(
            normal.state != ConformanceState::Complete || normal.invalid,
            "conformance already complete"
        );
        normal.type_witnesses.insert(assoc, witness);
    }

    /// Record the witness for a value requirement (`None`: no witness).
    pub fn set_witness(&mut self, id: ConformanceId, requirement: ValueDeclId, witness: Option<Witness>) {
        let normal = self.normal_mut(id);
        assert!(
            !normal.witnesses.contains_key(&requirement),
            "witness for {requirement:?} already recorded"
        );
        assert!(
            normal.state != ConformanceState::Complete || normal.invalid,
            "conformance already complete"
        );
        normal.witnesses.insert(requirement, witness);
    }

    pub fn set_inherited_conformance(&mut self, id: ConformanceId, protocol: ProtoId, conformance: ConformanceId) {
        let normal = self.normal_mut(id);
        if let Some(slot) = normal.inherited.iter_mut().find(|(p, _)| *p == protocol) {
            slot.1 = conformance;
        } else {
            normal.inherited.push((protocol, conformance));
        }
    }

    /// Note that `assoc` took the protocol's default definition.
    pub fn add_default_definition(&mut self, id: ConformanceId, assoc: AssocTypeId) {
        self.normal_mut(id).default_definitions.insert(assoc);
    }

    pub fn uses_default_definition(&self, id: ConformanceId, assoc: AssocTypeId) -> bool {
        self.normal_conformance(id).default_definitions.contains(&assoc)
    }

    /// Defer witness population to a loader. The conformance is considered
    /// complete from the outside.
    pub fn set_lazy_loader(&mut self, id: ConformanceId, token: LoaderToken) {
        let normal = self.normal_mut(id);
        normal.loader = Some(token);
        normal.state = ConformanceState::Complete;
    }

    pub(crate) fn take_lazy_loader(&mut self, id: ConformanceId) -> Option<LoaderToken> {
        self.root_normal_mut(id).loader.take()
    }

    pub(crate) fn cache_specialized_witness(&mut self, id: ConformanceId, assoc: AssocTypeId, witness: TypeWitness) {
        if let ProtocolConformance::Specialized(s) = &mut self.items[id.index()] {
            s.type_witnesses.insert(assoc, witness);
        }
    }
}
