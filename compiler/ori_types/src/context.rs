//! The compilation-wide declaration store.

use ori_ir::{FileId, Name, SharedInterner, SourceLoc};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::{
    ensure_sufficient_stack, AssocTypeDecl, AssocTypeId, DeclContext, DeclId, ExtId,
    ExtensionDecl, FileKind, FileUnit, GenericParamDecl, GenericParamId, Idx, KnownProtocol,
    NominalDecl, ProtoId, ProtocolDecl, SubstitutionMap, TypeData, TypePool, ValueDecl,
    ValueDeclId, ValueOwner,
};

/// Owns every declaration and type of one compilation.
///
/// Nothing is ever removed, so ids handed out stay valid until the context
/// is dropped.
pub struct AstContext {
    pub interner: SharedInterner,
    pub types: TypePool,
    files: Vec<FileUnit>,
    nominals: Vec<NominalDecl>,
    extensions: Vec<ExtensionDecl>,
    protocols: Vec<ProtocolDecl>,
    values: Vec<ValueDecl>,
    assoc_types: Vec<AssocTypeDecl>,
    generic_params: Vec<GenericParamDecl>,
    known_protocols: FxHashMap<KnownProtocol, ProtoId>,
}

impl AstContext {
    pub fn new() -> Self {
        Self::with_interner(SharedInterner::new())
    }

    pub fn with_interner(interner: SharedInterner) -> Self {
        AstContext {
            interner,
            types: TypePool::new(),
            files: Vec::new(),
            nominals: Vec::new(),
            extensions: Vec::new(),
            protocols: Vec::new(),
            values: Vec::new(),
            assoc_types: Vec::new(),
            generic_params: Vec::new(),
            known_protocols: FxHashMap::default(),
        }
    }

    pub fn intern(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    // === Registration ===

    /// Append a file unit; its position fixes cross-file declaration order.
    pub fn add_file(&mut self, name: &str, kind: FileKind) -> FileId {
        let index = match u32::try_from(self.files.len()) {
            Ok(index) => index,
            Err(_) => panic!("too many file units"),
        };
        let name = self.intern(name);
        self.files.push(FileUnit { name, kind });
        FileId::new(index)
    }

    pub fn add_nominal(&mut self, decl: NominalDecl) -> DeclId {
        let id = DeclId::from_len(self.nominals.len());
        self.nominals.push(decl);
        id
    }

    /// Register an extension and link it at the end of its type's
    /// extension list.
    pub fn add_extension(&mut self, ext: ExtensionDecl) -> ExtId {
        let id = ExtId::from_len(self.extensions.len());
        let extended = ext.extended;
        self.extensions.push(ext);
        self.nominals[extended.index()].extensions.push(id);
        id
    }

    pub fn add_protocol(&mut self, decl: ProtocolDecl) -> ProtoId {
        let id = ProtoId::from_len(self.protocols.len());
        if let Some(known) = decl.known {
            self.known_protocols.insert(known, id);
        }
        self.protocols.push(decl);
        id
    }

    /// Register a member and attach it to its owner.
    pub fn add_value(&mut self, decl: ValueDecl) -> ValueDeclId {
        let id = ValueDeclId::from_len(self.values.len());
        match decl.owner {
            ValueOwner::Context(DeclContext::Nominal(d)) => self.nominals[d.index()].members.push(id),
            ValueOwner::Context(DeclContext::Extension(e)) => {
                self.extensions[e.index()].members.push(id);
            }
            ValueOwner::Protocol(p) => self.protocols[p.index()].requirements.push(id),
        }
        self.values.push(decl);
        id
    }

    pub fn add_assoc_type(&mut self, decl: AssocTypeDecl) -> AssocTypeId {
        let id = AssocTypeId::from_len(self.assoc_types.len());
        self.protocols[decl.protocol.index()].assoc_types.push(id);
        self.assoc_types.push(decl);
        id
    }

    /// Register a generic parameter, returning its id and its type.
    pub fn add_generic_param(&mut self, decl: GenericParamDecl) -> (GenericParamId, Idx) {
        let id = GenericParamId::from_len(self.generic_params.len());
        self.generic_params.push(decl);
        (id, self.types.generic_param(id))
    }

    // === Accessors ===

    pub fn file(&self, id: FileId) -> &FileUnit {
        &self.files[id.index()]
    }

    pub fn nominal(&self, id: DeclId) -> &NominalDecl {
        &self.nominals[id.index()]
    }

    pub fn nominal_mut(&mut self, id: DeclId) -> &mut NominalDecl {
        &mut self.nominals[id.index()]
    }

    pub fn extension(&self, id: ExtId) -> &ExtensionDecl {
        &self.extensions[id.index()]
    }

    pub fn extension_mut(&mut self, id: ExtId) -> &mut ExtensionDecl {
        &mut self.extensions[id.index()]
    }

    pub fn protocol(&self, id: ProtoId) -> &ProtocolDecl {
        &self.protocols[id.index()]
    }

    pub fn protocol_mut(&mut self, id: ProtoId) -> &mut ProtocolDecl {
        &mut self.protocols[id.index()]
    }

    pub fn value(&self, id: ValueDeclId) -> &ValueDecl {
        &self.values[id.index()]
    }

    pub fn assoc_type(&self, id: AssocTypeId) -> &AssocTypeDecl {
        &self.assoc_types[id.index()]
    }

    pub fn generic_param(&self, id: GenericParamId) -> &GenericParamDecl {
        &self.generic_params[id.index()]
    }

    pub fn known_protocol(&self, known: KnownProtocol) -> Option<ProtoId> {
        self.known_protocols.get(&known).copied()
    }

    pub fn nominal_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.nominals.len()).map(DeclId::from_len)
    }

    // === Declaration contexts ===

    /// The nominal type a context belongs to.
    pub fn context_nominal(&self, dc: DeclContext) -> DeclId {
        match dc {
            DeclContext::Nominal(d) => d,
            DeclContext::Extension(e) => self.extension(e).extended,
        }
    }

    pub fn context_file(&self, dc: DeclContext) -> FileId {
        match dc {
            DeclContext::Nominal(d) => self.nominal(d).file,
            DeclContext::Extension(e) => self.extension(e).file,
        }
    }

    pub fn context_loc(&self, dc: DeclContext) -> SourceLoc {
        match dc {
            DeclContext::Nominal(d) => self.nominal(d).loc,
            DeclContext::Extension(e) => self.extension(e).loc,
        }
    }

    pub fn file_kind(&self, id: FileId) -> FileKind {
        self.file(id).kind
    }

    /// The type as seen from inside its own declaration: generic parameters
    /// stand for themselves.
    pub fn declared_type(&mut self, decl: DeclId) -> Idx {
        let params = self.nominal(decl).generic_params.clone();
        let args = params
            .into_iter()
            .map(|param| self.types.generic_param(param))
            .collect::<Vec<_>>();
        self.types.nominal(decl, args)
    }

    pub fn context_declared_type(&mut self, dc: DeclContext) -> Idx {
        let nominal = self.context_nominal(dc);
        self.declared_type(nominal)
    }

    /// Map `decl`'s generic parameters to the arguments of `ty`.
    ///
    /// Empty when `ty` is not a bound instance of `decl`.
    pub fn substitutions_for(&self, ty: Idx) -> SubstitutionMap {
        match self.types.get(ty) {
            TypeData::Nominal { decl, args } => SubstitutionMap::from_pairs(
                self.nominal(*decl)
                    .generic_params
                    .iter()
                    .copied()
                    .zip(args.iter().copied()),
            ),
            _ => SubstitutionMap::new(),
        }
    }

    // === Classes ===

    pub fn superclass_decl(&self, decl: DeclId) -> Option<DeclId> {
        let superclass = self.nominal(decl).superclass()?;
        self.types.nominal_decl(superclass.ty)
    }

    /// The superclass of a (possibly bound) class type, with the class's
    /// generic arguments substituted in.
    pub fn superclass_of_type(&mut self, ty: Idx) -> Option<Idx> {
        let decl = self.types.nominal_decl(ty)?;
        let superclass = self.nominal(decl).superclass()?;
        let subs = self.substitutions_for(ty);
        Some(self.types.subst(superclass.ty, &subs))
    }

    // === Protocols ===

    /// Call `f` for every protocol named by `ty`, flattening compositions.
    pub fn visit_protocols(&self, ty: Idx, f: &mut impl FnMut(ProtoId)) {
        ensure_sufficient_stack(|| match self.types.get(ty) {
            TypeData::Protocol(p) => f(*p),
            TypeData::Composition(members) => {
                for &member in members {
                    self.visit_protocols(member, f);
                }
            }
            _ => {}
        });
    }

    /// Protocols named directly in `proto`'s inheritance clause.
    pub fn direct_inherited_protocols(&self, proto: ProtoId) -> SmallVec<[ProtoId; 4]> {
        let mut result = SmallVec::new();
        for entry in &self.protocol(proto).inherited {
            self.visit_protocols(entry.ty, &mut |p| {
                if !result.contains(&p) {
                    result.push(p);
                }
            });
        }
        result
    }

    /// Every protocol `proto` inherits from, transitively, excluding
    /// `proto` itself unless inheritance is circular. Breadth-first order.
    pub fn all_inherited_protocols(&self, proto: ProtoId) -> Vec<ProtoId> {
        let mut seen = FxHashSet::default();
        let mut result = Vec::new();
        let mut cursor = 0;
        let mut frontier: Vec<ProtoId> = self.direct_inherited_protocols(proto).to_vec();
        while cursor < frontier.len() {
            let next = frontier[cursor];
            cursor += 1;
            if !seen.insert(next) {
                continue;
            }
            result.push(next);
            frontier.extend(self.direct_inherited_protocols(next));
        }
        result
    }

    /// Whether `proto` inherits (transitively) from `base`.
    pub fn protocol_inherits_from(&self, proto: ProtoId, base: ProtoId) -> bool {
        self.all_inherited_protocols(proto).contains(&base)
    }

    // === Display ===

    /// Render a type for diagnostics and dumps.
    pub fn display_type(&self, ty: Idx) -> String {
        if let Some(name) = ty.name() {
            return name.to_string();
        }
        ensure_sufficient_stack(|| match self.types.get(ty) {
            TypeData::Nominal { decl, args } => {
                let name = self.interner.lookup(self.nominal(*decl).name);
                if args.is_empty() {
                    name.to_string()
                } else {
                    let args: Vec<String> = args.iter().map(|&a| self.display_type(a)).collect();
                    format!("{name}<{}>", args.join(", "))
                }
            }
            TypeData::GenericParam(p) => self.interner.lookup(self.generic_param(*p).name).to_string(),
            TypeData::Tuple(elems) => {
                let elems: Vec<String> = elems.iter().map(|&e| self.display_type(e)).collect();
                format!("({})", elems.join(", "))
            }
            TypeData::Protocol(p) => self.interner.lookup(self.protocol(*p).name).to_string(),
            TypeData::Composition(members) => {
                let members: Vec<String> = members.iter().map(|&m| self.display_type(m)).collect();
                members.join(" & ")
            }
            TypeData::Int(w) => format!("Int{}", w.bits()),
            TypeData::Bool => "Bool".to_string(),
            TypeData::NativeObject => "NativeObject".to_string(),
            TypeData::RawPointer => "RawPointer".to_string(),
            TypeData::Error => "<error>".to_string(),
        })
    }

    pub fn protocol_name(&self, proto: ProtoId) -> &'static str {
        self.interner.lookup(self.protocol(proto).name)
    }

    pub fn nominal_name(&self, decl: DeclId) -> &'static str {
        self.interner.lookup(self.nominal(decl).name)
    }
}

impl Default for AstContext {
    fn default() -> Self {
        Self::new()
    }
}
