//! Interned type storage.
//!
//! Every structurally distinct type is stored once; `Idx` equality is type
//! equality. Substitution rebuilds only the parts of a type that actually
//! change, so substituting a type that mentions no generic parameters
//! returns its original `Idx`.

use rustc_hash::FxHashMap;

use crate::{ensure_sufficient_stack, DeclId, GenericParamId, Idx, ProtoId, SubstitutionMap};

/// Bit width of a builtin integer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub const fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

/// Structural description of a type.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeData {
    Int(IntWidth),
    Bool,
    NativeObject,
    RawPointer,
    Error,
    /// A struct, enum or class, with its generic arguments (if any).
    Nominal { decl: DeclId, args: Vec<Idx> },
    GenericParam(GenericParamId),
    Tuple(Vec<Idx>),
    Protocol(ProtoId),
    /// `P & Q`; appears only in inheritance clauses.
    Composition(Vec<Idx>),
}

/// The interned type pool.
#[derive(Clone, Debug)]
pub struct TypePool {
    items: Vec<TypeData>,
    map: FxHashMap<TypeData, Idx>,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = TypePool {
            items: Vec::with_capacity(64),
            map: FxHashMap::default(),
        };
        // Order must match the `Idx` primitive constants.
        let primitives = [
            TypeData::Int(IntWidth::W8),
            TypeData::Int(IntWidth::W16),
            TypeData::Int(IntWidth::W32),
            TypeData::Int(IntWidth::W64),
            TypeData::Bool,
            TypeData::Tuple(Vec::new()),
            TypeData::NativeObject,
            TypeData::RawPointer,
            TypeData::Error,
        ];
        for data in primitives {
            pool.intern(data);
        }
        debug_assert_eq!(pool.items.len(), Idx::PRIMITIVE_COUNT as usize);
        pool
    }

    /// Intern `data`, returning the existing index if it was seen before.
    pub fn intern(&mut self, data: TypeData) -> Idx {
        if let Some(&idx) = self.map.get(&data) {
            return idx;
        }
        let raw = match u32::try_from(self.items.len()) {
            Ok(raw) if raw != u32::MAX => raw,
            _ => panic!("type pool overflow"),
        };
        let idx = Idx::from_raw(raw);
        self.items.push(data.clone());
        self.map.insert(data, idx);
        idx
    }

    #[inline]
    pub fn get(&self, idx: Idx) -> &TypeData {
        &self.items[idx.raw() as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn nominal(&mut self, decl: DeclId, args: Vec<Idx>) -> Idx {
        self.intern(TypeData::Nominal { decl, args })
    }

    pub fn tuple(&mut self, elements: Vec<Idx>) -> Idx {
        self.intern(TypeData::Tuple(elements))
    }

    pub fn protocol(&mut self, proto: ProtoId) -> Idx {
        self.intern(TypeData::Protocol(proto))
    }

    pub fn composition(&mut self, members: Vec<Idx>) -> Idx {
        self.intern(TypeData::Composition(members))
    }

    pub fn generic_param(&mut self, param: GenericParamId) -> Idx {
        self.intern(TypeData::GenericParam(param))
    }

    /// The nominal declaration behind `ty`, if it is a nominal type.
    pub fn nominal_decl(&self, ty: Idx) -> Option<DeclId> {
        match self.get(ty) {
            TypeData::Nominal { decl, .. } => Some(*decl),
            _ => None,
        }
    }

    /// Whether `ty` mentions any generic parameter.
    pub fn has_generic_params(&self, ty: Idx) -> bool {
        ensure_sufficient_stack(|| match self.get(ty) {
            TypeData::GenericParam(_) => true,
            TypeData::Nominal { args: elems, .. }
            | TypeData::Tuple(elems)
            | TypeData::Composition(elems) => elems.iter().any(|&e| self.has_generic_params(e)),
            TypeData::Int(_)
            | TypeData::Bool
            | TypeData::NativeObject
            | TypeData::RawPointer
            | TypeData::Error
            | TypeData::Protocol(_) => false,
        })
    }

    /// Replace generic parameters in `ty` according to `subs`.
    ///
    /// Parameters without a replacement are left in place.
    pub fn subst(&mut self, ty: Idx, subs: &SubstitutionMap) -> Idx {
        if subs.is_empty() {
            return ty;
        }
        ensure_sufficient_stack(|| match self.get(ty).clone() {
            TypeData::GenericParam(param) => subs.lookup(param).unwrap_or(ty),
            TypeData::Nominal { decl, args } => match self.subst_list(&args, subs) {
                Some(args) => self.nominal(decl, args),
                None => ty,
            },
            TypeData::Tuple(elems) => match self.subst_list(&elems, subs) {
                Some(elems) => self.tuple(elems),
                None => ty,
            },
            TypeData::Composition(elems) => match self.subst_list(&elems, subs) {
                Some(elems) => self.composition(elems),
                None => ty,
            },
            TypeData::Int(_)
            | TypeData::Bool
            | TypeData::NativeObject
            | TypeData::RawPointer
            | TypeData::Error
            | TypeData::Protocol(_) => ty,
        })
    }

    /// Substitute each element; `None` when nothing changed.
    fn subst_list(&mut self, elems: &[Idx], subs: &SubstitutionMap) -> Option<Vec<Idx>> {
        let substituted: Vec<Idx> = elems.iter().map(|&e| self.subst(e, subs)).collect();
        if substituted.as_slice() == elems {
            None
        } else {
            Some(substituted)
        }
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}
