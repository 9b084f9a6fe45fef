//! `TypeInfo` and `TypeInfoStore`: the type-size oracle.
//!
//! Every type gets a [`TypeInfo`] describing what layout decisions need:
//! whether its size is known statically, size and alignment, POD-ness,
//! spare bits, and the extra inhabitants an enclosing enum may claim.
//! [`TypeInfoStore`] computes these lazily and caches them per `Idx`.
//!
//! Layout classes are a flat [`TypeInfoKind`] tag plus a [`TypeShape`]
//! that says how values are manipulated.
//!
//! # Cycles
//!
//! An enum that contains itself without an `indirect` case has no finite
//! size. The store notices the re-entry, reports it once, and hands out a
//! non-fixed placeholder so layout still terminates.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::rc::Rc;

use ori_diagnostic::{DiagnosticContext, DiagnosticKind, DiagnosticSink};
use ori_ir::SourceLoc;
use ori_types::{AstContext, DeclFlags, DeclId, Idx, NominalKind, TypeData};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::strategy::EnumImplStrategy;
use crate::{ExtraInhabitants, SpareBitVector, TargetConfig};

// ---------------------------------------------------------------------------
// TypeInfo
// ---------------------------------------------------------------------------

/// How much is statically known about a type's layout.
///
/// Ordered: the kind of a composite is the minimum of its parts.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeInfoKind {
    /// Size depends on generic arguments or on another module.
    NonFixed,
    /// Fixed size, but only manipulable in memory.
    Fixed,
    /// Fixed size and representable as an explosion of integers.
    Loadable,
}

/// A stored field of an aggregate.
#[derive(Clone, Debug)]
pub struct FieldInfo {
    /// Byte offset within the aggregate.
    pub offset: u64,
    pub info: Rc<TypeInfo>,
}

#[derive(Clone, Debug)]
pub enum TypeShape {
    /// Plain bits: integers, bools, raw pointers.
    Scalar,
    /// A retainable native reference.
    Reference,
    /// Tuples and structs.
    Aggregate(Vec<FieldInfo>),
    Enum(Rc<EnumImplStrategy>),
    /// Layout unknown; manipulated through value witnesses.
    Opaque,
}

#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub ty: Idx,
    pub kind: TypeInfoKind,
    pub shape: TypeShape,
    /// Size in bytes, excluding tail padding. Zero when not fixed.
    pub size: u64,
    pub alignment: u64,
    pub pod: bool,
    pub bitwise_takable: bool,
    /// `size * 8` bits wide.
    pub spare_bits: SpareBitVector,
    pub extra_inhabitants: Option<ExtraInhabitants>,
}

impl TypeInfo {
    pub(crate) fn scalar(ty: Idx, size: u64, spare_bits: SpareBitVector, extra: Option<ExtraInhabitants>) -> Self {
        TypeInfo {
            ty,
            kind: TypeInfoKind::Loadable,
            shape: TypeShape::Scalar,
            size,
            alignment: size.max(1),
            pod: true,
            bitwise_takable: true,
            spare_bits,
            extra_inhabitants: extra,
        }
    }

    pub(crate) fn reference(ty: Idx, target: &TargetConfig) -> Self {
        let align_bits = target.heap_alignment_bits();
        TypeInfo {
            ty,
            kind: TypeInfoKind::Loadable,
            shape: TypeShape::Reference,
            size: target.pointer_size,
            alignment: target.pointer_size,
            pod: false,
            bitwise_takable: true,
            spare_bits: target.object_spare_bits(),
            extra_inhabitants: ExtraInhabitants::new(
                target.pointer_bits(),
                0,
                align_bits,
                target.least_valid_pointer >> align_bits,
            ),
        }
    }

    pub(crate) fn opaque(ty: Idx) -> Self {
        TypeInfo {
            ty,
            kind: TypeInfoKind::NonFixed,
            shape: TypeShape::Opaque,
            size: 0,
            alignment: 1,
            pod: false,
            bitwise_takable: false,
            spare_bits: SpareBitVector::clear(0),
            extra_inhabitants: None,
        }
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.kind >= TypeInfoKind::Fixed
    }

    #[inline]
    pub fn is_loadable(&self) -> bool {
        self.kind == TypeInfoKind::Loadable
    }

    /// Fixed and zero-sized: every value has the same (empty) bit pattern.
    pub fn is_known_empty(&self) -> bool {
        self.is_fixed() && self.size == 0
    }

    pub fn storage_bits(&self) -> u32 {
        u32::try_from(self.size * 8).unwrap_or_else(|_| panic!("type of {} bytes is too large", self.size))
    }

    pub fn extra_inhabitant_count(&self) -> u32 {
        self.extra_inhabitants.as_ref().map_or(0, ExtraInhabitants::count)
    }

    pub fn enum_strategy(&self) -> Option<&Rc<EnumImplStrategy>> {
        match &self.shape {
            TypeShape::Enum(strategy) => Some(strategy),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TypeInfoStore
// ---------------------------------------------------------------------------

/// Lazily computed, cached [`TypeInfo`] for every type of a module.
///
/// Layout needs to substitute generic arguments into payload and field
/// types, so the store holds the declaration model mutably for its whole
/// lifetime.
pub struct TypeInfoStore<'a> {
    ast: RefCell<&'a mut AstContext>,
    target: TargetConfig,
    entries: RefCell<FxHashMap<Idx, Rc<TypeInfo>>>,
    /// Types currently being computed (cycle detection).
    computing: RefCell<FxHashSet<Idx>>,
    /// Declarations already diagnosed as recursive.
    reported: RefCell<FxHashSet<DeclId>>,
    pending: RefCell<Vec<(DiagnosticKind, SourceLoc, DiagnosticContext)>>,
}

impl<'a> TypeInfoStore<'a> {
    pub fn new(ast: &'a mut AstContext, target: TargetConfig) -> Self {
        TypeInfoStore {
            ast: RefCell::new(ast),
            target,
            entries: RefCell::new(FxHashMap::default()),
            computing: RefCell::new(FxHashSet::default()),
            reported: RefCell::new(FxHashSet::default()),
            pending: RefCell::new(Vec::new()),
        }
    }

    #[inline]
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Run `f` against the declaration model.
    ///
    /// `f` must not call back into the store.
    pub fn with_ast<R>(&self, f: impl FnOnce(&mut AstContext) -> R) -> R {
        let mut ast = self.ast.borrow_mut();
        f(&mut ast)
    }

    /// Get the `TypeInfo` for a type, computing it on first request.
    pub fn get(&self, ty: Idx) -> Rc<TypeInfo> {
        if let Some(info) = self.entries.borrow().get(&ty) {
            return Rc::clone(info);
        }
        let info = Rc::new(self.compute(ty));
        // A cycle placeholder is never cached; the outer computation wins.
        if !self.computing.borrow().contains(&ty) {
            self.entries.borrow_mut().insert(ty, Rc::clone(&info));
        }
        info
    }

    /// The layout strategy of an enum type.
    pub fn enum_strategy(&self, ty: Idx) -> Option<Rc<EnumImplStrategy>> {
        self.get(ty).enum_strategy().cloned()
    }

    /// Hand every diagnostic recorded so far to `sink`.
    pub fn flush_diagnostics(&self, sink: &mut dyn DiagnosticSink) {
        for (kind, loc, context) in self.pending.borrow_mut().drain(..) {
            sink.record(kind, loc, context);
        }
    }

    pub(crate) fn diagnose(&self, kind: DiagnosticKind, loc: SourceLoc, context: DiagnosticContext) {
        debug!(?kind, ?loc, subject = %context.subject, "layout diagnostic");
        self.pending.borrow_mut().push((kind, loc, context));
    }

    #[tracing::instrument(level = "trace", skip_all, fields(ty = ?ty))]
    fn compute(&self, ty: Idx) -> TypeInfo {
        if !self.computing.borrow_mut().insert(ty) {
            return self.cycle_placeholder(ty);
        }
        let info = ori_types::ensure_sufficient_stack(|| self.compute_inner(ty));
        self.computing.borrow_mut().remove(&ty);
        info
    }

    fn cycle_placeholder(&self, ty: Idx) -> TypeInfo {
        let decl = self.with_ast(|ast| ast.types.nominal_decl(ty));
        match decl {
            Some(decl) => {
                let (is_enum, loc, name) = self.with_ast(|ast| {
                    let nominal = ast.nominal(decl);
                    (nominal.is_enum(), nominal.loc, ast.nominal_name(decl))
                });
                if is_enum && self.reported.borrow_mut().insert(decl) {
                    self.diagnose(
                        DiagnosticKind::RecursiveEnumWithoutIndirection,
                        loc,
                        DiagnosticContext::new(format!("'{name}'")),
                    );
                }
                warn!(ty = ?ty, name, "recursive type layout");
            }
            None => warn!(ty = ?ty, "recursive type layout"),
        }
        TypeInfo::opaque(ty)
    }

    fn compute_inner(&self, ty: Idx) -> TypeInfo {
        let data = self.with_ast(|ast| ast.types.get(ty).clone());
        match data {
            TypeData::Int(width) => {
                let bits = width.bits();
                TypeInfo::scalar(ty, u64::from(bits / 8), SpareBitVector::clear(bits), None)
            }
            TypeData::Bool => {
                let mut spare = SpareBitVector::clear(1);
                spare.append_set_bits(7);
                TypeInfo::scalar(ty, 1, spare, ExtraInhabitants::new(8, 2, 0, 254))
            }
            TypeData::NativeObject => TypeInfo::reference(ty, &self.target),
            TypeData::RawPointer => TypeInfo::scalar(
                ty,
                self.target.pointer_size,
                self.target.raw_pointer_spare_bits(),
                ExtraInhabitants::new(self.target.pointer_bits(), 0, 0, self.target.least_valid_pointer),
            ),
            TypeData::Error => TypeInfo::scalar(ty, 0, SpareBitVector::clear(0), None),
            TypeData::Tuple(elements) => {
                let fields = elements.iter().map(|&e| self.get(e)).collect();
                Self::aggregate(ty, fields)
            }
            TypeData::Nominal { decl, .. } => self.compute_nominal(ty, decl),
            TypeData::GenericParam(_) | TypeData::Protocol(_) | TypeData::Composition(_) => TypeInfo::opaque(ty),
        }
    }

    fn compute_nominal(&self, ty: Idx, decl: DeclId) -> TypeInfo {
        let (kind, flags) = self.with_ast(|ast| {
            let nominal = ast.nominal(decl);
            (nominal.kind.clone(), nominal.flags)
        });
        match kind {
            NominalKind::Class { .. } => TypeInfo::reference(ty, &self.target),
            NominalKind::Struct { .. } if flags.contains(DeclFlags::RESILIENT) => TypeInfo::opaque(ty),
            NominalKind::Struct { fields } => {
                let field_types: Vec<Idx> = self.with_ast(|ast| {
                    let subs = ast.substitutions_for(ty);
                    fields.iter().map(|f| ast.types.subst(f.ty, &subs)).collect()
                });
                let infos = field_types.into_iter().map(|f| self.get(f)).collect();
                Self::aggregate(ty, infos)
            }
            NominalKind::Enum { .. } => {
                let strategy = Rc::new(EnumImplStrategy::build(self, ty, decl));
                strategy.type_info()
            }
        }
    }

    /// Lay out fields in order at their natural alignment.
    fn aggregate(ty: Idx, fields: Vec<Rc<TypeInfo>>) -> TypeInfo {
        let kind = fields
            .iter()
            .map(|f| f.kind)
            .min()
            .unwrap_or(TypeInfoKind::Loadable);
        if kind == TypeInfoKind::NonFixed {
            return TypeInfo::opaque(ty);
        }

        let mut offset = 0u64;
        let mut alignment = 1u64;
        let mut placed = Vec::with_capacity(fields.len());
        for info in fields {
            offset = offset.div_ceil(info.alignment) * info.alignment;
            alignment = alignment.max(info.alignment);
            let field_offset = offset;
            offset += info.size;
            placed.push(FieldInfo {
                offset: field_offset,
                info,
            });
        }
        let size = offset;
        let bits = u32::try_from(size * 8).unwrap_or_else(|_| panic!("aggregate of {size} bytes is too large"));

        let mut spare_bits = SpareBitVector::all_set(bits);
        for field in &placed {
            spare_bits.overwrite((field.offset * 8) as u32, &field.info.spare_bits);
        }
        let extra_inhabitants = placed
            .iter()
            .filter_map(|f| Some((f.offset, f.info.extra_inhabitants.as_ref()?)))
            .min_by_key(|(_, ei)| Reverse(ei.count()))
            .map(|(offset, ei)| ei.at_offset((offset * 8) as u32, bits));

        TypeInfo {
            ty,
            kind,
            pod: placed.iter().all(|f| f.info.pod),
            bitwise_takable: placed.iter().all(|f| f.info.bitwise_takable),
            shape: TypeShape::Aggregate(placed),
            size,
            alignment,
            spare_bits,
            extra_inhabitants,
        }
    }
}
