//! Enum layout strategies.
//!
//! Each concrete enum type (each generic instantiation separately) gets
//! exactly one [`EnumImplStrategy`], chosen once from its cases:
//!
//! 1. Cases without data, and cases whose data is a known-empty type, are
//!    *empty* cases; the rest are *payload* cases.
//! 2. Resilient enums are opaque: every operation is a runtime call.
//! 3. C-compatible enums use explicit raw values as their representation.
//! 4. At most one case: `Singleton`, the payload's own representation.
//! 5. Several payload cases: `MultiPayload`, tag in the common spare bits.
//! 6. One payload case: `SinglePayload`, empty cases in the payload's extra
//!    inhabitants, then in an extra tag.
//! 7. No payload cases: `NoPayload`, a minimal discriminator.
//!
//! # Storage
//!
//! A fixed enum is `P` payload bits (a whole number of bytes) followed by
//! `ceil(T / 8)` extra-tag bytes holding a `T`-bit tag. Loaded, it explodes
//! to `[payload, tag]`, dropping whichever has no bits.
//!
//! # Case tags
//!
//! [`emit_get_tag`](EnumImplStrategy::emit_get_tag) numbers payload case
//! `i` (among payload cases, in declaration order) as `i - payload_count`
//! and empty case `j` as `j`. Payload cases are negative, so adding payload
//! cases never renumbers empty ones.

mod multi_payload;
mod no_payload;
mod resilient;
mod single_payload;
mod singleton;

use std::fmt;
use std::rc::Rc;

use ori_diagnostic::{DiagnosticContext, DiagnosticKind};
use ori_ir::{Name, SourceLoc};
use ori_types::{DeclFlags, DeclId, EnumCase, Idx};
use smallvec::SmallVec;
use tracing::debug;

use crate::builder::IrBuilder;
use crate::ir::{Callee, EmitBlockId, EmitVarId, ValueWitness};
use crate::{BitPattern, Explosion, ExtraInhabitants, SpareBitVector, TypeInfo, TypeInfoKind, TypeInfoStore, TypeShape};

use multi_payload::MultiPayloadStrategy;
use no_payload::{CCompatibleStrategy, NoPayloadStrategy};
use single_payload::SinglePayloadStrategy;
use singleton::SingletonStrategy;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum EnumStrategyKind {
    Singleton,
    NoPayload,
    CCompatible,
    SinglePayload,
    MultiPayload,
    Resilient,
}

impl fmt::Display for EnumStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnumStrategyKind::Singleton => "singleton",
            EnumStrategyKind::NoPayload => "no-payload",
            EnumStrategyKind::CCompatible => "C-compatible",
            EnumStrategyKind::SinglePayload => "single-payload",
            EnumStrategyKind::MultiPayload => "multi-payload",
            EnumStrategyKind::Resilient => "resilient",
        };
        f.write_str(name)
    }
}

/// Fast paths for value-semantics operations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum CopyDestroyKind {
    /// Bitwise copy, no-op destroy.
    Pod,
    /// Single payload that is one reference, one empty case stored as null:
    /// retain and release the value directly.
    NullableRefcounted,
    /// Every payload is one reference and at most one empty case exists:
    /// mask the tag bits off, then retain or release.
    TaggedRefcounted,
    /// Dispatch on the case; moves are bitwise.
    BitwiseTakable,
    /// Dispatch on the case.
    Normal,
}

/// Switch destinations looked up by slot instead of by case.
struct SlotDests {
    payload: Vec<Option<EmitBlockId>>,
    empty: Vec<Option<EmitBlockId>>,
}

/// Where a case sits within its group.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CaseSlot {
    /// The `n`th payload case.
    Payload(usize),
    /// The `n`th empty case.
    Empty(usize),
}

#[derive(Clone, Debug)]
pub struct EnumElement {
    pub name: Name,
    pub loc: SourceLoc,
    /// `None` for empty cases, including folded known-empty payloads.
    pub payload: Option<Rc<TypeInfo>>,
    pub slot: CaseSlot,
}

/// Layout facts shared by every fixed strategy.
#[derive(Clone, Debug)]
pub(crate) struct FixedLayout {
    pub(crate) size: u64,
    pub(crate) alignment: u64,
    /// Width of the payload area, a multiple of 8.
    pub(crate) payload_bits: u32,
    pub(crate) extra_tag_bits: u32,
    pub(crate) spare_bits: SpareBitVector,
    pub(crate) pod: bool,
    pub(crate) bitwise_takable: bool,
    pub(crate) extra_inhabitants: Option<ExtraInhabitants>,
}

impl FixedLayout {
    fn tag_offset(&self) -> u64 {
        u64::from(self.payload_bits / 8)
    }

    fn tag_storage_bits(&self) -> u32 {
        self.extra_tag_bits.div_ceil(8) * 8
    }

    fn storage_bits(&self) -> u32 {
        self.payload_bits + self.tag_storage_bits()
    }
}

#[derive(Debug)]
enum StrategyImpl {
    Singleton(SingletonStrategy),
    NoPayload(NoPayloadStrategy),
    CCompatible(CCompatibleStrategy),
    SinglePayload(SinglePayloadStrategy),
    MultiPayload(MultiPayloadStrategy),
    /// Resilient enums, and payload enums whose payload has no fixed size.
    Runtime,
}

/// Number of bits needed to represent `value`.
pub(crate) fn bits_for(value: u64) -> u32 {
    64 - value.leading_zeros()
}

/// The chosen layout of one enum type, with its value operations.
#[derive(Debug)]
pub struct EnumImplStrategy {
    ty: Idx,
    name: &'static str,
    kind: EnumStrategyKind,
    type_info_kind: TypeInfoKind,
    elements: Vec<EnumElement>,
    payload_cases: Vec<usize>,
    empty_cases: Vec<usize>,
    fixed: Option<FixedLayout>,
    imp: StrategyImpl,
}

struct EnumSource {
    name: &'static str,
    flags: DeclFlags,
    raw_type: Option<Idx>,
    cases: Vec<EnumCase>,
    /// Substituted payload type, and whether the declared one is generic.
    payloads: Vec<Option<(Idx, bool)>>,
}

impl EnumImplStrategy {
    /// Classify the cases of `ty` and choose its strategy.
    #[tracing::instrument(level = "debug", skip_all, fields(ty = ?ty))]
    pub(crate) fn build(store: &TypeInfoStore<'_>, ty: Idx, decl: DeclId) -> Self {
        let source = store.with_ast(|ast| {
            let nominal = ast.nominal(decl);
            let flags = nominal.flags;
            let raw_type = nominal.raw_type();
            let cases = nominal.enum_cases().to_vec();
            let name = ast.nominal_name(decl);
            let subs = ast.substitutions_for(ty);
            let payloads = cases
                .iter()
                .map(|case| {
                    case.payload
                        .map(|p| (ast.types.subst(p, &subs), ast.types.has_generic_params(p)))
                })
                .collect();
            EnumSource {
                name,
                flags,
                raw_type,
                cases,
                payloads,
            }
        });

        let resilient = source.flags.contains(DeclFlags::RESILIENT);
        let c_compatible = !resilient && source.flags.contains(DeclFlags::C_COMPATIBLE);
        let all_indirect = source.flags.contains(DeclFlags::INDIRECT);

        let mut elements = Vec::with_capacity(source.cases.len());
        let mut payload_cases = Vec::new();
        let mut empty_cases = Vec::new();
        for (index, (case, payload)) in source.cases.iter().zip(&source.payloads).enumerate() {
            let payload = match *payload {
                None => None,
                Some(_) if c_compatible => {
                    let case_name = store.with_ast(|ast| ast.interner.lookup(case.name));
                    store.diagnose(
                        DiagnosticKind::PayloadInCCompatibleEnum,
                        case.loc,
                        DiagnosticContext::new(format!("'{}.{case_name}'", source.name)),
                    );
                    None
                }
                Some((payload_ty, generic)) => {
                    let info = if case.indirect || all_indirect {
                        store.get(Idx::NATIVE_OBJECT)
                    } else {
                        store.get(payload_ty)
                    };
                    if !resilient && !generic && info.is_known_empty() {
                        None
                    } else {
                        Some(info)
                    }
                }
            };
            let slot = if payload.is_some() {
                payload_cases.push(index);
                CaseSlot::Payload(payload_cases.len() - 1)
            } else {
                empty_cases.push(index);
                CaseSlot::Empty(empty_cases.len() - 1)
            };
            elements.push(EnumElement {
                name: case.name,
                loc: case.loc,
                payload,
                slot,
            });
        }

        let kind = if resilient {
            EnumStrategyKind::Resilient
        } else if c_compatible {
            EnumStrategyKind::CCompatible
        } else if elements.len() <= 1 {
            EnumStrategyKind::Singleton
        } else if payload_cases.len() > 1 {
            EnumStrategyKind::MultiPayload
        } else if payload_cases.len() == 1 {
            EnumStrategyKind::SinglePayload
        } else {
            EnumStrategyKind::NoPayload
        };
        let type_info_kind = if resilient {
            TypeInfoKind::NonFixed
        } else {
            elements
                .iter()
                .filter_map(|e| e.payload.as_ref())
                .map(|p| p.kind)
                .min()
                .unwrap_or(TypeInfoKind::Loadable)
        };

        let (imp, fixed) = match kind {
            EnumStrategyKind::Resilient => (StrategyImpl::Runtime, None),
            EnumStrategyKind::Singleton => {
                let (strategy, layout) = SingletonStrategy::new(&elements);
                (StrategyImpl::Singleton(strategy), layout)
            }
            _ if type_info_kind == TypeInfoKind::NonFixed => (StrategyImpl::Runtime, None),
            EnumStrategyKind::NoPayload => {
                let (strategy, layout) = NoPayloadStrategy::new(empty_cases.len());
                (StrategyImpl::NoPayload(strategy), Some(layout))
            }
            EnumStrategyKind::CCompatible => {
                let (strategy, layout) = CCompatibleStrategy::new(store, source.name, source.raw_type, &source.cases);
                (StrategyImpl::CCompatible(strategy), Some(layout))
            }
            EnumStrategyKind::SinglePayload => {
                let case = payload_cases[0];
                let Some(payload) = elements[case].payload.clone() else {
                    unreachable!("payload case without payload");
                };
                let (strategy, layout) = SinglePayloadStrategy::new(payload, empty_cases.len());
                (StrategyImpl::SinglePayload(strategy), Some(layout))
            }
            EnumStrategyKind::MultiPayload => {
                let payloads = payload_cases
                    .iter()
                    .filter_map(|&c| elements[c].payload.clone())
                    .collect();
                let (strategy, layout) = MultiPayloadStrategy::new(payloads, empty_cases.len());
                (StrategyImpl::MultiPayload(strategy), Some(layout))
            }
        };

        debug!(
            name = source.name,
            strategy = %kind,
            kind = ?type_info_kind,
            size = fixed.as_ref().map(|f| f.size),
            payload_cases = payload_cases.len(),
            empty_cases = empty_cases.len(),
            "selected enum strategy"
        );

        EnumImplStrategy {
            ty,
            name: source.name,
            kind,
            type_info_kind,
            elements,
            payload_cases,
            empty_cases,
            fixed,
            imp,
        }
    }

    /// The `TypeInfo` of the enum this strategy lays out.
    pub(crate) fn type_info(self: &Rc<Self>) -> TypeInfo {
        match &self.fixed {
            Some(layout) => TypeInfo {
                ty: self.ty,
                kind: self.type_info_kind,
                shape: TypeShape::Enum(Rc::clone(self)),
                size: layout.size,
                alignment: layout.alignment,
                pod: layout.pod,
                bitwise_takable: layout.bitwise_takable,
                spare_bits: layout.spare_bits.clone(),
                extra_inhabitants: layout.extra_inhabitants.clone(),
            },
            None => TypeInfo {
                shape: TypeShape::Enum(Rc::clone(self)),
                ..TypeInfo::opaque(self.ty)
            },
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    #[inline]
    pub fn kind(&self) -> EnumStrategyKind {
        self.kind
    }

    #[inline]
    pub fn type_info_kind(&self) -> TypeInfoKind {
        self.type_info_kind
    }

    pub fn ty(&self) -> Idx {
        self.ty
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Every case, in declaration order.
    pub fn elements(&self) -> &[EnumElement] {
        &self.elements
    }

    pub fn element(&self, case: usize) -> &EnumElement {
        &self.elements[case]
    }

    /// Case indices of the payload cases, in declaration order.
    pub fn payload_elements(&self) -> &[usize] {
        &self.payload_cases
    }

    /// Case indices of the empty cases, in declaration order.
    pub fn empty_elements(&self) -> &[usize] {
        &self.empty_cases
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    pub fn fixed_size(&self) -> Option<u64> {
        self.fixed.as_ref().map(|f| f.size)
    }

    pub fn fixed_alignment(&self) -> Option<u64> {
        self.fixed.as_ref().map(|f| f.alignment)
    }

    /// Spare bits of the whole storage; empty when not fixed.
    pub fn spare_bits(&self) -> SpareBitVector {
        self.fixed
            .as_ref()
            .map_or_else(|| SpareBitVector::clear(0), |f| f.spare_bits.clone())
    }

    pub fn payload_bit_count(&self) -> u32 {
        self.fixed.as_ref().map_or(0, |f| f.payload_bits)
    }

    pub fn extra_tag_bit_count(&self) -> u32 {
        self.fixed.as_ref().map_or(0, |f| f.extra_tag_bits)
    }

    /// Distinct extra-tag values the layout uses, zero without a tag.
    pub fn num_extra_tag_values(&self) -> u32 {
        match &self.imp {
            StrategyImpl::SinglePayload(s) => s.extra_tag_values(),
            StrategyImpl::MultiPayload(m) => m.extra_tag_values(),
            _ => 0,
        }
    }

    /// Empty cases encoded as extra inhabitants of the payload.
    pub fn num_extra_inhabitant_tag_values(&self) -> u32 {
        match &self.imp {
            StrategyImpl::SinglePayload(s) => s.used_extra_inhabitants(),
            _ => 0,
        }
    }

    pub fn copy_destroy_kind(&self) -> Option<CopyDestroyKind> {
        match &self.imp {
            StrategyImpl::SinglePayload(s) => Some(s.copy_destroy_kind()),
            StrategyImpl::MultiPayload(m) => Some(m.copy_destroy_kind()),
            _ => None,
        }
    }

    /// The raw value of a case of a C-compatible enum.
    pub fn raw_value(&self, case: usize) -> Option<i64> {
        match &self.imp {
            StrategyImpl::CCompatible(c) => Some(c.raw_value(case)),
            _ => None,
        }
    }

    /// The integer type a C-compatible enum is stored as.
    pub fn raw_type(&self) -> Option<Idx> {
        match &self.imp {
            StrategyImpl::CCompatible(c) => Some(c.raw_type()),
            _ => None,
        }
    }

    /// The spare bits a multi-payload enum stores its payload tag in.
    pub fn payload_tag_bits(&self) -> Option<&SpareBitVector> {
        match &self.imp {
            StrategyImpl::MultiPayload(m) => Some(m.payload_tag_bits()),
            _ => None,
        }
    }

    /// The case tag of `case`: payload cases negative, empty cases from 0.
    pub fn tag_index(&self, case: usize) -> i32 {
        let index = match self.elements[case].slot {
            CaseSlot::Payload(i) => i as i64 - self.payload_cases.len() as i64,
            CaseSlot::Empty(j) => j as i64,
        };
        i32::try_from(index).unwrap_or_else(|_| panic!("case tag {index} does not fit in i32"))
    }

    /// Storage bit pattern of an empty case.
    pub fn bit_pattern_for_no_payload_element(&self, case: usize) -> BitPattern {
        let layout = self.layout();
        let (payload, tag) = self.no_payload_parts(case);
        payload.concat(&tag.zext(layout.tag_storage_bits()))
    }

    /// Storage bits that distinguish the empty cases from each other and
    /// from payload values.
    pub fn bit_mask_for_no_payload_elements(&self) -> BitPattern {
        let layout = self.layout();
        let width = layout.storage_bits();
        match &self.imp {
            StrategyImpl::SinglePayload(s) => s.no_payload_mask(layout),
            _ => BitPattern::ones(width),
        }
    }

    /// Storage bits that carry the tag of a payload case.
    pub fn tag_bits_for_payloads(&self) -> BitPattern {
        let layout = self.layout();
        let tag = BitPattern::ones(layout.tag_storage_bits());
        match &self.imp {
            StrategyImpl::SinglePayload(_) => BitPattern::zero(layout.payload_bits).concat(&tag),
            StrategyImpl::MultiPayload(m) => m.payload_tag_bits().as_pattern().concat(&tag),
            _ => BitPattern::zero(layout.storage_bits()),
        }
    }

    // ── Extra inhabitants ───────────────────────────────────────────

    pub fn may_have_extra_inhabitants(&self) -> bool {
        match (&self.fixed, &self.imp) {
            (Some(layout), _) => layout.extra_inhabitants.is_some(),
            (None, StrategyImpl::Singleton(s)) => s.payload().is_some(),
            (None, _) => self.kind != EnumStrategyKind::MultiPayload,
        }
    }

    /// Extra inhabitants this enum offers an enclosing enum; zero when not
    /// statically known.
    pub fn fixed_extra_inhabitant_count(&self) -> u32 {
        self.fixed
            .as_ref()
            .and_then(|f| f.extra_inhabitants.as_ref())
            .map_or(0, ExtraInhabitants::count)
    }

    pub fn fixed_extra_inhabitant_value(&self, index: u32) -> BitPattern {
        self.extra_inhabitants().value(index)
    }

    pub fn fixed_extra_inhabitant_mask(&self) -> BitPattern {
        self.extra_inhabitants().mask().as_pattern().clone()
    }

    fn extra_inhabitants(&self) -> &ExtraInhabitants {
        match self.layout().extra_inhabitants.as_ref() {
            Some(ei) => ei,
            None => panic!("{} enum '{}' has no extra inhabitants", self.kind, self.name),
        }
    }

    /// `i32` index of the extra inhabitant stored at `addr`, or `-1`.
    pub fn emit_get_extra_inhabitant_index(&self, b: &mut IrBuilder, addr: EmitVarId) -> EmitVarId {
        match (&self.fixed, &self.imp) {
            (Some(layout), _) => match &layout.extra_inhabitants {
                Some(ei) => {
                    let value = b.load(addr, 0, layout.storage_bits());
                    ei.emit_index(b, value)
                }
                None => b.const_i32(-1),
            },
            (None, StrategyImpl::Singleton(s)) => match s.payload() {
                Some(payload) => payload.get_extra_inhabitant_index(b, addr),
                None => b.const_i32(-1),
            },
            (None, _) => b.call_i32(self.witness_callee(ValueWitness::GetExtraInhabitantIndex), vec![addr]),
        }
    }

    /// Store extra inhabitant `index` (an `i32`) at `addr`.
    pub fn emit_store_extra_inhabitant(&self, b: &mut IrBuilder, index: EmitVarId, addr: EmitVarId) {
        match (&self.fixed, &self.imp) {
            (Some(_), _) => self.extra_inhabitants().emit_store(b, index, addr, 0),
            (None, StrategyImpl::Singleton(s)) => match s.payload() {
                Some(payload) => payload.store_extra_inhabitant(b, index, addr),
                None => panic!("empty singleton enum '{}' has no extra inhabitants", self.name),
            },
            (None, _) => {
                b.call(
                    self.witness_callee(ValueWitness::StoreExtraInhabitant),
                    vec![index, addr],
                    None,
                );
            }
        }
    }

    // ── Explosions ──────────────────────────────────────────────────

    fn layout(&self) -> &FixedLayout {
        match &self.fixed {
            Some(layout) => layout,
            None => self.no_loadable_representation(),
        }
    }

    fn no_loadable_representation(&self) -> ! {
        if self.kind == EnumStrategyKind::Resilient {
            panic!("resilient enum '{}' has no loadable representation", self.name)
        }
        panic!("non-fixed {} enum '{}' has no loadable representation", self.kind, self.name)
    }

    pub fn explosion_widths(&self) -> SmallVec<[u32; 2]> {
        let layout = self.layout();
        [layout.payload_bits, layout.extra_tag_bits]
            .into_iter()
            .filter(|&w| w > 0)
            .collect()
    }

    /// `(payload, extra tag)` of an exploded value.
    fn split(&self, value: &Explosion) -> (Option<EmitVarId>, Option<EmitVarId>) {
        let layout = self.layout();
        let values = value.values();
        assert_eq!(
            values.len(),
            self.explosion_widths().len(),
            "explosion of enum '{}' has the wrong number of values",
            self.name
        );
        let payload = (layout.payload_bits > 0).then(|| values[0]);
        let tag = (layout.extra_tag_bits > 0).then(|| values[values.len() - 1]);
        (payload, tag)
    }

    fn join(payload: Option<EmitVarId>, tag: Option<EmitVarId>) -> Explosion {
        Explosion::from_values(payload.into_iter().chain(tag))
    }

    pub fn load(&self, b: &mut IrBuilder, addr: EmitVarId, offset: u64) -> Explosion {
        let layout = self.layout();
        let payload = (layout.payload_bits > 0).then(|| b.load(addr, offset, layout.payload_bits));
        let tag = (layout.extra_tag_bits > 0)
            .then(|| b.load(addr, offset + layout.tag_offset(), layout.extra_tag_bits));
        Self::join(payload, tag)
    }

    pub fn store(&self, b: &mut IrBuilder, value: &Explosion, addr: EmitVarId, offset: u64) {
        let layout = self.layout();
        let (payload, tag) = self.split(value);
        if let Some(payload) = payload {
            b.store(payload, addr, offset);
        }
        if let Some(tag) = tag {
            b.store(tag, addr, offset + layout.tag_offset());
        }
    }

    /// Merge into one integer of the storage width; `None` when zero-sized.
    pub fn pack(&self, b: &mut IrBuilder, value: &Explosion) -> Option<EmitVarId> {
        let layout = self.layout();
        let width = layout.storage_bits();
        match self.split(value) {
            (None, None) => None,
            (Some(payload), None) => Some(payload),
            (payload, Some(tag)) => {
                let tag = b.zext(tag, width);
                let tag = b.shl_const(tag, layout.payload_bits);
                Some(match payload {
                    Some(payload) => {
                        let payload = b.zext(payload, width);
                        b.or(payload, tag)
                    }
                    None => tag,
                })
            }
        }
    }

    pub fn unpack(&self, b: &mut IrBuilder, packed: Option<EmitVarId>) -> Explosion {
        let layout = self.layout();
        let Some(packed) = packed else {
            assert!(
                self.explosion_widths().is_empty(),
                "missing packed value for enum '{}'",
                self.name
            );
            return Explosion::new();
        };
        let payload = (layout.payload_bits > 0).then(|| b.zext_or_trunc(packed, layout.payload_bits));
        let tag = (layout.extra_tag_bits > 0).then(|| {
            let shifted = b.lshr_const(packed, layout.payload_bits);
            b.trunc(shifted, layout.extra_tag_bits)
        });
        Self::join(payload, tag)
    }

    /// `(payload, extra tag)` bit patterns of an empty case.
    fn no_payload_parts(&self, case: usize) -> (BitPattern, BitPattern) {
        let CaseSlot::Empty(slot) = self.elements[case].slot else {
            panic!("case {case} of '{}' carries a payload", self.name);
        };
        let layout = self.layout();
        match &self.imp {
            StrategyImpl::Singleton(_) => (BitPattern::zero(layout.payload_bits), BitPattern::zero(0)),
            StrategyImpl::NoPayload(n) => n.no_payload_parts(layout.payload_bits, slot),
            StrategyImpl::CCompatible(c) => c.no_payload_parts(slot),
            StrategyImpl::SinglePayload(s) => s.no_payload_parts(layout, slot),
            StrategyImpl::MultiPayload(m) => m.no_payload_parts(layout, slot),
            StrategyImpl::Runtime => self.no_loadable_representation(),
        }
    }

    fn default_block(b: &mut IrBuilder, default: Option<EmitBlockId>) -> EmitBlockId {
        default.unwrap_or_else(|| b.unreachable_block())
    }

    fn dest_for(dests: &[(usize, EmitBlockId)], case: usize) -> Option<EmitBlockId> {
        dests.iter().find(|&&(c, _)| c == case).map(|&(_, block)| block)
    }

    /// Destinations indexed by payload slot and by empty slot. The first
    /// entry for a case wins.
    fn slot_dests(&self, dests: &[(usize, EmitBlockId)]) -> SlotDests {
        let mut slots = SlotDests {
            payload: vec![None; self.payload_cases.len()],
            empty: vec![None; self.empty_cases.len()],
        };
        for &(case, block) in dests {
            let slot = match self.elements[case].slot {
                CaseSlot::Payload(slot) => &mut slots.payload[slot],
                CaseSlot::Empty(slot) => &mut slots.empty[slot],
            };
            slot.get_or_insert(block);
        }
        slots
    }

    // ── Tags ────────────────────────────────────────────────────────

    /// Emit the case tag of the value stored at `addr` as an `i32`.
    pub fn emit_get_tag(&self, b: &mut IrBuilder, addr: EmitVarId) -> EmitVarId {
        match &self.imp {
            StrategyImpl::Runtime => self.runtime_get_tag(b, addr),
            StrategyImpl::Singleton(s) => s.get_tag(b),
            _ => {
                let value = self.load(b, addr, 0);
                self.emit_value_get_tag(b, &value)
            }
        }
    }

    /// Emit the case tag of an exploded value as an `i32`.
    pub fn emit_value_get_tag(&self, b: &mut IrBuilder, value: &Explosion) -> EmitVarId {
        let (payload, tag) = self.split(value);
        match &self.imp {
            StrategyImpl::Singleton(s) => s.get_tag(b),
            StrategyImpl::NoPayload(_) => {
                let Some(payload) = payload else {
                    unreachable!("no-payload enum without a discriminator");
                };
                b.zext_or_trunc(payload, 32)
            }
            StrategyImpl::CCompatible(c) => c.get_tag(b, payload),
            StrategyImpl::SinglePayload(s) => s.get_tag(self.layout(), b, payload, tag),
            StrategyImpl::MultiPayload(m) => m.get_tag(b, payload, tag),
            StrategyImpl::Runtime => self.no_loadable_representation(),
        }
    }

    /// Branch to the block of the value's case.
    ///
    /// Cases missing from `dests` go to `default`; without a default they
    /// are unreachable.
    pub fn emit_value_switch(
        &self,
        b: &mut IrBuilder,
        value: &Explosion,
        dests: &[(usize, EmitBlockId)],
        default: Option<EmitBlockId>,
    ) {
        let (payload, tag) = self.split(value);
        match &self.imp {
            StrategyImpl::Singleton(_) => {
                let target = match Self::dest_for(dests, 0) {
                    Some(block) => block,
                    None => Self::default_block(b, default),
                };
                b.br(target, Vec::new());
            }
            StrategyImpl::NoPayload(_) => {
                let Some(payload) = payload else {
                    unreachable!("no-payload enum without a discriminator");
                };
                let cases = dests.iter().map(|&(case, block)| (case as u64, block)).collect();
                let default = Self::default_block(b, default);
                b.switch(payload, cases, default);
            }
            StrategyImpl::CCompatible(c) => c.switch(b, payload, dests, default),
            StrategyImpl::SinglePayload(s) => s.switch(self, b, payload, tag, dests, default),
            StrategyImpl::MultiPayload(m) => m.switch(self, b, payload, tag, dests, default),
            StrategyImpl::Runtime => self.no_loadable_representation(),
        }
    }

    /// Branch to the block of the case of the value stored at `addr`.
    pub fn emit_indirect_switch(
        &self,
        b: &mut IrBuilder,
        addr: EmitVarId,
        dests: &[(usize, EmitBlockId)],
        default: Option<EmitBlockId>,
    ) {
        match &self.imp {
            StrategyImpl::Runtime => self.runtime_switch(b, addr, dests, default),
            StrategyImpl::Singleton(_) if !self.is_fixed() => {
                let target = match Self::dest_for(dests, 0) {
                    Some(block) => block,
                    None => Self::default_block(b, default),
                };
                b.br(target, Vec::new());
            }
            _ => {
                let value = self.load(b, addr, 0);
                self.emit_value_switch(b, &value, dests, default);
            }
        }
    }

    // ── Injection and projection ───────────────────────────────────

    /// Build a value of `case`; payload cases take the payload explosion.
    pub fn emit_value_injection(&self, b: &mut IrBuilder, case: usize, payload: Option<&Explosion>) -> Explosion {
        let layout = self.layout();
        match self.elements[case].slot {
            CaseSlot::Empty(_) => {
                let (payload_bits, tag_bits) = self.no_payload_parts(case);
                let payload = (layout.payload_bits > 0).then(|| b.const_pattern(payload_bits));
                let tag = (layout.extra_tag_bits > 0).then(|| b.const_pattern(tag_bits));
                Self::join(payload, tag)
            }
            CaseSlot::Payload(slot) => {
                let Some(value) = payload else {
                    panic!("injecting payload case {case} of '{}' without a payload", self.name);
                };
                let (payload, tag) = match &self.imp {
                    StrategyImpl::Singleton(s) => (s.inject(b, value), None),
                    StrategyImpl::SinglePayload(s) => s.inject(layout, b, value),
                    StrategyImpl::MultiPayload(m) => m.inject(layout, b, slot, value),
                    StrategyImpl::NoPayload(_) | StrategyImpl::CCompatible(_) => {
                        unreachable!("payload case in an enum without payloads")
                    }
                    StrategyImpl::Runtime => self.no_loadable_representation(),
                };
                Self::join(payload, tag)
            }
        }
    }

    /// Make the value in memory at `addr` hold `case`.
    ///
    /// For a payload case the payload must already be stored at `addr`;
    /// only the tag is written.
    pub fn store_tag(&self, b: &mut IrBuilder, case: usize, addr: EmitVarId) {
        match &self.imp {
            StrategyImpl::Runtime => return self.runtime_store_tag(b, case, addr),
            StrategyImpl::Singleton(_) => return,
            _ => {}
        }
        let layout = self.layout();
        match self.elements[case].slot {
            CaseSlot::Empty(_) => {
                let (payload_bits, tag_bits) = self.no_payload_parts(case);
                if layout.payload_bits > 0 {
                    let payload = b.const_pattern(payload_bits);
                    b.store(payload, addr, 0);
                }
                if layout.extra_tag_bits > 0 {
                    let tag = b.const_pattern(tag_bits);
                    b.store(tag, addr, layout.tag_offset());
                }
            }
            CaseSlot::Payload(slot) => match &self.imp {
                StrategyImpl::SinglePayload(_) => {
                    if layout.extra_tag_bits > 0 {
                        let zero = b.const_int(layout.extra_tag_bits, 0);
                        b.store(zero, addr, layout.tag_offset());
                    }
                }
                StrategyImpl::MultiPayload(m) => m.store_payload_tag(layout, b, slot, addr),
                _ => unreachable!("payload case in an enum without payloads"),
            },
        }
    }

    /// Recover the payload of `case` from an exploded value.
    pub fn emit_value_projection(&self, b: &mut IrBuilder, case: usize, value: &Explosion) -> Explosion {
        let CaseSlot::Payload(_) = self.elements[case].slot else {
            panic!("projecting empty case {case} of '{}'", self.name);
        };
        let (payload, _) = self.split(value);
        match &self.imp {
            StrategyImpl::Singleton(s) => s.project(b, payload),
            StrategyImpl::SinglePayload(s) => s.project(b, payload),
            StrategyImpl::MultiPayload(m) => m.project(self.element_payload(case), b, payload),
            StrategyImpl::NoPayload(_) | StrategyImpl::CCompatible(_) => {
                unreachable!("payload case in an enum without payloads")
            }
            StrategyImpl::Runtime => self.no_loadable_representation(),
        }
    }

    /// Leave a valid payload of `case` at `addr`, clearing any tag bits
    /// interleaved with it.
    pub fn destructive_project_data_for_load(&self, b: &mut IrBuilder, case: usize, addr: EmitVarId) {
        assert!(
            matches!(self.elements[case].slot, CaseSlot::Payload(_)),
            "projecting empty case {case} of '{}'",
            self.name
        );
        match &self.imp {
            StrategyImpl::Runtime => self.runtime_project(b, addr),
            StrategyImpl::MultiPayload(m) => m.destructive_project(self.layout(), b, addr),
            _ => {}
        }
    }

    fn element_payload(&self, case: usize) -> &Rc<TypeInfo> {
        match &self.elements[case].payload {
            Some(payload) => payload,
            None => panic!("case {case} of '{}' has no payload", self.name),
        }
    }

    // ── Value semantics ─────────────────────────────────────────────

    pub fn copy(&self, b: &mut IrBuilder, value: &Explosion) {
        self.visit_references(b, value, &mut |b, reference| b.retain(reference));
    }

    pub fn consume(&self, b: &mut IrBuilder, value: &Explosion) {
        self.visit_references(b, value, &mut |b, reference| b.release(reference));
    }

    pub(crate) fn visit_references(
        &self,
        b: &mut IrBuilder,
        value: &Explosion,
        f: &mut dyn FnMut(&mut IrBuilder, EmitVarId),
    ) {
        let (payload, tag) = self.split(value);
        match &self.imp {
            StrategyImpl::Singleton(s) => s.visit_references(b, payload, f),
            StrategyImpl::NoPayload(_) | StrategyImpl::CCompatible(_) => {}
            StrategyImpl::SinglePayload(s) => s.visit_references(self, b, payload, tag, f),
            StrategyImpl::MultiPayload(m) => m.visit_references(b, payload, tag, f),
            StrategyImpl::Runtime => self.no_loadable_representation(),
        }
    }

    fn witness_callee(&self, witness: ValueWitness) -> Callee {
        Callee::ValueWitness { ty: self.ty, witness }
    }

    /// The payload of a non-fixed singleton, which handles memory
    /// operations itself.
    fn opaque_singleton_payload(&self) -> Option<Option<&Rc<TypeInfo>>> {
        match (&self.fixed, &self.imp) {
            (None, StrategyImpl::Singleton(s)) => Some(s.payload()),
            _ => None,
        }
    }

    fn is_pod(&self) -> bool {
        self.fixed.as_ref().is_some_and(|f| f.pod)
    }

    pub fn destroy(&self, b: &mut IrBuilder, addr: EmitVarId) {
        if let Some(payload) = self.opaque_singleton_payload() {
            if let Some(payload) = payload {
                payload.destroy(b, addr);
            }
            return;
        }
        if matches!(self.imp, StrategyImpl::Runtime) {
            b.call(self.witness_callee(ValueWitness::Destroy), vec![addr], None);
            return;
        }
        if self.is_pod() {
            return;
        }
        let value = self.load(b, addr, 0);
        self.consume(b, &value);
    }

    pub fn initialize_with_copy(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        if let Some(payload) = self.opaque_singleton_payload() {
            if let Some(payload) = payload {
                payload.initialize_with_copy(b, dest, src);
            }
            return;
        }
        if matches!(self.imp, StrategyImpl::Runtime) {
            b.call(self.witness_callee(ValueWitness::InitializeWithCopy), vec![dest, src], None);
            return;
        }
        let value = self.load(b, src, 0);
        self.copy(b, &value);
        self.store(b, &value, dest, 0);
    }

    pub fn initialize_with_take(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        if let Some(payload) = self.opaque_singleton_payload() {
            if let Some(payload) = payload {
                payload.initialize_with_take(b, dest, src);
            }
            return;
        }
        if matches!(self.imp, StrategyImpl::Runtime) {
            b.call(self.witness_callee(ValueWitness::InitializeWithTake), vec![dest, src], None);
            return;
        }
        let value = self.load(b, src, 0);
        self.store(b, &value, dest, 0);
    }

    pub fn assign_with_copy(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        if let Some(payload) = self.opaque_singleton_payload() {
            if let Some(payload) = payload {
                payload.assign_with_copy(b, dest, src);
            }
            return;
        }
        if matches!(self.imp, StrategyImpl::Runtime) {
            b.call(self.witness_callee(ValueWitness::AssignWithCopy), vec![dest, src], None);
            return;
        }
        let old = self.load(b, dest, 0);
        let value = self.load(b, src, 0);
        self.copy(b, &value);
        self.store(b, &value, dest, 0);
        self.consume(b, &old);
    }

    pub fn assign_with_take(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        if let Some(payload) = self.opaque_singleton_payload() {
            if let Some(payload) = payload {
                payload.assign_with_take(b, dest, src);
            }
            return;
        }
        if matches!(self.imp, StrategyImpl::Runtime) {
            b.call(self.witness_callee(ValueWitness::AssignWithTake), vec![dest, src], None);
            return;
        }
        let old = self.load(b, dest, 0);
        let value = self.load(b, src, 0);
        self.store(b, &value, dest, 0);
        self.consume(b, &old);
    }
}

#[cfg(test)]
mod tests;
