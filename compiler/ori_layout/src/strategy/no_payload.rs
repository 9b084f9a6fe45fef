//! Enums without payloads: a plain discriminator, or C raw values.

use rustc_hash::FxHashMap;
use tracing::warn;

use ori_diagnostic::{DiagnosticContext, DiagnosticKind};
use ori_types::{EnumCase, Idx};

use super::{bits_for, EnumImplStrategy, FixedLayout};
use crate::builder::IrBuilder;
use crate::ir::{EmitBlockId, EmitVarId, IrType};
use crate::{BitPattern, ExtraInhabitants, SpareBitVector, TypeInfoStore, TypeShape};

// ---------------------------------------------------------------------------
// NoPayload
// ---------------------------------------------------------------------------

/// Case `j` is stored as the integer `j` in the smallest power-of-two
/// number of bytes; everything above is an extra inhabitant.
#[derive(Debug)]
pub(crate) struct NoPayloadStrategy {
    tag_bits: u32,
}

impl NoPayloadStrategy {
    pub(crate) fn new(count: usize) -> (Self, FixedLayout) {
        let count = count as u64;
        let tag_bits = bits_for(count.saturating_sub(1)).max(1);
        let bytes = u64::from(tag_bits.div_ceil(8)).next_power_of_two();
        let width = (bytes * 8) as u32;

        let mut spare_bits = SpareBitVector::clear(tag_bits);
        spare_bits.append_set_bits(width - tag_bits);
        let patterns = 1u64.checked_shl(width).unwrap_or(u64::MAX);

        let layout = FixedLayout {
            size: bytes,
            alignment: bytes,
            payload_bits: width,
            extra_tag_bits: 0,
            spare_bits,
            pod: true,
            bitwise_takable: true,
            extra_inhabitants: ExtraInhabitants::new(width, count, 0, patterns - count),
        };
        (NoPayloadStrategy { tag_bits }, layout)
    }

    pub(crate) fn no_payload_parts(&self, width: u32, slot: usize) -> (BitPattern, BitPattern) {
        debug_assert!(bits_for(slot as u64) <= self.tag_bits);
        (BitPattern::from_u64(width, slot as u64), BitPattern::zero(0))
    }
}

// ---------------------------------------------------------------------------
// CCompatible
// ---------------------------------------------------------------------------

/// Cases are stored as their raw values in the raw integer type.
#[derive(Debug)]
pub(crate) struct CCompatibleStrategy {
    raw_type: Idx,
    raw_bits: u32,
    raw_values: Vec<i64>,
    /// For each case, the first case with the same raw value.
    canonical: Vec<usize>,
}

impl CCompatibleStrategy {
    pub(crate) fn new(
        store: &TypeInfoStore<'_>,
        enum_name: &str,
        raw_type: Option<Idx>,
        cases: &[EnumCase],
    ) -> (Self, FixedLayout) {
        let mut raw_type = raw_type.unwrap_or(Idx::INT32);
        let mut info = store.get(raw_type);
        if !matches!(info.shape, TypeShape::Scalar) || info.size == 0 {
            warn!(name = enum_name, ?raw_type, "raw type is not an integer, using Int32");
            raw_type = Idx::INT32;
            info = store.get(raw_type);
        }
        let raw_bits = info.storage_bits();

        let mut raw_values = Vec::with_capacity(cases.len());
        let mut canonical = Vec::with_capacity(cases.len());
        let mut seen: FxHashMap<i64, usize> = FxHashMap::default();
        let mut next = 0i64;
        for (index, case) in cases.iter().enumerate() {
            let value = case.raw_value.unwrap_or(next);
            next = value.wrapping_add(1);
            raw_values.push(value);
            match seen.get(&value) {
                Some(&first) => {
                    let case_name = store.with_ast(|ast| ast.interner.lookup(case.name));
                    store.diagnose(
                        DiagnosticKind::DuplicateRawValue,
                        case.loc,
                        DiagnosticContext::new(format!("'{enum_name}.{case_name}' = {value}"))
                            .with_related(cases[first].loc),
                    );
                    canonical.push(first);
                }
                None => {
                    seen.insert(value, index);
                    canonical.push(index);
                }
            }
        }

        let layout = FixedLayout {
            size: info.size,
            alignment: info.alignment,
            payload_bits: raw_bits,
            extra_tag_bits: 0,
            spare_bits: SpareBitVector::clear(raw_bits),
            pod: true,
            bitwise_takable: true,
            extra_inhabitants: None,
        };
        let strategy = CCompatibleStrategy {
            raw_type,
            raw_bits,
            raw_values,
            canonical,
        };
        (strategy, layout)
    }

    pub(crate) fn raw_type(&self) -> Idx {
        self.raw_type
    }

    pub(crate) fn raw_value(&self, case: usize) -> i64 {
        self.raw_values[case]
    }

    fn raw_pattern(&self, case: usize) -> BitPattern {
        BitPattern::from_i64(self.raw_bits, self.raw_values[case])
    }

    pub(crate) fn no_payload_parts(&self, slot: usize) -> (BitPattern, BitPattern) {
        (self.raw_pattern(slot), BitPattern::zero(0))
    }

    /// Switch cases for the first case of each raw value in `dests`.
    fn raw_cases(&self, dests: &[(usize, EmitBlockId)]) -> Vec<(u64, EmitBlockId)> {
        dests
            .iter()
            .filter(|&&(case, _)| self.canonical[case] == case)
            .map(|&(case, block)| (self.raw_pattern(case).low_u64(), block))
            .collect()
    }

    /// Unknown raw values are unreachable.
    pub(crate) fn get_tag(&self, b: &mut IrBuilder, raw: Option<EmitVarId>) -> EmitVarId {
        let Some(raw) = raw else {
            unreachable!("C-compatible enum without a raw value");
        };
        let (merge, params) = b.append_block_with_params(&[IrType::Int(32)]);
        let mut dests = Vec::new();
        let entry = b.current_block();
        for case in (0..self.raw_values.len()).filter(|&c| self.canonical[c] == c) {
            let block = b.append_block();
            b.position_at_end(block);
            let tag = b.const_int(32, case as u64);
            b.br(merge, vec![tag]);
            dests.push((case, block));
        }
        b.position_at_end(entry);
        let default = b.unreachable_block();
        b.switch(raw, self.raw_cases(&dests), default);
        b.position_at_end(merge);
        params[0]
    }

    pub(crate) fn switch(
        &self,
        b: &mut IrBuilder,
        raw: Option<EmitVarId>,
        dests: &[(usize, EmitBlockId)],
        default: Option<EmitBlockId>,
    ) {
        let Some(raw) = raw else {
            unreachable!("C-compatible enum without a raw value");
        };
        let default = EnumImplStrategy::default_block(b, default);
        b.switch(raw, self.raw_cases(dests), default);
    }
}
