//! Extra inhabitants: invalid bit patterns an enclosing enum may claim.
//!
//! Every scheme used by this crate has the same shape: a field of `width`
//! bits at bit `offset` inside the storage holds `(first + k) << shift` for
//! extra inhabitant `k`, and every other bit under `mask` is zero. Bools
//! (`2..=255`), enum discriminators (`case_count..`) and references
//! (aligned addresses below the least valid pointer) all fit it, and so do
//! aggregates and single-payload enums that forward a field's inhabitants.
//!
//! Indices count up from the smallest pattern; the scheme is a bijection
//! from `0..count` onto the claimed patterns.

use crate::builder::IrBuilder;
use crate::ir::{EmitVarId, ICmpPred};
use crate::{BitPattern, SpareBitVector};

/// Upper bound on any extra-inhabitant count (indices travel as `i32`).
pub const MAX_EXTRA_INHABITANTS: u32 = i32::MAX as u32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtraInhabitants {
    count: u32,
    /// Bit offset of the field within the storage.
    offset: u32,
    /// Field width in bits (at most 64).
    width: u32,
    first: u64,
    shift: u32,
    /// Storage-wide mask of the bits an extra inhabitant determines.
    mask: SpareBitVector,
}

impl ExtraInhabitants {
    /// A scheme occupying a whole `width`-bit storage.
    ///
    /// Returns `None` when `count` is zero.
    pub fn new(width: u32, first: u64, shift: u32, count: u64) -> Option<Self> {
        assert!(width <= 64, "extra inhabitant field of {width} bits");
        let count = u32::try_from(count.min(u64::from(MAX_EXTRA_INHABITANTS))).unwrap_or(MAX_EXTRA_INHABITANTS);
        if count == 0 {
            return None;
        }
        Some(ExtraInhabitants {
            count,
            offset: 0,
            width,
            first,
            shift,
            mask: SpareBitVector::all_set(width),
        })
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn storage_bits(&self) -> u32 {
        self.mask.width()
    }

    pub fn mask(&self) -> &SpareBitVector {
        &self.mask
    }

    /// The same scheme for a field placed at `offset` bits inside a
    /// `storage_bits`-wide value.
    #[must_use]
    pub fn at_offset(&self, offset: u32, storage_bits: u32) -> Self {
        assert!(
            offset + self.storage_bits() <= storage_bits,
            "field at bit {offset} overflows i{storage_bits}"
        );
        let mut mask = SpareBitVector::clear(storage_bits);
        mask.overwrite(offset, &self.mask);
        ExtraInhabitants {
            offset: self.offset + offset,
            mask,
            ..self.clone()
        }
    }

    /// What is left after an enclosing enum claims the first `used`
    /// patterns, viewed from storage widened to `storage_bits` with zero
    /// bits in the extension.
    pub fn skip(&self, used: u32, storage_bits: u32) -> Option<Self> {
        if used >= self.count {
            return None;
        }
        let mut mask = self.mask.clone();
        mask.extend_with_set_bits(storage_bits);
        Some(ExtraInhabitants {
            count: self.count - used,
            first: self.first + u64::from(used),
            mask,
            ..self.clone()
        })
    }

    /// The storage bit pattern of inhabitant `index`.
    pub fn value(&self, index: u32) -> BitPattern {
        assert!(index < self.count, "extra inhabitant {index} of {}", self.count);
        let field = (self.first + u64::from(index)) << self.shift;
        BitPattern::from_u64(self.width, field)
            .zext(self.storage_bits())
            .shift_left(self.offset)
    }

    /// The inhabitant index of a storage pattern, if it is one.
    pub fn index_of(&self, value: &BitPattern) -> Option<u32> {
        let outside = &(value & self.mask.as_pattern()) & &self.field_mask();
        if !outside.is_zero() {
            return None;
        }
        let field = value.shift_right(self.offset).trunc(self.width).low_u64();
        if field & ((1u64 << self.shift) - 1) != 0 {
            return None;
        }
        let k = (field >> self.shift).checked_sub(self.first)?;
        u32::try_from(k).ok().filter(|&k| k < self.count)
    }

    /// Mask bits outside the field itself.
    fn field_mask(&self) -> BitPattern {
        let field = BitPattern::ones(self.width)
            .zext(self.storage_bits())
            .shift_left(self.offset);
        !&field
    }

    /// Emit the inhabitant index of the storage integer `value` as an
    /// `i32`, or `-1` when `value` is not an extra inhabitant.
    pub fn emit_index(&self, b: &mut IrBuilder, value: EmitVarId) -> EmitVarId {
        let storage = self.storage_bits();
        assert_eq!(b.width(value), storage, "extra inhabitant check on a value of another width");

        let mut valid = None;
        let outside_mask = self.mask.as_pattern() & &self.field_mask();
        if !outside_mask.is_zero() {
            let outside = b.and_const(value, &outside_mask);
            valid = Some(b.is_zero(outside));
        }

        let shifted = b.lshr_const(value, self.offset);
        let field = b.zext_or_trunc(shifted, self.width);
        if self.shift > 0 {
            let low = b.and_const(field, &BitPattern::ones(self.shift).zext(self.width));
            let aligned = b.is_zero(low);
            valid = Some(match valid {
                Some(v) => b.and(v, aligned),
                None => aligned,
            });
        }

        let payload = b.lshr_const(field, self.shift);
        let k = b.sub_const(payload, self.first);
        let in_range = b.icmp_const(ICmpPred::Ult, k, u64::from(self.count));
        let valid = match valid {
            Some(v) => b.and(v, in_range),
            None => in_range,
        };
        let k32 = b.zext_or_trunc(k, 32);
        let none = b.const_i32(-1);
        b.select(valid, k32, none)
    }

    /// Emit a store of inhabitant `index` (an `i32`) into the storage at
    /// `addr + offset`, leaving bits outside the mask untouched.
    pub fn emit_store(&self, b: &mut IrBuilder, index: EmitVarId, addr: EmitVarId, offset: u64) {
        let storage = self.storage_bits();
        let index = b.zext_or_trunc(index, self.width);
        let biased = b.add_const(index, self.first);
        let field = b.shl_const(biased, self.shift);
        let wide = b.zext_or_trunc(field, storage);
        let placed = b.shl_const(wide, self.offset);
        let old = b.load(addr, offset, storage);
        let kept = b.and_const(old, &!self.mask.as_pattern());
        let new = b.or(kept, placed);
        b.store(new, addr, offset);
    }
}
