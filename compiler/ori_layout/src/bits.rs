//! Arbitrary-width bit vectors.
//!
//! Enum layout works on bit patterns wider than any machine integer: a
//! multi-payload enum over two 24-byte structs has a 192-bit payload, and
//! its tag bits can sit anywhere inside it. [`BitPattern`] is a fixed-width
//! little-endian bit vector carrying the integer operations the layout code
//! and the interpreter need; [`SpareBitVector`] is a mask over one.
//!
//! # Interleaving
//!
//! A mask splits a value into two lanes. [`scatter`] spreads a compact
//! integer over the set bits of a mask, lowest set bit first; [`gather`]
//! collects them back. [`interleave`] and [`deinterleave`] handle both
//! lanes at once and are exact inverses of each other.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use smallvec::{smallvec, SmallVec};

const WORD_BITS: u32 = 64;

fn word_count(width: u32) -> usize {
    width.div_ceil(WORD_BITS) as usize
}

/// Error when building a pattern from external data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitPatternError {
    #[error("a {width}-bit pattern needs {expected} bytes, found {found}")]
    ByteLength {
        width: u32,
        expected: usize,
        found: usize,
    },
    #[error("value {value:#x} does not fit in {width} bits")]
    ValueTooWide { width: u32, value: u64 },
}

/// A fixed-width bit vector, least significant bit first.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct BitPattern {
    width: u32,
    /// Little-endian words. Bits at or above `width` are always zero.
    words: SmallVec<[u64; 2]>,
}

impl BitPattern {
    pub fn zero(width: u32) -> Self {
        BitPattern {
            width,
            words: smallvec![0; word_count(width)],
        }
    }

    pub fn ones(width: u32) -> Self {
        let mut pattern = BitPattern {
            width,
            words: smallvec![u64::MAX; word_count(width)],
        };
        pattern.normalize();
        pattern
    }

    /// `value` truncated to `width` bits.
    pub fn from_u64(width: u32, value: u64) -> Self {
        let mut pattern = Self::zero(width);
        if let Some(word) = pattern.words.first_mut() {
            *word = value;
        }
        pattern.normalize();
        pattern
    }

    /// `value` sign-extended (or truncated) to `width` bits.
    pub fn from_i64(width: u32, value: i64) -> Self {
        let fill = if value < 0 { u64::MAX } else { 0 };
        let mut pattern = Self::zero(width);
        for (i, word) in pattern.words.iter_mut().enumerate() {
            *word = if i == 0 { value as u64 } else { fill };
        }
        pattern.normalize();
        pattern
    }

    /// Like [`from_u64`](Self::from_u64), but rejects values that would be
    /// truncated.
    pub fn try_from_u64(width: u32, value: u64) -> Result<Self, BitPatternError> {
        if width < WORD_BITS && value >> width != 0 {
            return Err(BitPatternError::ValueTooWide { width, value });
        }
        Ok(Self::from_u64(width, value))
    }

    /// Decode `width` bits from little-endian bytes.
    ///
    /// `bytes` must hold exactly `ceil(width / 8)` bytes; bits past `width`
    /// in the last byte are dropped.
    pub fn from_le_bytes(width: u32, bytes: &[u8]) -> Result<Self, BitPatternError> {
        let expected = width.div_ceil(8) as usize;
        if bytes.len() != expected {
            return Err(BitPatternError::ByteLength {
                width,
                expected,
                found: bytes.len(),
            });
        }
        let mut pattern = Self::zero(width);
        for (i, &byte) in bytes.iter().enumerate() {
            pattern.words[i / 8] |= u64::from(byte) << ((i % 8) * 8);
        }
        pattern.normalize();
        Ok(pattern)
    }

    /// Encode as `ceil(width / 8)` little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        (0..self.width.div_ceil(8) as usize)
            .map(|i| (self.words[i / 8] >> ((i % 8) * 8)) as u8)
            .collect()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn bit(&self, index: u32) -> bool {
        assert!(index < self.width, "bit {index} out of range for i{}", self.width);
        (self.words[(index / WORD_BITS) as usize] >> (index % WORD_BITS)) & 1 == 1
    }

    pub fn set_bit(&mut self, index: u32, value: bool) {
        assert!(index < self.width, "bit {index} out of range for i{}", self.width);
        let word = &mut self.words[(index / WORD_BITS) as usize];
        let bit = 1u64 << (index % WORD_BITS);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn is_all_ones(&self) -> bool {
        self.count_ones() == self.width
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Indices of the set bits, ascending.
    pub fn set_bits(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.width).filter(move |&i| self.bit(i))
    }

    /// The value, if it fits in 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.words.iter().skip(1).any(|&w| w != 0) {
            return None;
        }
        Some(self.low_u64())
    }

    /// The low 64 bits.
    pub fn low_u64(&self) -> u64 {
        self.words.first().copied().unwrap_or(0)
    }

    /// Sign-extended value of a pattern at most 64 bits wide.
    pub fn to_i64(&self) -> i64 {
        assert!(self.width <= WORD_BITS, "i{} does not fit in i64", self.width);
        if self.width == 0 {
            return 0;
        }
        let shift = WORD_BITS - self.width;
        ((self.low_u64() << shift) as i64) >> shift
    }

    pub fn shift_left(&self, amount: u32) -> Self {
        let mut out = Self::zero(self.width);
        if amount >= self.width {
            return out;
        }
        let word_shift = (amount / WORD_BITS) as usize;
        let bit_shift = amount % WORD_BITS;
        for i in (word_shift..out.words.len()).rev() {
            let src = i - word_shift;
            let mut word = self.words[src] << bit_shift;
            if bit_shift != 0 && src > 0 {
                word |= self.words[src - 1] >> (WORD_BITS - bit_shift);
            }
            out.words[i] = word;
        }
        out.normalize();
        out
    }

    /// Logical right shift.
    pub fn shift_right(&self, amount: u32) -> Self {
        let mut out = Self::zero(self.width);
        if amount >= self.width {
            return out;
        }
        let word_shift = (amount / WORD_BITS) as usize;
        let bit_shift = amount % WORD_BITS;
        let len = self.words.len();
        for i in 0..len - word_shift {
            let src = i + word_shift;
            let mut word = self.words[src] >> bit_shift;
            if bit_shift != 0 && src + 1 < len {
                word |= self.words[src + 1] << (WORD_BITS - bit_shift);
            }
            out.words[i] = word;
        }
        out
    }

    #[must_use]
    pub fn wrapping_add(&self, other: &BitPattern) -> Self {
        self.assert_same_width(other);
        let mut out = Self::zero(self.width);
        let mut carry = false;
        for (i, word) in out.words.iter_mut().enumerate() {
            let (sum, c1) = self.words[i].overflowing_add(other.words[i]);
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            *word = sum;
            carry = c1 || c2;
        }
        out.normalize();
        out
    }

    #[must_use]
    pub fn wrapping_sub(&self, other: &BitPattern) -> Self {
        self.assert_same_width(other);
        let mut out = Self::zero(self.width);
        let mut borrow = false;
        for (i, word) in out.words.iter_mut().enumerate() {
            let (diff, b1) = self.words[i].overflowing_sub(other.words[i]);
            let (diff, b2) = diff.overflowing_sub(u64::from(borrow));
            *word = diff;
            borrow = b1 || b2;
        }
        out.normalize();
        out
    }

    pub fn cmp_unsigned(&self, other: &BitPattern) -> Ordering {
        self.assert_same_width(other);
        self.words.iter().rev().cmp(other.words.iter().rev())
    }

    /// Whether the value is negative when read as two's complement.
    pub fn is_negative(&self) -> bool {
        self.width > 0 && self.bit(self.width - 1)
    }

    pub fn cmp_signed(&self, other: &BitPattern) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.cmp_unsigned(other),
        }
    }

    pub fn zext(&self, width: u32) -> Self {
        assert!(width >= self.width, "zext from i{} to narrower i{width}", self.width);
        let mut out = Self::zero(width);
        out.words[..self.words.len()].copy_from_slice(&self.words);
        out
    }

    pub fn trunc(&self, width: u32) -> Self {
        assert!(width <= self.width, "trunc from i{} to wider i{width}", self.width);
        let mut out = Self::zero(width);
        let len = out.words.len();
        out.words.copy_from_slice(&self.words[..len]);
        out.normalize();
        out
    }

    /// Zero-extend or truncate to `width`.
    pub fn resize(&self, width: u32) -> Self {
        if width >= self.width {
            self.zext(width)
        } else {
            self.trunc(width)
        }
    }

    /// `self` in the low bits, `high` above it.
    pub fn concat(&self, high: &BitPattern) -> Self {
        let width = self.width + high.width;
        let low = self.zext(width);
        let high = high.zext(width).shift_left(self.width);
        &low | &high
    }

    fn assert_same_width(&self, other: &BitPattern) {
        assert_eq!(
            self.width, other.width,
            "bit pattern width mismatch: i{} vs i{}",
            self.width, other.width
        );
    }

    fn normalize(&mut self) {
        let rem = self.width % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    fn zip_words(&self, other: &BitPattern, f: impl Fn(u64, u64) -> u64) -> BitPattern {
        self.assert_same_width(other);
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(&a, &b)| f(a, b))
            .collect();
        let mut out = BitPattern {
            width: self.width,
            words,
        };
        out.normalize();
        out
    }
}

impl BitAnd for &BitPattern {
    type Output = BitPattern;

    fn bitand(self, rhs: &BitPattern) -> BitPattern {
        self.zip_words(rhs, |a, b| a & b)
    }
}

impl BitOr for &BitPattern {
    type Output = BitPattern;

    fn bitor(self, rhs: &BitPattern) -> BitPattern {
        self.zip_words(rhs, |a, b| a | b)
    }
}

impl BitXor for &BitPattern {
    type Output = BitPattern;

    fn bitxor(self, rhs: &BitPattern) -> BitPattern {
        self.zip_words(rhs, |a, b| a ^ b)
    }
}

impl Not for &BitPattern {
    type Output = BitPattern;

    fn not(self) -> BitPattern {
        self.zip_words(self, |a, _| !a)
    }
}

impl fmt::Debug for BitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}:0x", self.width)?;
        let mut words = self.words.iter().rev();
        match words.next() {
            Some(top) => write!(f, "{top:x}")?,
            None => write!(f, "0")?,
        }
        for word in words {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

/// A mask over a storage bit pattern.
///
/// As a type's spare-bit set, a set bit is one that every valid value of
/// the type leaves zero. The same type describes tag-bit sets and
/// "occupied" sets (the complement).
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct SpareBitVector {
    bits: BitPattern,
}

impl SpareBitVector {
    /// `width` bits, none set.
    pub fn clear(width: u32) -> Self {
        SpareBitVector {
            bits: BitPattern::zero(width),
        }
    }

    /// `width` bits, all set.
    pub fn all_set(width: u32) -> Self {
        SpareBitVector {
            bits: BitPattern::ones(width),
        }
    }

    pub fn from_pattern(bits: BitPattern) -> Self {
        SpareBitVector { bits }
    }

    pub fn as_pattern(&self) -> &BitPattern {
        &self.bits
    }

    pub fn width(&self) -> u32 {
        self.bits.width()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.width() == 0
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn is_set(&self, index: u32) -> bool {
        self.bits.bit(index)
    }

    pub fn set(&mut self, index: u32) {
        self.bits.set_bit(index, true);
    }

    pub fn clear_bit(&mut self, index: u32) {
        self.bits.set_bit(index, false);
    }

    pub fn append_clear_bits(&mut self, count: u32) {
        self.bits = self.bits.zext(self.bits.width() + count);
    }

    pub fn append_set_bits(&mut self, count: u32) {
        let old = self.bits.width();
        self.bits = self.bits.zext(old + count);
        for i in old..old + count {
            self.bits.set_bit(i, true);
        }
    }

    /// Grow to `width` bits with clear bits; no-op if already that wide.
    pub fn extend_with_clear_bits(&mut self, width: u32) {
        if width > self.width() {
            self.append_clear_bits(width - self.width());
        }
    }

    /// Grow to `width` bits with set bits; no-op if already that wide.
    pub fn extend_with_set_bits(&mut self, width: u32) {
        if width > self.width() {
            self.append_set_bits(width - self.width());
        }
    }

    /// Intersect with `other`.
    ///
    /// Bits past the end of the narrower vector count as set: a payload
    /// never touches storage beyond its own size.
    pub fn apply_mask(&mut self, other: &SpareBitVector) {
        let width = self.width().max(other.width());
        self.extend_with_set_bits(width);
        let mut other = other.clone();
        other.extend_with_set_bits(width);
        self.bits = &self.bits & &other.bits;
    }

    /// Replace the bits starting at `offset` with `inner`.
    pub fn overwrite(&mut self, offset: u32, inner: &SpareBitVector) {
        assert!(
            offset + inner.width() <= self.width(),
            "i{} at bit {offset} overflows i{}",
            inner.width(),
            self.width()
        );
        for i in 0..inner.width() {
            self.bits.set_bit(offset + i, inner.is_set(i));
        }
    }

    #[must_use]
    pub fn flipped(&self) -> Self {
        SpareBitVector { bits: !&self.bits }
    }

    /// Indices of the set bits, ascending.
    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.set_bits()
    }

    /// Maximal runs of set bits as `(start, len)`, ascending.
    pub fn runs(&self) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for bit in self.positions() {
            match runs.last_mut() {
                Some((start, len)) if *start + *len == bit => *len += 1,
                _ => runs.push((bit, 1)),
            }
        }
        runs
    }
}

/// Spread the low `mask.count()` bits of `value` over the set bits of
/// `mask`. The result is `mask.width()` bits wide.
pub fn scatter(value: &BitPattern, mask: &SpareBitVector) -> BitPattern {
    let mut out = BitPattern::zero(mask.width());
    for (k, position) in mask.positions().enumerate() {
        let k = k as u32;
        if k < value.width() && value.bit(k) {
            out.set_bit(position, true);
        }
    }
    out
}

/// Collect the bits of `value` under the set bits of `mask` into a compact
/// `mask.count()`-bit integer.
pub fn gather(value: &BitPattern, mask: &SpareBitVector) -> BitPattern {
    assert_eq!(
        value.width(),
        mask.width(),
        "gathering i{} through a {}-bit mask",
        value.width(),
        mask.width()
    );
    let mut out = BitPattern::zero(mask.count());
    for (k, position) in mask.positions().enumerate() {
        if value.bit(position) {
            out.set_bit(k as u32, true);
        }
    }
    out
}

/// Combine two lanes: `spare_value` goes to the set bits of `mask`,
/// `occupied_value` to the clear ones.
pub fn interleave(
    mask: &SpareBitVector,
    spare_value: &BitPattern,
    occupied_value: &BitPattern,
) -> BitPattern {
    let spare = scatter(spare_value, mask);
    let occupied = scatter(occupied_value, &mask.flipped());
    &spare | &occupied
}

/// Split a value into its `(spare, occupied)` lanes.
pub fn deinterleave(mask: &SpareBitVector, value: &BitPattern) -> (BitPattern, BitPattern) {
    (gather(value, mask), gather(value, &mask.flipped()))
}
