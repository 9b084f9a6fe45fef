//! Target description consumed by the type-size oracle.

use crate::SpareBitVector;

/// Pointer layout facts of the compilation target.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetConfig {
    /// Bytes per pointer.
    pub pointer_size: u64,
    /// Every heap object starts at a multiple of this (a power of two).
    pub heap_object_alignment: u64,
    /// No valid object lives below this address.
    pub least_valid_pointer: u64,
    /// Number of high pointer bits that are always zero in user space.
    pub pointer_high_spare_bits: u32,
}

impl TargetConfig {
    #[must_use]
    pub fn with_pointer_size(mut self, bytes: u64) -> Self {
        self.pointer_size = bytes;
        self
    }

    #[must_use]
    pub fn with_heap_object_alignment(mut self, alignment: u64) -> Self {
        assert!(alignment.is_power_of_two(), "heap alignment {alignment} is not a power of two");
        self.heap_object_alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_least_valid_pointer(mut self, address: u64) -> Self {
        self.least_valid_pointer = address;
        self
    }

    #[must_use]
    pub fn with_pointer_high_spare_bits(mut self, bits: u32) -> Self {
        self.pointer_high_spare_bits = bits;
        self
    }

    pub fn pointer_bits(&self) -> u32 {
        (self.pointer_size * 8) as u32
    }

    /// Low bits that are zero in every heap object address.
    pub fn heap_alignment_bits(&self) -> u32 {
        self.heap_object_alignment.trailing_zeros()
    }

    /// Spare bits of a native object reference: the alignment bits at the
    /// bottom and the configured high bits at the top.
    pub fn object_spare_bits(&self) -> SpareBitVector {
        let mut spare = self.raw_pointer_spare_bits();
        for bit in 0..self.heap_alignment_bits() {
            spare.set(bit);
        }
        spare
    }

    /// Spare bits of an untracked pointer: only the high bits, since it
    /// may point anywhere.
    pub fn raw_pointer_spare_bits(&self) -> SpareBitVector {
        let bits = self.pointer_bits();
        let high = self.pointer_high_spare_bits.min(bits);
        let mut spare = SpareBitVector::clear(bits - high);
        spare.append_set_bits(high);
        spare
    }
}

impl Default for TargetConfig {
    /// A 64-bit target with 8-byte heap alignment and the first page
    /// unmapped.
    fn default() -> Self {
        TargetConfig {
            pointer_size: 8,
            heap_object_alignment: 8,
            least_valid_pointer: 4096,
            pointer_high_spare_bits: 0,
        }
    }
}
