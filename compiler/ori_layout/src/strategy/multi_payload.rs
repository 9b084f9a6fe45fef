//! Several payload cases sharing one payload area.
//!
//! The payload tag lives in the spare bits common to every payload (the
//! most significant ones when not all are needed), spilling into an extra
//! tag when they run out. Empty cases take the tag values after the payload
//! cases and spread their index over the bits some payload occupies.

use std::rc::Rc;

use super::{bits_for, CopyDestroyKind, EnumImplStrategy, FixedLayout};
use crate::bits::scatter;
use crate::builder::IrBuilder;
use crate::ir::{EmitBlockId, EmitVarId, ICmpPred};
use crate::{BitPattern, Explosion, SpareBitVector, TypeInfo, TypeShape};

#[derive(Debug)]
pub(crate) struct MultiPayloadStrategy {
    payloads: Vec<Rc<TypeInfo>>,
    empty_count: u64,
    common_spare_bits: SpareBitVector,
    payload_tag_bits: SpareBitVector,
    /// Payload bits that are not common spare bits.
    occupied_bits: u32,
    /// Tag values given to empty cases.
    empty_tags: u64,
    /// Distinct extra tag values, zero when there is no extra tag.
    tag_values: u32,
    copy_destroy: CopyDestroyKind,
}

impl MultiPayloadStrategy {
    pub(crate) fn new(payloads: Vec<Rc<TypeInfo>>, empty_count: usize) -> (Self, FixedLayout) {
        let empty_count = empty_count as u64;
        let payload_size = payloads.iter().map(|p| p.size).max().unwrap_or(0);
        let alignment = payloads.iter().map(|p| p.alignment).max().unwrap_or(1);
        let payload_bits = u32::try_from(payload_size * 8)
            .unwrap_or_else(|_| panic!("payload of {payload_size} bytes is too large"));

        let mut common_spare_bits = SpareBitVector::all_set(payload_bits);
        for payload in &payloads {
            common_spare_bits.apply_mask(&payload.spare_bits);
        }
        let spare_count = common_spare_bits.count();
        let occupied_bits = payload_bits - spare_count;

        let empty_tags = if empty_count == 0 {
            0
        } else if occupied_bits >= 32 {
            1
        } else {
            empty_count.div_ceil(1u64 << occupied_bits)
        };
        let tag_count = payloads.len() as u64 + empty_tags;
        let tag_bits = bits_for(tag_count - 1);
        let extra_tag_bits = tag_bits.saturating_sub(spare_count);

        let payload_tag_bits = if tag_bits >= spare_count {
            common_spare_bits.clone()
        } else {
            let positions: Vec<u32> = common_spare_bits.positions().collect();
            let mut bits = SpareBitVector::clear(payload_bits);
            for &position in &positions[positions.len() - tag_bits as usize..] {
                bits.set(position);
            }
            bits
        };
        let tag_values = if extra_tag_bits == 0 {
            0
        } else {
            tag_count.div_ceil(1u64 << payload_tag_bits.count())
        };

        let tag_storage_bits = extra_tag_bits.div_ceil(8) * 8;
        let mut spare_bits = common_spare_bits.clone();
        spare_bits.apply_mask(&payload_tag_bits.flipped());
        spare_bits.append_clear_bits(extra_tag_bits);
        spare_bits.append_set_bits(tag_storage_bits - extra_tag_bits);

        let pod = payloads.iter().all(|p| p.pod);
        let bitwise_takable = payloads.iter().all(|p| p.bitwise_takable);
        let copy_destroy = if pod {
            CopyDestroyKind::Pod
        } else if empty_count <= 1 && payloads.iter().all(|p| matches!(p.shape, TypeShape::Reference)) {
            CopyDestroyKind::TaggedRefcounted
        } else if bitwise_takable {
            CopyDestroyKind::BitwiseTakable
        } else {
            CopyDestroyKind::Normal
        };

        let layout = FixedLayout {
            size: payload_size + u64::from(tag_storage_bits / 8),
            alignment,
            payload_bits,
            extra_tag_bits,
            spare_bits,
            pod,
            bitwise_takable,
            extra_inhabitants: None,
        };
        let strategy = MultiPayloadStrategy {
            payloads,
            empty_count,
            common_spare_bits,
            payload_tag_bits,
            occupied_bits,
            empty_tags,
            tag_values: u32::try_from(tag_values).unwrap_or(u32::MAX),
            copy_destroy,
        };
        (strategy, layout)
    }

    pub(crate) fn payload_tag_bits(&self) -> &SpareBitVector {
        &self.payload_tag_bits
    }

    pub(crate) fn extra_tag_values(&self) -> u32 {
        self.tag_values
    }

    pub(crate) fn copy_destroy_kind(&self) -> CopyDestroyKind {
        self.copy_destroy
    }

    /// Every empty case fits under a single tag value.
    fn single_empty_tag(&self) -> bool {
        self.occupied_bits >= 32 || (1u64 << self.occupied_bits) >= self.empty_count
    }

    /// `(tag, index in occupied bits)` of empty case `slot`.
    fn empty_case_tag(&self, slot: u64) -> (u64, u64) {
        let payloads = self.payloads.len() as u64;
        if self.single_empty_tag() {
            (payloads, slot)
        } else {
            let mask = (1u64 << self.occupied_bits) - 1;
            (payloads + (slot >> self.occupied_bits), slot & mask)
        }
    }

    /// Empty slots stored under extra tag `payloads + group`.
    fn group_slots(&self, group: u64) -> std::ops::Range<u64> {
        if self.single_empty_tag() {
            return 0..self.empty_count;
        }
        let start = group << self.occupied_bits;
        start..(start + (1u64 << self.occupied_bits)).min(self.empty_count)
    }

    fn high_tag(&self, tag: u64) -> u64 {
        tag.checked_shr(self.payload_tag_bits.count()).unwrap_or(0)
    }

    pub(crate) fn no_payload_parts(&self, layout: &FixedLayout, slot: usize) -> (BitPattern, BitPattern) {
        let (tag, index) = self.empty_case_tag(slot as u64);
        let tag_part = scatter(&BitPattern::from_u64(64, tag), &self.payload_tag_bits);
        let index_part = scatter(&BitPattern::from_u64(64, index), &self.common_spare_bits.flipped());
        let extra = BitPattern::from_u64(layout.extra_tag_bits, self.high_tag(tag));
        (&tag_part | &index_part, extra)
    }

    /// The tag value of a loaded value: payload index, or
    /// `payload_count + empty group`, as an `i32`.
    fn emit_payload_tag(&self, b: &mut IrBuilder, payload: Option<EmitVarId>, tag: Option<EmitVarId>) -> EmitVarId {
        let low_bits = self.payload_tag_bits.count();
        let mut value = match payload {
            Some(payload) if low_bits > 0 => b.gather_bits(payload, &self.payload_tag_bits, 32),
            _ => b.const_i32(0),
        };
        if let Some(tag) = tag {
            let tag = b.zext_or_trunc(tag, 32);
            let high = b.shl_const(tag, low_bits);
            value = b.or(value, high);
        }
        value
    }

    /// The occupied bits of a loaded value, gathered into an `i32`.
    fn emit_occupied(&self, b: &mut IrBuilder, payload: Option<EmitVarId>) -> EmitVarId {
        match payload {
            Some(payload) if self.occupied_bits > 0 => {
                b.gather_bits(payload, &self.common_spare_bits.flipped(), 32)
            }
            _ => b.const_i32(0),
        }
    }

    pub(crate) fn get_tag(
        &self,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: Option<EmitVarId>,
    ) -> EmitVarId {
        let payload_tag = self.emit_payload_tag(b, payload, tag);
        let relative = b.sub_const(payload_tag, self.payloads.len() as u64);
        if self.empty_count == 0 {
            return relative;
        }
        let occupied = self.emit_occupied(b, payload);
        let empty_index = if self.single_empty_tag() {
            occupied
        } else {
            let high = b.shl_const(relative, self.occupied_bits);
            b.or(high, occupied)
        };
        let is_payload = b.icmp_const(ICmpPred::Slt, relative, 0);
        b.select(is_payload, relative, empty_index)
    }

    pub(crate) fn switch(
        &self,
        s: &EnumImplStrategy,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: Option<EmitVarId>,
        dests: &[(usize, EmitBlockId)],
        default: Option<EmitBlockId>,
    ) {
        let default = EnumImplStrategy::default_block(b, default);
        let payloads = self.payloads.len() as u64;
        let payload_tag = self.emit_payload_tag(b, payload, tag);

        let slots = s.slot_dests(dests);
        let mut cases: Vec<(u64, EmitBlockId)> = slots
            .payload
            .iter()
            .enumerate()
            .filter_map(|(i, block)| block.map(|block| (i as u64, block)))
            .collect();
        let mut groups = Vec::new();
        for group in 0..self.empty_tags {
            let block = b.append_block();
            cases.push((payloads + group, block));
            groups.push((group, block));
        }
        b.switch(payload_tag, cases, default);

        for (group, block) in groups {
            b.position_at_end(block);
            let occupied = self.emit_occupied(b, payload);
            let cases = self
                .group_slots(group)
                .filter_map(|slot| {
                    let dest = slots.empty[slot as usize]?;
                    Some((self.empty_case_tag(slot).1, dest))
                })
                .collect();
            b.switch(occupied, cases, default);
        }
    }

    pub(crate) fn inject(
        &self,
        layout: &FixedLayout,
        b: &mut IrBuilder,
        slot: usize,
        value: &Explosion,
    ) -> (Option<EmitVarId>, Option<EmitVarId>) {
        let slot_tag = slot as u64;
        let packed = self.payloads[slot].pack(b, value);
        let payload = (layout.payload_bits > 0).then(|| {
            let base = match packed {
                Some(v) => {
                    let v = b.zext_or_trunc(v, layout.payload_bits);
                    b.and_const(v, self.payload_tag_bits.flipped().as_pattern())
                }
                None => b.const_int(layout.payload_bits, 0),
            };
            let tag_bits = scatter(&BitPattern::from_u64(64, slot_tag), &self.payload_tag_bits);
            if tag_bits.is_zero() {
                base
            } else {
                b.or_const(base, &tag_bits)
            }
        });
        let tag = (layout.extra_tag_bits > 0)
            .then(|| b.const_int(layout.extra_tag_bits, self.high_tag(slot_tag)));
        (payload, tag)
    }

    pub(crate) fn store_payload_tag(&self, layout: &FixedLayout, b: &mut IrBuilder, slot: usize, addr: EmitVarId) {
        let slot_tag = slot as u64;
        if layout.payload_bits > 0 && self.payload_tag_bits.count() > 0 {
            let old = b.load(addr, 0, layout.payload_bits);
            let cleared = b.and_const(old, self.payload_tag_bits.flipped().as_pattern());
            let tag_bits = scatter(&BitPattern::from_u64(64, slot_tag), &self.payload_tag_bits);
            let tagged = b.or_const(cleared, &tag_bits);
            b.store(tagged, addr, 0);
        }
        if layout.extra_tag_bits > 0 {
            let tag = b.const_int(layout.extra_tag_bits, self.high_tag(slot_tag));
            b.store(tag, addr, layout.tag_offset());
        }
    }

    pub(crate) fn project(&self, info: &TypeInfo, b: &mut IrBuilder, payload: Option<EmitVarId>) -> Explosion {
        let bits = info.storage_bits();
        match payload {
            Some(payload) if bits > 0 => {
                let masked = b.and_const(payload, self.payload_tag_bits.flipped().as_pattern());
                let value = b.zext_or_trunc(masked, bits);
                info.unpack(b, Some(value))
            }
            _ => info.unpack(b, None),
        }
    }

    pub(crate) fn destructive_project(&self, layout: &FixedLayout, b: &mut IrBuilder, addr: EmitVarId) {
        if layout.payload_bits == 0 || self.payload_tag_bits.count() == 0 {
            return;
        }
        let value = b.load(addr, 0, layout.payload_bits);
        let cleared = b.and_const(value, self.payload_tag_bits.flipped().as_pattern());
        b.store(cleared, addr, 0);
    }

    pub(crate) fn visit_references(
        &self,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: Option<EmitVarId>,
        f: &mut dyn FnMut(&mut IrBuilder, EmitVarId),
    ) {
        match self.copy_destroy {
            CopyDestroyKind::Pod => {}
            CopyDestroyKind::TaggedRefcounted => {
                let Some(payload) = payload else {
                    unreachable!("reference payloads without payload bits");
                };
                let reference = b.and_const(payload, self.payload_tag_bits.flipped().as_pattern());
                f(b, reference);
            }
            _ => {
                let done = b.append_block();
                let mut cases = Vec::new();
                for (i, info) in self.payloads.iter().enumerate().filter(|(_, p)| !p.pod) {
                    cases.push((i as u64, b.append_block(), Rc::clone(info)));
                }
                let payload_tag = self.emit_payload_tag(b, payload, tag);
                b.switch(
                    payload_tag,
                    cases.iter().map(|&(i, block, _)| (i, block)).collect(),
                    done,
                );
                for (_, block, info) in cases {
                    b.position_at_end(block);
                    let value = self.project(&info, b, payload);
                    info.visit_references(b, &value, f);
                    b.br(done, Vec::new());
                }
                b.position_at_end(done);
            }
        }
    }
}
