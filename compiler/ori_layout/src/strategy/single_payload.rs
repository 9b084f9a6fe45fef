//! One payload case plus empty cases.
//!
//! Empty cases first take the payload's extra inhabitants, lowest index
//! first. The rest go behind an extra tag stored after the payload: with
//! tag `t > 0` the empty case is `used + ((t - 1) << P | payload)`, or just
//! `used + payload` once the payload is at least 32 bits wide.

use std::rc::Rc;

use super::{bits_for, CopyDestroyKind, EnumImplStrategy, FixedLayout};
use crate::builder::IrBuilder;
use crate::ir::{EmitBlockId, EmitVarId, ICmpPred};
use crate::{BitPattern, Explosion, ExtraInhabitants, SpareBitVector, TypeInfo, TypeShape};

/// `-1` as an `i32` case tag.
const PAYLOAD_TAG: u64 = 0xFFFF_FFFF;

#[derive(Debug)]
pub(crate) struct SinglePayloadStrategy {
    payload: Rc<TypeInfo>,
    empty_count: u64,
    /// Empty cases encoded as extra inhabitants of the payload.
    used: u32,
    /// Distinct extra tag values, zero when there is no extra tag.
    tag_values: u32,
    copy_destroy: CopyDestroyKind,
}

impl SinglePayloadStrategy {
    pub(crate) fn new(payload: Rc<TypeInfo>, empty_count: usize) -> (Self, FixedLayout) {
        let empty_count = empty_count as u64;
        let payload_bits = payload.storage_bits();
        let used = u32::try_from(empty_count.min(u64::from(payload.extra_inhabitant_count())))
            .unwrap_or(u32::MAX);
        let remaining = empty_count - u64::from(used);

        let tag_values = if remaining == 0 {
            0
        } else if payload_bits >= 32 {
            2
        } else {
            remaining.div_ceil(1u64 << payload_bits) + 1
        };
        let extra_tag_bits = if tag_values == 0 { 0 } else { bits_for(tag_values - 1) };
        let tag_storage_bits = extra_tag_bits.div_ceil(8) * 8;
        let storage_bits = payload_bits + tag_storage_bits;

        // Payload bits stay spare only if no empty case can set them.
        let mut spare_bits = if remaining > 0 {
            SpareBitVector::clear(payload_bits)
        } else {
            let mut spare = payload.spare_bits.clone();
            if let Some(ei) = payload.extra_inhabitants.as_ref().filter(|_| used > 0) {
                spare.apply_mask(&ei.mask().flipped());
            }
            spare
        };
        spare_bits.append_clear_bits(extra_tag_bits);
        spare_bits.append_set_bits(tag_storage_bits - extra_tag_bits);

        let extra_inhabitants = payload
            .extra_inhabitants
            .as_ref()
            .and_then(|ei| ei.skip(used, storage_bits));

        let copy_destroy = if payload.pod {
            CopyDestroyKind::Pod
        } else if matches!(payload.shape, TypeShape::Reference) && empty_count == 1 && used == 1 {
            CopyDestroyKind::NullableRefcounted
        } else {
            CopyDestroyKind::Normal
        };

        let layout = FixedLayout {
            size: payload.size + u64::from(tag_storage_bits / 8),
            alignment: payload.alignment,
            payload_bits,
            extra_tag_bits,
            spare_bits,
            pod: payload.pod,
            bitwise_takable: payload.bitwise_takable,
            extra_inhabitants,
        };
        let strategy = SinglePayloadStrategy {
            payload,
            empty_count,
            used,
            tag_values: u32::try_from(tag_values).unwrap_or(u32::MAX),
            copy_destroy,
        };
        (strategy, layout)
    }

    pub(crate) fn used_extra_inhabitants(&self) -> u32 {
        self.used
    }

    pub(crate) fn extra_tag_values(&self) -> u32 {
        self.tag_values
    }

    pub(crate) fn copy_destroy_kind(&self) -> CopyDestroyKind {
        self.copy_destroy
    }

    fn payload_extra_inhabitants(&self) -> &ExtraInhabitants {
        match &self.payload.extra_inhabitants {
            Some(ei) => ei,
            None => unreachable!("extra inhabitants used by a payload without any"),
        }
    }

    pub(crate) fn no_payload_parts(&self, layout: &FixedLayout, slot: usize) -> (BitPattern, BitPattern) {
        let p = layout.payload_bits;
        let t = layout.extra_tag_bits;
        let slot = slot as u64;
        if slot < u64::from(self.used) {
            let value = self.payload_extra_inhabitants().value(slot as u32);
            return (value, BitPattern::zero(t));
        }
        let m = slot - u64::from(self.used);
        if p >= 32 {
            (BitPattern::from_u64(p, m), BitPattern::from_u64(t, 1))
        } else {
            let low = m & ((1u64 << p) - 1);
            (BitPattern::from_u64(p, low), BitPattern::from_u64(t, (m >> p) + 1))
        }
    }

    /// Index among the tag-encoded empty cases of a value with a nonzero
    /// extra tag, as an `i32`.
    fn emit_tagged_index(
        &self,
        layout: &FixedLayout,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: EmitVarId,
    ) -> EmitVarId {
        let p = layout.payload_bits;
        match payload {
            Some(payload) if p >= 32 => b.zext_or_trunc(payload, 32),
            _ => {
                let tag = b.zext_or_trunc(tag, 32);
                let high = b.sub_const(tag, 1);
                let high = b.shl_const(high, p);
                match payload {
                    Some(payload) => {
                        let low = b.zext(payload, 32);
                        b.or(high, low)
                    }
                    None => high,
                }
            }
        }
    }

    pub(crate) fn get_tag(
        &self,
        layout: &FixedLayout,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: Option<EmitVarId>,
    ) -> EmitVarId {
        let mut result = b.const_i32(-1);
        if self.used > 0 {
            let Some(payload) = payload else {
                unreachable!("extra inhabitants in a zero-sized payload");
            };
            let index = self.payload_extra_inhabitants().emit_index(b, payload);
            let claimed = b.icmp_const(ICmpPred::Ult, index, u64::from(self.used));
            result = b.select(claimed, index, result);
        }
        if let Some(tag) = tag {
            let index = self.emit_tagged_index(layout, b, payload, tag);
            let index = b.add_const(index, u64::from(self.used));
            let tagged = b.icmp_const(ICmpPred::Ne, tag, 0);
            result = b.select(tagged, index, result);
        }
        result
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
        let layout = s.layout();
        let default = EnumImplStrategy::default_block(b, default);
        let slots = s.slot_dests(dests);
        let payload_dest = slots.payload[0].unwrap_or(default);
        let empty_dest = |slot: u64| slots.empty[slot as usize];

        if let Some(tag) = tag {
            let tagged = b.append_block();
            let untagged = b.append_block();
            let is_tagged = b.icmp_const(ICmpPred::Ne, tag, 0);
            b.cond_br(is_tagged, tagged, untagged);

            b.position_at_end(tagged);
            let index = self.emit_tagged_index(layout, b, payload, tag);
            let used = u64::from(self.used);
            let cases = (used..self.empty_count)
                .filter_map(|slot| empty_dest(slot).map(|block| (slot - used, block)))
                .collect();
            b.switch(index, cases, default);

            b.position_at_end(untagged);
        }

        match payload {
            Some(payload) if self.used > 0 => {
                let index = self.payload_extra_inhabitants().emit_index(b, payload);
                let cases = (0..u64::from(self.used))
                    .filter_map(|slot| empty_dest(slot).map(|block| (slot, block)))
                    .collect();
                b.switch(index, cases, payload_dest);
            }
            _ => b.br(payload_dest, Vec::new()),
        }
    }

    pub(crate) fn inject(
        &self,
        layout: &FixedLayout,
        b: &mut IrBuilder,
        value: &Explosion,
    ) -> (Option<EmitVarId>, Option<EmitVarId>) {
        let payload = self.payload.pack(b, value);
        let tag = (layout.extra_tag_bits > 0).then(|| b.const_int(layout.extra_tag_bits, 0));
        (payload, tag)
    }

    pub(crate) fn project(&self, b: &mut IrBuilder, payload: Option<EmitVarId>) -> Explosion {
        self.payload.unpack(b, payload)
    }

    pub(crate) fn visit_references(
        &self,
        s: &EnumImplStrategy,
        b: &mut IrBuilder,
        payload: Option<EmitVarId>,
        tag: Option<EmitVarId>,
        f: &mut dyn FnMut(&mut IrBuilder, EmitVarId),
    ) {
        match self.copy_destroy {
            CopyDestroyKind::Pod => {}
            CopyDestroyKind::NullableRefcounted => {
                let Some(reference) = payload else {
                    unreachable!("nullable reference without a payload");
                };
                f(b, reference);
            }
            _ => {
                let case = self.get_tag(s.layout(), b, payload, tag);
                let is_payload = b.icmp_const(ICmpPred::Eq, case, PAYLOAD_TAG);
                let visit = b.append_block();
                let done = b.append_block();
                b.cond_br(is_payload, visit, done);
                b.position_at_end(visit);
                let value = self.payload.unpack(b, payload);
                self.payload.visit_references(b, &value, f);
                b.br(done, Vec::new());
                b.position_at_end(done);
            }
        }
    }

    /// Storage bits that tell the empty cases apart from payload values.
    pub(crate) fn no_payload_mask(&self, layout: &FixedLayout) -> BitPattern {
        if layout.extra_tag_bits == 0 {
            return self.payload_extra_inhabitants().mask().as_pattern().clone();
        }
        BitPattern::ones(layout.storage_bits())
    }
}
