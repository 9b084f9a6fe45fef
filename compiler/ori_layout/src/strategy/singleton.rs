//! Enums with at most one case: the payload's representation, unchanged.

use std::rc::Rc;

use super::{EnumElement, FixedLayout};
use crate::builder::IrBuilder;
use crate::ir::EmitVarId;
use crate::{Explosion, SpareBitVector, TypeInfo};

#[derive(Debug)]
pub(crate) struct SingletonStrategy {
    payload: Option<Rc<TypeInfo>>,
}

impl SingletonStrategy {
    /// The layout is `None` when the payload has no fixed size.
    pub(crate) fn new(elements: &[EnumElement]) -> (Self, Option<FixedLayout>) {
        let payload = elements.first().and_then(|e| e.payload.clone());
        let layout = match &payload {
            None => Some(FixedLayout {
                size: 0,
                alignment: 1,
                payload_bits: 0,
                extra_tag_bits: 0,
                spare_bits: SpareBitVector::clear(0),
                pod: true,
                bitwise_takable: true,
                extra_inhabitants: None,
            }),
            Some(p) if p.is_fixed() => Some(FixedLayout {
                size: p.size,
                alignment: p.alignment,
                payload_bits: p.storage_bits(),
                extra_tag_bits: 0,
                spare_bits: p.spare_bits.clone(),
                pod: p.pod,
                bitwise_takable: p.bitwise_takable,
                extra_inhabitants: p.extra_inhabitants.clone(),
            }),
            Some(_) => None,
        };
        (SingletonStrategy { payload }, layout)
    }

    pub(crate) fn payload(&self) -> Option<&Rc<TypeInfo>> {
        self.payload.as_ref()
    }

    /// The only case is case 0: `-1` if it carries a payload, else `0`.
    /// An enum without cases has no values, so its answer is arbitrary.
    pub(crate) fn get_tag(&self, b: &mut IrBuilder) -> EmitVarId {
        b.const_i32(if self.payload.is_some() { -1 } else { 0 })
    }

    pub(crate) fn inject(&self, b: &mut IrBuilder, payload: &Explosion) -> Option<EmitVarId> {
        match &self.payload {
            Some(info) => info.pack(b, payload),
            None => None,
        }
    }

    pub(crate) fn project(&self, b: &mut IrBuilder, packed: Option<EmitVarId>) -> Explosion {
        match &self.payload {
            Some(info) => info.unpack(b, packed),
            None => Explosion::new(),
        }
    }

    pub(crate) fn visit_references(
        &self,
        b: &mut IrBuilder,
        packed: Option<EmitVarId>,
        f: &mut dyn FnMut(&mut IrBuilder, EmitVarId),
    ) {
        if let Some(info) = &self.payload {
            let value = info.unpack(b, packed);
            info.visit_references(b, &value, f);
        }
    }
}
