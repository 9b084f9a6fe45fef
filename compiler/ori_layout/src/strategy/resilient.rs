//! Enums whose layout is not known statically.
//!
//! Resilient enums go through the case-tag entry points of the runtime.
//! Payload enums whose payload has no fixed size use the single- and
//! multi-payload runtime layouts, which agree with the fixed layouts on
//! what the tag values mean.

use super::{EnumImplStrategy, EnumStrategyKind};
use crate::builder::IrBuilder;
use crate::ir::{Callee, EmitBlockId, EmitVarId, RuntimeFn};

impl EnumImplStrategy {
    fn runtime(&self, func: RuntimeFn) -> Callee {
        Callee::Runtime { func, ty: self.ty }
    }

    fn empty_case_count(&self, b: &mut IrBuilder) -> EmitVarId {
        b.const_int(32, self.empty_cases.len() as u64)
    }

    pub(super) fn runtime_get_tag(&self, b: &mut IrBuilder, addr: EmitVarId) -> EmitVarId {
        match self.kind {
            EnumStrategyKind::SinglePayload => {
                let empty_cases = self.empty_case_count(b);
                b.call_i32(self.runtime(RuntimeFn::GetEnumCaseSinglePayload), vec![addr, empty_cases])
            }
            EnumStrategyKind::MultiPayload => {
                let case = b.call_i32(self.runtime(RuntimeFn::GetEnumCaseMultiPayload), vec![addr]);
                b.sub_const(case, self.payload_cases.len() as u64)
            }
            _ => b.call_i32(self.runtime(RuntimeFn::GetEnumTag), vec![addr]),
        }
    }

    pub(super) fn runtime_store_tag(&self, b: &mut IrBuilder, case: usize, addr: EmitVarId) {
        let tag = self.tag_index(case);
        match self.kind {
            EnumStrategyKind::SinglePayload => {
                let tag = b.const_i32(tag);
                let empty_cases = self.empty_case_count(b);
                b.call(
                    self.runtime(RuntimeFn::StoreEnumTagSinglePayload),
                    vec![addr, tag, empty_cases],
                    None,
                );
            }
            EnumStrategyKind::MultiPayload => {
                let payloads = self.payload_cases.len() as i64;
                let fragile = i32::try_from(i64::from(tag) + payloads)
                    .unwrap_or_else(|_| panic!("case {case} of '{}' has no 32-bit tag", self.name));
                let tag = b.const_i32(fragile);
                b.call(self.runtime(RuntimeFn::StoreEnumTagMultiPayload), vec![addr, tag], None);
            }
            _ => {
                let tag = b.const_i32(tag);
                b.call(self.runtime(RuntimeFn::DestructiveInjectEnumTag), vec![addr, tag], None);
            }
        }
    }

    /// The single-payload runtime layout keeps payloads untagged.
    pub(super) fn runtime_project(&self, b: &mut IrBuilder, addr: EmitVarId) {
        if self.kind != EnumStrategyKind::SinglePayload {
            b.call(self.runtime(RuntimeFn::DestructiveProjectEnumData), vec![addr], None);
        }
    }

    pub(super) fn runtime_switch(
        &self,
        b: &mut IrBuilder,
        addr: EmitVarId,
        dests: &[(usize, EmitBlockId)],
        default: Option<EmitBlockId>,
    ) {
        let tag = self.runtime_get_tag(b, addr);
        let cases = dests
            .iter()
            .map(|&(case, block)| (u64::from(self.tag_index(case) as u32), block))
            .collect();
        let default = Self::default_block(b, default);
        b.switch(tag, cases, default);
    }
}
