//! Instruction builder for the emission IR.
//!
//! Follows the `Builder` pattern of the LLVM backend: a builder owns the
//! function under construction and a cursor (the current block); every
//! instruction method appends at the cursor and returns the new value.
//! Terminator methods close the current block; emitting into a closed block
//! is a bug in the caller and panics.
//!
//! Besides plain instructions the builder knows two mask-driven helpers,
//! [`gather_bits`](IrBuilder::gather_bits) and
//! [`scatter_bits`](IrBuilder::scatter_bits), which emit the shift-and-mask
//! sequences for one run of contiguous mask bits at a time.

use crate::ir::{
    BinOp, Callee, EmitBlock, EmitBlockId, EmitFunction, EmitInstr, EmitTerminator, EmitVarId, ICmpPred,
    IrType,
};
use crate::{BitPattern, SpareBitVector};

struct PendingBlock {
    params: Vec<EmitVarId>,
    body: Vec<EmitInstr>,
    terminator: Option<EmitTerminator>,
}

pub struct IrBuilder {
    name: String,
    params: Vec<EmitVarId>,
    blocks: Vec<PendingBlock>,
    var_types: Vec<IrType>,
    current: EmitBlockId,
}

impl IrBuilder {
    /// Start a function with an empty entry block and the cursor in it.
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = IrBuilder {
            name: name.into(),
            params: Vec::new(),
            blocks: Vec::new(),
            var_types: Vec::new(),
            current: EmitBlockId::new(0),
        };
        let entry = builder.append_block();
        builder.current = entry;
        builder
    }

    /// Add a function parameter.
    pub fn param(&mut self, ty: IrType) -> EmitVarId {
        let var = self.fresh(ty);
        self.params.push(var);
        var
    }

    // ── Blocks ──────────────────────────────────────────────────────

    pub fn append_block(&mut self) -> EmitBlockId {
        self.append_block_with_params(&[]).0
    }

    pub fn append_block_with_params(&mut self, types: &[IrType]) -> (EmitBlockId, Vec<EmitVarId>) {
        let id = EmitBlockId::new(
            u32::try_from(self.blocks.len()).unwrap_or_else(|_| panic!("block count exceeds u32::MAX")),
        );
        let params: Vec<EmitVarId> = types.iter().map(|&ty| self.fresh(ty)).collect();
        self.blocks.push(PendingBlock {
            params: params.clone(),
            body: Vec::new(),
            terminator: None,
        });
        (id, params)
    }

    pub fn position_at_end(&mut self, block: EmitBlockId) {
        self.current = block;
    }

    #[inline]
    pub fn current_block(&self) -> EmitBlockId {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.index()].terminator.is_some()
    }

    pub fn var_type(&self, var: EmitVarId) -> IrType {
        self.var_types[var.index()]
    }

    /// Bit width of an integer variable.
    pub fn width(&self, var: EmitVarId) -> u32 {
        self.var_type(var).int_width()
    }

    fn fresh(&mut self, ty: IrType) -> EmitVarId {
        let id = u32::try_from(self.var_types.len())
            .unwrap_or_else(|_| panic!("variable count exceeds u32::MAX"));
        self.var_types.push(ty);
        EmitVarId::new(id)
    }

    fn push(&mut self, instr: EmitInstr) {
        let block = &mut self.blocks[self.current.index()];
        assert!(
            block.terminator.is_none(),
            "emitting into terminated block {}",
            self.current.raw()
        );
        block.body.push(instr);
    }

    fn terminate(&mut self, terminator: EmitTerminator) {
        let block = &mut self.blocks[self.current.index()];
        assert!(
            block.terminator.is_none(),
            "block {} is already terminated",
            self.current.raw()
        );
        block.terminator = Some(terminator);
    }

    // ── Constants ───────────────────────────────────────────────────

    pub fn const_pattern(&mut self, value: BitPattern) -> EmitVarId {
        let dst = self.fresh(IrType::Int(value.width()));
        self.push(EmitInstr::Const { dst, value });
        dst
    }

    pub fn const_int(&mut self, width: u32, value: u64) -> EmitVarId {
        self.const_pattern(BitPattern::from_u64(width, value))
    }

    pub fn const_i32(&mut self, value: i32) -> EmitVarId {
        self.const_pattern(BitPattern::from_i64(32, i64::from(value)))
    }

    // ── Arithmetic ──────────────────────────────────────────────────

    fn binary(&mut self, op: BinOp, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        let width = self.width(lhs);
        assert_eq!(
            width,
            self.width(rhs),
            "{op:?} operands differ in width: i{width} vs i{}",
            self.width(rhs)
        );
        let dst = self.fresh(IrType::Int(width));
        self.push(EmitInstr::Binary { dst, op, lhs, rhs });
        dst
    }

    pub fn and(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::Or, lhs, rhs)
    }

    pub fn xor(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::Xor, lhs, rhs)
    }

    pub fn add(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::Shl, lhs, rhs)
    }

    pub fn lshr(&mut self, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        self.binary(BinOp::LShr, lhs, rhs)
    }

    /// `value & mask`, with `mask` a constant of the same width.
    pub fn and_const(&mut self, value: EmitVarId, mask: &BitPattern) -> EmitVarId {
        let mask = self.const_pattern(mask.clone());
        self.and(value, mask)
    }

    pub fn or_const(&mut self, value: EmitVarId, bits: &BitPattern) -> EmitVarId {
        let bits = self.const_pattern(bits.clone());
        self.or(value, bits)
    }

    pub fn add_const(&mut self, value: EmitVarId, amount: u64) -> EmitVarId {
        let width = self.width(value);
        let amount = self.const_int(width, amount);
        self.add(value, amount)
    }

    pub fn sub_const(&mut self, value: EmitVarId, amount: u64) -> EmitVarId {
        let width = self.width(value);
        let amount = self.const_int(width, amount);
        self.sub(value, amount)
    }

    pub fn shl_const(&mut self, value: EmitVarId, amount: u32) -> EmitVarId {
        let width = self.width(value);
        if amount == 0 {
            return value;
        }
        if amount >= width {
            return self.const_int(width, 0);
        }
        let amount = self.const_int(width, u64::from(amount));
        self.shl(value, amount)
    }

    pub fn lshr_const(&mut self, value: EmitVarId, amount: u32) -> EmitVarId {
        let width = self.width(value);
        if amount == 0 {
            return value;
        }
        if amount >= width {
            return self.const_int(width, 0);
        }
        let amount = self.const_int(width, u64::from(amount));
        self.lshr(value, amount)
    }

    pub fn not(&mut self, value: EmitVarId) -> EmitVarId {
        let ones = self.const_pattern(BitPattern::ones(self.width(value)));
        self.xor(value, ones)
    }

    // ── Comparisons and selection ──────────────────────────────────

    pub fn icmp(&mut self, pred: ICmpPred, lhs: EmitVarId, rhs: EmitVarId) -> EmitVarId {
        assert_eq!(self.width(lhs), self.width(rhs), "icmp operands differ in width");
        let dst = self.fresh(IrType::Int(1));
        self.push(EmitInstr::ICmp { dst, pred, lhs, rhs });
        dst
    }

    pub fn icmp_const(&mut self, pred: ICmpPred, lhs: EmitVarId, rhs: u64) -> EmitVarId {
        let width = self.width(lhs);
        let rhs = self.const_int(width, rhs);
        self.icmp(pred, lhs, rhs)
    }

    /// `value == 0`
    pub fn is_zero(&mut self, value: EmitVarId) -> EmitVarId {
        self.icmp_const(ICmpPred::Eq, value, 0)
    }

    pub fn select(&mut self, cond: EmitVarId, then_value: EmitVarId, else_value: EmitVarId) -> EmitVarId {
        assert_eq!(self.width(cond), 1, "select condition must be i1");
        let ty = self.var_type(then_value);
        assert_eq!(ty, self.var_type(else_value), "select arms differ in type");
        let dst = self.fresh(ty);
        self.push(EmitInstr::Select {
            dst,
            cond,
            then_value,
            else_value,
        });
        dst
    }

    // ── Width changes ───────────────────────────────────────────────

    pub fn zext(&mut self, value: EmitVarId, width: u32) -> EmitVarId {
        assert!(self.width(value) <= width, "zext to a narrower type");
        let dst = self.fresh(IrType::Int(width));
        self.push(EmitInstr::ZExt { dst, value, width });
        dst
    }

    pub fn trunc(&mut self, value: EmitVarId, width: u32) -> EmitVarId {
        assert!(self.width(value) >= width, "trunc to a wider type");
        let dst = self.fresh(IrType::Int(width));
        self.push(EmitInstr::Trunc { dst, value, width });
        dst
    }

    /// Zero-extend or truncate; returns `value` itself when the width
    /// already matches.
    pub fn zext_or_trunc(&mut self, value: EmitVarId, width: u32) -> EmitVarId {
        let from = self.width(value);
        match from.cmp(&width) {
            std::cmp::Ordering::Equal => value,
            std::cmp::Ordering::Less => self.zext(value, width),
            std::cmp::Ordering::Greater => self.trunc(value, width),
        }
    }

    // ── Memory ──────────────────────────────────────────────────────

    pub fn load(&mut self, addr: EmitVarId, offset: u64, width: u32) -> EmitVarId {
        assert_eq!(self.var_type(addr), IrType::Ptr, "load from a non-pointer");
        let dst = self.fresh(IrType::Int(width));
        self.push(EmitInstr::Load {
            dst,
            addr,
            offset,
            width,
        });
        dst
    }

    pub fn store(&mut self, value: EmitVarId, addr: EmitVarId, offset: u64) {
        assert_eq!(self.var_type(addr), IrType::Ptr, "store to a non-pointer");
        self.push(EmitInstr::Store { addr, offset, value });
    }

    // ── Calls ───────────────────────────────────────────────────────

    pub fn call(&mut self, callee: Callee, args: Vec<EmitVarId>, ret: Option<IrType>) -> Option<EmitVarId> {
        let dst = ret.map(|ty| self.fresh(ty));
        self.push(EmitInstr::Call { dst, callee, args });
        dst
    }

    /// A call returning an `i32`.
    pub fn call_i32(&mut self, callee: Callee, args: Vec<EmitVarId>) -> EmitVarId {
        let dst = self.fresh(IrType::Int(32));
        self.push(EmitInstr::Call {
            dst: Some(dst),
            callee,
            args,
        });
        dst
    }

    pub fn retain(&mut self, reference: EmitVarId) {
        self.call(Callee::Retain, vec![reference], None);
    }

    pub fn release(&mut self, reference: EmitVarId) {
        self.call(Callee::Release, vec![reference], None);
    }

    // ── Terminators ─────────────────────────────────────────────────

    pub fn ret(&mut self, values: Vec<EmitVarId>) {
        self.terminate(EmitTerminator::Return { values });
    }

    pub fn br(&mut self, target: EmitBlockId, args: Vec<EmitVarId>) {
        self.terminate(EmitTerminator::Jump { target, args });
    }

    pub fn cond_br(&mut self, cond: EmitVarId, then_block: EmitBlockId, else_block: EmitBlockId) {
        assert_eq!(self.width(cond), 1, "branch condition must be i1");
        self.terminate(EmitTerminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn switch(&mut self, scrutinee: EmitVarId, cases: Vec<(u64, EmitBlockId)>, default: EmitBlockId) {
        self.terminate(EmitTerminator::Switch {
            scrutinee,
            cases,
            default,
        });
    }

    pub fn unreachable(&mut self) {
        self.terminate(EmitTerminator::Unreachable);
    }

    /// A fresh block ending in `unreachable`; the cursor does not move.
    pub fn unreachable_block(&mut self) -> EmitBlockId {
        let saved = self.current;
        let block = self.append_block();
        self.position_at_end(block);
        self.unreachable();
        self.position_at_end(saved);
        block
    }

    /// Finish the function.
    ///
    /// # Panics
    ///
    /// Panics if any block lacks a terminator.
    pub fn finish(self) -> EmitFunction {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                let id = EmitBlockId::new(i as u32);
                let Some(terminator) = block.terminator else {
                    panic!("block {i} of '{}' has no terminator", self.name);
                };
                EmitBlock {
                    id,
                    params: block.params,
                    body: block.body,
                    terminator,
                }
            })
            .collect();
        EmitFunction {
            name: self.name,
            params: self.params,
            blocks,
            entry: EmitBlockId::new(0),
            var_types: self.var_types,
        }
    }

    // ── Mask-driven bit movement ───────────────────────────────────

    /// Collect the bits of `value` under the set bits of `mask` into a
    /// compact integer of `width` bits (lowest mask bit first). Bits past
    /// `width` are dropped.
    pub fn gather_bits(&mut self, value: EmitVarId, mask: &SpareBitVector, width: u32) -> EmitVarId {
        assert_eq!(self.width(value), mask.width(), "gather through a mask of another width");
        let mut result = self.const_int(width, 0);
        let mut packed = 0u32;
        for (start, len) in mask.runs() {
            if packed >= width {
                break;
            }
            let shifted = self.lshr_const(value, start);
            let run = self.and_const(shifted, &BitPattern::ones(len).zext(mask.width()));
            let run = self.zext_or_trunc(run, width);
            let run = self.shl_const(run, packed);
            result = self.or(result, run);
            packed += len;
        }
        result
    }

    /// Spread the low `mask.count()` bits of `value` over the set bits of
    /// `mask`. The result is `mask.width()` bits wide.
    pub fn scatter_bits(&mut self, value: EmitVarId, mask: &SpareBitVector) -> EmitVarId {
        let width = mask.width();
        let value = self.zext_or_trunc(value, width);
        let mut result = self.const_int(width, 0);
        let mut packed = 0u32;
        for (start, len) in mask.runs() {
            let shifted = self.lshr_const(value, packed);
            let run = self.and_const(shifted, &BitPattern::ones(len).zext(width));
            let run = self.shl_const(run, start);
            result = self.or(result, run);
            packed += len;
        }
        result
    }
}
