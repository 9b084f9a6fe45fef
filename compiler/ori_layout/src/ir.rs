//! Emission IR: the backend sink for enum value operations.
//!
//! Layout strategies never talk to a real code generator. They emit into
//! this small basic-block IR through [`IrBuilder`](crate::IrBuilder), and a
//! backend (or the [interpreter](crate::interp) in tests) consumes the
//! finished [`EmitFunction`].
//!
//! # Architecture
//!
//! The same shape as the ARC IR: SSA-like variables named by
//! [`EmitVarId`], blocks named by [`EmitBlockId`], block parameters in
//! place of phi nodes (passed by [`EmitTerminator::Jump`] arguments).
//!
//! - **[`EmitFunction`]**: parameters, blocks, variable types
//! - **[`EmitBlock`]**: parameters, body instructions, terminator
//! - **[`EmitInstr`]**: integer arithmetic, loads/stores, calls
//! - **[`EmitTerminator`]**: return, jump, branch, switch
//!
//! Integers are arbitrary width (`i1` through `i4096`); addresses have
//! type [`IrType::Ptr`] and loads/stores take a constant byte offset.

use ori_types::Idx;

use crate::BitPattern;

// ── ID newtypes ─────────────────────────────────────────────────────

/// Variable ID within an [`EmitFunction`], allocated sequentially.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct EmitVarId(u32);

impl EmitVarId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Basic block ID within an [`EmitFunction`], allocated sequentially.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct EmitBlockId(u32);

impl EmitBlockId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Types ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum IrType {
    /// An integer of the given bit width.
    Int(u32),
    /// An address.
    Ptr,
}

impl IrType {
    /// Bit width of an integer type.
    ///
    /// # Panics
    ///
    /// Panics on [`IrType::Ptr`].
    pub fn int_width(self) -> u32 {
        match self {
            IrType::Int(width) => width,
            IrType::Ptr => panic!("pointer used where an integer was expected"),
        }
    }
}

// ── Operations ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Shl,
    /// Logical shift right.
    LShr,
}

/// Integer comparison predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ICmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sge,
}

/// Value-witness entry points of an opaque type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueWitness {
    /// `(dest, src)`
    InitializeWithCopy,
    /// `(dest, src)`
    InitializeWithTake,
    /// `(dest, src)`
    AssignWithCopy,
    /// `(dest, src)`
    AssignWithTake,
    /// `(addr)`
    Destroy,
    /// `(addr) -> i32`, `-1` for a valid value.
    GetExtraInhabitantIndex,
    /// `(index, addr)`
    StoreExtraInhabitant,
}

/// Runtime entry points for enums without a fixed layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum RuntimeFn {
    /// `(addr, empty_cases) -> i32`: `-1` for the payload case, otherwise
    /// the index of the empty case.
    GetEnumCaseSinglePayload,
    /// `(addr, tag, empty_cases)` with the same numbering.
    StoreEnumTagSinglePayload,
    /// `(addr) -> i32`: payload cases first, then empty cases.
    GetEnumCaseMultiPayload,
    /// `(addr, tag)` with the same numbering.
    StoreEnumTagMultiPayload,
    /// `(addr) -> i32` in case-tag numbering (payload cases negative).
    GetEnumTag,
    /// `(addr)`: leave the payload of the current case at `addr`.
    DestructiveProjectEnumData,
    /// `(addr, tag)` in case-tag numbering.
    DestructiveInjectEnumTag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Callee {
    /// Retain a native reference: `(ref)`.
    Retain,
    /// Release a native reference: `(ref)`.
    Release,
    ValueWitness { ty: Idx, witness: ValueWitness },
    Runtime { func: RuntimeFn, ty: Idx },
}

// ── Instructions ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum EmitInstr {
    Const {
        dst: EmitVarId,
        value: BitPattern,
    },
    Binary {
        dst: EmitVarId,
        op: BinOp,
        lhs: EmitVarId,
        rhs: EmitVarId,
    },
    /// Produces an `i1`.
    ICmp {
        dst: EmitVarId,
        pred: ICmpPred,
        lhs: EmitVarId,
        rhs: EmitVarId,
    },
    ZExt {
        dst: EmitVarId,
        value: EmitVarId,
        width: u32,
    },
    Trunc {
        dst: EmitVarId,
        value: EmitVarId,
        width: u32,
    },
    Select {
        dst: EmitVarId,
        cond: EmitVarId,
        then_value: EmitVarId,
        else_value: EmitVarId,
    },
    /// Load `ceil(width / 8)` little-endian bytes from `addr + offset`.
    Load {
        dst: EmitVarId,
        addr: EmitVarId,
        offset: u64,
        width: u32,
    },
    Store {
        addr: EmitVarId,
        offset: u64,
        value: EmitVarId,
    },
    Call {
        dst: Option<EmitVarId>,
        callee: Callee,
        args: Vec<EmitVarId>,
    },
}

impl EmitInstr {
    pub fn defined_var(&self) -> Option<EmitVarId> {
        match self {
            EmitInstr::Const { dst, .. }
            | EmitInstr::Binary { dst, .. }
            | EmitInstr::ICmp { dst, .. }
            | EmitInstr::ZExt { dst, .. }
            | EmitInstr::Trunc { dst, .. }
            | EmitInstr::Select { dst, .. }
            | EmitInstr::Load { dst, .. } => Some(*dst),
            EmitInstr::Call { dst, .. } => *dst,
            EmitInstr::Store { .. } => None,
        }
    }

    pub fn used_vars(&self) -> Vec<EmitVarId> {
        match self {
            EmitInstr::Const { .. } => Vec::new(),
            EmitInstr::Binary { lhs, rhs, .. } | EmitInstr::ICmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            EmitInstr::ZExt { value, .. } | EmitInstr::Trunc { value, .. } => vec![*value],
            EmitInstr::Select {
                cond,
                then_value,
                else_value,
                ..
            } => vec![*cond, *then_value, *else_value],
            EmitInstr::Load { addr, .. } => vec![*addr],
            EmitInstr::Store { addr, value, .. } => vec![*addr, *value],
            EmitInstr::Call { args, .. } => args.clone(),
        }
    }
}

// ── Terminators ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum EmitTerminator {
    Return {
        values: Vec<EmitVarId>,
    },
    /// Jump passing `args` to the target's block parameters.
    Jump {
        target: EmitBlockId,
        args: Vec<EmitVarId>,
    },
    /// `cond` is an `i1`.
    Branch {
        cond: EmitVarId,
        then_block: EmitBlockId,
        else_block: EmitBlockId,
    },
    /// Case values are compared against `scrutinee` truncated to its width.
    Switch {
        scrutinee: EmitVarId,
        cases: Vec<(u64, EmitBlockId)>,
        default: EmitBlockId,
    },
    Unreachable,
}

impl EmitTerminator {
    pub fn used_vars(&self) -> Vec<EmitVarId> {
        match self {
            EmitTerminator::Return { values } => values.clone(),
            EmitTerminator::Jump { args, .. } => args.clone(),
            EmitTerminator::Branch { cond, .. } => vec![*cond],
            EmitTerminator::Switch { scrutinee, .. } => vec![*scrutinee],
            EmitTerminator::Unreachable => Vec::new(),
        }
    }

    pub fn successors(&self) -> Vec<EmitBlockId> {
        match self {
            EmitTerminator::Return { .. } | EmitTerminator::Unreachable => Vec::new(),
            EmitTerminator::Jump { target, .. } => vec![*target],
            EmitTerminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            EmitTerminator::Switch { cases, default, .. } => {
                let mut targets: Vec<EmitBlockId> = cases.iter().map(|&(_, b)| b).collect();
                targets.push(*default);
                targets
            }
        }
    }
}

// ── Blocks ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct EmitBlock {
    pub id: EmitBlockId,
    pub params: Vec<EmitVarId>,
    pub body: Vec<EmitInstr>,
    pub terminator: EmitTerminator,
}

// ── Functions ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct EmitFunction {
    pub name: String,
    pub params: Vec<EmitVarId>,
    /// `blocks[entry.index()]` is the entry.
    pub blocks: Vec<EmitBlock>,
    pub entry: EmitBlockId,
    /// Type of each variable, indexed by `EmitVarId::index()`.
    pub var_types: Vec<IrType>,
}

impl EmitFunction {
    #[inline]
    pub fn var_type(&self, var: EmitVarId) -> IrType {
        debug_assert!(
            var.index() < self.var_types.len(),
            "EmitVarId {} out of bounds (have {} vars)",
            var.raw(),
            self.var_types.len(),
        );
        self.var_types[var.index()]
    }

    pub fn block(&self, id: EmitBlockId) -> &EmitBlock {
        &self.blocks[id.index()]
    }

    /// Every call in the function, in block order.
    pub fn calls(&self) -> impl Iterator<Item = (&Callee, &[EmitVarId])> + '_ {
        self.blocks.iter().flat_map(|block| {
            block.body.iter().filter_map(|instr| match instr {
                EmitInstr::Call { callee, args, .. } => Some((callee, args.as_slice())),
                _ => None,
            })
        })
    }

    /// Number of instructions across all blocks.
    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.body.len()).sum()
    }
}
