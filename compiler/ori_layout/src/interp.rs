//! Reference interpreter for emitted functions.
//!
//! Runs an [`EmitFunction`] over a flat little-endian byte memory. Retain
//! and release are recorded, not performed; value-witness and runtime calls
//! are recorded and answered by a caller-supplied [`RuntimeHook`]. Tests use
//! this to check emitted enum operations bit for bit without a backend.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ir::{
    BinOp, Callee, EmitFunction, EmitInstr, EmitTerminator, EmitVarId, ICmpPred, IrType,
};
use crate::{BitPattern, BitPatternError};

/// Addresses are 64 bits wide in the interpreter.
pub const ADDRESS_BITS: u32 = 64;

const STEP_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("variable {0} used before definition")]
    UnboundVar(u32),
    #[error("access of {len} bytes at {addr:#x} is out of bounds")]
    OutOfBounds { addr: u64, len: usize },
    #[error("'{function}' takes {expected} arguments, got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("reached unreachable in block {0}")]
    Unreachable(u32),
    #[error("no runtime answer for {0}")]
    MissingRuntime(String),
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    #[error(transparent)]
    BitPattern(#[from] BitPatternError),
}

// ── Memory ──────────────────────────────────────────────────────────

/// Flat byte memory. Address zero and the first page are never handed out.
#[derive(Clone, Debug)]
pub struct Memory {
    bytes: Vec<u8>,
}

const MEMORY_BASE: u64 = 0x1000;

impl Memory {
    pub fn new() -> Self {
        Memory { bytes: Vec::new() }
    }

    /// Allocate `size` zeroed bytes aligned to `align`.
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let end = MEMORY_BASE + self.bytes.len() as u64;
        let start = end.div_ceil(align) * align;
        let new_len = (start + size.max(1) - MEMORY_BASE) as usize;
        self.bytes.resize(new_len, 0);
        start
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], InterpError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), InterpError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Read a `width`-bit integer.
    pub fn load(&self, addr: u64, width: u32) -> Result<BitPattern, InterpError> {
        let bytes = self.read(addr, width.div_ceil(8) as usize)?;
        Ok(BitPattern::from_le_bytes(width, bytes)?)
    }

    pub fn store(&mut self, addr: u64, value: &BitPattern) -> Result<(), InterpError> {
        self.write(addr, &value.to_le_bytes())
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, InterpError> {
        let out_of_bounds = InterpError::OutOfBounds { addr, len };
        let start = addr.checked_sub(MEMORY_BASE).ok_or(out_of_bounds.clone())? as usize;
        let end = start.checked_add(len).ok_or(out_of_bounds.clone())?;
        if end > self.bytes.len() {
            return Err(out_of_bounds);
        }
        Ok(start..end)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

// ── Hooks and traces ────────────────────────────────────────────────

/// One call made by the interpreted function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub callee: Callee,
    pub args: Vec<BitPattern>,
}

/// Answers value-witness and runtime calls.
pub trait RuntimeHook {
    fn call(
        &mut self,
        callee: &Callee,
        args: &[BitPattern],
        memory: &mut Memory,
    ) -> Result<Option<BitPattern>, InterpError>;
}

/// Hook that refuses every call.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoRuntime;

impl RuntimeHook for NoRuntime {
    fn call(&mut self, callee: &Callee, _: &[BitPattern], _: &mut Memory) -> Result<Option<BitPattern>, InterpError> {
        Err(InterpError::MissingRuntime(format!("{callee:?}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub results: Vec<BitPattern>,
    pub trace: Vec<TraceEvent>,
}

impl Execution {
    /// Trace events for `callee` only.
    pub fn calls_to(&self, callee: &Callee) -> Vec<&TraceEvent> {
        self.trace.iter().filter(|e| &e.callee == callee).collect()
    }
}

// ── Evaluation ──────────────────────────────────────────────────────

/// Run `func` with no runtime support.
pub fn run(func: &EmitFunction, args: &[BitPattern], memory: &mut Memory) -> Result<Execution, InterpError> {
    run_with(func, args, memory, &mut NoRuntime)
}

pub fn run_with(
    func: &EmitFunction,
    args: &[BitPattern],
    memory: &mut Memory,
    hook: &mut dyn RuntimeHook,
) -> Result<Execution, InterpError> {
    if args.len() != func.params.len() {
        return Err(InterpError::ArgumentCount {
            function: func.name.clone(),
            expected: func.params.len(),
            found: args.len(),
        });
    }
    let mut frame = Frame {
        func,
        values: FxHashMap::default(),
        trace: Vec::new(),
    };
    for (&param, arg) in func.params.iter().zip(args) {
        frame.bind(param, arg.clone());
    }

    let mut block = func.entry;
    for _ in 0..STEP_LIMIT {
        let current = func.block(block);
        trace!(function = %func.name, block = current.id.raw(), "interp block");
        for instr in &current.body {
            frame.exec(instr, memory, hook)?;
        }
        match &current.terminator {
            EmitTerminator::Return { values } => {
                let results = values.iter().map(|&v| frame.get(v).cloned()).collect::<Result<_, _>>()?;
                return Ok(Execution {
                    results,
                    trace: frame.trace,
                });
            }
            EmitTerminator::Jump { target, args } => {
                let values: Vec<BitPattern> = args.iter().map(|&v| frame.get(v).cloned()).collect::<Result<_, _>>()?;
                for (&param, value) in func.block(*target).params.iter().zip(values) {
                    frame.bind(param, value);
                }
                block = *target;
            }
            EmitTerminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                block = if frame.get(*cond)?.is_zero() {
                    *else_block
                } else {
                    *then_block
                };
            }
            EmitTerminator::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let value = frame.get(*scrutinee)?;
                block = cases
                    .iter()
                    .find(|&&(case, _)| BitPattern::from_u64(value.width(), case) == *value)
                    .map_or(*default, |&(_, target)| target);
            }
            EmitTerminator::Unreachable => return Err(InterpError::Unreachable(block.raw())),
        }
    }
    Err(InterpError::StepLimit(STEP_LIMIT))
}

struct Frame<'f> {
    func: &'f EmitFunction,
    values: FxHashMap<EmitVarId, BitPattern>,
    trace: Vec<TraceEvent>,
}

impl Frame<'_> {
    fn get(&self, var: EmitVarId) -> Result<&BitPattern, InterpError> {
        self.values.get(&var).ok_or(InterpError::UnboundVar(var.raw()))
    }

    fn bind(&mut self, var: EmitVarId, value: BitPattern) {
        let width = match self.func.var_type(var) {
            IrType::Int(width) => width,
            IrType::Ptr => ADDRESS_BITS,
        };
        debug_assert_eq!(value.width(), width, "value of wrong width bound to {}", var.raw());
        self.values.insert(var, value);
    }

    fn address(&self, var: EmitVarId, offset: u64) -> Result<u64, InterpError> {
        Ok(self.get(var)?.low_u64().wrapping_add(offset))
    }

    fn exec(&mut self, instr: &EmitInstr, memory: &mut Memory, hook: &mut dyn RuntimeHook) -> Result<(), InterpError> {
        match instr {
            EmitInstr::Const { dst, value } => self.bind(*dst, value.clone()),
            EmitInstr::Binary { dst, op, lhs, rhs } => {
                let (l, r) = (self.get(*lhs)?, self.get(*rhs)?);
                let result = match op {
                    BinOp::And => l & r,
                    BinOp::Or => l | r,
                    BinOp::Xor => l ^ r,
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    BinOp::Shl => l.shift_left(shift_amount(r)),
                    BinOp::LShr => l.shift_right(shift_amount(r)),
                };
                self.bind(*dst, result);
            }
            EmitInstr::ICmp { dst, pred, lhs, rhs } => {
                let (l, r) = (self.get(*lhs)?, self.get(*rhs)?);
                let holds = match pred {
                    ICmpPred::Eq => l == r,
                    ICmpPred::Ne => l != r,
                    ICmpPred::Ult => l.cmp_unsigned(r) == Ordering::Less,
                    ICmpPred::Ule => l.cmp_unsigned(r) != Ordering::Greater,
                    ICmpPred::Ugt => l.cmp_unsigned(r) == Ordering::Greater,
                    ICmpPred::Uge => l.cmp_unsigned(r) != Ordering::Less,
                    ICmpPred::Slt => l.cmp_signed(r) == Ordering::Less,
                    ICmpPred::Sge => l.cmp_signed(r) != Ordering::Less,
                };
                self.bind(*dst, BitPattern::from_u64(1, u64::from(holds)));
            }
            EmitInstr::ZExt { dst, value, width } => {
                let result = self.get(*value)?.zext(*width);
                self.bind(*dst, result);
            }
            EmitInstr::Trunc { dst, value, width } => {
                let result = self.get(*value)?.trunc(*width);
                self.bind(*dst, result);
            }
            EmitInstr::Select {
                dst,
                cond,
                then_value,
                else_value,
            } => {
                let chosen = if self.get(*cond)?.is_zero() {
                    else_value
                } else {
                    then_value
                };
                let result = self.get(*chosen)?.clone();
                self.bind(*dst, result);
            }
            EmitInstr::Load {
                dst,
                addr,
                offset,
                width,
            } => {
                let value = memory.load(self.address(*addr, *offset)?, *width)?;
                self.bind(*dst, value);
            }
            EmitInstr::Store { addr, offset, value } => {
                let at = self.address(*addr, *offset)?;
                memory.store(at, self.get(*value)?)?;
            }
            EmitInstr::Call { dst, callee, args } => {
                let args: Vec<BitPattern> = args.iter().map(|&v| self.get(v).cloned()).collect::<Result<_, _>>()?;
                trace!(?callee, "interp call");
                let result = match callee {
                    Callee::Retain | Callee::Release => None,
                    Callee::ValueWitness { .. } | Callee::Runtime { .. } => hook.call(callee, &args, memory)?,
                };
                self.trace.push(TraceEvent {
                    callee: *callee,
                    args,
                });
                if let Some(dst) = dst {
                    let Some(result) = result else {
                        return Err(InterpError::MissingRuntime(format!("{callee:?} returned nothing")));
                    };
                    self.bind(*dst, result);
                }
            }
        }
        Ok(())
    }
}

fn shift_amount(amount: &BitPattern) -> u32 {
    amount
        .to_u64()
        .and_then(|a| u32::try_from(a).ok())
        .unwrap_or(u32::MAX)
}
