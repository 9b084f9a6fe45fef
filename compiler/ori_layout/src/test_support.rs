//! Fixture builders shared by the unit tests.

use ori_diagnostic::{DiagnosticContext, DiagnosticKind, DiagnosticSink};
use ori_ir::{FileId, SourceLoc};
use ori_types::{
    AstContext, DeclFlags, DeclId, EnumCase, FileKind, GenericParamDecl, Idx, NominalDecl, StoredField,
};

use crate::interp::{self, Execution, Memory, RuntimeHook};
use crate::ir::{EmitBlockId, EmitFunction, EmitVarId, IrType};
use crate::{BitPattern, CaseSlot, EnumImplStrategy, Explosion, IrBuilder, TargetConfig, TypeInfoStore};

pub(crate) struct Fixture {
    pub ast: AstContext,
    pub file: FileId,
}

impl Fixture {
    pub fn new() -> Self {
        let mut ast = AstContext::new();
        let file = ast.add_file("main.ori", FileKind::Source);
        Fixture { ast, file }
    }

    pub fn loc(&self, offset: u32) -> SourceLoc {
        SourceLoc::new(self.file, offset)
    }

    pub fn case(&self, name: &str) -> EnumCase {
        EnumCase::new(self.ast.intern(name))
    }

    pub fn payload_case(&self, name: &str, payload: Idx) -> EnumCase {
        EnumCase::new(self.ast.intern(name)).with_payload(payload)
    }

    pub fn enum_decl(&mut self, name: &str, cases: Vec<EnumCase>, flags: DeclFlags) -> DeclId {
        let decl = NominalDecl::new_enum(self.ast.intern(name), self.file, cases)
            .with_flags(flags)
            .at(self.loc(0));
        self.ast.add_nominal(decl)
    }

    pub fn enum_ty(&mut self, name: &str, cases: Vec<EnumCase>) -> Idx {
        let decl = self.enum_decl(name, cases, DeclFlags::empty());
        self.ast.declared_type(decl)
    }

    pub fn struct_ty(&mut self, name: &str, fields: &[(&str, Idx)]) -> Idx {
        let fields = fields
            .iter()
            .map(|&(field, ty)| StoredField {
                name: self.ast.intern(field),
                ty,
            })
            .collect();
        let decl = NominalDecl::new_struct(self.ast.intern(name), self.file).with_fields(fields);
        let decl = self.ast.add_nominal(decl);
        self.ast.declared_type(decl)
    }

    pub fn class_ty(&mut self, name: &str) -> Idx {
        let decl = NominalDecl::new_class(self.ast.intern(name), self.file);
        let decl = self.ast.add_nominal(decl);
        self.ast.declared_type(decl)
    }

    /// A generic enum `name<T>` built from `cases(T)`; returns the
    /// declaration for instantiation with [`instantiate`](Self::instantiate).
    pub fn generic_enum(&mut self, name: &str, cases: impl FnOnce(&Self, Idx) -> Vec<EnumCase>) -> DeclId {
        let (param, param_ty) = self.ast.add_generic_param(GenericParamDecl {
            name: self.ast.intern("T"),
            conforms_to: Vec::new(),
        });
        let cases = cases(self, param_ty);
        let decl = NominalDecl::new_enum(self.ast.intern(name), self.file, cases)
            .with_generic_params(vec![param])
            .at(self.loc(0));
        self.ast.add_nominal(decl)
    }

    pub fn instantiate(&mut self, decl: DeclId, args: Vec<Idx>) -> Idx {
        self.ast.types.nominal(decl, args)
    }

    pub fn store(&mut self) -> TypeInfoStore<'_> {
        TypeInfoStore::new(&mut self.ast, TargetConfig::default())
    }
}

/// Sink that keeps every record.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub records: Vec<(DiagnosticKind, SourceLoc, DiagnosticContext)>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.records.iter().map(|(kind, _, _)| *kind).collect()
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&mut self, kind: DiagnosticKind, location: SourceLoc, context: DiagnosticContext) {
        self.records.push((kind, location, context));
    }
}

/// Build a function whose parameters have `params` types.
pub(crate) fn emit(params: &[IrType], body: impl FnOnce(&mut IrBuilder, &[EmitVarId])) -> EmitFunction {
    let mut b = IrBuilder::new("test");
    let vars: Vec<EmitVarId> = params.iter().map(|&ty| b.param(ty)).collect();
    body(&mut b, &vars);
    b.finish()
}

/// Run `func`, panicking on interpreter errors.
pub(crate) fn exec(func: &EmitFunction, args: &[BitPattern], memory: &mut Memory) -> Execution {
    match interp::run(func, args, memory) {
        Ok(execution) => execution,
        Err(err) => panic!("interpreting '{}' failed: {err}", func.name),
    }
}

pub(crate) fn exec_with(
    func: &EmitFunction,
    args: &[BitPattern],
    memory: &mut Memory,
    hook: &mut dyn RuntimeHook,
) -> Execution {
    match interp::run_with(func, args, memory, hook) {
        Ok(execution) => execution,
        Err(err) => panic!("interpreting '{}' failed: {err}", func.name),
    }
}

/// An address as an interpreter argument.
pub(crate) fn addr(value: u64) -> BitPattern {
    BitPattern::from_u64(interp::ADDRESS_BITS, value)
}

// ── Enum round trips ────────────────────────────────────────────────

fn case_params(payload: &[BitPattern]) -> Vec<IrType> {
    let mut params = vec![IrType::Ptr];
    params.extend(payload.iter().map(|p| IrType::Int(p.width())));
    params
}

/// Emit the injection of `case` and store it at the first parameter.
fn store_case(s: &EnumImplStrategy, b: &mut IrBuilder, case: usize, params: &[EmitVarId]) {
    let payload = Explosion::from_values(params[1..].iter().copied());
    let is_payload = matches!(s.element(case).slot, CaseSlot::Payload(_));
    let value = s.emit_value_injection(b, case, is_payload.then_some(&payload));
    s.store(b, &value, params[0], 0);
}

fn run_on_fresh_memory(s: &EnumImplStrategy, func: &EmitFunction, payload: &[BitPattern]) -> (Execution, Vec<u8>) {
    let mut memory = Memory::new();
    let size = s.fixed_size().unwrap_or(0);
    let at = memory.alloc(size, 8);
    let mut args = vec![addr(at)];
    args.extend(payload.iter().cloned());
    let execution = exec(func, &args, &mut memory);
    let bytes = match memory.read(at, size as usize) {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => panic!("{err}"),
    };
    (execution, bytes)
}

/// Inject `case` into fresh memory and read its case tag back; also
/// returns the stored bytes.
pub(crate) fn inject_and_get_tag(s: &EnumImplStrategy, case: usize, payload: &[BitPattern]) -> (i64, Vec<u8>) {
    let func = emit(&case_params(payload), |b, p| {
        store_case(s, b, case, p);
        let tag = s.emit_get_tag(b, p[0]);
        b.ret(vec![tag]);
    });
    let (execution, bytes) = run_on_fresh_memory(s, &func, payload);
    (execution.results[0].to_i64(), bytes)
}

/// Inject `case`, then switch over every case; returns the case whose
/// block was reached.
pub(crate) fn switch_on_case(s: &EnumImplStrategy, case: usize, payload: &[BitPattern], indirect: bool) -> i64 {
    let func = emit(&case_params(payload), |b, p| {
        store_case(s, b, case, p);
        let dests: Vec<(usize, EmitBlockId)> = (0..s.elements().len()).map(|c| (c, b.append_block())).collect();
        if indirect {
            s.emit_indirect_switch(b, p[0], &dests, None);
        } else {
            let value = s.load(b, p[0], 0);
            s.emit_value_switch(b, &value, &dests, None);
        }
        for &(c, block) in &dests {
            b.position_at_end(block);
            let reached = b.const_i32(i32::try_from(c).unwrap_or(i32::MAX));
            b.ret(vec![reached]);
        }
    });
    let (execution, _) = run_on_fresh_memory(s, &func, payload);
    execution.results[0].to_i64()
}

/// Inject `case` through memory and project its payload back out.
pub(crate) fn inject_and_project(s: &EnumImplStrategy, case: usize, payload: &[BitPattern]) -> Vec<BitPattern> {
    let func = emit(&case_params(payload), |b, p| {
        store_case(s, b, case, p);
        let value = s.load(b, p[0], 0);
        let projected = s.emit_value_projection(b, case, &value);
        b.ret(projected.values().to_vec());
    });
    run_on_fresh_memory(s, &func, payload).0.results
}
