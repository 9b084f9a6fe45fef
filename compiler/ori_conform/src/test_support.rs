//! Fixture builders shared by the unit tests.

use ori_diagnostic::{Diagnostic, DiagnosticConfig, DiagnosticQueue};
use ori_ir::{FileId, SourceLoc};
use ori_types::{
    AstContext, DeclFlags, DeclId, EnumCase, ExtId, ExtensionDecl, FileKind, Idx, InheritedEntry,
    KnownProtocol, NominalDecl, ProtoId, ProtocolDecl, Superclass,
};

use crate::{ConformanceId, ConformanceTables, LazyResolver, ResolutionContext};

pub(crate) struct Fixture {
    pub ast: AstContext,
    pub tables: ConformanceTables,
    pub queue: DiagnosticQueue,
    pub file: FileId,
}

impl Fixture {
    pub fn new() -> Self {
        let mut ast = AstContext::new();
        let file = ast.add_file("main.ori", FileKind::Source);
        Fixture {
            ast,
            tables: ConformanceTables::new(),
            queue: DiagnosticQueue::with_config(DiagnosticConfig::unlimited()),
            file,
        }
    }

    pub fn loc(&self, offset: u32) -> SourceLoc {
        SourceLoc::new(self.file, offset)
    }

    pub fn protocol(&mut self, name: &str, inherits: &[ProtoId]) -> ProtoId {
        let mut decl = ProtocolDecl::new(self.ast.intern(name), self.file);
        for &parent in inherits {
            let ty = self.ast.types.protocol(parent);
            decl = decl.with_inherited(InheritedEntry::new(ty, SourceLoc::INVALID));
        }
        self.ast.add_protocol(decl)
    }

    pub fn known_protocol(&mut self, name: &str, known: KnownProtocol) -> ProtoId {
        let decl = ProtocolDecl::new(self.ast.intern(name), self.file).known(known);
        self.ast.add_protocol(decl)
    }

    fn clause(&mut self, conforms: &[(ProtoId, u32)]) -> Vec<InheritedEntry> {
        conforms
            .iter()
            .map(|&(p, offset)| InheritedEntry::new(self.ast.types.protocol(p), self.loc(offset)))
            .collect()
    }

    pub fn struct_decl(&mut self, name: &str, offset: u32, conforms: &[(ProtoId, u32)]) -> DeclId {
        let mut decl = NominalDecl::new_struct(self.ast.intern(name), self.file).at(self.loc(offset));
        for entry in self.clause(conforms) {
            decl = decl.with_inherited(entry);
        }
        self.ast.add_nominal(decl)
    }

    pub fn class_decl(
        &mut self,
        name: &str,
        offset: u32,
        superclass: Option<DeclId>,
        conforms: &[(ProtoId, u32)],
    ) -> DeclId {
        let mut decl = NominalDecl::new_class(self.ast.intern(name), self.file).at(self.loc(offset));
        if let Some(superclass) = superclass {
            let ty = self.ast.declared_type(superclass);
            decl = decl.with_superclass(Superclass {
                ty,
                loc: self.loc(offset + 1),
            });
        }
        for entry in self.clause(conforms) {
            decl = decl.with_inherited(entry);
        }
        self.ast.add_nominal(decl)
    }

    pub fn enum_decl(&mut self, name: &str, cases: Vec<EnumCase>, flags: DeclFlags) -> DeclId {
        let decl = NominalDecl::new_enum(self.ast.intern(name), self.file, cases)
            .with_flags(flags)
            .at(self.loc(0));
        self.ast.add_nominal(decl)
    }

    pub fn extension(&mut self, nominal: DeclId, offset: u32, conforms: &[(ProtoId, u32)]) -> ExtId {
        let mut ext = ExtensionDecl::new(nominal, self.file).at(self.loc(offset));
        for entry in self.clause(conforms) {
            ext = ext.with_inherited(entry);
        }
        self.ast.add_extension(ext)
    }

    pub fn ty(&mut self, nominal: DeclId) -> Idx {
        self.ast.declared_type(nominal)
    }

    /// Run `f` with a resolution context and no resolver.
    pub fn run<R>(&mut self, f: impl FnOnce(&mut ConformanceTables, &mut ResolutionContext<'_>) -> R) -> R {
        let mut rcx = ResolutionContext::new(&mut self.ast, &mut self.queue);
        f(&mut self.tables, &mut rcx)
    }

    pub fn run_with<R: LazyResolver>(
        &mut self,
        resolver: &mut R,
        f: impl FnOnce(&mut ConformanceTables, &mut ResolutionContext<'_>),
    ) {
        let mut rcx = ResolutionContext::new(&mut self.ast, &mut self.queue).with_resolver(resolver);
        f(&mut self.tables, &mut rcx);
    }

    pub fn lookup(&mut self, nominal: DeclId, protocol: ProtoId) -> Option<ConformanceId> {
        self.run(|tables, rcx| tables.lookup_nominal_conformance(rcx, nominal, protocol))
    }

    pub fn diagnostics(&mut self) -> Vec<Diagnostic> {
        self.queue.flush()
    }
}

/// A resolver that does nothing, for exercising the "resolver present" paths.
pub(crate) struct NoopResolver;

impl LazyResolver for NoopResolver {}
