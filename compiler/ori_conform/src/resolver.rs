//! Collaborators that fill in information on demand.
//!
//! The conformance machinery never type-checks anything itself. When it
//! needs a checked inheritance clause, a superclass, or a witness, it asks
//! the [`LazyResolver`]; when a declaration came from a serialized module,
//! it asks the [`LazyMemberLoader`]. Both are optional: without a resolver
//! the tables work from whatever has already been resolved.

use ori_diagnostic::DiagnosticSink;
use ori_types::{AssocTypeId, AstContext, DeclContext, DeclId, ExtId, LoaderToken, ValueDeclId};

use crate::{ConformanceArena, ConformanceId};

/// On-demand type checking hooks. Every method defaults to doing nothing.
pub trait LazyResolver {
    /// Check the inheritance clause of a type or extension.
    fn resolve_inheritance_clause(&mut self, _ast: &mut AstContext, _dc: DeclContext) {}

    /// Resolve a class's superclass.
    fn resolve_superclass(&mut self, _ast: &mut AstContext, _class: DeclId) {}

    /// Bind an extension to the type it extends and check its clause.
    fn resolve_extension(&mut self, _ast: &mut AstContext, _ext: ExtId) {}

    /// Resolve an enum's raw type.
    fn resolve_raw_type(&mut self, _ast: &mut AstContext, _enum_decl: DeclId) {}

    /// Resolve the signature of a nominal declaration.
    fn resolve_decl_signature(&mut self, _ast: &mut AstContext, _decl: DeclId) {}

    /// Record (via [`ConformanceArena::set_type_witness`]) the witness for
    /// `assoc` in a normal conformance.
    fn resolve_type_witness(
        &mut self,
        _ast: &mut AstContext,
        _conformances: &mut ConformanceArena,
        _conformance: ConformanceId,
        _assoc: AssocTypeId,
    ) {
    }

    /// Record (via [`ConformanceArena::set_witness`]) the witness for a
    /// value requirement.
    fn resolve_witness(
        &mut self,
        _ast: &mut AstContext,
        _conformances: &mut ConformanceArena,
        _conformance: ConformanceId,
        _requirement: ValueDeclId,
    ) {
    }
}

/// Deserialization hooks for declarations from other modules.
pub trait LazyMemberLoader {
    /// Produce the conformances recorded for a serialized type or
    /// extension. The returned conformances are registered with the tables.
    fn load_all_conformances(
        &mut self,
        ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        dc: DeclContext,
        token: LoaderToken,
    ) -> Vec<ConformanceId>;

    /// Populate the witness tables of a lazily loaded normal conformance.
    ///
    /// The conformance reads as `Incomplete` while this runs.
    fn finish_normal_conformance(
        &mut self,
        ast: &mut AstContext,
        conformances: &mut ConformanceArena,
        conformance: ConformanceId,
        token: LoaderToken,
    );
}

/// Everything a conformance query may need beyond the tables themselves.
pub struct ResolutionContext<'a> {
    pub ast: &'a mut AstContext,
    pub sink: &'a mut dyn DiagnosticSink,
    pub resolver: Option<&'a mut dyn LazyResolver>,
    pub loader: Option<&'a mut dyn LazyMemberLoader>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(ast: &'a mut AstContext, sink: &'a mut dyn DiagnosticSink) -> Self {
        ResolutionContext {
            ast,
            sink,
            resolver: None,
            loader: None,
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: &'a mut dyn LazyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: &'a mut dyn LazyMemberLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }
}
