//! Declaration and type model for the Ori semantic core.
//!
//! The conformance engine and the enum layout engine both sit on top of the
//! same read-mostly picture of the program:
//! - an interned type pool (`Idx` handles, O(1) equality)
//! - arenas of nominal types, extensions, protocols and members, addressed
//!   by small `Copy` ids
//! - the module's file-unit list, which fixes cross-file declaration order
//!
//! Type checking itself lives elsewhere; this crate only stores what the
//! checker produced (or will produce, through the lazy resolver hooks in
//! `ori_conform`).

mod context;
mod decl;
mod idx;
mod pool;
mod stack;
mod subst;

pub use context::AstContext;
pub use decl::{
    AssocTypeDecl, DeclContext, DeclFlags, EnumCase, ExtensionDecl, FileKind, FileUnit,
    GenericParamDecl, InheritedEntry, KnownProtocol, LoaderToken, NominalDecl, NominalKind,
    ProtocolDecl, StoredField, Superclass, ValueDecl, ValueOwner,
};
pub use idx::{AssocTypeId, DeclId, ExtId, GenericParamId, Idx, ProtoId, ValueDeclId};
pub use pool::{IntWidth, TypeData, TypePool};
pub use stack::ensure_sufficient_stack;
pub use subst::SubstitutionMap;

#[cfg(target_pointer_width = "64")]
mod size_asserts {
    use super::{DeclContext, Idx};
    ori_ir::static_assert_size!(Idx, 4);
    ori_ir::static_assert_size!(DeclContext, 8);
}
