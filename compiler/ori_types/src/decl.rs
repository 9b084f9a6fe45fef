//! Declaration records.
//!
//! These are the shapes the type checker hands over: inheritance clauses
//! with their source locations, enum cases, stored fields, protocol
//! requirements. Fields that the checker fills in lazily (a checked
//! inheritance clause, a resolved superclass) are plain mutable fields; the
//! lazy resolver in `ori_conform` is what fills them.

use bitflags::bitflags;
use ori_ir::{FileId, Name, SourceLoc};

use crate::{AssocTypeId, DeclId, ExtId, GenericParamId, Idx, ProtoId, ValueDeclId};

bitflags! {
    /// Declaration attributes relevant to conformance and layout.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    #[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
    pub struct DeclFlags: u16 {
        /// Visible outside the defining module.
        const PUBLIC = 1 << 0;
        /// Layout may change without recompiling clients.
        const RESILIENT = 1 << 1;
        /// Enum with C-compatible representation (explicit raw values).
        const C_COMPATIBLE = 1 << 2;
        /// Every case of the enum is indirect.
        const INDIRECT = 1 << 3;
    }
}

/// A type's own body or one of its extensions.
///
/// Conformances are declared in, and diagnostics are grouped by, these.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum DeclContext {
    Nominal(DeclId),
    Extension(ExtId),
}

/// One entry of an inheritance clause: `struct S: P, Q & R`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct InheritedEntry {
    /// A protocol, a protocol composition, or (for classes) the superclass.
    pub ty: Idx,
    pub loc: SourceLoc,
}

impl InheritedEntry {
    pub fn new(ty: Idx, loc: SourceLoc) -> Self {
        InheritedEntry { ty, loc }
    }
}

/// Opaque token handed back to a deserialization loader.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct LoaderToken(pub u64);

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EnumCase {
    pub name: Name,
    pub loc: SourceLoc,
    /// Associated data, if any. Multiple associated values are a tuple.
    pub payload: Option<Idx>,
    pub indirect: bool,
    /// Explicit raw value (C-compatible enums).
    pub raw_value: Option<i64>,
}

impl EnumCase {
    pub fn new(name: Name) -> Self {
        EnumCase {
            name,
            loc: SourceLoc::INVALID,
            payload: None,
            indirect: false,
            raw_value: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, ty: Idx) -> Self {
        self.payload = Some(ty);
        self
    }

    #[must_use]
    pub fn indirect(mut self) -> Self {
        self.indirect = true;
        self
    }

    #[must_use]
    pub fn with_raw_value(mut self, value: i64) -> Self {
        self.raw_value = Some(value);
        self
    }

    #[must_use]
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StoredField {
    pub name: Name,
    pub ty: Idx,
}

/// A class's resolved superclass.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Superclass {
    /// The superclass type, possibly generic over this class's parameters.
    pub ty: Idx,
    /// Where it is named in the inheritance clause.
    pub loc: SourceLoc,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum NominalKind {
    Struct {
        fields: Vec<StoredField>,
    },
    Enum {
        cases: Vec<EnumCase>,
        raw_type: Option<Idx>,
    },
    Class {
        superclass: Option<Superclass>,
        fields: Vec<StoredField>,
    },
}

#[derive(Clone, Debug)]
pub struct NominalDecl {
    pub name: Name,
    pub loc: SourceLoc,
    pub file: FileId,
    pub kind: NominalKind,
    pub flags: DeclFlags,
    pub generic_params: Vec<GenericParamId>,
    /// Inheritance clause, minus the superclass.
    pub inherited: Vec<InheritedEntry>,
    /// Extensions in the order they were linked to this type.
    pub extensions: Vec<ExtId>,
    pub members: Vec<ValueDeclId>,
    /// Present while conformances still sit in a serialized module.
    pub conformance_loader: Option<LoaderToken>,
}

impl NominalDecl {
    pub fn new(name: Name, kind: NominalKind, file: FileId) -> Self {
        NominalDecl {
            name,
            loc: SourceLoc::INVALID,
            file,
            kind,
            flags: DeclFlags::empty(),
            generic_params: Vec::new(),
            inherited: Vec::new(),
            extensions: Vec::new(),
            members: Vec::new(),
            conformance_loader: None,
        }
    }

    pub fn new_struct(name: Name, file: FileId) -> Self {
        Self::new(name, NominalKind::Struct { fields: Vec::new() }, file)
    }

    pub fn new_enum(name: Name, file: FileId, cases: Vec<EnumCase>) -> Self {
        Self::new(
            name,
            NominalKind::Enum {
                cases,
                raw_type: None,
            },
            file,
        )
    }

    pub fn new_class(name: Name, file: FileId) -> Self {
        Self::new(
            name,
            NominalKind::Class {
                superclass: None,
                fields: Vec::new(),
            },
            file,
        )
    }

    #[must_use]
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: DeclFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn with_inherited(mut self, entry: InheritedEntry) -> Self {
        self.inherited.push(entry);
        self
    }

    #[must_use]
    pub fn with_generic_params(mut self, params: Vec<GenericParamId>) -> Self {
        self.generic_params = params;
        self
    }

    #[must_use]
    pub fn with_fields(mut self, new_fields: Vec<StoredField>) -> Self {
        match &mut self.kind {
            NominalKind::Struct { fields } | NominalKind::Class { fields, .. } => {
                *fields = new_fields;
            }
            NominalKind::Enum { .. } => panic!("enums have no stored fields"),
        }
        self
    }

    #[must_use]
    pub fn with_superclass(mut self, superclass: Superclass) -> Self {
        match &mut self.kind {
            NominalKind::Class { superclass: slot, .. } => *slot = Some(superclass),
            _ => panic!("only classes have a superclass"),
        }
        self
    }

    #[must_use]
    pub fn with_raw_type(mut self, ty: Idx) -> Self {
        match &mut self.kind {
            NominalKind::Enum { raw_type, .. } => *raw_type = Some(ty),
            _ => panic!("only enums have a raw type"),
        }
        self
    }

    #[must_use]
    pub fn with_conformance_loader(mut self, token: LoaderToken) -> Self {
        self.conformance_loader = Some(token);
        self
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, NominalKind::Class { .. })
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, NominalKind::Enum { .. })
    }

    pub fn enum_cases(&self) -> &[EnumCase] {
        match &self.kind {
            NominalKind::Enum { cases, .. } => cases,
            _ => &[],
        }
    }

    pub fn raw_type(&self) -> Option<Idx> {
        match &self.kind {
            NominalKind::Enum { raw_type, .. } => *raw_type,
            _ => None,
        }
    }

    pub fn superclass(&self) -> Option<Superclass> {
        match &self.kind {
            NominalKind::Class { superclass, .. } => *superclass,
            _ => None,
        }
    }

    pub fn stored_fields(&self) -> &[StoredField] {
        match &self.kind {
            NominalKind::Struct { fields } | NominalKind::Class { fields, .. } => fields,
            NominalKind::Enum { .. } => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtensionDecl {
    pub extended: DeclId,
    pub loc: SourceLoc,
    pub file: FileId,
    pub inherited: Vec<InheritedEntry>,
    /// Whether the type checker has validated `inherited`.
    pub inheritance_checked: bool,
    pub members: Vec<ValueDeclId>,
    pub conformance_loader: Option<LoaderToken>,
}

impl ExtensionDecl {
    pub fn new(extended: DeclId, file: FileId) -> Self {
        ExtensionDecl {
            extended,
            loc: SourceLoc::INVALID,
            file,
            inherited: Vec::new(),
            inheritance_checked: true,
            members: Vec::new(),
            conformance_loader: None,
        }
    }

    #[must_use]
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }

    #[must_use]
    pub fn with_inherited(mut self, entry: InheritedEntry) -> Self {
        self.inherited.push(entry);
        self
    }

    /// Mark the inheritance clause as not yet validated.
    #[must_use]
    pub fn unchecked(mut self) -> Self {
        self.inheritance_checked = false;
        self
    }

    #[must_use]
    pub fn with_conformance_loader(mut self, token: LoaderToken) -> Self {
        self.conformance_loader = Some(token);
        self
    }
}

/// Protocols the conformance engine itself needs to name.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum KnownProtocol {
    AnyObject,
    Error,
    /// Implied for C-compatible, payload-free error enums.
    BridgedError,
    Equatable,
    Hashable,
    RawRepresentable,
}

#[derive(Clone, Debug)]
pub struct ProtocolDecl {
    pub name: Name,
    pub loc: SourceLoc,
    pub file: FileId,
    /// Inherited protocols (and compositions of them).
    pub inherited: Vec<InheritedEntry>,
    pub requirements: Vec<ValueDeclId>,
    pub assoc_types: Vec<AssocTypeId>,
    pub known: Option<KnownProtocol>,
}

impl ProtocolDecl {
    pub fn new(name: Name, file: FileId) -> Self {
        ProtocolDecl {
            name,
            loc: SourceLoc::INVALID,
            file,
            inherited: Vec::new(),
            requirements: Vec::new(),
            assoc_types: Vec::new(),
            known: None,
        }
    }

    #[must_use]
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }

    #[must_use]
    pub fn with_inherited(mut self, entry: InheritedEntry) -> Self {
        self.inherited.push(entry);
        self
    }

    #[must_use]
    pub fn known(mut self, known: KnownProtocol) -> Self {
        self.known = Some(known);
        self
    }
}

#[derive(Clone, Debug)]
pub struct AssocTypeDecl {
    pub name: Name,
    pub protocol: ProtoId,
    /// Protocols the witness type must itself conform to.
    pub conforms_to: Vec<ProtoId>,
}

/// Where a member declaration lives.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ValueOwner {
    Context(DeclContext),
    /// A requirement of the protocol.
    Protocol(ProtoId),
}

#[derive(Clone, Debug)]
pub struct ValueDecl {
    pub name: Name,
    pub loc: SourceLoc,
    pub owner: ValueOwner,
}

#[derive(Clone, Debug)]
pub struct GenericParamDecl {
    pub name: Name,
    /// Protocols the parameter is constrained to.
    pub conforms_to: Vec<ProtoId>,
}

/// How a file unit entered the module.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum FileKind {
    Source,
    /// Loaded from a previously compiled module.
    Serialized,
    /// Synthesized by the C importer.
    Imported,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FileUnit {
    pub name: Name,
    pub kind: FileKind,
}
