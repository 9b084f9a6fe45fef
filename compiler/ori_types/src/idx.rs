//! Handles into the type pool and declaration arenas.
//!
//! # Design (from Zig's `InternPool`)
//!
//! - 32-bit indices, `Copy`, compared by value
//! - Primitive types have fixed indices so layout code can match on them
//!   without touching the pool
//! - Declarations are never removed, so an id stays valid for the whole
//!   compilation

use std::fmt;

/// A 32-bit index into the type pool.
///
/// Types are compared by index equality (O(1)), not structural comparison.
/// Substitution that changes nothing returns the very same `Idx`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Idx(u32);

impl Idx {
    // === Primitive Types (indices 0-8) ===
    // These are pre-interned at pool creation for O(1) access.

    /// 8-bit integer.
    pub const INT8: Self = Self(0);
    /// 16-bit integer.
    pub const INT16: Self = Self(1);
    /// 32-bit integer.
    pub const INT32: Self = Self(2);
    /// 64-bit integer.
    pub const INT64: Self = Self(3);
    /// The `bool` type (one byte, values 0 and 1).
    pub const BOOL: Self = Self(4);
    /// The unit type `()`, an empty tuple.
    pub const UNIT: Self = Self(5);
    /// A strong reference to a natively reference-counted heap object.
    pub const NATIVE_OBJECT: Self = Self(6);
    /// A raw, non-null, untracked pointer.
    pub const RAW_POINTER: Self = Self(7);
    /// The error type (placeholder for type errors, propagates silently).
    pub const ERROR: Self = Self(8);

    /// Number of pre-interned primitive types.
    pub const PRIMITIVE_COUNT: u32 = 9;

    /// Sentinel value indicating no type / invalid index.
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_primitive(self) -> bool {
        self.0 < Self::PRIMITIVE_COUNT
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 == Self::ERROR.0
    }

    /// Human-readable name for primitive types.
    #[inline]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("Int8"),
            1 => Some("Int16"),
            2 => Some("Int32"),
            3 => Some("Int64"),
            4 => Some("Bool"),
            5 => Some("()"),
            6 => Some("NativeObject"),
            7 => Some("RawPointer"),
            8 => Some("<error>"),
            _ => None,
        }
    }
}

impl fmt::Debug for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Idx::NONE")
        } else if let Some(name) = self.name() {
            write!(f, "Idx::{name}")
        } else {
            write!(f, "Idx({})", self.0)
        }
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_len(len: usize) -> Self {
                match u32::try_from(len) {
                    Ok(raw) => Self(raw),
                    Err(_) => panic!(concat!(stringify!($name), " arena overflow")),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

define_id!(
    /// A nominal type declaration (struct, enum or class).
    DeclId
);
define_id!(
    /// An extension of a nominal type.
    ExtId
);
define_id!(
    /// A protocol declaration.
    ProtoId
);
define_id!(
    /// A member declaration: method, property, initializer, or a protocol
    /// requirement.
    ValueDeclId
);
define_id!(
    /// An associated type requirement of a protocol.
    AssocTypeId
);
define_id!(
    /// A generic parameter of a nominal type.
    GenericParamId
);
