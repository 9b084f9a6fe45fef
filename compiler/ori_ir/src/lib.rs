//! Ori IR - shared vocabulary for the semantic core.
//!
//! This crate holds the handful of small value types every other crate
//! in the workspace keys its tables by:
//! - `Name` for interned identifiers
//! - `StringInterner` backing those names
//! - `FileId` and `SourceLoc` for declaration positions
//!
//! Every type is `Copy + Eq + Hash` so it can be used directly as a map key
//! in conformance tables and layout caches.

/// Compile-time assertion that a type has a specific size.
///
/// Used to prevent accidental size regressions in frequently-allocated types.
#[macro_export]
macro_rules! static_assert_size {
    ($ty:ty, $size:expr) => {
        const _: [(); $size] = [(); ::std::mem::size_of::<$ty>()];
    };
}

mod interner;
mod location;
mod name;

pub use interner::{InternError, SharedInterner, StringInterner};
pub use location::{FileId, SourceLoc};
pub use name::Name;

static_assert_size!(Name, 4);
static_assert_size!(SourceLoc, 8);
