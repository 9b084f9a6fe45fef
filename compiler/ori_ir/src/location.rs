//! Declaration positions.
//!
//! The conformance ranking breaks ties by declaration order, so locations
//! must compare within a file (byte offset) and across files (the file's
//! position in its module). `FileId` is that module-relative position.

use std::fmt;

/// Position of a file unit within its module's file list.
///
/// Lower ids were listed earlier in the module.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct FileId(u32);

impl FileId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        FileId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A point in a source file.
///
/// `SourceLoc::INVALID` marks compiler-generated or deserialized
/// declarations that have no position of their own.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLoc {
    file: u32,
    offset: u32,
}

impl SourceLoc {
    pub const INVALID: SourceLoc = SourceLoc {
        file: u32::MAX,
        offset: u32::MAX,
    };

    #[inline]
    pub const fn new(file: FileId, offset: u32) -> Self {
        SourceLoc {
            file: file.0,
            offset,
        }
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.file != u32::MAX
    }

    /// The file this location points into, if any.
    #[inline]
    pub const fn file(self) -> Option<FileId> {
        if self.is_valid() {
            Some(FileId(self.file))
        } else {
            None
        }
    }

    #[inline]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Whether `self` comes strictly before `other` in the same file.
    ///
    /// Returns `None` when the two locations are in different files or
    /// either one is invalid.
    pub fn is_before_in_file(self, other: SourceLoc) -> Option<bool> {
        if !self.is_valid() || !other.is_valid() || self.file != other.file {
            return None;
        }
        Some(self.offset < other.offset)
    }
}

impl Default for SourceLoc {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.file, self.offset)
        } else {
            write!(f, "<invalid>")
        }
    }
}
