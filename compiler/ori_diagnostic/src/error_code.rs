use std::fmt;

/// Error codes for all diagnostics raised by the semantic core.
///
/// Format: E#### where first digit indicates phase:
/// - E2xxx: Conformance errors
/// - E5xxx: Layout errors
/// - E9xxx: Internal compiler errors
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorCode {
    // Conformance Errors (E2xxx)
    /// Redundant conformance (same protocol declared twice)
    E2010,
    /// Conformance conflicts with an inherited conformance
    E2011,
    /// Circular class inheritance
    E2012,
    /// Circular protocol inheritance
    E2013,

    // Layout Errors (E5xxx)
    /// Recursive enum case without indirection
    E5001,
    /// Payload case in a C-compatible enum
    E5002,
    /// Duplicate raw value in a C-compatible enum
    E5003,

    // Internal Errors (E9xxx)
    /// Internal compiler error
    E9001,
    /// Too many errors
    E9002,
}

impl ErrorCode {
    /// Check if this is a conformance error (E2xxx range).
    pub fn is_conformance_error(&self) -> bool {
        self.as_str().starts_with("E2")
    }

    /// Check if this is a layout error (E5xxx range).
    pub fn is_layout_error(&self) -> bool {
        self.as_str().starts_with("E5")
    }

    /// Get the numeric code as a string (e.g., "E2010").
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E2010 => "E2010",
            ErrorCode::E2011 => "E2011",
            ErrorCode::E2012 => "E2012",
            ErrorCode::E2013 => "E2013",
            ErrorCode::E5001 => "E5001",
            ErrorCode::E5002 => "E5002",
            ErrorCode::E5003 => "E5003",
            ErrorCode::E9001 => "E9001",
            ErrorCode::E9002 => "E9002",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
