//! The `record(kind, location, context)` collaborator.
//!
//! Conformance resolution and enum layout both degrade gracefully: they
//! always produce a result and report what went wrong on the side. This
//! module is the only channel for those reports.

use ori_ir::SourceLoc;

use crate::{Diagnostic, ErrorCode};

/// What went wrong.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticKind {
    /// Two non-replaceable conformances to the same protocol; the one at
    /// `location` lost.
    RedundantConformance,
    /// An explicit conformance lost to a conformance inherited from the
    /// superclass.
    ConformanceOverridesInherited,
    /// The superclass chain loops back on itself.
    CircularClassInheritance,
    /// Protocol inheritance never reached a fixed point.
    CircularProtocolInheritance,
    /// An enum contains itself without going through an `indirect` case.
    RecursiveEnumWithoutIndirection,
    /// A C-compatible enum declares a case with associated data.
    PayloadInCCompatibleEnum,
    /// Two cases of a C-compatible enum share a raw value.
    DuplicateRawValue,
}

impl DiagnosticKind {
    pub fn code(self) -> ErrorCode {
        match self {
            DiagnosticKind::RedundantConformance => ErrorCode::E2010,
            DiagnosticKind::ConformanceOverridesInherited => ErrorCode::E2011,
            DiagnosticKind::CircularClassInheritance => ErrorCode::E2012,
            DiagnosticKind::CircularProtocolInheritance => ErrorCode::E2013,
            DiagnosticKind::RecursiveEnumWithoutIndirection => ErrorCode::E5001,
            DiagnosticKind::PayloadInCCompatibleEnum => ErrorCode::E5002,
            DiagnosticKind::DuplicateRawValue => ErrorCode::E5003,
        }
    }

    fn headline(self) -> &'static str {
        match self {
            DiagnosticKind::RedundantConformance => "redundant conformance",
            DiagnosticKind::ConformanceOverridesInherited => {
                "conformance is already provided by the superclass"
            }
            DiagnosticKind::CircularClassInheritance => "circular class inheritance",
            DiagnosticKind::CircularProtocolInheritance => "circular protocol inheritance",
            DiagnosticKind::RecursiveEnumWithoutIndirection => {
                "recursive enum case must be marked indirect"
            }
            DiagnosticKind::PayloadInCCompatibleEnum => {
                "C-compatible enum cases cannot have associated values"
            }
            DiagnosticKind::DuplicateRawValue => "raw value is used by more than one case",
        }
    }
}

/// Extra detail attached to a record: what it is about, and optionally the
/// declaration it conflicts with.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct DiagnosticContext {
    pub subject: String,
    pub related: Option<SourceLoc>,
}

impl DiagnosticContext {
    pub fn new(subject: impl Into<String>) -> Self {
        DiagnosticContext {
            subject: subject.into(),
            related: None,
        }
    }

    #[must_use]
    pub fn with_related(mut self, loc: SourceLoc) -> Self {
        self.related = Some(loc);
        self
    }

    /// Render a record as a [`Diagnostic`].
    pub fn into_diagnostic(self, kind: DiagnosticKind, location: SourceLoc) -> Diagnostic {
        let message = if self.subject.is_empty() {
            kind.headline().to_string()
        } else {
            format!("{}: {}", kind.headline(), self.subject)
        };
        let mut diag = Diagnostic::error(kind.code())
            .with_message(message)
            .with_label(location, kind.headline());
        if let Some(related) = self.related {
            diag = diag.with_secondary_label(related, "previously declared here");
        }
        diag
    }
}

/// Receiver for conditions found during resolution and layout.
pub trait DiagnosticSink {
    fn record(&mut self, kind: DiagnosticKind, location: SourceLoc, context: DiagnosticContext);
}

/// Sink that drops every record.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record(&mut self, _: DiagnosticKind, _: SourceLoc, _: DiagnosticContext) {}
}
