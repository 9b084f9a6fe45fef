//! Diagnostic collection for the conformance and layout engines.
//!
//! The engines never format or print anything. They report conditions
//! through the [`DiagnosticSink`] trait as a `(kind, location, context)`
//! triple; [`DiagnosticQueue`] is the collecting implementation that turns
//! each record into a [`Diagnostic`] with an [`ErrorCode`].
//!
//! - Error codes for searchability
//! - Clear messages (what went wrong)
//! - Primary location (where it went wrong)
//! - Secondary labels (the declaration it conflicts with)

mod diagnostic;
mod error_code;
pub mod queue;
mod sink;

pub use diagnostic::{Diagnostic, Label, Severity};
pub use error_code::ErrorCode;
pub use queue::{DiagnosticConfig, DiagnosticQueue};
pub use sink::{DiagnosticContext, DiagnosticKind, DiagnosticSink, NullSink};
