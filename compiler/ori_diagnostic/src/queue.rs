//! Diagnostic queue for collecting, deduplicating, and sorting diagnostics.
//!
//! Features:
//! - Error limits to prevent overwhelming output
//! - Deduplication of identical records (same kind, location and subject)
//! - Stable ordering by (file, offset) on flush

use ori_ir::SourceLoc;
use rustc_hash::FxHashSet;

use crate::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink, ErrorCode};

/// Configuration for diagnostic processing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosticConfig {
    /// Maximum number of errors before stopping (0 = unlimited).
    pub error_limit: usize,
    /// Drop a record whose kind, location and subject were already recorded.
    pub deduplicate: bool,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        DiagnosticConfig {
            error_limit: 20,
            deduplicate: true,
        }
    }
}

impl DiagnosticConfig {
    /// Create a config with no limits (for testing).
    pub fn unlimited() -> Self {
        DiagnosticConfig {
            error_limit: 0,
            deduplicate: false,
        }
    }

    #[must_use]
    pub fn with_error_limit(mut self, limit: usize) -> Self {
        self.error_limit = limit;
        self
    }
}

/// Queue for collecting diagnostics reported through [`DiagnosticSink`].
///
/// # Example
///
/// ```text
/// let mut queue = DiagnosticQueue::new();
/// tables.lookup_conformance(&mut rcx, ty, proto);   // records into the queue
/// let sorted = queue.flush();
/// ```
#[derive(Clone, Debug, Default)]
pub struct DiagnosticQueue {
    diagnostics: Vec<Diagnostic>,
    seen: FxHashSet<(DiagnosticKind, SourceLoc, String)>,
    error_count: usize,
    limit_hit: bool,
    config: DiagnosticConfig,
}

impl DiagnosticQueue {
    /// Create a new diagnostic queue with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a diagnostic queue with custom configuration.
    pub fn with_config(config: DiagnosticConfig) -> Self {
        DiagnosticQueue {
            config,
            ..Self::default()
        }
    }

    /// Add a rendered diagnostic.
    ///
    /// Returns `true` if the diagnostic was added, `false` if it was filtered.
    pub fn add(&mut self, diag: Diagnostic) -> bool {
        if self.limit_reached() {
            if !self.limit_hit {
                self.limit_hit = true;
                let limit = self.config.error_limit;
                self.diagnostics.push(too_many_errors(limit));
            }
            return false;
        }
        if diag.is_error() {
            self.error_count += 1;
        }
        self.diagnostics.push(diag);
        true
    }

    /// Check if the error limit has been reached.
    pub fn limit_reached(&self) -> bool {
        self.config.error_limit > 0 && self.error_count >= self.config.error_limit
    }

    /// Get the number of errors collected.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Sort diagnostics by location and return them, clearing the queue.
    ///
    /// Diagnostics without a primary location sort last; the sort is stable
    /// so records at the same location keep their reporting order.
    pub fn flush(&mut self) -> Vec<Diagnostic> {
        let mut result = std::mem::take(&mut self.diagnostics);
        result.sort_by_key(|d| {
            d.primary_loc()
                .and_then(|loc| loc.file().map(|file| (file, loc.offset())))
                .map_or((1, None), |key| (0, Some(key)))
        });
        self.seen.clear();
        self.error_count = 0;
        self.limit_hit = false;
        result
    }

    /// Get diagnostics without clearing the queue.
    pub fn peek(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

impl DiagnosticSink for DiagnosticQueue {
    fn record(&mut self, kind: DiagnosticKind, location: SourceLoc, context: DiagnosticContext) {
        if self.config.deduplicate && !self.seen.insert((kind, location, context.subject.clone())) {
            return;
        }
        self.add(context.into_diagnostic(kind, location));
    }
}

/// Create a "too many errors" diagnostic.
#[cold]
pub fn too_many_errors(limit: usize) -> Diagnostic {
    Diagnostic::error(ErrorCode::E9002)
        .with_message(format!("aborting due to {limit} previous errors"))
        .with_note("raise `DiagnosticConfig::error_limit` to see more")
}

#[cfg(test)]
mod tests;
