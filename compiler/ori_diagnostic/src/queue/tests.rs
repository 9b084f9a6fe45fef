use ori_ir::FileId;
use pretty_assertions::assert_eq;

use super::*;

fn loc(file: u32, offset: u32) -> SourceLoc {
    SourceLoc::new(FileId::new(file), offset)
}

#[test]
fn test_records_are_rendered() {
    let mut queue = DiagnosticQueue::new();
    queue.record(
        DiagnosticKind::RedundantConformance,
        loc(0, 4),
        DiagnosticContext::new("'T' to 'P'"),
    );
    assert_eq!(queue.error_count(), 1);
    let flushed = queue.flush();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].code, ErrorCode::E2010);
    assert_eq!(queue.error_count(), 0);
}

#[test]
fn test_deduplicates_same_kind_and_location() {
    let mut queue = DiagnosticQueue::new();
    for _ in 0..3 {
        queue.record(
            DiagnosticKind::CircularClassInheritance,
            loc(0, 1),
            DiagnosticContext::default(),
        );
    }
    assert_eq!(queue.flush().len(), 1);
}

#[test]
fn test_distinct_subjects_at_invalid_location_are_kept() {
    let mut queue = DiagnosticQueue::new();
    for subject in ["'S' to 'P'", "'S' to 'Q'", "'T' to 'P'", "'S' to 'P'"] {
        queue.record(
            DiagnosticKind::RedundantConformance,
            SourceLoc::INVALID,
            DiagnosticContext::new(subject),
        );
    }
    let messages: Vec<String> = queue.flush().into_iter().map(|d| d.message).collect();
    assert_eq!(
        messages,
        vec![
            "redundant conformance: 'S' to 'P'",
            "redundant conformance: 'S' to 'Q'",
            "redundant conformance: 'T' to 'P'",
        ]
    );
}

#[test]
fn test_unlimited_keeps_duplicates() {
    let mut queue = DiagnosticQueue::with_config(DiagnosticConfig::unlimited());
    for _ in 0..3 {
        queue.record(
            DiagnosticKind::CircularClassInheritance,
            loc(0, 1),
            DiagnosticContext::default(),
        );
    }
    assert_eq!(queue.flush().len(), 3);
}

#[test]
fn test_flush_sorts_by_file_then_offset() {
    let mut queue = DiagnosticQueue::with_config(DiagnosticConfig::unlimited());
    queue.record(DiagnosticKind::DuplicateRawValue, loc(1, 0), DiagnosticContext::new("c"));
    queue.record(DiagnosticKind::DuplicateRawValue, SourceLoc::INVALID, DiagnosticContext::new("d"));
    queue.record(DiagnosticKind::DuplicateRawValue, loc(0, 9), DiagnosticContext::new("b"));
    queue.record(DiagnosticKind::DuplicateRawValue, loc(0, 2), DiagnosticContext::new("a"));

    let subjects: Vec<String> = queue
        .flush()
        .into_iter()
        .map(|d| d.message.rsplit(' ').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(subjects, vec!["a", "b", "c", "d"]);
}

#[test]
fn test_error_limit() {
    let mut queue =
        DiagnosticQueue::with_config(DiagnosticConfig::unlimited().with_error_limit(2));
    for offset in 0..5 {
        queue.record(
            DiagnosticKind::RedundantConformance,
            loc(0, offset),
            DiagnosticContext::default(),
        );
    }
    assert!(queue.limit_reached());
    let flushed = queue.flush();
    assert_eq!(flushed.len(), 3);
    assert!(flushed.iter().any(|d| d.code == ErrorCode::E9002));
}
