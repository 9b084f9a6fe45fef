//! Pairwise ranking of competing entries for the same protocol.
//!
//! The order is lexicographic:
//!
//! 1. fixed entries (already bound to a conformance, or inherited) first;
//! 2. then by ranking kind: inherited, explicit, implied, synthesized;
//! 3. two implied entries: the one whose declared protocol refines the
//!    other's wins;
//! 4. otherwise declaration order: the type body before its extensions,
//!    then by file, then by position.
//!
//! Step 3 only applies when the declared protocols are related, and it can
//! contradict step 4. Given `a` implied through `X` (which refines `Y`),
//! `b` implied through `Y` and declared first, and an unrelated `c`
//! declared between them, `a` beats `b`, `b` beats `c` and `c` beats `a`.
//! The relation is antisymmetric everywhere, and a strict total order over
//! any set of entries where refinement never disagrees with declaration
//! order. Tables built by the stage pipeline always qualify: they keep at
//! most one implied entry per protocol.

use std::cmp::Ordering;

use ori_ir::FileId;
use ori_types::{AstContext, DeclContext};

use crate::entry::{ConformanceEntryKind, EntryArena, EntryId};

/// Result of comparing two entries.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Ranking {
    /// `Less` when the left entry wins.
    pub ordering: Ordering,
    /// Whether the losing entry deserves a redundancy diagnostic.
    pub diagnose: bool,
}

impl Ranking {
    fn new(ordering: Ordering, diagnose: bool) -> Self {
        Ranking { ordering, diagnose }
    }

    pub fn left_wins(self) -> bool {
        self.ordering == Ordering::Less
    }
}

/// Compare two distinct entries for the same protocol.
pub fn compare_entries(
    ast: &AstContext,
    entries: &EntryArena,
    lhs: EntryId,
    rhs: EntryId,
) -> Ranking {
    let left = entries.get(lhs);
    let right = entries.get(rhs);
    debug_assert_eq!(left.protocol, right.protocol, "ranking entries for different protocols");
    debug_assert_ne!(lhs, rhs, "ranking an entry against itself");

    if left.is_fixed() != right.is_fixed() {
        let loser = if left.is_fixed() { right } else { left };
        let ordering = if left.is_fixed() {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        return Ranking::new(ordering, !loser.kind().is_replaceable());
    }

    let left_kind = entries.ranking_kind(lhs);
    let right_kind = entries.ranking_kind(rhs);

    if left_kind != ConformanceEntryKind::Implied || right_kind != ConformanceEntryKind::Implied {
        let diagnose = !left_kind.is_replaceable()
            && !right_kind.is_replaceable()
            && !(left_kind == ConformanceEntryKind::Inherited
                && right_kind == ConformanceEntryKind::Inherited);
        let ordering = left_kind
            .cmp(&right_kind)
            .then_with(|| declaration_order(ast, entries, lhs, rhs));
        return Ranking::new(ordering, diagnose);
    }

    let left_declared = entries.get(entries.declared_conformance(lhs)).protocol;
    let right_declared = entries.get(entries.declared_conformance(rhs)).protocol;
    if left_declared != right_declared {
        if ast.protocol_inherits_from(left_declared, right_declared) {
            return Ranking::new(Ordering::Less, false);
        }
        if ast.protocol_inherits_from(right_declared, left_declared) {
            return Ranking::new(Ordering::Greater, false);
        }
    }
    Ranking::new(declaration_order(ast, entries, lhs, rhs), false)
}

/// Sort key for ties: (in an extension, file, offset, entry).
type OrderKey = (bool, FileId, u32, EntryId);

fn order_key(ast: &AstContext, entries: &EntryArena, id: EntryId) -> OrderKey {
    let dc = entries.declaration_context(id);
    let loc = entries.get(id).loc;
    let loc = if loc.is_valid() { loc } else { ast.context_loc(dc) };
    let (file, offset) = match loc.file() {
        Some(file) => (file, loc.offset()),
        None => (ast.context_file(dc), u32::MAX),
    };
    (matches!(dc, DeclContext::Extension(_)), file, offset, id)
}

fn declaration_order(ast: &AstContext, entries: &EntryArena, lhs: EntryId, rhs: EntryId) -> Ordering {
    order_key(ast, entries, lhs).cmp(&order_key(ast, entries, rhs))
}

#[cfg(test)]
mod tests;
