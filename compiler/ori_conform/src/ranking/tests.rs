use std::cmp::Ordering;

use ori_ir::SourceLoc;
use ori_types::{DeclContext, DeclId, ExtId, ProtoId};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::entry::ConformanceSource;
use crate::test_support::Fixture;
use crate::ConformanceId;

struct Setup {
    fx: Fixture,
    arena: EntryArena,
    target: ProtoId,
    nominal: DeclId,
    ext: ExtId,
}

fn setup() -> Setup {
    let mut fx = Fixture::new();
    let target = fx.protocol("Target", &[]);
    let nominal = fx.struct_decl("S", 10, &[]);
    let ext = fx.extension(nominal, 500, &[]);
    Setup {
        fx,
        arena: EntryArena::new(),
        target,
        nominal,
        ext,
    }
}

#[test]
fn test_explicit_beats_implied_without_diagnostic() {
    let mut s = setup();
    let parent = s.fx.protocol("Parent", &[s.target]);
    let body = DeclContext::Nominal(s.nominal);
    let root = s.arena.push(s.fx.loc(20), parent, ConformanceSource::Explicit(body));
    let implied = s.arena.push(s.fx.loc(20), s.target, ConformanceSource::Implied(root));
    let explicit = s.arena.push(
        s.fx.loc(600),
        s.target,
        ConformanceSource::Explicit(DeclContext::Extension(s.ext)),
    );

    let ranking = compare_entries(&s.fx.ast, &s.arena, explicit, implied);
    assert_eq!(ranking, Ranking { ordering: Ordering::Less, diagnose: false });
    let reversed = compare_entries(&s.fx.ast, &s.arena, implied, explicit);
    assert_eq!(reversed.ordering, Ordering::Greater);
}

#[test]
fn test_two_explicit_entries_are_diagnosed_and_body_wins() {
    let mut s = setup();
    let in_ext = s.arena.push(
        s.fx.loc(600),
        s.target,
        ConformanceSource::Explicit(DeclContext::Extension(s.ext)),
    );
    let in_body = s.arena.push(
        s.fx.loc(20),
        s.target,
        ConformanceSource::Explicit(DeclContext::Nominal(s.nominal)),
    );

    let ranking = compare_entries(&s.fx.ast, &s.arena, in_ext, in_body);
    assert!(ranking.diagnose);
    assert_eq!(ranking.ordering, Ordering::Greater);
}

#[test]
fn test_fixed_entry_wins_and_flags_non_replaceable_loser() {
    let mut s = setup();
    let body = DeclContext::Nominal(s.nominal);
    let fixed = s.arena.push(SourceLoc::INVALID, s.target, ConformanceSource::Explicit(body));
    s.arena.get_mut(fixed).conformance = Some(ConformanceId::from_raw(0));
    let explicit = s.arena.push(s.fx.loc(30), s.target, ConformanceSource::Explicit(body));
    let synthesized = s.arena.push(s.fx.loc(10), s.target, ConformanceSource::Synthesized(s.nominal));

    let against_explicit = compare_entries(&s.fx.ast, &s.arena, explicit, fixed);
    assert_eq!(against_explicit, Ranking { ordering: Ordering::Greater, diagnose: true });

    let against_synthesized = compare_entries(&s.fx.ast, &s.arena, fixed, synthesized);
    assert_eq!(against_synthesized, Ranking { ordering: Ordering::Less, diagnose: false });
}

#[test]
fn test_inherited_pair_is_not_diagnosed() {
    let mut s = setup();
    let a = s.arena.push(s.fx.loc(11), s.target, ConformanceSource::Inherited(s.nominal));
    let b = s.arena.push(s.fx.loc(11), s.target, ConformanceSource::Inherited(s.nominal));
    let ranking = compare_entries(&s.fx.ast, &s.arena, a, b);
    assert!(!ranking.diagnose);
    assert!(ranking.left_wins());
}

#[test]
fn test_implied_from_refined_protocol_wins() {
    let mut s = setup();
    let base = s.fx.protocol("Base", &[s.target]);
    let refined = s.fx.protocol("Refined", &[base]);
    let body = DeclContext::Nominal(s.nominal);
    // Declared earlier, but only through the less refined protocol.
    let from_base_root = s.arena.push(s.fx.loc(20), base, ConformanceSource::Explicit(body));
    let from_refined_root = s.arena.push(s.fx.loc(40), refined, ConformanceSource::Explicit(body));
    let from_base = s.arena.push(s.fx.loc(20), s.target, ConformanceSource::Implied(from_base_root));
    let from_refined = s.arena.push(s.fx.loc(40), s.target, ConformanceSource::Implied(from_refined_root));

    let ranking = compare_entries(&s.fx.ast, &s.arena, from_base, from_refined);
    assert_eq!(ranking, Ranking { ordering: Ordering::Greater, diagnose: false });
}

#[test]
fn test_implied_from_synthesized_loses_to_implied_from_explicit() {
    let mut s = setup();
    let a = s.fx.protocol("A", &[s.target]);
    let b = s.fx.protocol("B", &[s.target]);
    let body = DeclContext::Nominal(s.nominal);
    let synth_root = s.arena.push(s.fx.loc(10), a, ConformanceSource::Synthesized(s.nominal));
    let explicit_root = s.arena.push(s.fx.loc(90), b, ConformanceSource::Explicit(body));
    let via_synth = s.arena.push(s.fx.loc(10), s.target, ConformanceSource::Implied(synth_root));
    let via_explicit = s.arena.push(s.fx.loc(90), s.target, ConformanceSource::Implied(explicit_root));

    let ranking = compare_entries(&s.fx.ast, &s.arena, via_synth, via_explicit);
    assert_eq!(ranking.ordering, Ordering::Greater);
    assert!(!ranking.diagnose);
}

#[test]
fn test_refinement_can_disagree_with_declaration_order() {
    let mut s = setup();
    let y = s.fx.protocol("Y", &[s.target]);
    let x = s.fx.protocol("X", &[y]);
    let z = s.fx.protocol("Z", &[s.target]);
    let body = DeclContext::Nominal(s.nominal);
    let mut implied_via = |protocol, offset| {
        let root = s.arena.push(s.fx.loc(offset), protocol, ConformanceSource::Explicit(body));
        s.arena.push(s.fx.loc(offset), s.target, ConformanceSource::Implied(root))
    };
    let a = implied_via(x, 30);
    let b = implied_via(y, 10);
    let c = implied_via(z, 20);

    let ordering = |l, r| compare_entries(&s.fx.ast, &s.arena, l, r).ordering;
    assert_eq!(
        [ordering(a, b), ordering(b, c), ordering(c, a)],
        [Ordering::Less, Ordering::Less, Ordering::Less]
    );
}

#[test]
fn test_pipeline_keeps_one_implied_entry_per_protocol() {
    let mut fx = Fixture::new();
    let target = fx.protocol("Target", &[]);
    let y = fx.protocol("Y", &[target]);
    let x = fx.protocol("X", &[y]);
    let z = fx.protocol("Z", &[target]);
    let nominal = fx.struct_decl("S", 0, &[(x, 30), (y, 10), (z, 20)]);

    assert!(fx.lookup(nominal, target).is_some());
    let table = fx.tables.table(nominal).unwrap_or_else(|| panic!("table was prepared"));
    let implied = table
        .entries_for(target)
        .iter()
        .filter(|&&e| fx.tables.entries().get(e).kind() == ConformanceEntryKind::Implied)
        .count();
    assert_eq!(implied, 1);
}

/// One candidate for the target protocol: (kind, fixed, context, offset, root).
/// Kinds: 0 inherited, 1 explicit, 2 implied, 3 synthesized,
/// 4 implied from a synthesized entry.
fn entry_spec() -> impl Strategy<Value = (u8, bool, u8, u32, usize)> {
    (0u8..5, any::<bool>(), 0u8..3, 0u32..64, 0usize..4)
}

proptest! {
    #[test]
    fn ranking_is_a_strict_total_order(specs in prop::collection::vec(entry_spec(), 2..7)) {
        let mut fx = Fixture::new();
        let target = fx.protocol("Target", &[]);
        // Root1 refines Root0, Root3 refines Root1 and Root2; Root0 and Root2 are unrelated.
        let root0 = fx.protocol("Root0", &[target]);
        let root1 = fx.protocol("Root1", &[root0]);
        let root2 = fx.protocol("Root2", &[target]);
        let root3 = fx.protocol("Root3", &[root1, root2]);
        let roots = [root0, root1, root2, root3];
        let nominal = fx.struct_decl("S", 0, &[]);
        let exts = [fx.extension(nominal, 100, &[]), fx.extension(nominal, 200, &[])];
        let mut arena = EntryArena::new();

        let mut candidates = Vec::new();
        for &(kind, fixed, ctx, offset, root) in &specs {
            let dc = match ctx {
                0 => DeclContext::Nominal(nominal),
                n => DeclContext::Extension(exts[usize::from(n) - 1]),
            };
            let loc = fx.loc(u32::from(ctx) * 100 + offset);
            let source = match kind {
                0 => ConformanceSource::Inherited(nominal),
                1 => ConformanceSource::Explicit(dc),
                2 => ConformanceSource::Implied(arena.push(loc, roots[root], ConformanceSource::Explicit(dc))),
                3 => ConformanceSource::Synthesized(nominal),
                _ => ConformanceSource::Implied(arena.push(loc, roots[root], ConformanceSource::Synthesized(nominal))),
            };
            let id = arena.push(loc, target, source);
            if fixed {
                arena.get_mut(id).conformance = Some(ConformanceId::from_raw(0));
            }
            candidates.push(id);
        }

        let ordering = |a, b| compare_entries(&fx.ast, &arena, a, b).ordering;
        // Refinement only decides between two unfixed implied entries.
        let refinement_agrees = candidates.iter().all(|&a| {
            candidates.iter().all(|&b| {
                a == b
                    || arena.get(a).is_fixed()
                    || arena.get(b).is_fixed()
                    || arena.ranking_kind(a) != ConformanceEntryKind::Implied
                    || arena.ranking_kind(b) != ConformanceEntryKind::Implied
                    || ordering(a, b) == declaration_order(&fx.ast, &arena, a, b)
            })
        });

        for &a in &candidates {
            for &b in &candidates {
                if a == b {
                    continue;
                }
                let ab = ordering(a, b);
                prop_assert_ne!(ab, Ordering::Equal);
                prop_assert_eq!(ab, ordering(b, a).reverse());
                if !refinement_agrees {
                    continue;
                }
                for &c in &candidates {
                    if c == a || c == b {
                        continue;
                    }
                    if ab == Ordering::Less && ordering(b, c) == Ordering::Less {
                        prop_assert_eq!(ordering(a, c), Ordering::Less);
                    }
                }
            }
        }
    }
}
