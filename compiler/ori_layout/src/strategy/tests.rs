use std::rc::Rc;

use ori_types::{DeclFlags, Idx};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::interp::{InterpError, Memory, RuntimeHook};
use crate::ir::{Callee, IrType, RuntimeFn, ValueWitness};
use crate::test_support::{addr, emit, exec, exec_with, inject_and_get_tag, inject_and_project, switch_on_case, Fixture};
use crate::{
    BitPattern, CaseSlot, CopyDestroyKind, EnumImplStrategy, EnumStrategyKind, Explosion, IrBuilder, TypeInfoKind,
    TypeInfoStore,
};

fn strategy(store: &TypeInfoStore<'_>, ty: Idx) -> Rc<EnumImplStrategy> {
    store.enum_strategy(ty).unwrap_or_else(|| panic!("{ty:?} is not an enum"))
}

/// `A(Int32), B, C`
fn int_with_two_empties(fx: &mut Fixture) -> Idx {
    let cases = vec![fx.payload_case("a", Idx::INT32), fx.case("b"), fx.case("c")];
    fx.enum_ty("Scenario", cases)
}

/// `A(NativeObject), B(NativeObject)`
fn two_references(fx: &mut Fixture) -> Idx {
    let cases = vec![
        fx.payload_case("a", Idx::NATIVE_OBJECT),
        fx.payload_case("b", Idx::NATIVE_OBJECT),
    ];
    fx.enum_ty("Pair", cases)
}

/// Answers every call with the same `i32`.
struct Answer(i32);

impl RuntimeHook for Answer {
    fn call(&mut self, _: &Callee, _: &[BitPattern], _: &mut Memory) -> Result<Option<BitPattern>, InterpError> {
        Ok(Some(BitPattern::from_i64(32, i64::from(self.0))))
    }
}

// ── Selection ───────────────────────────────────────────────────────

#[test]
fn test_strategy_selection() {
    let mut fx = Fixture::new();
    let empty = fx.enum_ty("Never", Vec::new());
    let unit = {
        let cases = vec![fx.case("only")];
        fx.enum_ty("Unit", cases)
    };
    let wrapper = {
        let cases = vec![fx.payload_case("wrapped", Idx::INT64)];
        fx.enum_ty("Wrapper", cases)
    };
    let colors = {
        let cases = vec![fx.case("red"), fx.case("green"), fx.case("blue")];
        fx.enum_ty("Color", cases)
    };
    let c_style = {
        let cases = vec![fx.case("x"), fx.case("y")];
        let decl = fx.enum_decl("CStyle", cases, DeclFlags::C_COMPATIBLE);
        fx.ast.declared_type(decl)
    };
    let single = int_with_two_empties(&mut fx);
    let multi = two_references(&mut fx);
    let remote = {
        let cases = vec![fx.payload_case("a", Idx::INT32), fx.case("b")];
        let decl = fx.enum_decl("Remote", cases, DeclFlags::RESILIENT);
        fx.ast.declared_type(decl)
    };
    let store = fx.store();

    let kinds: Vec<EnumStrategyKind> = [empty, unit, wrapper, colors, c_style, single, multi, remote]
        .into_iter()
        .map(|ty| strategy(&store, ty).kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            EnumStrategyKind::Singleton,
            EnumStrategyKind::Singleton,
            EnumStrategyKind::Singleton,
            EnumStrategyKind::NoPayload,
            EnumStrategyKind::CCompatible,
            EnumStrategyKind::SinglePayload,
            EnumStrategyKind::MultiPayload,
            EnumStrategyKind::Resilient,
        ]
    );
    assert_eq!(EnumStrategyKind::CCompatible.to_string(), "C-compatible");
    assert_eq!(EnumStrategyKind::MultiPayload.to_string(), "multi-payload");
}

#[test]
fn test_known_empty_payloads_fold_into_empty_cases() {
    let mut fx = Fixture::new();
    let cases = vec![fx.payload_case("a", Idx::UNIT), fx.case("b")];
    let ty = fx.enum_ty("Folded", cases);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.kind(), EnumStrategyKind::NoPayload);
    assert_eq!(s.element(0).slot, CaseSlot::Empty(0));
    assert!(s.element(0).payload.is_none());
    assert_eq!(s.tag_index(1), 1);
}

#[test]
fn test_single_case_enums_use_the_payload_layout() {
    let mut fx = Fixture::new();
    let unit = {
        let cases = vec![fx.case("only")];
        fx.enum_ty("Unit", cases)
    };
    let wrapper = {
        let cases = vec![fx.payload_case("wrapped", Idx::BOOL)];
        fx.enum_ty("Wrapper", cases)
    };
    let store = fx.store();

    let s = strategy(&store, unit);
    assert_eq!(s.fixed_size(), Some(0));
    assert!(s.explosion_widths().is_empty());
    assert_eq!(inject_and_get_tag(&s, 0, &[]), (0, Vec::new()));
    assert_eq!(switch_on_case(&s, 0, &[], false), 0);

    let s = strategy(&store, wrapper);
    assert_eq!(s.fixed_size(), Some(1));
    assert_eq!(s.fixed_extra_inhabitant_count(), 254);
    assert_eq!(s.tag_index(0), -1);
    let (tag, bytes) = inject_and_get_tag(&s, 0, &[BitPattern::from_u64(8, 1)]);
    assert_eq!((tag, bytes), (-1, vec![1]));
    assert_eq!(inject_and_project(&s, 0, &[BitPattern::from_u64(8, 1)]), vec![BitPattern::from_u64(8, 1)]);
}

// ── Fixed layouts ───────────────────────────────────────────────────

#[test]
fn test_payload_with_two_empty_cases_spills_into_a_tag_byte() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);

    assert_eq!(s.kind(), EnumStrategyKind::SinglePayload);
    assert_eq!((s.fixed_size(), s.fixed_alignment()), (Some(5), Some(4)));
    assert_eq!((s.payload_bit_count(), s.extra_tag_bit_count()), (32, 1));
    assert_eq!(s.num_extra_tag_values(), 2);
    assert_eq!(s.num_extra_inhabitant_tag_values(), 0);
    assert_eq!(s.spare_bits().runs(), vec![(33, 7)]);
    assert_eq!(s.explosion_widths().to_vec(), vec![32, 1]);
    assert_eq!(s.payload_elements(), &[0]);
    assert_eq!(s.empty_elements(), &[1, 2]);
    assert_eq!((s.tag_index(0), s.tag_index(1), s.tag_index(2)), (-1, 0, 1));

    assert_eq!(s.bit_pattern_for_no_payload_element(1), BitPattern::from_u64(40, 1 << 32));
    assert_eq!(s.bit_pattern_for_no_payload_element(2), BitPattern::from_u64(40, (1 << 32) | 1));
    assert_eq!(s.bit_mask_for_no_payload_elements(), BitPattern::ones(40));
    assert_eq!(s.tag_bits_for_payloads(), BitPattern::from_u64(40, 0xff << 32));

    let payload = BitPattern::from_u64(32, 0xdead_beef);
    assert_eq!(
        inject_and_get_tag(&s, 0, &[payload.clone()]),
        (-1, vec![0xef, 0xbe, 0xad, 0xde, 0])
    );
    assert_eq!(inject_and_get_tag(&s, 1, &[]), (0, vec![0, 0, 0, 0, 1]));
    assert_eq!(inject_and_get_tag(&s, 2, &[]), (1, vec![1, 0, 0, 0, 1]));
    assert_eq!(inject_and_project(&s, 0, &[payload.clone()]), vec![payload]);
}

#[test]
fn test_two_reference_payloads_tag_in_a_spare_bit() {
    let mut fx = Fixture::new();
    let ty = two_references(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);

    assert_eq!(s.kind(), EnumStrategyKind::MultiPayload);
    assert_eq!(s.fixed_size(), Some(8));
    assert_eq!(s.extra_tag_bit_count(), 0);
    assert_eq!(s.payload_tag_bits().map(|bits| bits.runs()), Some(vec![(2, 1)]));
    assert_eq!(s.spare_bits().runs(), vec![(0, 2)]);
    assert_eq!(s.tag_bits_for_payloads(), BitPattern::from_u64(64, 4));
    assert!(!s.may_have_extra_inhabitants());
    assert_eq!((s.tag_index(0), s.tag_index(1)), (-2, -1));

    let object = addr(0x1000);
    let (tag, bytes) = inject_and_get_tag(&s, 1, &[object.clone()]);
    assert_eq!(tag, -1);
    assert_eq!(bytes, vec![0x04, 0x10, 0, 0, 0, 0, 0, 0]);
    assert_eq!(inject_and_get_tag(&s, 0, &[object.clone()]).0, -2);
    assert_eq!(inject_and_project(&s, 1, &[object.clone()]), vec![object]);
}

#[test]
fn test_payload_enum_type_info_is_loadable() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let info = store.get(ty);
    assert_eq!((info.kind, info.size, info.alignment), (TypeInfoKind::Loadable, 5, 4));
    assert!(info.pod);
    let s = info.enum_strategy().unwrap_or_else(|| panic!("enum has a strategy"));
    assert_eq!(s.ty(), ty);
    assert_eq!(s.name(), "Scenario");
    assert_eq!(s.type_info_kind(), TypeInfoKind::Loadable);
    assert_eq!(s.copy_destroy_kind(), Some(CopyDestroyKind::Pod));
}

#[test]
fn test_pack_and_unpack_merge_the_tag_above_the_payload() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    let func = emit(&[], |b, _| {
        let value = s.emit_value_injection(b, 2, None);
        let packed = s.pack(b, &value);
        let unpacked = s.unpack(b, packed);
        let mut results: Vec<_> = packed.into_iter().collect();
        results.extend_from_slice(unpacked.values());
        b.ret(results);
    });
    let mut memory = Memory::new();
    let execution = exec(&func, &[], &mut memory);
    assert_eq!(
        execution.results,
        vec![
            BitPattern::from_u64(40, (1 << 32) | 1),
            BitPattern::from_u64(32, 1),
            BitPattern::from_u64(1, 1),
        ]
    );
}

#[test]
fn test_store_tag_rewrites_only_the_tag() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    let func = emit(&[IrType::Ptr], |b, p| {
        s.store_tag(b, 2, p[0]);
        let empty = s.emit_get_tag(b, p[0]);
        let payload = b.const_int(32, 77);
        b.store(payload, p[0], 0);
        s.store_tag(b, 0, p[0]);
        let full = s.emit_get_tag(b, p[0]);
        b.ret(vec![empty, full]);
    });
    let mut memory = Memory::new();
    let at = memory.alloc(5, 4);
    let execution = exec(&func, &[addr(at)], &mut memory);
    assert_eq!(
        execution.results,
        vec![BitPattern::from_i64(32, 1), BitPattern::from_i64(32, -1)]
    );
    assert_eq!(memory.read(at, 5), Ok(&[77u8, 0, 0, 0, 0][..]));
}

#[test]
fn test_nested_optionals_share_extra_inhabitants() {
    let mut fx = Fixture::new();
    let opt = fx.generic_enum("Opt", |fx, t| vec![fx.payload_case("some", t), fx.case("none")]);
    let inner = fx.instantiate(opt, vec![Idx::BOOL]);
    let outer = fx.instantiate(opt, vec![inner]);
    let store = fx.store();

    let s = strategy(&store, inner);
    assert_eq!(s.fixed_size(), Some(1));
    assert_eq!(s.num_extra_inhabitant_tag_values(), 1);
    assert_eq!(s.bit_pattern_for_no_payload_element(1), BitPattern::from_u64(8, 2));
    assert_eq!(s.fixed_extra_inhabitant_count(), 253);

    let s = strategy(&store, outer);
    assert_eq!(s.fixed_size(), Some(1));
    assert_eq!(s.bit_pattern_for_no_payload_element(1), BitPattern::from_u64(8, 3));
    assert_eq!(s.fixed_extra_inhabitant_value(0), BitPattern::from_u64(8, 4));
    // `some(none)` is the inner enum's own empty pattern.
    assert_eq!(inject_and_get_tag(&s, 0, &[BitPattern::from_u64(8, 2)]), (-1, vec![2]));
    assert_eq!(inject_and_get_tag(&s, 1, &[]), (0, vec![3]));
}

#[test]
fn test_generic_unit_payload_is_not_folded() {
    let mut fx = Fixture::new();
    let opt = fx.generic_enum("Opt", |fx, t| vec![fx.payload_case("some", t), fx.case("none")]);
    let unit = fx.instantiate(opt, vec![Idx::UNIT]);
    let store = fx.store();
    let s = strategy(&store, unit);
    assert_eq!(s.kind(), EnumStrategyKind::SinglePayload);
    assert_eq!(s.fixed_size(), Some(1));
    assert_eq!(s.explosion_widths().to_vec(), vec![1]);
    assert_eq!(inject_and_get_tag(&s, 0, &[]), (-1, vec![0]));
    assert_eq!(inject_and_get_tag(&s, 1, &[]), (0, vec![1]));
}

// ── Switches ────────────────────────────────────────────────────────

#[test]
fn test_switches_reach_the_injected_case() {
    let mut fx = Fixture::new();
    let single = int_with_two_empties(&mut fx);
    let multi = two_references(&mut fx);
    let colors = {
        let cases = vec![fx.case("red"), fx.case("green"), fx.case("blue")];
        fx.enum_ty("Color", cases)
    };
    let store = fx.store();

    let s = strategy(&store, single);
    let word = [BitPattern::from_u64(32, 9)];
    for indirect in [false, true] {
        assert_eq!(switch_on_case(&s, 0, &word, indirect), 0);
        assert_eq!(switch_on_case(&s, 1, &[], indirect), 1);
        assert_eq!(switch_on_case(&s, 2, &[], indirect), 2);
    }

    let s = strategy(&store, multi);
    assert_eq!(switch_on_case(&s, 0, &[addr(0x2000)], false), 0);
    assert_eq!(switch_on_case(&s, 1, &[addr(0x2000)], true), 1);

    let s = strategy(&store, colors);
    for case in 0..3 {
        assert_eq!(switch_on_case(&s, case, &[], false), case as i64);
    }
}

#[test]
fn test_switch_without_default_makes_missing_cases_unreachable() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    let func = emit(&[IrType::Ptr], |b, p| {
        s.store_tag(b, 2, p[0]);
        let only = b.append_block();
        s.emit_indirect_switch(b, p[0], &[(1, only)], None);
        b.position_at_end(only);
        b.ret(Vec::new());
    });
    let mut memory = Memory::new();
    let at = memory.alloc(5, 4);
    let result = crate::interp::run(&func, &[addr(at)], &mut memory);
    assert!(matches!(result, Err(InterpError::Unreachable(_))));
}

// ── Value semantics ─────────────────────────────────────────────────

#[test]
fn test_optional_reference_copies_and_destroys_directly() {
    let mut fx = Fixture::new();
    let widget = fx.class_ty("Widget");
    let cases = vec![fx.payload_case("some", widget), fx.case("none")];
    let ty = fx.enum_ty("MaybeWidget", cases);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.copy_destroy_kind(), Some(CopyDestroyKind::NullableRefcounted));
    assert_eq!(s.fixed_size(), Some(8));
    assert_eq!(s.bit_pattern_for_no_payload_element(1), BitPattern::zero(64));

    let func = emit(&[IrType::Ptr, IrType::Ptr], |b, p| {
        let value = s.load(b, p[1], 0);
        s.copy(b, &value);
        s.destroy(b, p[0]);
        s.initialize_with_take(b, p[0], p[1]);
        b.ret(Vec::new());
    });
    let mut memory = Memory::new();
    let dest = memory.alloc(8, 8);
    let src = memory.alloc(8, 8);
    memory.store(dest, &addr(0x2000)).unwrap_or_else(|e| panic!("{e}"));
    memory.store(src, &addr(0x3000)).unwrap_or_else(|e| panic!("{e}"));
    let execution = exec(&func, &[addr(dest), addr(src)], &mut memory);
    let calls: Vec<(Callee, Vec<BitPattern>)> = execution.trace.into_iter().map(|e| (e.callee, e.args)).collect();
    assert_eq!(
        calls,
        vec![
            (Callee::Retain, vec![addr(0x3000)]),
            (Callee::Release, vec![addr(0x2000)]),
        ]
    );
    assert_eq!(memory.load(dest, 64), Ok(addr(0x3000)));
}

#[test]
fn test_tagged_references_are_masked_before_retain() {
    let mut fx = Fixture::new();
    let ty = two_references(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.copy_destroy_kind(), Some(CopyDestroyKind::TaggedRefcounted));

    let func = emit(&[IrType::Ptr, IrType::Ptr], |b, p| {
        s.assign_with_copy(b, p[0], p[1]);
        b.ret(Vec::new());
    });
    let mut memory = Memory::new();
    let dest = memory.alloc(8, 8);
    let src = memory.alloc(8, 8);
    memory.store(dest, &addr(0x2000)).unwrap_or_else(|e| panic!("{e}"));
    memory.store(src, &addr(0x3004)).unwrap_or_else(|e| panic!("{e}"));
    let execution = exec(&func, &[addr(dest), addr(src)], &mut memory);
    assert_eq!(execution.calls_to(&Callee::Retain)[0].args, vec![addr(0x3000)]);
    assert_eq!(execution.calls_to(&Callee::Release)[0].args, vec![addr(0x2000)]);
    assert_eq!(memory.load(dest, 64), Ok(addr(0x3004)));
}

#[test]
fn test_struct_payload_is_retained_only_when_present() {
    let mut fx = Fixture::new();
    let handle = fx.struct_ty("Handle", &[("object", Idx::NATIVE_OBJECT), ("count", Idx::INT64)]);
    let cases = vec![fx.payload_case("some", handle), fx.case("none")];
    let ty = fx.enum_ty("MaybeHandle", cases);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.copy_destroy_kind(), Some(CopyDestroyKind::Normal));
    assert_eq!(s.fixed_size(), Some(16));

    let copy_case = |case: usize, payload: &[BitPattern]| {
        let mut params = vec![IrType::Ptr];
        params.extend(payload.iter().map(|p| IrType::Int(p.width())));
        let func = emit(&params, |b, p| {
            let value = Explosion::from_values(p[1..].iter().copied());
            let value = s.emit_value_injection(b, case, (!p[1..].is_empty()).then_some(&value));
            s.copy(b, &value);
            s.consume(b, &value);
            b.ret(Vec::new());
        });
        let mut memory = Memory::new();
        let mut args = vec![addr(0)];
        args.extend(payload.iter().cloned());
        exec(&func, &args, &mut memory).trace
    };

    let payload = addr(0x5000).concat(&BitPattern::from_u64(64, 7));
    let trace = copy_case(0, &[payload]);
    let callees: Vec<Callee> = trace.iter().map(|e| e.callee).collect();
    assert_eq!(callees, vec![Callee::Retain, Callee::Release]);
    assert_eq!(trace[0].args, vec![addr(0x5000)]);
    assert!(copy_case(1, &[]).is_empty());
}

#[test]
fn test_mixed_payloads_dispatch_on_the_case() {
    let mut fx = Fixture::new();
    let widget = fx.class_ty("Widget");
    let cases = vec![
        fx.payload_case("object", widget),
        fx.payload_case("number", Idx::INT64),
        fx.case("nothing"),
    ];
    let ty = fx.enum_ty("Mixed", cases);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.copy_destroy_kind(), Some(CopyDestroyKind::BitwiseTakable));
    assert_eq!(s.fixed_size(), Some(9));

    let destroy = emit(&[IrType::Ptr], |b, p| {
        s.destroy(b, p[0]);
        b.ret(Vec::new());
    });
    let releases = |case: usize, payload: &[BitPattern]| {
        let func = emit(&[IrType::Ptr], |b, p| {
            let values: Vec<_> = payload.iter().map(|v| b.const_pattern(v.clone())).collect();
            let value = Explosion::from_values(values);
            let value = s.emit_value_injection(b, case, (!payload.is_empty()).then_some(&value));
            s.store(b, &value, p[0], 0);
            b.ret(Vec::new());
        });
        let mut memory = Memory::new();
        let at = memory.alloc(9, 8);
        exec(&func, &[addr(at)], &mut memory);
        exec(&destroy, &[addr(at)], &mut memory).trace.len()
    };
    assert_eq!(releases(0, &[addr(0x4000)]), 1);
    assert_eq!(releases(1, &[BitPattern::from_u64(64, 0x4000)]), 0);
    assert_eq!(releases(2, &[]), 0);
}

// ── Extra inhabitants ───────────────────────────────────────────────

#[test]
fn test_no_payload_extra_inhabitants_through_memory() {
    let mut fx = Fixture::new();
    let cases = vec![fx.case("red"), fx.case("green"), fx.case("blue")];
    let ty = fx.enum_ty("Color", cases);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert!(s.may_have_extra_inhabitants());
    assert_eq!(s.fixed_extra_inhabitant_count(), 253);
    assert_eq!(s.fixed_extra_inhabitant_value(0), BitPattern::from_u64(8, 3));
    assert_eq!(s.fixed_extra_inhabitant_mask(), BitPattern::ones(8));

    let func = emit(&[IrType::Ptr], |b, p| {
        let before = s.emit_get_extra_inhabitant_index(b, p[0]);
        let four = b.const_i32(4);
        s.emit_store_extra_inhabitant(b, four, p[0]);
        let after = s.emit_get_extra_inhabitant_index(b, p[0]);
        b.ret(vec![before, after]);
    });
    let mut memory = Memory::new();
    let at = memory.alloc(1, 1);
    memory.store(at, &BitPattern::from_u64(8, 1)).unwrap_or_else(|e| panic!("{e}"));
    let execution = exec(&func, &[addr(at)], &mut memory);
    assert_eq!(
        execution.results,
        vec![BitPattern::from_i64(32, -1), BitPattern::from_i64(32, 4)]
    );
    assert_eq!(memory.read(at, 1), Ok(&[7u8][..]));
}

#[test]
#[should_panic(expected = "has no extra inhabitants")]
fn test_multi_payload_offers_no_extra_inhabitants() {
    let mut fx = Fixture::new();
    let ty = two_references(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.fixed_extra_inhabitant_count(), 0);
    let _ = s.fixed_extra_inhabitant_value(0);
}

// ── Runtime layouts ─────────────────────────────────────────────────

#[test]
fn test_resilient_enums_call_the_runtime() {
    let mut fx = Fixture::new();
    let cases = vec![fx.payload_case("a", Idx::INT32), fx.case("b")];
    let decl = fx.enum_decl("Remote", cases, DeclFlags::RESILIENT);
    let ty = fx.ast.declared_type(decl);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert!(!s.is_fixed());
    assert_eq!(s.fixed_size(), None);
    assert!(s.may_have_extra_inhabitants());
    assert_eq!(store.get(ty).kind, TypeInfoKind::NonFixed);

    let func = emit(&[IrType::Ptr], |b, p| {
        let tag = s.emit_get_tag(b, p[0]);
        s.store_tag(b, 0, p[0]);
        s.destructive_project_data_for_load(b, 0, p[0]);
        s.destroy(b, p[0]);
        let a = b.append_block();
        let other = b.append_block();
        s.emit_indirect_switch(b, p[0], &[(0, a)], Some(other));
        b.position_at_end(a);
        let reached_a = b.const_i32(0);
        b.ret(vec![tag, reached_a]);
        b.position_at_end(other);
        let reached_other = b.const_i32(1);
        b.ret(vec![tag, reached_other]);
    });
    let mut memory = Memory::new();
    let at = addr(0x9000);
    let execution = exec_with(&func, &[at.clone()], &mut memory, &mut Answer(-1));
    assert_eq!(
        execution.results,
        vec![BitPattern::from_i64(32, -1), BitPattern::from_i64(32, 0)]
    );
    let runtime = |func| Callee::Runtime { func, ty };
    let callees: Vec<Callee> = execution.trace.iter().map(|e| e.callee).collect();
    assert_eq!(
        callees,
        vec![
            runtime(RuntimeFn::GetEnumTag),
            runtime(RuntimeFn::DestructiveInjectEnumTag),
            runtime(RuntimeFn::DestructiveProjectEnumData),
            Callee::ValueWitness {
                ty,
                witness: ValueWitness::Destroy,
            },
            runtime(RuntimeFn::GetEnumTag),
        ]
    );
    assert_eq!(execution.trace[1].args, vec![at, BitPattern::from_i64(32, -1)]);
}

#[test]
#[should_panic(expected = "resilient enum 'Remote' has no loadable representation")]
fn test_resilient_enums_have_no_explosion() {
    let mut fx = Fixture::new();
    let cases = vec![fx.case("a"), fx.case("b")];
    let decl = fx.enum_decl("Remote", cases, DeclFlags::RESILIENT);
    let ty = fx.ast.declared_type(decl);
    let store = fx.store();
    let s = strategy(&store, ty);
    let _ = s.explosion_widths();
}

#[test]
fn test_generic_single_payload_uses_runtime_case_numbering() {
    let mut fx = Fixture::new();
    let opt = fx.generic_enum("Opt", |fx, t| vec![fx.payload_case("some", t), fx.case("none")]);
    let ty = fx.ast.declared_type(opt);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.kind(), EnumStrategyKind::SinglePayload);
    assert!(!s.is_fixed());

    let func = emit(&[IrType::Ptr], |b, p| {
        let tag = s.emit_get_tag(b, p[0]);
        s.store_tag(b, 1, p[0]);
        s.destructive_project_data_for_load(b, 0, p[0]);
        let index = s.emit_get_extra_inhabitant_index(b, p[0]);
        b.ret(vec![tag, index]);
    });
    let mut memory = Memory::new();
    let at = addr(0x9000);
    let execution = exec_with(&func, &[at.clone()], &mut memory, &mut Answer(0));
    assert_eq!(execution.results[0], BitPattern::from_i64(32, 0));
    let one = BitPattern::from_u64(32, 1);
    assert_eq!(
        execution.trace[0].callee,
        Callee::Runtime {
            func: RuntimeFn::GetEnumCaseSinglePayload,
            ty
        }
    );
    assert_eq!(execution.trace[0].args, vec![at.clone(), one.clone()]);
    assert_eq!(execution.trace[1].args, vec![at.clone(), BitPattern::from_u64(32, 0), one]);
    assert_eq!(execution.trace.len(), 3);
    assert_eq!(
        execution.trace[2].callee,
        Callee::ValueWitness {
            ty,
            witness: ValueWitness::GetExtraInhabitantIndex
        }
    );
}

#[test]
fn test_generic_multi_payload_translates_runtime_case_numbers() {
    let mut fx = Fixture::new();
    let either = fx.generic_enum("Either", |fx, t| {
        vec![fx.payload_case("left", t), fx.payload_case("right", t), fx.case("neither")]
    });
    let ty = fx.ast.declared_type(either);
    let store = fx.store();
    let s = strategy(&store, ty);
    assert_eq!(s.kind(), EnumStrategyKind::MultiPayload);
    assert!(!s.may_have_extra_inhabitants());

    let func = emit(&[IrType::Ptr], |b, p| {
        let tag = s.emit_get_tag(b, p[0]);
        s.store_tag(b, 1, p[0]);
        b.ret(vec![tag]);
    });
    let mut memory = Memory::new();
    let execution = exec_with(&func, &[addr(0x9000)], &mut memory, &mut Answer(2));
    assert_eq!(execution.results, vec![BitPattern::from_i64(32, 0)]);
    assert_eq!(
        execution.trace[1].callee,
        Callee::Runtime {
            func: RuntimeFn::StoreEnumTagMultiPayload,
            ty
        }
    );
    assert_eq!(execution.trace[1].args[1], BitPattern::from_u64(32, 1));
}

#[test]
fn test_generic_singleton_forwards_to_its_payload() {
    let mut fx = Fixture::new();
    let boxed = fx.generic_enum("Box", |fx, t| vec![fx.payload_case("value", t)]);
    let ty = fx.ast.declared_type(boxed);
    let store = fx.store();
    let s = strategy(&store, ty);
    let payload_ty = s.element(0).payload.as_ref().map(|p| p.ty).unwrap_or(Idx::NONE);
    assert!(s.may_have_extra_inhabitants());

    let func = emit(&[IrType::Ptr, IrType::Ptr], |b, p| {
        s.destroy(b, p[0]);
        s.initialize_with_copy(b, p[0], p[1]);
        let only = b.append_block();
        s.emit_indirect_switch(b, p[0], &[(0, only)], None);
        b.position_at_end(only);
        let tag = s.emit_get_tag(b, p[0]);
        b.ret(vec![tag]);
    });
    let mut memory = Memory::new();
    let execution = exec_with(&func, &[addr(0x9000), addr(0xa000)], &mut memory, &mut Answer(0));
    assert_eq!(execution.results, vec![BitPattern::from_i64(32, -1)]);
    let witnesses: Vec<Callee> = execution.trace.iter().map(|e| e.callee).collect();
    assert_eq!(
        witnesses,
        vec![
            Callee::ValueWitness {
                ty: payload_ty,
                witness: ValueWitness::Destroy
            },
            Callee::ValueWitness {
                ty: payload_ty,
                witness: ValueWitness::InitializeWithCopy
            },
        ]
    );
}

#[test]
#[should_panic(expected = "projecting empty case 1 of 'Scenario'")]
fn test_projecting_an_empty_case_panics() {
    let mut fx = Fixture::new();
    let ty = int_with_two_empties(&mut fx);
    let store = fx.store();
    let s = strategy(&store, ty);
    let mut b = IrBuilder::new("project");
    let at = b.param(IrType::Ptr);
    s.destructive_project_data_for_load(&mut b, 1, at);
}

proptest! {
    #[test]
    fn prop_single_payload_round_trips(value in any::<u32>(), case in 0usize..3) {
        let mut fx = Fixture::new();
        let ty = int_with_two_empties(&mut fx);
        let store = fx.store();
        let s = strategy(&store, ty);
        let payload = if case == 0 { vec![BitPattern::from_u64(32, u64::from(value))] } else { Vec::new() };
        let (tag, _) = inject_and_get_tag(&s, case, &payload);
        prop_assert_eq!(tag, i64::from(s.tag_index(case)));
        prop_assert_eq!(switch_on_case(&s, case, &payload, true), case as i64);
    }
}
