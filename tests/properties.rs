mod common;

use std::collections::HashSet;

use common::{car_fixnum, init_logger};
use tagged_gc::{
    layout::{cons, fun_raw_addr, hash_table, simple_fun, symbol, vector, weak_pointer},
    widetag::SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG,
    Collector, GcConfig, Heap, LispObj, RegisterFile, RegisterId, RegisterLayout, ThreadState,
    Weakness, EMPTY_HASH_SLOT, NIL, T,
};

#[test]
fn shared_objects_are_copied_once() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let shared = heap.cons(LispObj::fixnum(1), NIL).unwrap();
    let vec = heap.make_simple_vector(&[shared, shared]).unwrap();
    let pair = heap.cons(shared, vec).unwrap();
    let h_pair = heap.acquire_handle(pair);
    let h_shared = heap.acquire_handle(shared);

    let stats = heap.collect(&mut []);
    assert_eq!(stats.objects_copied, 3);

    let pair = heap.get_handle(&h_pair).native_pointer();
    let shared = heap.get_handle(&h_shared);
    let vec = heap.load_slot(pair, cons::CDR).native_pointer();
    assert_eq!(heap.load_slot(pair, cons::CAR), shared);
    assert_eq!(heap.load_slot(vec, vector::DATA), shared);
    assert_eq!(heap.load_slot(vec, vector::DATA + 1), shared);
    assert_eq!(car_fixnum(&heap, shared), 1);
}

#[test]
fn circular_lists_stay_circular() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let c1 = heap.cons(LispObj::fixnum(1), NIL).unwrap();
    let c2 = heap.cons(LispObj::fixnum(2), c1).unwrap();
    heap.store_slot(c1.native_pointer(), cons::CDR, c2);
    let h = heap.acquire_handle(c1);

    let stats = heap.collect(&mut []);
    assert_eq!(stats.objects_copied, 2);

    let n1 = heap.get_handle(&h);
    let n2 = heap.load_slot(n1.native_pointer(), cons::CDR);
    assert_eq!(heap.load_slot(n2.native_pointer(), cons::CDR), n1);
    assert_eq!(car_fixnum(&heap, n1), 1);
    assert_eq!(car_fixnum(&heap, n2), 2);
}

#[test]
fn forwarded_objects_are_not_copied_again() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let cell = heap.cons(LispObj::fixnum(3), NIL).unwrap();
    let span = heap.allocate_static(2).unwrap();
    heap.store(span, cell);
    heap.store(span + 8, cell);

    let mut gc = Collector::begin(&mut heap);
    let first = gc.scavenge_value(cell);
    let after_first = gc.stats();
    assert_eq!(gc.scavenge_value(cell), first);
    assert_eq!(gc.scavenge_one(span), 1);
    assert_eq!(gc.scavenge_one(span + 8), 1);
    assert_eq!(gc.stats(), after_first);
    assert_eq!(gc.heap().load(span), first);
    assert_eq!(gc.heap().load(span + 8), first);
    gc.finish();
}

#[test]
#[should_panic(expected = "ended at")]
fn span_shorter_than_its_objects_is_fatal() {
    let mut heap = Heap::new().unwrap();
    let v = heap.allocate_static(4).unwrap();
    heap.store(v, LispObj::header(SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG, 0));
    heap.store_slot(v, vector::LENGTH, LispObj::fixnum(10));

    let mut gc = Collector::begin(&mut heap);
    gc.scavenge(v, 3);
}

#[test]
fn weak_pointers_are_either_valid_or_broken() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let live = heap.cons(LispObj::fixnum(1), NIL).unwrap();
    let dead = heap.cons(LispObj::fixnum(2), NIL).unwrap();
    let h_live = heap.acquire_handle(live);
    let targets = [live, dead, LispObj::fixnum(5), T, dead];
    let handles: Vec<_> = targets
        .iter()
        .map(|&t| {
            let wp = heap.make_weak_pointer(t).unwrap();
            heap.acquire_handle(wp)
        })
        .collect();

    let stats = heap.collect(&mut []);
    assert_eq!(stats.weak_pointers_broken, 2);

    let live = heap.get_handle(&h_live);
    for (h, target) in handles.iter().zip(targets) {
        let wp = heap.get_handle(h).native_pointer();
        let value = heap.load_slot(wp, weak_pointer::VALUE);
        let broken = heap.load_slot(wp, weak_pointer::BROKEN);
        if target == dead {
            assert_eq!((value, broken), (NIL, T));
        } else {
            assert_eq!(broken, NIL);
            if target.is_pointer() && target != T {
                assert_eq!(value, live);
                let region = heap.region(value.native_pointer()).unwrap();
                assert!(!region.is_from_space());
            } else {
                assert_eq!(value, target);
            }
        }
    }
}

/// Entries `(k1 dead, v1 live)`, `(k2 live, v2 live)`, `(k3 live, v3
/// dead)`; returns the car fixnums of the entries that survive.
fn surviving_entries(weakness: Weakness) -> (Vec<(i64, i64)>, u64) {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let table = heap.make_hash_table(8, Some(weakness), true).unwrap();
    let mut keep = Vec::new();
    for (i, key_live, value_live) in [(1, false, true), (2, true, true), (3, true, false)] {
        let k = heap.cons(LispObj::fixnum(i), NIL).unwrap();
        let v = heap.cons(LispObj::fixnum(10 + i), NIL).unwrap();
        heap.hash_table_put(table, k, v).unwrap();
        if key_live {
            keep.push(heap.acquire_handle(k));
        }
        if value_live {
            keep.push(heap.acquire_handle(v));
        }
    }
    let h = heap.acquire_handle(table);

    let stats = heap.collect(&mut []);

    let table = heap.get_handle(&h);
    let base = table.native_pointer();
    let mut entries: Vec<_> = heap
        .hash_table_entries(table)
        .into_iter()
        .map(|(k, v)| (car_fixnum(&heap, k), car_fixnum(&heap, v)))
        .collect();
    entries.sort();
    assert_eq!(
        heap.load_slot(base, hash_table::NUMBER_ENTRIES),
        LispObj::fixnum(entries.len() as i64)
    );

    // Every removed pair is back on the free list with the marker in place.
    let kv = heap.load_slot(base, hash_table::TABLE).native_pointer();
    let next = heap.load_slot(base, hash_table::NEXT_VECTOR).native_pointer();
    let mut free = heap.load_slot(base, hash_table::NEXT_FREE_KV).fixnum_value() as u64;
    let mut free_slots = HashSet::new();
    while free != 0 {
        assert!(free_slots.insert(free), "free list loops at {free}");
        assert_eq!(heap.load_slot(kv, vector::DATA + 2 * free), EMPTY_HASH_SLOT);
        assert_eq!(heap.load_slot(kv, vector::DATA + 2 * free + 1), EMPTY_HASH_SLOT);
        free = heap.load_raw(next + (vector::DATA + free) * 8);
    }
    assert_eq!(free_slots.len(), 8 - entries.len());
    (entries, stats.weak_entries_removed)
}

#[test]
fn key_weak_table_needs_a_live_key() {
    let (entries, removed) = surviving_entries(Weakness::Key);
    assert_eq!(entries, vec![(2, 12), (3, 13)]);
    assert_eq!(removed, 1);
}

#[test]
fn value_weak_table_needs_a_live_value() {
    let (entries, removed) = surviving_entries(Weakness::Value);
    assert_eq!(entries, vec![(1, 11), (2, 12)]);
    assert_eq!(removed, 1);
}

#[test]
fn key_or_value_weak_table_needs_either() {
    let (entries, removed) = surviving_entries(Weakness::KeyOrValue);
    assert_eq!(entries, vec![(1, 11), (2, 12), (3, 13)]);
    assert_eq!(removed, 0);
}

#[test]
fn key_and_value_weak_table_needs_both() {
    let (entries, removed) = surviving_entries(Weakness::KeyAndValue);
    assert_eq!(entries, vec![(2, 12)]);
    assert_eq!(removed, 2);
}

#[test]
fn weak_table_entries_keep_other_tables_alive() {
    init_logger();

    // The inner table is only reachable through a live entry of the outer.
    let mut heap = Heap::new().unwrap();
    let outer = heap.make_hash_table(2, Some(Weakness::Key), true).unwrap();
    let inner = heap.make_hash_table(2, Some(Weakness::Key), true).unwrap();
    let key = heap.cons(NIL, NIL).unwrap();
    let inner_key = heap.cons(LispObj::fixnum(9), NIL).unwrap();
    heap.hash_table_put(outer, key, inner).unwrap();
    heap.hash_table_put(inner, inner_key, T).unwrap();
    let h_outer = heap.acquire_handle(outer);
    let _h_key = heap.acquire_handle(key);
    let _h_inner_key = heap.acquire_handle(inner_key);

    heap.collect(&mut []);

    let outer = heap.get_handle(&h_outer);
    let entries = heap.hash_table_entries(outer);
    assert_eq!(entries.len(), 1);
    let inner_entries = heap.hash_table_entries(entries[0].1);
    assert_eq!(inner_entries.len(), 1);
    assert_eq!(car_fixnum(&heap, inner_entries[0].0), 9);
}

#[test]
fn linearized_lists_keep_their_order() {
    init_logger();

    let mut heap = Heap::with_config(GcConfig::default().with_linearize_lists(true)).unwrap();
    let names = ["A", "B", "C", "D"];
    let mut list = NIL;
    for name in names.iter().rev() {
        let sym = heap.make_symbol(name).unwrap();
        heap.cons(NIL, NIL).unwrap();
        list = heap.cons(sym, list).unwrap();
    }
    let h = heap.acquire_handle(list);

    heap.collect(&mut []);

    let mut seen = HashSet::new();
    let mut cell = heap.get_handle(&h);
    let mut read = Vec::new();
    while cell != NIL {
        let addr = cell.native_pointer();
        assert!(seen.insert(addr), "cdr chain loops back to {addr:#x}");
        assert!(!heap.region(addr).unwrap().is_from_space());
        let sym = heap.load_slot(addr, cons::CAR);
        let name = heap.load_slot(sym.native_pointer(), symbol::NAME);
        read.push(String::from_utf8(heap.vector_bytes(name)).unwrap());
        cell = heap.load_slot(addr, cons::CDR);
    }
    assert_eq!(read, names);
}

#[test]
fn code_entry_points_are_relocated_with_their_code() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let names: Vec<_> = ["F", "G", "H"]
        .iter()
        .map(|n| heap.make_symbol(n).unwrap())
        .collect();
    let code = heap
        .make_code(
            &[LispObj::fixnum(100)],
            64,
            &[(0, names[0]), (16, names[1]), (32, names[2])],
        )
        .unwrap();
    for (i, fun) in heap.code_entry_points(code).into_iter().enumerate() {
        let addr = fun.native_pointer();
        heap.store_slot(addr, simple_fun::ARGLIST, LispObj::fixnum(i as i64));
        heap.store_slot(addr, simple_fun::TYPE, T);
        heap.store_slot(addr, simple_fun::INFO, LispObj::fixnum(10 * i as i64));
    }
    let h = heap.acquire_handle(code);

    heap.collect(&mut []);

    let new_code = heap.get_handle(&h);
    assert_ne!(new_code, code);
    let funs = heap.code_entry_points(new_code);
    assert_eq!(funs.len(), 3);
    for (i, fun) in funs.into_iter().enumerate() {
        let addr = fun.native_pointer();
        assert_eq!(heap.load_raw(addr + simple_fun::SELF * 8), fun_raw_addr(fun));
        let name = heap.load_slot(addr, simple_fun::NAME);
        let name = heap.load_slot(name.native_pointer(), symbol::NAME);
        assert_eq!(heap.vector_bytes(name), ["F", "G", "H"][i].as_bytes());
        assert_eq!(heap.load_slot(addr, simple_fun::ARGLIST), LispObj::fixnum(i as i64));
        assert_eq!(heap.load_slot(addr, simple_fun::TYPE), T);
        assert_eq!(heap.load_slot(addr, simple_fun::INFO), LispObj::fixnum(10 * i as i64));
        assert_eq!(
            heap.enclosing_code_of_header(addr),
            new_code.native_pointer()
        );
    }
}

#[test]
fn interior_pointers_follow_their_base_register() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let code = heap.make_code(&[], 32, &[]).unwrap();
    let other = heap.cons(LispObj::fixnum(1), NIL).unwrap();
    let layout = RegisterLayout::sparc();
    let mut thread = ThreadState::new(&mut heap, layout.clone()).unwrap();

    let k = 0x58;
    let mut ctx = RegisterFile::new(&layout);
    ctx.set_register(layout.code, code);
    ctx.set_register(RegisterLayout::SPARC_A0, other);
    ctx.set(RegisterId::Gpr(RegisterLayout::SPARC_LIP), LispObj(code.native_pointer() + k));
    thread.push_interrupt_context(ctx);

    heap.collect(std::slice::from_mut(&mut thread));

    let ctx = &thread.interrupt_contexts()[0];
    let new_base = ctx.register(layout.code);
    assert_ne!(new_base, code);
    assert_eq!(
        ctx.get(RegisterId::Gpr(RegisterLayout::SPARC_LIP)).raw(),
        new_base.native_pointer() + k
    );
    assert_eq!(car_fixnum(&heap, ctx.register(RegisterLayout::SPARC_A0)), 1);
}
