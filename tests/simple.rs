mod common;

use common::{car_fixnum, init_logger};
use log::info;
use tagged_gc::{
    layout::{weak_pointer, FUN_RAW_ADDR_OFFSET},
    Heap, LispObj, RegisterFile, RegisterId, RegisterLayout, ThreadState, NIL, T,
};

#[test]
fn test_main() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let items: Vec<_> = (1..=4).map(LispObj::fixnum).collect();
    let list = heap.list(&items).unwrap();
    let bytes: Vec<u8> = (0..10).map(|i| i * 3 + 1).collect();
    let vector = heap.make_byte_vector(&bytes).unwrap();
    let wp = heap.make_weak_pointer(list).unwrap();

    let h_wp = heap.acquire_handle(wp);
    let h_vec = heap.acquire_handle(vector);
    info!("Before GC: {:?}", heap.metadata());

    let stats = heap.collect(&mut []);
    info!("After GC: {:?}", heap.metadata());

    let wp = heap.get_handle(&h_wp).native_pointer();
    assert_eq!(heap.load_slot(wp, weak_pointer::VALUE), NIL);
    assert_eq!(heap.load_slot(wp, weak_pointer::BROKEN), T);

    let new_vector = heap.get_handle(&h_vec);
    assert_ne!(new_vector, vector);
    assert_eq!(heap.vector_bytes(new_vector), bytes);

    assert_eq!(stats.objects_copied, 2);
    assert_eq!(stats.weak_pointers_broken, 1);
    assert_eq!(heap.metadata().currently_allocated, 4 + 4);
}

#[test]
fn repeated_collections_keep_the_graph_intact() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let list = heap
        .list(&[LispObj::fixnum(7), LispObj::fixnum(8), LispObj::fixnum(9)])
        .unwrap();
    let h = heap.acquire_handle(list);

    for _ in 0..5 {
        // Garbage between cycles.
        for i in 0..100 {
            heap.cons(LispObj::fixnum(i), NIL).unwrap();
        }
        heap.collect(&mut []);
        let items = heap.list_items(heap.get_handle(&h));
        assert_eq!(
            items,
            vec![LispObj::fixnum(7), LispObj::fixnum(8), LispObj::fixnum(9)]
        );
    }
    assert_eq!(heap.metadata().gc_count, 5);
    assert_eq!(heap.metadata().currently_allocated, 6);
}

#[test]
fn thread_frames_survive_a_collection() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let code = heap.make_code(&[LispObj::fixnum(1)], 32, &[(0, NIL)]).unwrap();
    let lra = heap.make_return_pc(code, 12).unwrap();
    let local = heap.cons(LispObj::fixnum(42), NIL).unwrap();

    let layout = RegisterLayout::sparc();
    let mut thread = ThreadState::new(&mut heap, layout.clone()).unwrap();
    let outer = thread.push_frame(&mut heap, NIL, code, &[local]).unwrap();
    let inner = thread.push_frame(&mut heap, lra, NIL, &[]).unwrap();

    let mut ctx = RegisterFile::new(&layout);
    ctx.set_register(layout.cfp, LispObj(inner));
    ctx.set_register(layout.code, code);
    ctx.set(RegisterId::Pc, LispObj(code.native_pointer() + 0x60));
    thread.push_interrupt_context(ctx);

    heap.collect(std::slice::from_mut(&mut thread));

    let new_code = heap.load_slot(outer, 2);
    assert_ne!(new_code, code);
    assert_eq!(car_fixnum(&heap, heap.load_slot(outer, 3)), 42);

    let frames = thread.call_frames(&heap);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame, outer);
    assert_eq!(frames[0].code, Some(new_code.native_pointer()));
    assert_eq!(frames[0].pc, 12 * 8);

    let ctx = &thread.interrupt_contexts()[0];
    assert_eq!(ctx.register(layout.code), new_code);
    let pc = ctx.get(RegisterId::Pc).raw();
    assert_eq!(pc, new_code.native_pointer() + 0x60);
    assert_eq!(
        heap.locate_enclosing_code_object(pc),
        Some(new_code.native_pointer())
    );

    // The function is reachable through its raw entry address too.
    let fun = heap.code_entry_points(new_code)[0];
    let raw = fun.raw() + FUN_RAW_ADDR_OFFSET;
    assert_eq!(
        heap.locate_enclosing_code_object(raw),
        Some(new_code.native_pointer())
    );
}

#[test]
fn scrubbing_clears_popped_frames() {
    init_logger();

    let mut heap = Heap::new().unwrap();
    let mut thread = ThreadState::new(&mut heap, RegisterLayout::sparc()).unwrap();
    thread.push_frame(&mut heap, NIL, NIL, &[]).unwrap();
    let fp = thread
        .push_frame(&mut heap, NIL, NIL, &[T, T, T])
        .unwrap();
    thread.pop_frame(&heap);

    let cleared = thread.scrub_control_stack(&mut heap);
    assert!(cleared > 0);
    assert_eq!(heap.load_raw(fp + 8), 0);
    assert_eq!(thread.scrub_control_stack(&mut heap), 0);
}
