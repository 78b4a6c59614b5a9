use tagged_gc::{Heap, LispObj};

/// Install the test logger once per test binary.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

/// The fixnum in the car of the cons `cell`.
#[allow(dead_code)]
pub fn car_fixnum(heap: &Heap, cell: LispObj) -> i64 {
    heap.load_slot(cell.native_pointer(), tagged_gc::layout::cons::CAR)
        .fixnum_value()
}
