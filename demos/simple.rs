use log::info;
use tagged_gc::{layout::weak_pointer, GcError, Heap, LispObj, Weakness, NIL};

fn main() -> Result<(), GcError> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let mut heap = Heap::new()?;

    // A list nobody holds on to, watched by a weak pointer.
    let items: Vec<_> = (1..=4).map(LispObj::fixnum).collect();
    let list = heap.list(&items)?;
    let wp = heap.make_weak_pointer(list)?;

    // A byte vector and a weak table that stay reachable.
    let bytes = b"tagged-gc!".to_vec();
    let vector = heap.make_byte_vector(&bytes)?;
    let table = heap.make_hash_table(4, Some(Weakness::Key), true)?;
    let key = heap.cons(LispObj::fixnum(0), NIL)?;
    heap.hash_table_put(table, key, vector)?;
    heap.hash_table_put(table, list, vector)?;

    let h_wp = heap.acquire_handle(wp);
    let h_vector = heap.acquire_handle(vector);
    let h_table = heap.acquire_handle(table);
    let h_key = heap.acquire_handle(key);

    info!("Before GC: {:?}", heap.metadata());
    let stats = heap.collect(&mut []);
    info!("Collected: {:?}", stats);
    info!("After GC: {:?}", heap.metadata());

    let wp = heap.get_handle(&h_wp).native_pointer();
    info!(
        "Weak pointer value {:?}, broken {:?}",
        heap.load_slot(wp, weak_pointer::VALUE),
        heap.load_slot(wp, weak_pointer::BROKEN)
    );

    let vector = heap.get_handle(&h_vector);
    info!(
        "Vector moved to {:#x}: {:?}",
        vector.native_pointer(),
        String::from_utf8_lossy(&heap.vector_bytes(vector))
    );
    info!(
        "Weak table keeps {} entries",
        heap.hash_table_entries(heap.get_handle(&h_table)).len()
    );

    for h in [h_wp, h_vector, h_table, h_key] {
        heap.release_handle(h);
    }
    heap.collect(&mut []);
    info!("After releasing every handle: {:?}", heap.metadata());
    Ok(())
}
