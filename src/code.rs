//! Code objects and the function and return-address headers embedded in
//! them.
//!
//! A code object is a boxed header (constants, the entry point list,
//! debug info) followed by raw instructions. Simple funs live inside the
//! instruction area and are chained through their `next` slot; each one's
//! header payload is its word offset from the start of the code object.
//! Return-PC headers use the same encoding.

use log::trace;

use crate::{
    gc::Collector,
    gc_assert,
    heap::{Heap, PageKind, NIL},
    layout::{code, fun_raw_addr, simple_fun},
    lose,
    tag_ptr::{ceiling, Address, LispObj, PointerKind, N_WORD_BYTES},
    widetag::{CODE_HEADER_WIDETAG, RETURN_PC_HEADER_WIDETAG, SIMPLE_FUN_HEADER_WIDETAG},
};

/// Keeps the instruction cache coherent after code has been written.
pub trait IcacheFlusher {
    fn flush_icache(&mut self, start: Address, bytes: u64);
}

/// Default flusher for targets with coherent caches.
pub struct LoggingFlusher;

impl IcacheFlusher for LoggingFlusher {
    fn flush_icache(&mut self, start: Address, bytes: u64) {
        trace!("Flushing icache for {} bytes at {:#x}", bytes, start);
    }
}

impl Heap {
    /// The simple funs of the code object `code`, in chain order.
    pub fn code_entry_points(&self, code_obj: LispObj) -> Vec<LispObj> {
        let mut out = Vec::new();
        let mut fun = self.load_slot(code_obj.native_pointer(), code::ENTRY_POINTS);
        while fun != NIL {
            out.push(fun);
            fun = self.load_slot(fun.native_pointer(), simple_fun::NEXT);
        }
        out
    }

    /// Words in the boxed part and in the instruction part of the code
    /// object at `addr`.
    pub fn code_extent(&self, addr: Address) -> (u64, u64) {
        let header = self.load(addr);
        gc_assert!(
            header.widetag() == CODE_HEADER_WIDETAG,
            "{:?} at {:#x} is not a code header",
            header,
            addr
        );
        let ncode = self.load_slot(addr, code::CODE_SIZE).fixnum_value() as u64;
        (header.header_value(), ncode)
    }

    /// The code object an embedded simple fun or return-PC header at
    /// `addr` belongs to.
    pub fn enclosing_code_of_header(&self, addr: Address) -> Address {
        addr - self.load(addr).header_value() * N_WORD_BYTES
    }
}

impl Collector<'_> {
    /// Copy the code object at `addr` to a code page, forward it and each
    /// of its entry points, and return the new address. Already-forwarded
    /// code just yields its copy.
    pub(crate) fn trans_code(&mut self, addr: Address) -> Address {
        if self.heap.is_forwarded(addr) {
            return self.heap.forwarded_target(addr).native_pointer();
        }
        let (nheader, ncode) = self.heap.code_extent(addr);
        let nwords = ceiling(nheader + ncode, 2);
        let new = self.copy_object(addr, nwords, PageKind::Code);
        self.heap
            .install_forward(addr, LispObj::from_pointer(new, PointerKind::Other));

        let displacement = new - addr;
        let mut prev = new + code::ENTRY_POINTS * N_WORD_BYTES;
        let mut fun = self.heap.load(prev);
        while fun != NIL {
            let old_fun = fun.native_pointer();
            gc_assert!(
                old_fun > addr && old_fun < addr + nwords * N_WORD_BYTES,
                "entry point {:?} lies outside code object {:#x}",
                fun,
                addr
            );
            let new_addr = old_fun + displacement;
            let new_fun = LispObj::from_pointer(new_addr, PointerKind::Fun);
            gc_assert!(
                self.heap.load(new_addr).widetag() == SIMPLE_FUN_HEADER_WIDETAG,
                "entry point {:?} has no simple-fun header",
                fun
            );

            self.heap.install_forward(old_fun, new_fun);
            self.heap
                .store_slot(new_addr, simple_fun::SELF, LispObj(fun_raw_addr(new_fun)));
            self.heap.store(prev, new_fun);

            prev = new_addr + simple_fun::NEXT * N_WORD_BYTES;
            fun = self.heap.load(prev);
        }

        self.heap
            .flush_icache(new + nheader * N_WORD_BYTES, ncode * N_WORD_BYTES);
        new
    }

    /// Copy a code object and forward it. For callers that walk roots
    /// outside the scavenge loop.
    pub fn copy_code(&mut self, code_obj: LispObj) -> LispObj {
        let addr = code_obj.native_pointer();
        gc_assert!(
            self.heap.from_space_p(code_obj),
            "copy_code of {:?} outside from-space",
            code_obj
        );
        LispObj::from_pointer(self.trans_code(addr), PointerKind::Other)
    }

    /// Trace the boxed header and each entry point's boxed slots. The
    /// instructions are never looked at.
    pub(crate) fn scav_code_header(&mut self, where_: Address, header: LispObj) -> u64 {
        let nheader = header.header_value();
        let ncode = self.heap.load_slot(where_, code::CODE_SIZE).fixnum_value() as u64;
        self.scavenge(where_ + N_WORD_BYTES, nheader - 1);

        let mut fun = self.heap.load_slot(where_, code::ENTRY_POINTS);
        while fun != NIL {
            let fun_addr = fun.native_pointer();
            gc_assert!(
                self.heap.load(fun_addr).widetag() == SIMPLE_FUN_HEADER_WIDETAG,
                "bad entry point {:?} in code object {:#x}",
                fun,
                where_
            );
            self.scavenge(
                fun_addr + simple_fun::NAME * N_WORD_BYTES,
                simple_fun::INFO - simple_fun::NAME + 1,
            );
            fun = self.heap.load_slot(fun_addr, simple_fun::NEXT);
        }
        ceiling(nheader + ncode, 2)
    }

    /// A pointer to a simple fun keeps its code object alive; the fun
    /// moves with it.
    pub(crate) fn trans_fun_header(&mut self, object: LispObj) -> LispObj {
        let addr = object.native_pointer();
        let offset = addr - self.heap.enclosing_code_of_header(addr);
        let new_code = self.trans_code(addr - offset);
        LispObj::from_pointer(new_code + offset, PointerKind::Fun)
    }

    pub(crate) fn trans_return_pc_header(&mut self, object: LispObj) -> LispObj {
        let addr = object.native_pointer();
        if self.heap.load(addr).widetag() != RETURN_PC_HEADER_WIDETAG {
            lose!("{:?} is not a return-PC header", object);
        }
        let offset = addr - self.heap.enclosing_code_of_header(addr);
        let new_code = self.trans_code(addr - offset);
        LispObj::from_pointer(new_code + offset, PointerKind::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layout::simple_fun, tag_ptr::LispObj};

    struct Recorder(std::rc::Rc<std::cell::RefCell<Vec<(Address, u64)>>>);

    impl IcacheFlusher for Recorder {
        fn flush_icache(&mut self, start: Address, bytes: u64) {
            self.0.borrow_mut().push((start, bytes));
        }
    }

    #[test]
    fn entry_points_are_listed_in_chain_order() {
        let mut heap = Heap::new().unwrap();
        let a = heap.make_symbol("A").unwrap();
        let b = heap.make_symbol("B").unwrap();
        let code_obj = heap.make_code(&[], 32, &[(0, a), (16, b)]).unwrap();
        let funs = heap.code_entry_points(code_obj);
        assert_eq!(funs.len(), 2);
        assert_eq!(heap.load_slot(funs[0].native_pointer(), simple_fun::NAME), a);
        assert_eq!(heap.load_slot(funs[1].native_pointer(), simple_fun::NAME), b);
        for fun in funs {
            assert_eq!(
                heap.enclosing_code_of_header(fun.native_pointer()),
                code_obj.native_pointer()
            );
        }
    }

    #[test]
    fn relocated_code_is_flushed_once() {
        let mut heap = Heap::new().unwrap();
        let flushes = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        heap.set_icache_flusher(Box::new(Recorder(flushes.clone())));
        let code_obj = heap.make_code(&[LispObj::fixnum(1)], 16, &[(0, NIL)]).unwrap();
        let fun = heap.code_entry_points(code_obj)[0];
        let h1 = heap.acquire_handle(code_obj);
        let h2 = heap.acquire_handle(fun);

        heap.collect(&mut []);

        let new_code = heap.get_handle(&h1);
        let (nheader, ncode) = heap.code_extent(new_code.native_pointer());
        assert_eq!(
            flushes.borrow().as_slice(),
            &[(new_code.native_pointer() + nheader * N_WORD_BYTES, ncode * N_WORD_BYTES)]
        );
        assert_eq!(heap.code_entry_points(new_code), vec![heap.get_handle(&h2)]);
    }

    #[test]
    fn return_pc_rides_along_with_its_code() {
        let mut heap = Heap::new().unwrap();
        let code_obj = heap.make_code(&[], 16, &[]).unwrap();
        let lra = heap.make_return_pc(code_obj, 4).unwrap();
        let offset = lra.native_pointer() - code_obj.native_pointer();
        let h = heap.acquire_handle(lra);
        let hc = heap.acquire_handle(code_obj);

        heap.collect(&mut []);

        let new_lra = heap.get_handle(&h);
        let new_code = heap.get_handle(&hc);
        assert_ne!(new_code, code_obj);
        assert_eq!(new_lra.native_pointer() - new_code.native_pointer(), offset);
        assert_eq!(heap.load(new_lra.native_pointer()).widetag(), RETURN_PC_HEADER_WIDETAG);
    }

    #[test]
    fn copy_code_forwards_the_code_and_its_entry_points() {
        let mut heap = Heap::new().unwrap();
        let name = heap.make_symbol("F").unwrap();
        let code_obj = heap.make_code(&[LispObj::fixnum(5)], 16, &[(0, name)]).unwrap();
        let fun = heap.code_entry_points(code_obj)[0];
        let (nheader, ncode) = heap.code_extent(code_obj.native_pointer());

        let mut gc = Collector::begin(&mut heap);
        let new_code = gc.copy_code(code_obj);
        assert_eq!(gc.copy_code(code_obj), new_code);
        assert_eq!(gc.stats().objects_copied, 1);
        assert_eq!(gc.stats().words_copied, ceiling(nheader + ncode, 2));
        let new_fun = gc.heap().forwarded_target(fun.native_pointer());
        gc.finish();

        assert_ne!(new_code, code_obj);
        assert_eq!(heap.code_extent(new_code.native_pointer()), (nheader, ncode));
        assert_eq!(heap.code_entry_points(new_code), vec![new_fun]);
        assert_eq!(
            heap.load_slot(new_fun.native_pointer(), simple_fun::SELF),
            LispObj(fun_raw_addr(new_fun))
        );
        assert_eq!(
            new_fun.native_pointer() - new_code.native_pointer(),
            fun.native_pointer() - code_obj.native_pointer()
        );
    }

    #[test]
    #[should_panic(expected = "outside its code object")]
    fn scavenging_a_bare_fun_header_is_fatal() {
        let mut heap = Heap::new().unwrap();
        let v = heap.allocate_static(2).unwrap();
        heap.store(v, LispObj::header(SIMPLE_FUN_HEADER_WIDETAG, 4));
        let mut gc = Collector::begin(&mut heap);
        gc.scavenge(v, 2);
    }
}
