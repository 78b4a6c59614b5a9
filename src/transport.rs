//! Copying and tracing for the plain object families: boxed and unboxed
//! objects, conses, instances, closures and fdefns.

use log::trace;

use crate::{
    forward::ObjectState,
    gc::Collector,
    gc_assert,
    heap::PageKind,
    layout::{closure, cons, fdefn, fun_from_raw_addr, fun_raw_addr, instance, layout},
    lose,
    tag_ptr::{Address, LispObj, PointerKind, LIST_POINTER_LOWTAG, N_WORD_BYTES},
    widetag::INSTANCE_HEADER_WIDETAG,
};

impl Collector<'_> {
    /// Copy `nwords` words from `from` onto a fresh page of `kind` and
    /// return the new address. Running out of memory here is fatal.
    pub(crate) fn copy_object(&mut self, from: Address, nwords: u64, kind: PageKind) -> Address {
        let to = match self.heap.alloc_words(nwords, kind) {
            Ok(to) => to,
            Err(err) => lose!("out of memory copying {} words at {:#x}: {}", nwords, from, err),
        };
        self.heap.copy_words(from, to, nwords);
        self.stats.objects_copied += 1;
        self.stats.words_copied += nwords;
        trace!("Copied {} words from {:#x} to {:#x}", nwords, from, to);
        to
    }

    /// Flat copy of the object `object` points to, sized by its header.
    pub(crate) fn trans_boxed(&mut self, object: LispObj, kind: PageKind) -> LispObj {
        let from = object.native_pointer();
        let nwords = self.tables.size_of(self.heap, from);
        let to = self.copy_object(from, nwords, kind);
        LispObj(to | object.lowtag() as u64)
    }

    /// Copy an object and forward it. For callers that walk roots
    /// outside the scavenge loop. Conses and headed objects are each
    /// sized the way the scavenger sizes them.
    pub fn copy_boxed(&mut self, object: LispObj) -> LispObj {
        let addr = object.native_pointer();
        gc_assert!(self.heap.from_space_p(object), "copy_boxed of {:?} outside from-space", object);
        if let ObjectState::Forwarded(new) = self.heap.object_state(addr) {
            return new;
        }
        match object.pointer_kind() {
            Some(kind) => self.transport_pointer(object, kind),
            None => lose!("copy_boxed of non-pointer {:?}", object),
        }
    }

    /// Copy a cons and, with list linearization on, the rest of its
    /// still-uncopied cdr chain so the new cells sit next to each other.
    pub(crate) fn trans_list(&mut self, object: LispObj) -> LispObj {
        let old = object.native_pointer();
        // The forwarding pointer overwrites the cdr, so read it first.
        let mut cdr = self.heap.load_slot(old, cons::CDR);
        let first = self.copy_object(old, cons::SIZE, PageKind::Boxed);
        let new = LispObj::from_pointer(first, PointerKind::List);
        self.heap.install_forward(old, new);

        if !self.heap.config().linearize_lists {
            return new;
        }

        let mut tail = first;
        while cdr.lowtag() == LIST_POINTER_LOWTAG
            && self.heap.from_space_p(cdr)
            && !self.heap.is_forwarded(cdr.native_pointer())
        {
            let cell = cdr.native_pointer();
            let next = self.heap.load_slot(cell, cons::CDR);
            let copy = self.copy_object(cell, cons::SIZE, PageKind::Boxed);
            let copy_obj = LispObj::from_pointer(copy, PointerKind::List);
            self.heap.install_forward(cell, copy_obj);
            self.heap.store_slot(tail, cons::CDR, copy_obj);
            tail = copy;
            cdr = next;
        }
        new
    }

    /// Trace an instance's tagged slots. Raw slots at the end, counted by
    /// the layout, are skipped.
    pub(crate) fn scav_instance(&mut self, where_: Address, header: LispObj) -> u64 {
        let ntotal = header.header_value();
        let mut layout_obj = self.heap.load_slot(where_, instance::LAYOUT);
        if layout_obj == LispObj::ZERO {
            // Not initialized yet. Only the header is consumed here; the
            // slots that follow are then traced as ordinary words.
            return 1;
        }
        if self.heap.from_space_p(layout_obj) {
            layout_obj = self.scavenge_value(layout_obj);
        }
        let layout_addr = layout_obj.native_pointer();
        gc_assert!(
            self.heap.load(layout_addr).widetag() == INSTANCE_HEADER_WIDETAG,
            "instance at {:#x} has a bogus layout {:?}",
            where_,
            layout_obj
        );
        let nuntagged = self.heap.load_slot(layout_addr, layout::N_UNTAGGED_SLOTS).fixnum_value() as u64;
        gc_assert!(
            nuntagged <= ntotal,
            "instance at {:#x} has {} untagged slots out of {}",
            where_,
            nuntagged,
            ntotal
        );
        self.scavenge(where_ + N_WORD_BYTES, ntotal - nuntagged);
        ntotal + 1
    }

    /// The function slot of a closure holds a raw entry address.
    pub(crate) fn scav_closure(&mut self, where_: Address) -> u64 {
        let slot = where_ + closure::FUN * N_WORD_BYTES;
        let raw = self.heap.load_raw(slot);
        let fun = fun_from_raw_addr(raw);
        let new_fun = self.scavenge_value(fun);
        if new_fun != fun {
            self.heap.store_raw(slot, fun_raw_addr(new_fun));
        }
        // The remaining slots are scanned by the caller.
        2
    }

    /// An fdefn's raw address mirrors its function slot unless it points
    /// at an assembly routine, in which case it is left alone.
    pub(crate) fn scav_fdefn(&mut self, where_: Address) -> u64 {
        let fun = self.heap.load_slot(where_, fdefn::FUN);
        let raw_slot = where_ + fdefn::RAW_ADDR * N_WORD_BYTES;
        if fun_raw_addr(fun) != self.heap.load_raw(raw_slot) {
            return 1;
        }
        self.scavenge(where_ + N_WORD_BYTES, fdefn::RAW_ADDR - 1);
        let new_fun = self.heap.load_slot(where_, fdefn::FUN);
        if new_fun != fun {
            self.heap.store_raw(raw_slot, fun_raw_addr(new_fun));
        }
        fdefn::SIZE
    }
}
