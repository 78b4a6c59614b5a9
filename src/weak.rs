use log::trace;

use crate::{
    forward::ObjectState,
    gc::Collector,
    heap::{PageKind, NIL, T},
    layout::weak_pointer,
    tag_ptr::{Address, LispObj, N_WORD_BYTES},
};

impl Collector<'_> {
    /// Copy a weak pointer without tracing its value, and queue the copy
    /// for [`Collector::scan_weak_pointers`].
    pub(crate) fn trans_weak_pointer(&mut self, object: LispObj) -> LispObj {
        let new = self.trans_boxed(object, PageKind::Boxed);
        let addr = new.native_pointer();
        self.heap
            .store_raw(addr + weak_pointer::NEXT * N_WORD_BYTES, self.weak_pointers);
        self.weak_pointers = addr;
        new
    }

    /// The value slot is deliberately skipped.
    pub(crate) fn scav_weak_pointer(&mut self, _where: Address) -> u64 {
        weak_pointer::SIZE
    }

    /// Resolve every weak pointer transported this cycle: values that were
    /// copied get the new address, the rest are broken.
    pub fn scan_weak_pointers(&mut self) {
        let mut wp = std::mem::replace(&mut self.weak_pointers, 0);
        while wp != 0 {
            let next_slot = wp + weak_pointer::NEXT * N_WORD_BYTES;
            let next = self.heap.load_raw(next_slot);
            self.heap.store_raw(next_slot, 0);

            let value = self.heap.load_slot(wp, weak_pointer::VALUE);
            if self.heap.from_space_p(value) {
                match self.heap.object_state(value.native_pointer()) {
                    ObjectState::Forwarded(new) => {
                        self.heap.store_slot(wp, weak_pointer::VALUE, new);
                    }
                    ObjectState::Unscanned(_) => {
                        trace!("Breaking weak pointer at {:#x} to {:?}", wp, value);
                        self.heap.store_slot(wp, weak_pointer::VALUE, NIL);
                        self.heap.store_slot(wp, weak_pointer::BROKEN, T);
                        self.stats.weak_pointers_broken += 1;
                    }
                }
            }
            wp = next;
        }
    }
}
