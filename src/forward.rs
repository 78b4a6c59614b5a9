//! Forwarding pointers.
//!
//! Once an object has been copied its first two words are replaced by
//! [`FORWARDING_MARKER`] and the tagged address of the copy. The marker
//! decodes as an instance pointer to address zero, which no legitimate
//! header, car or pointer can ever hold since address zero is never mapped.

use log::trace;

use crate::{
    gc_assert,
    heap::Heap,
    lose,
    tag_ptr::{Address, LispObj, N_WORD_BYTES},
};

pub const FORWARDING_MARKER: u64 = 0x01;

/// What an old-space object currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not copied yet; carries the object's first word.
    Unscanned(LispObj),
    /// Copied; carries the tagged pointer to the copy.
    Forwarded(LispObj),
}

impl Heap {
    pub fn object_state(&self, addr: Address) -> ObjectState {
        let first = self.load_raw(addr);
        if first == FORWARDING_MARKER {
            ObjectState::Forwarded(self.load(addr + N_WORD_BYTES))
        } else {
            ObjectState::Unscanned(LispObj(first))
        }
    }

    pub fn is_forwarded(&self, addr: Address) -> bool {
        self.load_raw(addr) == FORWARDING_MARKER
    }

    pub fn forwarded_target(&self, addr: Address) -> LispObj {
        match self.object_state(addr) {
            ObjectState::Forwarded(new) => new,
            ObjectState::Unscanned(first) => {
                lose!("object at {:#x} is not forwarded (first word {:?})", addr, first)
            }
        }
    }

    /// Redirect the from-space object at `addr` to `new`. Re-installing
    /// the same target is allowed; a different one means the object was
    /// copied twice.
    pub fn install_forward(&mut self, addr: Address, new: LispObj) -> LispObj {
        gc_assert!(
            self.from_space_addr_p(addr),
            "forwarding object at {:#x} outside from-space",
            addr
        );
        if let ObjectState::Forwarded(existing) = self.object_state(addr) {
            gc_assert!(
                existing == new,
                "object at {:#x} already forwarded to {:?}, not {:?}",
                addr,
                existing,
                new
            );
            return new;
        }
        trace!("Forwarding {:#x} to {:?}", addr, new);
        self.store_raw(addr, FORWARDING_MARKER);
        self.store(addr + N_WORD_BYTES, new);
        new
    }

    /// True when `obj` is a non-pointer, lives outside from-space, or has
    /// already been copied this cycle.
    pub fn survived_gc_yet(&self, obj: LispObj) -> bool {
        !self.from_space_p(obj) || self.is_forwarded(obj.native_pointer())
    }
}
