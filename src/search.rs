//! Finding the object that contains an arbitrary address.

use crate::{
    dispatch::init_dispatch_tables,
    heap::{Heap, RegionKind},
    tag_ptr::{ceiling, Address, LispObj, N_WORD_BYTES},
    widetag::{is_immediate_widetag, CODE_HEADER_WIDETAG},
};

fn starts_a_cons(word: LispObj) -> bool {
    word.is_pointer() || word.is_fixnum() || is_immediate_widetag(word.widetag())
}

impl Heap {
    /// Walk the `nwords` words from `start` object by object and return
    /// the start of the one that contains `pointer`.
    pub fn find_object_containing(&self, start: Address, nwords: u64, pointer: Address) -> Option<Address> {
        let tables = init_dispatch_tables();
        let mut cursor = start;
        let mut remaining = nwords;
        while remaining > 0 {
            let first = self.load(cursor);
            // A leading pointer or immediate can only be the car of a cons.
            let count = if starts_a_cons(first) {
                2
            } else {
                tables.size_of(self, cursor)
            };
            if pointer >= cursor && pointer < cursor + count * N_WORD_BYTES {
                return Some(cursor);
            }
            let count = ceiling(count, 2).min(remaining);
            cursor += count * N_WORD_BYTES;
            remaining -= count;
        }
        None
    }

    pub fn search_read_only_space(&self, pointer: Address) -> Option<Address> {
        let space = self.read_only_space();
        self.find_object_containing(space.base(), space.fill_words(), pointer)
    }

    pub fn search_static_space(&self, pointer: Address) -> Option<Address> {
        let space = self.static_space();
        self.find_object_containing(space.base(), space.fill_words(), pointer)
    }

    pub fn search_dynamic_space(&self, pointer: Address) -> Option<Address> {
        let region = self.region(pointer)?;
        if !matches!(region.kind(), RegionKind::Dynamic(_)) {
            return None;
        }
        self.find_object_containing(region.base(), region.fill_words(), pointer)
    }

    /// The code object containing `pc`, searching read-only space, then
    /// static space, then the dynamic regions.
    pub fn locate_enclosing_code_object(&self, pc: Address) -> Option<Address> {
        let object = self
            .search_read_only_space(pc)
            .or_else(|| self.search_static_space(pc))
            .or_else(|| self.search_dynamic_space(pc))?;
        (self.load(object).widetag() == CODE_HEADER_WIDETAG).then_some(object)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        heap::{Heap, NIL, T},
        tag_ptr::{LispObj, N_WORD_BYTES},
    };

    #[test]
    fn finds_the_cons_or_vector_around_a_pointer() {
        let mut heap = Heap::new().unwrap();
        let first = heap.cons(LispObj::fixnum(1), NIL).unwrap();
        let v = heap.make_byte_vector(&[1, 2, 3]).unwrap();
        let region = heap.region(first.native_pointer()).unwrap();
        let (base, fill) = (region.base(), region.fill_words());

        assert_eq!(
            heap.find_object_containing(base, fill, first.native_pointer() + N_WORD_BYTES),
            Some(first.native_pointer())
        );
        // Byte vectors land on an unboxed page of their own.
        assert_eq!(heap.search_dynamic_space(v.native_pointer() + 17), Some(v.native_pointer()));
        assert_eq!(heap.find_object_containing(base, fill, base + fill * N_WORD_BYTES), None);
    }

    #[test]
    fn static_symbols_are_found() {
        let heap = Heap::new().unwrap();
        assert_eq!(heap.search_static_space(T.native_pointer() + 24), Some(T.native_pointer()));
    }

    #[test]
    fn code_is_located_from_an_instruction_address() {
        let mut heap = Heap::new().unwrap();
        heap.cons(NIL, NIL).unwrap();
        let code = heap.make_code(&[LispObj::fixnum(1)], 32, &[(0, NIL)]).unwrap();
        let fun = heap.code_entry_points(code)[0];
        let inside = fun.native_pointer() + 0x50;
        assert_eq!(heap.locate_enclosing_code_object(inside), Some(code.native_pointer()));
        assert_eq!(heap.locate_enclosing_code_object(NIL.native_pointer()), None);
    }
}
