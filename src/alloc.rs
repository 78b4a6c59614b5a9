//! Mutator-side object construction.
//!
//! Every constructor allocates a fully initialised object, so a
//! collection may run between any two calls.

use crate::{
    error::GcError,
    heap::{Heap, PageKind, EMPTY_HASH_SLOT, NIL},
    layout::{
        code, cons, fun_raw_addr, hash_table, instance, layout, simple_fun, symbol, vector,
    },
    tag_ptr::{ceiling, nwords, Address, LispObj, PointerKind, N_WORD_BYTES},
    hash_table::Weakness,
    widetag::*,
};

impl Heap {
    /// Allocate an object of `nwords` words, rounded up to the two-word
    /// object alignment.
    fn alloc_object(&mut self, nwords: u64, kind: PageKind) -> Result<Address, GcError> {
        self.allocate(ceiling(nwords, 2), kind)
    }

    fn alloc_boxed(&mut self, widetag: u8, slots: &[LispObj], kind: PageKind) -> Result<Address, GcError> {
        let addr = self.alloc_object(slots.len() as u64 + 1, kind)?;
        self.store(addr, LispObj::header(widetag, slots.len() as u64));
        for (i, slot) in slots.iter().enumerate() {
            self.store_slot(addr, i as u64 + 1, *slot);
        }
        Ok(addr)
    }

    pub fn cons(&mut self, car: LispObj, cdr: LispObj) -> Result<LispObj, GcError> {
        let addr = self.alloc_object(cons::SIZE, PageKind::Boxed)?;
        self.store_slot(addr, cons::CAR, car);
        self.store_slot(addr, cons::CDR, cdr);
        Ok(LispObj::from_pointer(addr, PointerKind::List))
    }

    /// A proper list of `items`.
    pub fn list(&mut self, items: &[LispObj]) -> Result<LispObj, GcError> {
        items.iter().rev().try_fold(NIL, |tail, &item| self.cons(item, tail))
    }

    /// Elements of the proper list `list`.
    pub fn list_items(&self, mut list: LispObj) -> Vec<LispObj> {
        let mut out = Vec::new();
        while list != NIL {
            let cell = list.native_pointer();
            out.push(self.load_slot(cell, cons::CAR));
            list = self.load_slot(cell, cons::CDR);
        }
        out
    }

    // ---------------------------------------------------------------------
    // Vectors
    // ---------------------------------------------------------------------

    fn alloc_vector(&mut self, widetag: u8, subtype: u64, length: u64, data_words: u64, kind: PageKind) -> Result<Address, GcError> {
        let addr = self.alloc_object(vector::DATA + data_words, kind)?;
        self.store(addr, LispObj::header(widetag, subtype));
        self.store_slot(addr, vector::LENGTH, LispObj::fixnum(length as i64));
        Ok(addr)
    }

    pub fn make_simple_vector(&mut self, items: &[LispObj]) -> Result<LispObj, GcError> {
        let len = items.len() as u64;
        let addr = self.alloc_vector(SIMPLE_VECTOR_WIDETAG, VECTOR_NORMAL_SUBTYPE, len, len, PageKind::Boxed)?;
        for (i, item) in items.iter().enumerate() {
            self.store_slot(addr, vector::DATA + i as u64, *item);
        }
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    pub fn make_byte_vector(&mut self, bytes: &[u8]) -> Result<LispObj, GcError> {
        let len = bytes.len() as u64;
        let addr = self.alloc_vector(
            SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG,
            0,
            len,
            nwords(len, 8),
            PageKind::Unboxed,
        )?;
        self.store_bytes(addr + vector::DATA * N_WORD_BYTES, bytes);
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    pub fn make_word_vector(&mut self, words: &[u64]) -> Result<LispObj, GcError> {
        let len = words.len() as u64;
        let addr = self.alloc_vector(SIMPLE_ARRAY_WORD_WIDETAG, 0, len, len, PageKind::Unboxed)?;
        for (i, word) in words.iter().enumerate() {
            self.store_raw(addr + (vector::DATA + i as u64) * N_WORD_BYTES, *word);
        }
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    /// A base string. Storage includes a trailing NUL.
    pub fn make_base_string(&mut self, s: &str) -> Result<LispObj, GcError> {
        let len = s.len() as u64;
        let addr = self.alloc_vector(
            SIMPLE_BASE_STRING_WIDETAG,
            0,
            len,
            nwords(len + 1, 8),
            PageKind::Unboxed,
        )?;
        self.store_bytes(addr + vector::DATA * N_WORD_BYTES, s.as_bytes());
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    /// Raw contents of an unboxed vector with 8-bit elements.
    pub fn vector_bytes(&self, v: LispObj) -> Vec<u8> {
        let addr = v.native_pointer();
        let len = self.load_slot(addr, vector::LENGTH).fixnum_value() as usize;
        self.load_bytes(addr + vector::DATA * N_WORD_BYTES, len)
    }

    pub fn make_double_float(&mut self, value: f64) -> Result<LispObj, GcError> {
        let addr = self.alloc_object(2, PageKind::Unboxed)?;
        self.store(addr, LispObj::header(DOUBLE_FLOAT_WIDETAG, 1));
        self.store_raw(addr + N_WORD_BYTES, value.to_bits());
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    // ---------------------------------------------------------------------
    // Symbols, instances and functions
    // ---------------------------------------------------------------------

    pub fn make_symbol(&mut self, name: &str) -> Result<LispObj, GcError> {
        let name_obj = self.make_base_string(name)?;
        let mut slots = [NIL; (symbol::SIZE - 1) as usize];
        slots[(symbol::VALUE - 1) as usize] = LispObj::header(UNBOUND_MARKER_WIDETAG, 0);
        slots[(symbol::HASH - 1) as usize] = LispObj::fixnum(0);
        slots[(symbol::NAME - 1) as usize] = name_obj;
        let addr = self.alloc_boxed(SYMBOL_HEADER_WIDETAG, &slots, PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    /// A layout describing instances whose last `n_untagged` slots are raw.
    pub fn make_layout(&mut self, n_untagged: u64) -> Result<LispObj, GcError> {
        let mut slots = [NIL; layout::N_SLOTS as usize];
        // Layouts of layouts are never consulted.
        slots[(instance::LAYOUT - 1) as usize] = LispObj::ZERO;
        slots[(layout::N_UNTAGGED_SLOTS - 1) as usize] = LispObj::fixnum(n_untagged as i64);
        let addr = self.alloc_boxed(INSTANCE_HEADER_WIDETAG, &slots, PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Instance))
    }

    pub fn make_instance(&mut self, layout_obj: LispObj, slots: &[LispObj]) -> Result<LispObj, GcError> {
        let mut all = Vec::with_capacity(slots.len() + 1);
        all.push(layout_obj);
        all.extend_from_slice(slots);
        let addr = self.alloc_boxed(INSTANCE_HEADER_WIDETAG, &all, PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Instance))
    }

    /// A closure over `fun` with the given closed-over values.
    pub fn make_closure(&mut self, fun: LispObj, values: &[LispObj]) -> Result<LispObj, GcError> {
        let mut slots = Vec::with_capacity(values.len() + 1);
        slots.push(LispObj(fun_raw_addr(fun)));
        slots.extend_from_slice(values);
        let addr = self.alloc_boxed(CLOSURE_HEADER_WIDETAG, &slots, PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Fun))
    }

    pub fn make_fdefn(&mut self, name: LispObj, fun: LispObj) -> Result<LispObj, GcError> {
        let raw = if fun == NIL { 0 } else { fun_raw_addr(fun) };
        let addr = self.alloc_boxed(FDEFN_WIDETAG, &[name, fun, LispObj(raw)], PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    /// A code object with the given boxed constants and `code_words` words
    /// of (zeroed) instructions. Each `(offset, name)` places a simple fun
    /// `offset` words into the instruction area; they are chained in the
    /// order given.
    pub fn make_code(
        &mut self,
        constants: &[LispObj],
        code_words: u64,
        entry_points: &[(u64, LispObj)],
    ) -> Result<LispObj, GcError> {
        let nheader = ceiling(code::CONSTANTS + constants.len() as u64, 2);
        for &(offset, _) in entry_points {
            if offset + simple_fun::CODE_OFFSET > code_words {
                return Err(GcError::InvalidObject(format!(
                    "entry point at word {offset} does not fit in {code_words} words of code"
                )));
            }
        }

        let addr = self.alloc_object(nheader + code_words, PageKind::Code)?;
        self.store(addr, LispObj::header(CODE_HEADER_WIDETAG, nheader));
        self.store_slot(addr, code::CODE_SIZE, LispObj::fixnum(code_words as i64));
        self.store_slot(addr, code::ENTRY_POINTS, NIL);
        self.store_slot(addr, code::DEBUG_INFO, NIL);
        self.store_slot(addr, code::TRACE_TABLE_OFFSET, LispObj::fixnum(0));
        for (i, c) in constants.iter().enumerate() {
            self.store_slot(addr, code::CONSTANTS + i as u64, *c);
        }

        let mut prev = addr + code::ENTRY_POINTS * N_WORD_BYTES;
        for &(offset, name) in entry_points {
            let fun_addr = addr + (nheader + offset) * N_WORD_BYTES;
            let fun = LispObj::from_pointer(fun_addr, PointerKind::Fun);
            self.store(fun_addr, LispObj::header(SIMPLE_FUN_HEADER_WIDETAG, nheader + offset));
            self.store_slot(fun_addr, simple_fun::SELF, LispObj(fun_raw_addr(fun)));
            self.store_slot(fun_addr, simple_fun::NEXT, NIL);
            self.store_slot(fun_addr, simple_fun::NAME, name);
            self.store_slot(fun_addr, simple_fun::ARGLIST, NIL);
            self.store_slot(fun_addr, simple_fun::TYPE, NIL);
            self.store_slot(fun_addr, simple_fun::INFO, NIL);
            self.store(prev, fun);
            prev = fun_addr + simple_fun::NEXT * N_WORD_BYTES;
        }
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    /// Plant a return-PC header `offset` words into the instructions of
    /// `code_obj` and return a pointer to it.
    pub fn make_return_pc(&mut self, code_obj: LispObj, offset: u64) -> Result<LispObj, GcError> {
        let addr = code_obj.native_pointer();
        let (nheader, ncode) = self.code_extent(addr);
        if offset >= ncode {
            return Err(GcError::InvalidObject(format!(
                "return address at word {offset} is past {ncode} words of code"
            )));
        }
        let lra = addr + (nheader + offset) * N_WORD_BYTES;
        self.store(lra, LispObj::header(RETURN_PC_HEADER_WIDETAG, nheader + offset));
        Ok(LispObj::from_pointer(lra, PointerKind::Other))
    }

    pub fn make_weak_pointer(&mut self, value: LispObj) -> Result<LispObj, GcError> {
        let addr = self.alloc_boxed(WEAK_POINTER_WIDETAG, &[value, NIL, LispObj::ZERO], PageKind::Boxed)?;
        Ok(LispObj::from_pointer(addr, PointerKind::Other))
    }

    // ---------------------------------------------------------------------
    // Hash tables
    // ---------------------------------------------------------------------

    /// An empty hash table with room for `size` entries. Without a hash
    /// vector every key is treated as hashed by address.
    pub fn make_hash_table(
        &mut self,
        size: u64,
        weakness: Option<Weakness>,
        with_hash_vector: bool,
    ) -> Result<LispObj, GcError> {
        if size == 0 {
            return Err(GcError::InvalidObject("hash table of size 0".into()));
        }
        let layout_obj = self.make_layout(0)?;

        let index = self.make_word_vector(&vec![0; size as usize])?;
        // Slot 0 is unused; the rest form the initial free list.
        let free_chain: Vec<u64> = (0..=size).map(|i| if i == 0 || i == size { 0 } else { i + 1 }).collect();
        let next = self.make_word_vector(&free_chain)?;
        let hash = if with_hash_vector {
            self.make_word_vector(&vec![0; size as usize + 1])?
        } else {
            NIL
        };

        let kv_len = 2 * (size + 1);
        let kv = self.alloc_vector(
            SIMPLE_VECTOR_WIDETAG,
            VECTOR_VALID_HASHING_SUBTYPE,
            kv_len,
            kv_len,
            PageKind::Boxed,
        )?;
        for i in 1..kv_len {
            self.store_slot(kv, vector::DATA + i, EMPTY_HASH_SLOT);
        }
        let kv_obj = LispObj::from_pointer(kv, PointerKind::Other);

        let mut slots = [NIL; hash_table::N_SLOTS as usize];
        let mut set = |slot: u64, value| slots[(slot - 1) as usize] = value;
        set(instance::LAYOUT, layout_obj);
        set(hash_table::TABLE, kv_obj);
        set(hash_table::INDEX_VECTOR, index);
        set(hash_table::NEXT_VECTOR, next);
        set(hash_table::HASH_VECTOR, hash);
        set(hash_table::WEAKNESS, Weakness::to_slot(weakness));
        set(hash_table::NEEDS_REHASH_P, NIL);
        set(hash_table::NUMBER_ENTRIES, LispObj::fixnum(0));
        set(hash_table::NEXT_FREE_KV, LispObj::fixnum(1));
        let table = self.alloc_boxed(INSTANCE_HEADER_WIDETAG, &slots, PageKind::Boxed)?;
        let table_obj = LispObj::from_pointer(table, PointerKind::Instance);
        self.store_slot(kv, vector::DATA, table_obj);
        Ok(table_obj)
    }
}
