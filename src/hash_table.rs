//! Hash table support.
//!
//! A hash table is an instance whose key/value pairs live in a simple
//! vector with the valid-hashing subtype. Element 0 of that vector points
//! back at the table and element 1 holds the marker stored in vacant
//! slots; pair `i` occupies elements `2i` and `2i + 1`. Bucket chains run
//! through the word vectors `index` (bucket heads) and `next`, with 0
//! ending a chain. Vacant pairs are chained through `next` from the
//! table's `next_free_kv` slot.
//!
//! Tables without weakness have their entries traced as soon as the
//! vector is scavenged. Weak tables are queued and their entries traced
//! only as long as the weakness policy says they are alive; once tracing
//! is complete the dead entries are removed.

use std::collections::HashSet;

use log::{debug, trace};

use crate::{
    error::{corruption_warning_and_maybe_lose, GcError},
    gc::Collector,
    gc_assert,
    heap::{Heap, NIL, T},
    layout::{hash_table, vector, MAGIC_HASH_VECTOR_VALUE},
    lose,
    tag_ptr::{ceiling, Address, LispObj, N_LOWTAG_BITS, N_WORD_BYTES, OTHER_POINTER_LOWTAG},
    widetag::{
        INSTANCE_HEADER_WIDETAG, SIMPLE_ARRAY_WORD_WIDETAG, SIMPLE_VECTOR_WIDETAG,
        SYMBOL_HEADER_WIDETAG, VECTOR_VALID_HASHING_SUBTYPE,
    },
};

/// Which part of an entry has to survive for the entry to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weakness {
    Key,
    Value,
    KeyOrValue,
    KeyAndValue,
}

impl Weakness {
    /// Decode a table's weakness slot. NIL means the table is not weak.
    pub fn from_slot(obj: LispObj) -> Option<Self> {
        if obj == NIL {
            return None;
        }
        match obj.fixnum_value() {
            _ if !obj.is_fixnum() => lose!("bad hash table weakness {:?}", obj),
            1 => Some(Weakness::Key),
            2 => Some(Weakness::Value),
            3 => Some(Weakness::KeyOrValue),
            4 => Some(Weakness::KeyAndValue),
            _ => lose!("bad hash table weakness {:?}", obj),
        }
    }

    pub fn to_slot(weakness: Option<Self>) -> LispObj {
        match weakness {
            None => NIL,
            Some(Weakness::Key) => LispObj::fixnum(1),
            Some(Weakness::Value) => LispObj::fixnum(2),
            Some(Weakness::KeyOrValue) => LispObj::fixnum(3),
            Some(Weakness::KeyAndValue) => LispObj::fixnum(4),
        }
    }

    fn entry_alive(self, heap: &Heap, key: LispObj, value: LispObj) -> bool {
        match self {
            Weakness::Key => heap.survived_gc_yet(key),
            Weakness::Value => heap.survived_gc_yet(value),
            Weakness::KeyOrValue => heap.survived_gc_yet(key) || heap.survived_gc_yet(value),
            Weakness::KeyAndValue => heap.survived_gc_yet(key) && heap.survived_gc_yet(value),
        }
    }
}

/// Weak tables met during tracing, each recorded once.
#[derive(Debug, Default)]
pub struct WeakTableWorklist {
    tables: Vec<Address>,
    seen: HashSet<Address>,
}

impl WeakTableWorklist {
    /// Queue `table`; returns false if it was already queued.
    pub fn register(&mut self, table: Address) -> bool {
        if !self.seen.insert(table) {
            return false;
        }
        self.tables.push(table);
        true
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Data start and length of the vector `obj`, if it is a vector with the
/// given widetag.
fn array_data(heap: &Heap, obj: LispObj, widetag: u8) -> Option<(Address, u64)> {
    if obj.lowtag() != OTHER_POINTER_LOWTAG {
        return None;
    }
    let addr = obj.native_pointer();
    if heap.load(addr).widetag() != widetag {
        return None;
    }
    let length = heap.load_slot(addr, vector::LENGTH).fixnum_value() as u64;
    Some((addr + vector::DATA * N_WORD_BYTES, length))
}

/// The parallel arrays of one table, checked for consistency.
struct TableArrays {
    kv: Address,
    index: Address,
    index_len: u64,
    next: Address,
    next_len: u64,
    hash: Option<Address>,
    empty: LispObj,
}

impl TableArrays {
    fn load(heap: &Heap, table: Address) -> Self {
        let slot = |n| heap.load_slot(table, n);
        let Some((kv, kv_len)) = array_data(heap, slot(hash_table::TABLE), SIMPLE_VECTOR_WIDETAG) else {
            lose!("hash table at {:#x} has no key/value vector", table)
        };
        let Some((index, index_len)) =
            array_data(heap, slot(hash_table::INDEX_VECTOR), SIMPLE_ARRAY_WORD_WIDETAG)
        else {
            lose!("hash table at {:#x} has no index vector", table)
        };
        let Some((next, next_len)) =
            array_data(heap, slot(hash_table::NEXT_VECTOR), SIMPLE_ARRAY_WORD_WIDETAG)
        else {
            lose!("hash table at {:#x} has no next vector", table)
        };
        let hash_obj = slot(hash_table::HASH_VECTOR);
        let hash = if hash_obj == NIL {
            None
        } else {
            match array_data(heap, hash_obj, SIMPLE_ARRAY_WORD_WIDETAG) {
                Some((hash, hash_len)) => {
                    gc_assert!(
                        hash_len == next_len,
                        "hash table at {:#x}: hash vector length {} != next vector length {}",
                        table,
                        hash_len,
                        next_len
                    );
                    Some(hash)
                }
                None => lose!("hash table at {:#x} has a bad hash vector {:?}", table, hash_obj),
            }
        };
        gc_assert!(
            next_len * 2 == kv_len,
            "hash table at {:#x}: next vector length {} does not match {} key/value slots",
            table,
            next_len,
            kv_len
        );

        let empty = heap.load(kv + N_WORD_BYTES);
        gc_assert!(
            empty.lowtag() == OTHER_POINTER_LOWTAG
                && heap.load(empty.native_pointer()).widetag() == SYMBOL_HEADER_WIDETAG,
            "hash table at {:#x}: empty marker {:?} is not a symbol",
            table,
            empty
        );

        TableArrays {
            kv,
            index,
            index_len,
            next,
            next_len,
            hash,
            empty,
        }
    }

    fn pair(&self, i: u64) -> Address {
        self.kv + 2 * i * N_WORD_BYTES
    }

    fn next_slot(&self, i: u64) -> Address {
        self.next + i * N_WORD_BYTES
    }
}

impl Heap {
    /// Insert `key` into `table`. Fixnum keys hash by value, anything else
    /// by address. Duplicate keys are not detected.
    pub fn hash_table_put(&mut self, table: LispObj, key: LispObj, value: LispObj) -> Result<(), GcError> {
        let base = table.native_pointer();
        let arrays = TableArrays::load(self, base);
        let free = self.load_slot(base, hash_table::NEXT_FREE_KV).fixnum_value() as u64;
        if free == 0 {
            return Err(GcError::InvalidObject(format!("hash table {table:?} is full")));
        }
        let next_free = self.load_raw(arrays.next_slot(free));
        self.store_slot(base, hash_table::NEXT_FREE_KV, LispObj::fixnum(next_free as i64));

        let pair = arrays.pair(free);
        self.store(pair, key);
        self.store(pair + N_WORD_BYTES, value);

        let hash = if key.is_fixnum() {
            key.fixnum_value() as u64
        } else {
            key.raw() >> N_LOWTAG_BITS
        };
        if let Some(hash_vec) = arrays.hash {
            let stored = if key.is_fixnum() { hash } else { MAGIC_HASH_VECTOR_VALUE };
            self.store_raw(hash_vec + free * N_WORD_BYTES, stored);
        }

        let bucket = arrays.index + (hash % arrays.index_len) * N_WORD_BYTES;
        let head = self.load_raw(bucket);
        self.store_raw(arrays.next_slot(free), head);
        self.store_raw(bucket, free);

        let count = self.load_slot(base, hash_table::NUMBER_ENTRIES).fixnum_value();
        self.store_slot(base, hash_table::NUMBER_ENTRIES, LispObj::fixnum(count + 1));
        Ok(())
    }

    /// Occupied entries of `table`, by pair index.
    pub fn hash_table_entries(&self, table: LispObj) -> Vec<(LispObj, LispObj)> {
        let arrays = TableArrays::load(self, table.native_pointer());
        (1..arrays.next_len)
            .map(|i| {
                let pair = arrays.pair(i);
                (self.load(pair), self.load(pair + N_WORD_BYTES))
            })
            .filter(|&(key, _)| key != arrays.empty)
            .collect()
    }
}

impl Collector<'_> {
    /// A simple vector. Only key/value vectors of hash tables need more
    /// than the generic word-by-word scan.
    pub(crate) fn scav_vector(&mut self, where_: Address, header: LispObj) -> u64 {
        let length = self.heap.load_slot(where_, vector::LENGTH).fixnum_value() as u64;
        let nwords = ceiling(length + vector::DATA, 2);
        if header.header_value() != VECTOR_VALID_HASHING_SUBTYPE {
            return 1;
        }

        let data = where_ + vector::DATA * N_WORD_BYTES;
        self.scavenge(data, 1);
        let table_obj = self.heap.load(data);
        if !table_obj.is_pointer() {
            corruption_warning_and_maybe_lose(
                self.heap.config().lose_on_corruption,
                &format!("no pointer at {:#x} in hash table key/value vector", data),
            );
            // Header, length and the bad word; the rest is scanned normally.
            return 3;
        }
        let table = table_obj.native_pointer();
        if self.heap.load(table).widetag() != INSTANCE_HEADER_WIDETAG {
            lose!("hash table {:?} referenced from {:#x} is not an instance", table_obj, where_);
        }

        self.scavenge(data + N_WORD_BYTES, 1);
        let empty = self.heap.load(data + N_WORD_BYTES);
        if !empty.is_pointer() {
            lose!("hash table {:?} has a non-pointer empty marker {:?}", table_obj, empty);
        }

        self.scavenge(table, ceiling(hash_table::N_SLOTS + 1, 2));
        let kv_obj = self.heap.load_slot(table, hash_table::TABLE);
        if kv_obj.native_pointer() != where_ {
            lose!(
                "hash table {:?} does not own key/value vector {:#x} (it has {:?})",
                table_obj,
                where_,
                kv_obj
            );
        }

        if Weakness::from_slot(self.heap.load_slot(table, hash_table::WEAKNESS)).is_none() {
            self.scav_hash_table_entries(table);
        } else if self.weak_tables.register(table) {
            trace!("Deferring weak hash table at {:#x}", table);
        }
        nwords
    }

    /// Trace the entries of `table` that its weakness policy keeps alive
    /// (all of them for a non-weak table), flagging the table for
    /// rehashing when an address-hashed key moves.
    pub fn scav_hash_table_entries(&mut self, table: Address) {
        let arrays = TableArrays::load(self.heap, table);
        let weakness = Weakness::from_slot(self.heap.load_slot(table, hash_table::WEAKNESS));

        for i in 1..arrays.next_len {
            let pair = arrays.pair(i);
            let old_key = self.heap.load(pair);
            let value = self.heap.load(pair + N_WORD_BYTES);
            if let Some(weakness) = weakness {
                if !weakness.entry_alive(self.heap, old_key, value) {
                    continue;
                }
            }

            self.scavenge(pair, 2);
            let new_key = self.heap.load(pair);
            if old_key != new_key && new_key != arrays.empty {
                let address_hashed = match arrays.hash {
                    None => true,
                    Some(hash) => self.heap.load_raw(hash + i * N_WORD_BYTES) == MAGIC_HASH_VECTOR_VALUE,
                };
                if address_hashed && self.heap.load_slot(table, hash_table::NEEDS_REHASH_P) != T {
                    trace!("Hash table at {:#x} needs rehash: key {:?} moved", table, old_key);
                    self.heap.store_slot(table, hash_table::NEEDS_REHASH_P, T);
                    self.stats.tables_needing_rehash += 1;
                }
            }
        }
    }

    /// Trace the live entries of every queued weak table.
    pub fn scav_weak_hash_tables(&mut self) {
        // Tracing may queue more tables; pick those up too.
        let mut i = 0;
        while i < self.weak_tables.tables.len() {
            let table = self.weak_tables.tables[i];
            self.scav_hash_table_entries(table);
            i += 1;
        }
    }

    /// Remove the entries of every queued weak table that did not survive.
    pub fn scan_weak_hash_tables(&mut self) {
        let tables = std::mem::take(&mut self.weak_tables);
        debug!("Scanning {} weak hash tables", tables.len());
        for table in tables.tables {
            self.scan_weak_hash_table(table);
        }
    }

    fn scan_weak_hash_table(&mut self, table: Address) {
        let arrays = TableArrays::load(self.heap, table);
        let Some(weakness) = Weakness::from_slot(self.heap.load_slot(table, hash_table::WEAKNESS)) else {
            lose!("hash table at {:#x} was queued but is not weak", table);
        };

        for bucket in 0..arrays.index_len {
            let mut prev = arrays.index + bucket * N_WORD_BYTES;
            let mut index = self.heap.load_raw(prev);
            while index != 0 {
                gc_assert!(
                    index < arrays.next_len,
                    "hash table at {:#x}: chain index {} out of range",
                    table,
                    index
                );
                let pair = arrays.pair(index);
                let next = self.heap.load_raw(arrays.next_slot(index));
                let key = self.heap.load(pair);
                let value = self.heap.load(pair + N_WORD_BYTES);

                if weakness.entry_alive(self.heap, key, value) {
                    prev = arrays.next_slot(index);
                } else {
                    trace!("Removing entry {} from weak hash table {:#x}", index, table);
                    self.heap.store_raw(prev, next);
                    self.free_entry(table, &arrays, index);
                }
                index = next;
            }
        }
    }

    fn free_entry(&mut self, table: Address, arrays: &TableArrays, index: u64) {
        let count = self.heap.load_slot(table, hash_table::NUMBER_ENTRIES).fixnum_value();
        gc_assert!(count > 0, "hash table at {:#x}: entry count underflow", table);
        self.heap
            .store_slot(table, hash_table::NUMBER_ENTRIES, LispObj::fixnum(count - 1));

        let free = self.heap.load_slot(table, hash_table::NEXT_FREE_KV).fixnum_value();
        self.heap.store_raw(arrays.next_slot(index), free as u64);
        self.heap
            .store_slot(table, hash_table::NEXT_FREE_KV, LispObj::fixnum(index as i64));

        let pair = arrays.pair(index);
        self.heap.store(pair, arrays.empty);
        self.heap.store(pair + N_WORD_BYTES, arrays.empty);
        if let Some(hash) = arrays.hash {
            self.heap.store_raw(hash + index * N_WORD_BYTES, MAGIC_HASH_VECTOR_VALUE);
        }
        self.stats.weak_entries_removed += 1;
    }
}
