//! Word offsets of the fixed-shape objects the collector looks inside.
//!
//! All offsets count words from the object start (the header word, or the
//! car for conses).

use crate::tag_ptr::{LispObj, FUN_POINTER_LOWTAG, N_WORD_BYTES};

pub mod cons {
    pub const CAR: u64 = 0;
    pub const CDR: u64 = 1;
    pub const SIZE: u64 = 2;
}

pub mod symbol {
    pub const VALUE: u64 = 1;
    pub const HASH: u64 = 2;
    pub const PLIST: u64 = 3;
    pub const NAME: u64 = 4;
    pub const PACKAGE: u64 = 5;
    pub const SIZE: u64 = 6;
}

/// Simple vectors, strings and the specialised unboxed vectors.
pub mod vector {
    pub const LENGTH: u64 = 1;
    pub const DATA: u64 = 2;
}

/// Instance slot 0 holds the layout; raw (untagged) slots come last.
pub mod instance {
    pub const LAYOUT: u64 = 1;
}

/// A layout is itself an instance; this slot counts its owner's
/// untagged trailing slots as a fixnum.
pub mod layout {
    pub const N_UNTAGGED_SLOTS: u64 = 2;
    /// Slot count stored in a layout's header.
    pub const N_SLOTS: u64 = 3;
}

pub mod hash_table {
    pub const TABLE: u64 = 2;
    pub const INDEX_VECTOR: u64 = 3;
    pub const NEXT_VECTOR: u64 = 4;
    pub const HASH_VECTOR: u64 = 5;
    pub const WEAKNESS: u64 = 6;
    pub const NEEDS_REHASH_P: u64 = 7;
    pub const NUMBER_ENTRIES: u64 = 8;
    pub const NEXT_FREE_KV: u64 = 9;
    /// Slot count stored in a hash table's header (layout included).
    pub const N_SLOTS: u64 = 9;
}

pub mod weak_pointer {
    pub const VALUE: u64 = 1;
    pub const BROKEN: u64 = 2;
    pub const NEXT: u64 = 3;
    pub const SIZE: u64 = 4;
}

pub mod code {
    pub const CODE_SIZE: u64 = 1;
    pub const ENTRY_POINTS: u64 = 2;
    pub const DEBUG_INFO: u64 = 3;
    pub const TRACE_TABLE_OFFSET: u64 = 4;
    /// Boxed constants start here.
    pub const CONSTANTS: u64 = 5;
}

pub mod simple_fun {
    pub const SELF: u64 = 1;
    pub const NEXT: u64 = 2;
    pub const NAME: u64 = 3;
    pub const ARGLIST: u64 = 4;
    pub const TYPE: u64 = 5;
    pub const INFO: u64 = 6;
    /// Instructions start this many words into the simple fun.
    pub const CODE_OFFSET: u64 = 8;
}

pub mod closure {
    pub const FUN: u64 = 1;
    pub const INFO: u64 = 2;
}

pub mod fdefn {
    pub const NAME: u64 = 1;
    pub const FUN: u64 = 2;
    pub const RAW_ADDR: u64 = 3;
    pub const SIZE: u64 = 4;
}

/// Distance from a tagged function pointer to the first instruction of
/// the function. Closures, fdefns and a simple fun's self slot store the
/// function this way so calls can jump straight through them.
pub const FUN_RAW_ADDR_OFFSET: u64 = simple_fun::CODE_OFFSET * N_WORD_BYTES - FUN_POINTER_LOWTAG as u64;

/// Raw entry address for a tagged function pointer.
pub fn fun_raw_addr(fun: LispObj) -> u64 {
    fun.raw().wrapping_add(FUN_RAW_ADDR_OFFSET)
}

/// Tagged function pointer recovered from a raw entry address.
pub fn fun_from_raw_addr(raw: u64) -> LispObj {
    LispObj(raw.wrapping_sub(FUN_RAW_ADDR_OFFSET))
}

/// Sentinel stored in a hash table's hash vector for keys hashed by
/// address.
pub const MAGIC_HASH_VECTOR_VALUE: u64 = 1 << 63;
