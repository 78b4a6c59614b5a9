//! Per-tag handler tables.
//!
//! Every widetag selects three handlers: how to scavenge an object whose
//! header carries it, how to transport such an object out of from-space,
//! and how many words the object occupies. The lowtag gets a coarse table
//! of its own for words the low three bits already classify.
//!
//! Tables start out with every slot set to `Lose` so that a tag nobody
//! registered is a fatal error the first time it is seen.

use std::sync::OnceLock;

use crate::{
    heap::Heap,
    layout::{code, vector, weak_pointer},
    lose,
    tag_ptr::{
        ceiling, nwords, Address, PointerKind, EVEN_FIXNUM_LOWTAG, FUN_POINTER_LOWTAG,
        INSTANCE_POINTER_LOWTAG, LIST_POINTER_LOWTAG, N_LOWTAG_BITS, N_WIDETAG_BITS,
        ODD_FIXNUM_LOWTAG, OTHER_POINTER_LOWTAG,
    },
    widetag::*,
};

/// Scavenge handlers. The pointer variants only ever appear in slots
/// selected by a pointer lowtag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScavFn {
    Lose,
    Immediate,
    ListPointer,
    FunPointer,
    InstancePointer,
    OtherPointer,
    /// Header of an object whose slots are all tagged; the slots are
    /// scanned as ordinary words after it.
    Boxed,
    /// Skip the whole object.
    Unboxed,
    Instance,
    Closure,
    Fdefn,
    Vector,
    CodeHeader,
    FunHeader,
    ReturnPcHeader,
    WeakPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransFn {
    Lose,
    /// Flat copy onto a boxed page.
    Boxed,
    /// Flat copy onto an unboxed page.
    Unboxed,
    Code,
    FunHeader,
    ReturnPcHeader,
    WeakPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFn {
    Lose,
    Immediate,
    Pointer,
    Boxed,
    Unboxed,
    Vector,
    VectorNil,
    /// Unboxed vector of `n`-bit elements.
    VectorBits(u32),
    /// String of `n`-bit characters with a hidden terminator.
    String(u32),
    Code,
    WeakPointer,
}

const N_WIDETAGS: usize = 1 << N_WIDETAG_BITS;
const N_LOWTAGS: usize = 1 << N_LOWTAG_BITS;

pub struct DispatchTables {
    scav: [ScavFn; N_WIDETAGS],
    lowtag_scav: [ScavFn; N_LOWTAGS],
    trans: [TransFn; N_WIDETAGS],
    size: [SizeFn; N_WIDETAGS],
}

impl DispatchTables {
    fn new() -> Self {
        let mut t = DispatchTables {
            scav: [ScavFn::Lose; N_WIDETAGS],
            lowtag_scav: [ScavFn::Lose; N_LOWTAGS],
            trans: [TransFn::Lose; N_WIDETAGS],
            size: [SizeFn::Lose; N_WIDETAGS],
        };

        // Any byte whose low bits form a fixnum or pointer lowtag.
        for i in 0..(1usize << (N_WIDETAG_BITS - N_LOWTAG_BITS)) {
            let slot = |lowtag: u8| lowtag as usize | (i << N_LOWTAG_BITS);
            for (lowtag, scav) in [
                (EVEN_FIXNUM_LOWTAG, ScavFn::Immediate),
                (ODD_FIXNUM_LOWTAG, ScavFn::Immediate),
                (FUN_POINTER_LOWTAG, ScavFn::FunPointer),
                (LIST_POINTER_LOWTAG, ScavFn::ListPointer),
                (INSTANCE_POINTER_LOWTAG, ScavFn::InstancePointer),
                (OTHER_POINTER_LOWTAG, ScavFn::OtherPointer),
            ] {
                t.scav[slot(lowtag)] = scav;
                t.size[slot(lowtag)] = if scav == ScavFn::Immediate {
                    SizeFn::Immediate
                } else {
                    SizeFn::Pointer
                };
                t.lowtag_scav[lowtag as usize] = scav;
            }
        }

        for tag in [
            BIGNUM_WIDETAG,
            DOUBLE_FLOAT_WIDETAG,
            SAP_WIDETAG,
            COMPLEX_SINGLE_FLOAT_WIDETAG,
            COMPLEX_DOUBLE_FLOAT_WIDETAG,
        ] {
            t.register(tag, ScavFn::Unboxed, TransFn::Unboxed, SizeFn::Unboxed);
        }
        for tag in [
            SINGLE_FLOAT_WIDETAG,
            CHARACTER_WIDETAG,
            UNBOUND_MARKER_WIDETAG,
            NO_TLS_VALUE_MARKER_WIDETAG,
        ] {
            t.register(tag, ScavFn::Immediate, TransFn::Lose, SizeFn::Immediate);
        }
        for tag in [
            RATIO_WIDETAG,
            COMPLEX_WIDETAG,
            SIMPLE_ARRAY_WIDETAG,
            COMPLEX_BASE_STRING_WIDETAG,
            COMPLEX_CHARACTER_STRING_WIDETAG,
            COMPLEX_VECTOR_NIL_WIDETAG,
            COMPLEX_BIT_VECTOR_WIDETAG,
            COMPLEX_VECTOR_WIDETAG,
            COMPLEX_ARRAY_WIDETAG,
            FUNCALLABLE_INSTANCE_HEADER_WIDETAG,
            VALUE_CELL_HEADER_WIDETAG,
            SYMBOL_HEADER_WIDETAG,
        ] {
            t.register(tag, ScavFn::Boxed, TransFn::Boxed, SizeFn::Boxed);
        }
        t.register(INSTANCE_HEADER_WIDETAG, ScavFn::Instance, TransFn::Boxed, SizeFn::Boxed);
        t.register(CLOSURE_HEADER_WIDETAG, ScavFn::Closure, TransFn::Boxed, SizeFn::Boxed);
        t.register(FDEFN_WIDETAG, ScavFn::Fdefn, TransFn::Boxed, SizeFn::Boxed);

        t.register(SIMPLE_VECTOR_WIDETAG, ScavFn::Vector, TransFn::Boxed, SizeFn::Vector);
        t.register(SIMPLE_ARRAY_NIL_WIDETAG, ScavFn::Unboxed, TransFn::Unboxed, SizeFn::VectorNil);
        t.register(SIMPLE_BASE_STRING_WIDETAG, ScavFn::Unboxed, TransFn::Unboxed, SizeFn::String(8));
        t.register(
            SIMPLE_CHARACTER_STRING_WIDETAG,
            ScavFn::Unboxed,
            TransFn::Unboxed,
            SizeFn::String(32),
        );
        for (tag, bits) in [
            (SIMPLE_BIT_VECTOR_WIDETAG, 1),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_2_WIDETAG, 2),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_4_WIDETAG, 4),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_7_WIDETAG, 8),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG, 8),
            (SIMPLE_ARRAY_SIGNED_BYTE_8_WIDETAG, 8),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_15_WIDETAG, 16),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_16_WIDETAG, 16),
            (SIMPLE_ARRAY_SIGNED_BYTE_16_WIDETAG, 16),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_31_WIDETAG, 32),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_32_WIDETAG, 32),
            (SIMPLE_ARRAY_SIGNED_BYTE_32_WIDETAG, 32),
            (SIMPLE_ARRAY_SINGLE_FLOAT_WIDETAG, 32),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_60_WIDETAG, 64),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_63_WIDETAG, 64),
            (SIMPLE_ARRAY_UNSIGNED_BYTE_64_WIDETAG, 64),
            (SIMPLE_ARRAY_SIGNED_BYTE_64_WIDETAG, 64),
            (SIMPLE_ARRAY_DOUBLE_FLOAT_WIDETAG, 64),
            (SIMPLE_ARRAY_COMPLEX_SINGLE_FLOAT_WIDETAG, 64),
            (SIMPLE_ARRAY_COMPLEX_DOUBLE_FLOAT_WIDETAG, 128),
        ] {
            t.register(tag, ScavFn::Unboxed, TransFn::Unboxed, SizeFn::VectorBits(bits));
        }

        t.register(CODE_HEADER_WIDETAG, ScavFn::CodeHeader, TransFn::Code, SizeFn::Code);
        t.register(SIMPLE_FUN_HEADER_WIDETAG, ScavFn::FunHeader, TransFn::FunHeader, SizeFn::Lose);
        t.register(
            RETURN_PC_HEADER_WIDETAG,
            ScavFn::ReturnPcHeader,
            TransFn::ReturnPcHeader,
            SizeFn::Lose,
        );
        t.register(
            WEAK_POINTER_WIDETAG,
            ScavFn::WeakPointer,
            TransFn::WeakPointer,
            SizeFn::WeakPointer,
        );
        t
    }

    fn register(&mut self, widetag: u8, scav: ScavFn, trans: TransFn, size: SizeFn) {
        let i = widetag as usize;
        self.scav[i] = scav;
        self.trans[i] = trans;
        self.size[i] = size;
    }

    pub fn scav(&self, widetag: u8) -> ScavFn {
        self.scav[widetag as usize]
    }

    pub fn scav_pointer(&self, kind: PointerKind) -> ScavFn {
        self.lowtag_scav[kind.lowtag() as usize]
    }

    pub fn trans(&self, widetag: u8) -> TransFn {
        self.trans[widetag as usize]
    }

    pub fn size(&self, widetag: u8) -> SizeFn {
        self.size[widetag as usize]
    }

    /// Words occupied by the object starting at `where_`, judged by the
    /// tag of its first word.
    pub fn size_of(&self, heap: &Heap, where_: Address) -> u64 {
        let first = heap.load(where_);
        match self.size(first.widetag()) {
            SizeFn::Lose => lose!(
                "no size function for object at {:#x} (widetag {:#x})",
                where_,
                first.widetag()
            ),
            SizeFn::Immediate | SizeFn::Pointer => 1,
            SizeFn::Boxed | SizeFn::Unboxed => ceiling(first.header_value() + 1, 2),
            SizeFn::Vector => ceiling(vector_length(heap, where_) + vector::DATA, 2),
            SizeFn::VectorNil => 2,
            SizeFn::VectorBits(bits) => {
                ceiling(nwords(vector_length(heap, where_), bits as u64) + vector::DATA, 2)
            }
            SizeFn::String(bits) => {
                ceiling(nwords(vector_length(heap, where_) + 1, bits as u64) + vector::DATA, 2)
            }
            SizeFn::Code => {
                let ncode = heap.load_slot(where_, code::CODE_SIZE).fixnum_value() as u64;
                ceiling(first.header_value() + ncode, 2)
            }
            SizeFn::WeakPointer => weak_pointer::SIZE,
        }
    }
}

fn vector_length(heap: &Heap, where_: Address) -> u64 {
    heap.load_slot(where_, vector::LENGTH).fixnum_value() as u64
}

static TABLES: OnceLock<DispatchTables> = OnceLock::new();

/// Build the tables on first use; later calls return the same instance.
pub fn init_dispatch_tables() -> &'static DispatchTables {
    TABLES.get_or_init(DispatchTables::new)
}
