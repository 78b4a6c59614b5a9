use std::fmt::Debug;

/// A byte address in the collector's address space.
pub type Address = u64;

pub const N_WORD_BYTES: u64 = 8;
pub const N_WORD_BITS: u32 = 64;
pub const N_LOWTAG_BITS: u32 = 3;
pub const LOWTAG_MASK: u64 = (1 << N_LOWTAG_BITS) - 1;
pub const N_WIDETAG_BITS: u32 = 8;
pub const WIDETAG_MASK: u64 = (1 << N_WIDETAG_BITS) - 1;
pub const N_FIXNUM_TAG_BITS: u32 = 2;

pub const EVEN_FIXNUM_LOWTAG: u8 = 0;
pub const INSTANCE_POINTER_LOWTAG: u8 = 1;
pub const OTHER_IMMEDIATE_0_LOWTAG: u8 = 2;
pub const LIST_POINTER_LOWTAG: u8 = 3;
pub const ODD_FIXNUM_LOWTAG: u8 = 4;
pub const FUN_POINTER_LOWTAG: u8 = 5;
pub const OTHER_IMMEDIATE_1_LOWTAG: u8 = 6;
pub const OTHER_POINTER_LOWTAG: u8 = 7;

/// The pointer kinds a lowtag can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Instance,
    List,
    Fun,
    Other,
}

impl PointerKind {
    pub const fn lowtag(self) -> u8 {
        match self {
            PointerKind::Instance => INSTANCE_POINTER_LOWTAG,
            PointerKind::List => LIST_POINTER_LOWTAG,
            PointerKind::Fun => FUN_POINTER_LOWTAG,
            PointerKind::Other => OTHER_POINTER_LOWTAG,
        }
    }

    pub const fn from_lowtag(lowtag: u8) -> Option<Self> {
        match lowtag {
            INSTANCE_POINTER_LOWTAG => Some(PointerKind::Instance),
            LIST_POINTER_LOWTAG => Some(PointerKind::List),
            FUN_POINTER_LOWTAG => Some(PointerKind::Fun),
            OTHER_POINTER_LOWTAG => Some(PointerKind::Other),
            _ => None,
        }
    }
}

/// A decoded machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    /// Small integer, value already shifted down.
    Fixnum(i64),
    /// Tagged pointer. `addr` is the untagged object start.
    Pointer { addr: Address, kind: PointerKind },
    /// Header word or other immediate: low byte is the widetag, the rest
    /// is the header payload.
    Other { widetag: u8, payload: u64 },
}

/// A tagged machine word, either an immediate or a pointer with a lowtag.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LispObj(pub u64);

impl LispObj {
    pub const ZERO: LispObj = LispObj(0);

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn lowtag(self) -> u8 {
        (self.0 & LOWTAG_MASK) as u8
    }

    pub const fn widetag(self) -> u8 {
        (self.0 & WIDETAG_MASK) as u8
    }

    pub const fn header_value(self) -> u64 {
        self.0 >> N_WIDETAG_BITS
    }

    pub const fn is_pointer(self) -> bool {
        self.0 & 1 == 1
    }

    pub const fn is_fixnum(self) -> bool {
        self.0 & ((1 << N_FIXNUM_TAG_BITS) - 1) == 0
    }

    /// Untagged address of a pointer word.
    pub const fn native_pointer(self) -> Address {
        self.0 & !LOWTAG_MASK
    }

    pub fn pointer_kind(self) -> Option<PointerKind> {
        if self.is_pointer() {
            PointerKind::from_lowtag(self.lowtag())
        } else {
            None
        }
    }

    pub fn fixnum(n: i64) -> Self {
        debug_assert!(
            n >= i64::MIN >> N_FIXNUM_TAG_BITS && n <= i64::MAX >> N_FIXNUM_TAG_BITS,
            "fixnum out of range: {n}"
        );
        LispObj((n << N_FIXNUM_TAG_BITS) as u64)
    }

    pub const fn fixnum_value(self) -> i64 {
        (self.0 as i64) >> N_FIXNUM_TAG_BITS
    }

    pub fn from_pointer(addr: Address, kind: PointerKind) -> Self {
        assert!(
            addr & LOWTAG_MASK == 0,
            "misaligned object address {addr:#x}"
        );
        LispObj(addr | kind.lowtag() as u64)
    }

    pub const fn header(widetag: u8, payload: u64) -> Self {
        LispObj((payload << N_WIDETAG_BITS) | widetag as u64)
    }

    /// Replace the payload of a header word, keeping its widetag.
    pub const fn with_header_value(self, payload: u64) -> Self {
        Self::header(self.widetag(), payload)
    }

    pub fn decode(self) -> Word {
        if self.is_fixnum() {
            return Word::Fixnum(self.fixnum_value());
        }
        match PointerKind::from_lowtag(self.lowtag()) {
            Some(kind) => Word::Pointer {
                addr: self.native_pointer(),
                kind,
            },
            None => Word::Other {
                widetag: self.widetag(),
                payload: self.header_value(),
            },
        }
    }

    pub fn encode(word: Word) -> Self {
        match word {
            Word::Fixnum(n) => Self::fixnum(n),
            Word::Pointer { addr, kind } => Self::from_pointer(addr, kind),
            Word::Other { widetag, payload } => Self::header(widetag, payload),
        }
    }
}

impl Debug for LispObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.decode() {
            Word::Fixnum(n) => write!(f, "#<fixnum {n}>"),
            Word::Pointer { addr, kind } => write!(f, "#<{kind:?} {addr:#x}>"),
            Word::Other { widetag, payload } => write!(
                f,
                "#<{} {payload:#x}>",
                crate::widetag::widetag_name(widetag)
            ),
        }
    }
}

/// Round `n` up to a multiple of `m`.
pub const fn ceiling(n: u64, m: u64) -> u64 {
    n.div_ceil(m) * m
}

/// Words needed to hold `length` elements of `bits` bits each.
pub const fn nwords(length: u64, bits: u64) -> u64 {
    (length * bits).div_ceil(N_WORD_BITS as u64)
}
