//! Widetag codes. Every code has its two low bits equal to `0b10`, so a
//! header or other-immediate word can never be mistaken for a fixnum or a
//! pointer.

pub const BIGNUM_WIDETAG: u8 = 0x0A;
pub const RATIO_WIDETAG: u8 = 0x0E;
pub const SINGLE_FLOAT_WIDETAG: u8 = 0x12;
pub const DOUBLE_FLOAT_WIDETAG: u8 = 0x16;
pub const COMPLEX_WIDETAG: u8 = 0x1A;
pub const COMPLEX_SINGLE_FLOAT_WIDETAG: u8 = 0x1E;
pub const COMPLEX_DOUBLE_FLOAT_WIDETAG: u8 = 0x22;

pub const SIMPLE_ARRAY_WIDETAG: u8 = 0x26;
pub const SIMPLE_ARRAY_NIL_WIDETAG: u8 = 0x2A;
pub const SIMPLE_BASE_STRING_WIDETAG: u8 = 0x2E;
pub const SIMPLE_CHARACTER_STRING_WIDETAG: u8 = 0x32;
pub const SIMPLE_BIT_VECTOR_WIDETAG: u8 = 0x36;
pub const SIMPLE_VECTOR_WIDETAG: u8 = 0x3A;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_2_WIDETAG: u8 = 0x3E;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_4_WIDETAG: u8 = 0x42;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_7_WIDETAG: u8 = 0x46;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG: u8 = 0x4A;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_15_WIDETAG: u8 = 0x4E;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_16_WIDETAG: u8 = 0x52;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_31_WIDETAG: u8 = 0x56;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_32_WIDETAG: u8 = 0x5A;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_60_WIDETAG: u8 = 0x5E;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_63_WIDETAG: u8 = 0x62;
pub const SIMPLE_ARRAY_UNSIGNED_BYTE_64_WIDETAG: u8 = 0x66;
pub const SIMPLE_ARRAY_SIGNED_BYTE_8_WIDETAG: u8 = 0x6A;
pub const SIMPLE_ARRAY_SIGNED_BYTE_16_WIDETAG: u8 = 0x6E;
pub const SIMPLE_ARRAY_SIGNED_BYTE_32_WIDETAG: u8 = 0x72;
pub const SIMPLE_ARRAY_SIGNED_BYTE_64_WIDETAG: u8 = 0x76;
pub const SIMPLE_ARRAY_SINGLE_FLOAT_WIDETAG: u8 = 0x7A;
pub const SIMPLE_ARRAY_DOUBLE_FLOAT_WIDETAG: u8 = 0x7E;
pub const SIMPLE_ARRAY_COMPLEX_SINGLE_FLOAT_WIDETAG: u8 = 0x82;
pub const SIMPLE_ARRAY_COMPLEX_DOUBLE_FLOAT_WIDETAG: u8 = 0x86;
pub const COMPLEX_BASE_STRING_WIDETAG: u8 = 0x8A;
pub const COMPLEX_CHARACTER_STRING_WIDETAG: u8 = 0x8E;
pub const COMPLEX_VECTOR_NIL_WIDETAG: u8 = 0x92;
pub const COMPLEX_BIT_VECTOR_WIDETAG: u8 = 0x96;
pub const COMPLEX_VECTOR_WIDETAG: u8 = 0x9A;
pub const COMPLEX_ARRAY_WIDETAG: u8 = 0x9E;

pub const CODE_HEADER_WIDETAG: u8 = 0xA2;
pub const SIMPLE_FUN_HEADER_WIDETAG: u8 = 0xA6;
pub const RETURN_PC_HEADER_WIDETAG: u8 = 0xAA;
pub const CLOSURE_HEADER_WIDETAG: u8 = 0xAE;
pub const FUNCALLABLE_INSTANCE_HEADER_WIDETAG: u8 = 0xB2;

pub const VALUE_CELL_HEADER_WIDETAG: u8 = 0xB6;
pub const SYMBOL_HEADER_WIDETAG: u8 = 0xBA;
pub const CHARACTER_WIDETAG: u8 = 0xBE;
pub const SAP_WIDETAG: u8 = 0xC2;
pub const UNBOUND_MARKER_WIDETAG: u8 = 0xC6;
pub const WEAK_POINTER_WIDETAG: u8 = 0xCA;
pub const INSTANCE_HEADER_WIDETAG: u8 = 0xCE;
pub const FDEFN_WIDETAG: u8 = 0xD2;
pub const NO_TLS_VALUE_MARKER_WIDETAG: u8 = 0xD6;

/// Header payload of a simple vector whose contents are laid out as a
/// hash table's key/value pairs.
pub const VECTOR_NORMAL_SUBTYPE: u64 = 0;
pub const VECTOR_VALID_HASHING_SUBTYPE: u64 = 2;

/// Unsigned-word vectors share the 64-bit element code.
pub const SIMPLE_ARRAY_WORD_WIDETAG: u8 = SIMPLE_ARRAY_UNSIGNED_BYTE_64_WIDETAG;

/// Widetags whose word is a complete immediate value rather than the
/// header of a heap object.
pub const fn is_immediate_widetag(widetag: u8) -> bool {
    matches!(
        widetag,
        CHARACTER_WIDETAG
            | UNBOUND_MARKER_WIDETAG
            | NO_TLS_VALUE_MARKER_WIDETAG
            | SINGLE_FLOAT_WIDETAG
    )
}

pub fn widetag_name(widetag: u8) -> &'static str {
    match widetag {
        BIGNUM_WIDETAG => "bignum",
        RATIO_WIDETAG => "ratio",
        SINGLE_FLOAT_WIDETAG => "single-float",
        DOUBLE_FLOAT_WIDETAG => "double-float",
        COMPLEX_WIDETAG => "complex",
        COMPLEX_SINGLE_FLOAT_WIDETAG => "complex-single-float",
        COMPLEX_DOUBLE_FLOAT_WIDETAG => "complex-double-float",
        SIMPLE_ARRAY_WIDETAG => "simple-array",
        SIMPLE_ARRAY_NIL_WIDETAG => "simple-array-nil",
        SIMPLE_BASE_STRING_WIDETAG => "simple-base-string",
        SIMPLE_CHARACTER_STRING_WIDETAG => "simple-character-string",
        SIMPLE_BIT_VECTOR_WIDETAG => "simple-bit-vector",
        SIMPLE_VECTOR_WIDETAG => "simple-vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_2_WIDETAG => "(unsigned-byte 2) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_4_WIDETAG => "(unsigned-byte 4) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_7_WIDETAG => "(unsigned-byte 7) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_8_WIDETAG => "(unsigned-byte 8) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_15_WIDETAG => "(unsigned-byte 15) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_16_WIDETAG => "(unsigned-byte 16) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_31_WIDETAG => "(unsigned-byte 31) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_32_WIDETAG => "(unsigned-byte 32) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_60_WIDETAG => "(unsigned-byte 60) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_63_WIDETAG => "(unsigned-byte 63) vector",
        SIMPLE_ARRAY_UNSIGNED_BYTE_64_WIDETAG => "(unsigned-byte 64) vector",
        SIMPLE_ARRAY_SIGNED_BYTE_8_WIDETAG => "(signed-byte 8) vector",
        SIMPLE_ARRAY_SIGNED_BYTE_16_WIDETAG => "(signed-byte 16) vector",
        SIMPLE_ARRAY_SIGNED_BYTE_32_WIDETAG => "(signed-byte 32) vector",
        SIMPLE_ARRAY_SIGNED_BYTE_64_WIDETAG => "(signed-byte 64) vector",
        SIMPLE_ARRAY_SINGLE_FLOAT_WIDETAG => "single-float vector",
        SIMPLE_ARRAY_DOUBLE_FLOAT_WIDETAG => "double-float vector",
        SIMPLE_ARRAY_COMPLEX_SINGLE_FLOAT_WIDETAG => "complex-single-float vector",
        SIMPLE_ARRAY_COMPLEX_DOUBLE_FLOAT_WIDETAG => "complex-double-float vector",
        COMPLEX_BASE_STRING_WIDETAG => "complex-base-string",
        COMPLEX_CHARACTER_STRING_WIDETAG => "complex-character-string",
        COMPLEX_VECTOR_NIL_WIDETAG => "complex-vector-nil",
        COMPLEX_BIT_VECTOR_WIDETAG => "complex-bit-vector",
        COMPLEX_VECTOR_WIDETAG => "complex-vector",
        COMPLEX_ARRAY_WIDETAG => "complex-array",
        CODE_HEADER_WIDETAG => "code-header",
        SIMPLE_FUN_HEADER_WIDETAG => "simple-fun-header",
        RETURN_PC_HEADER_WIDETAG => "return-pc-header",
        CLOSURE_HEADER_WIDETAG => "closure-header",
        FUNCALLABLE_INSTANCE_HEADER_WIDETAG => "funcallable-instance-header",
        VALUE_CELL_HEADER_WIDETAG => "value-cell-header",
        SYMBOL_HEADER_WIDETAG => "symbol-header",
        CHARACTER_WIDETAG => "character",
        SAP_WIDETAG => "sap",
        UNBOUND_MARKER_WIDETAG => "unbound-marker",
        WEAK_POINTER_WIDETAG => "weak-pointer",
        INSTANCE_HEADER_WIDETAG => "instance-header",
        FDEFN_WIDETAG => "fdefn",
        NO_TLS_VALUE_MARKER_WIDETAG => "no-tls-value-marker",
        _ => "unknown-widetag",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_widetag_is_an_other_immediate() {
        for tag in 0..=255u8 {
            if widetag_name(tag) != "unknown-widetag" {
                assert_eq!(tag & 3, 2, "{} has a non-header lowtag", widetag_name(tag));
            }
        }
    }
}
